use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no config directory on this platform")]
    NoConfigDir,
}

/// Settings of the jam client. Missing keys take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base of the backend API, used to build lick audio urls
    pub api_base_url: String,
    pub pixels_per_second: f64,
    pub playhead_publish_interval_ms: u64,
    pub reschedule_debounce_ms: u64,
    pub loop_enabled: bool,
    /// Size of the outbound event queue
    pub outbound_capacity: usize,
    /// Rhythm pattern for chord clips without rendered audio
    pub default_pattern: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".into(),
            pixels_per_second: 100.,
            playhead_publish_interval_ms: 100,
            reschedule_debounce_ms: 50,
            loop_enabled: false,
            outbound_capacity: 256,
            default_pattern: crate::core::pattern::DEFAULT_PATTERN.into(),
        }
    }
}

impl Config {
    /// Load config from disk, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = get_config_path() else {
            return Config::default();
        };
        match Config::load_from(&path) {
            Ok(config) => config,
            Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Config::default()
            }
            Err(err) => {
                tracing::warn!("Using default config, {} is unusable: {err}", path.display());
                Config::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = get_config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }
}

/// Returns the configuration file path.
fn get_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "Bytenosis", "Tonique")
        .map(|proj_dirs| proj_dirs.config_dir().join("jam.json"))
}
