use crate::core::{clip::TimelineItem, midi::MidiEvent};

mod controller;
mod resolver;

pub use controller::{FrameOutput, PlaybackController, PlaybackOptions, TransportState};
pub use resolver::{AudioResolver, UrlResolver};

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio engine is not ready")]
    NotReady,
    #[error("could not load {url}: {reason}")]
    LoadFailed { url: String, reason: String },
    #[error("could not resolve the source of clip {item_id}: {reason}")]
    ResolveFailed { item_id: String, reason: String },
}

/// What a player plays.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerSource {
    Url(String),
    Midi(Vec<MidiEvent>),
}

/// Everything a player needs to play one clip on the transport timeline. Times in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSpec {
    pub source: PlayerSource,
    pub start_time: f64,
    pub offset: f64,
    pub duration: f64,
    pub playback_rate: f64,
    pub looped: bool,
    pub volume: f32,
}

impl PlayerSpec {
    pub fn new(item: &TimelineItem, source: PlayerSource, volume: f32) -> Self {
        Self {
            source,
            start_time: item.start_time,
            offset: item.offset,
            duration: item.duration,
            playback_rate: item.playback_rate,
            looped: item.loop_enabled,
            volume,
        }
    }
}

/// Handle on the transport clock and the keyed pool of players for one open project.
/// Only the playback controller drives it.
pub trait AudioEngine {
    /// Wait for the underlying device. Must be called before anything is played.
    fn ensure_started(&mut self) -> Result<(), AudioError>;
    fn set_bpm(&mut self, bpm: f32);
    /// Move the transport, in seconds.
    fn set_position(&mut self, seconds: f64);
    /// Elapsed transport time in seconds.
    fn position(&self) -> f64;
    fn start_transport(&mut self);
    fn pause_transport(&mut self);
    fn stop_transport(&mut self);
    fn is_transport_playing(&self) -> bool;

    // Players pool
    /// Create or replace the player for `key`. A source that cannot be fetched or decoded is
    /// reported as `AudioError::LoadFailed` and the clip stays silent.
    fn schedule_player(&mut self, key: &str, spec: &PlayerSpec) -> Result<(), AudioError>;
    fn remove_player(&mut self, key: &str);
    fn player_keys(&self) -> Vec<String>;
    fn stop_all_players(&mut self);
    fn dispose_all_players(&mut self);
}
