use crate::{
    audio::AudioError,
    core::clip::{ItemKind, TimelineItem},
};

/// Finds a playable url for a clip. `Ok(None)` means the clip has no audio of its own.
pub trait AudioResolver {
    fn resolve(&self, item: &TimelineItem) -> Result<Option<String>, AudioError>;
}

/// Resolves licks against the backend and chord or midi clips against their rendered audio.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    api_base_url: String,
}

impl UrlResolver {
    pub fn new(api_base_url: &str) -> Self {
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn lick_url(&self, lick_id: &str) -> String {
        format!("{}/licks/{lick_id}/audio", self.api_base_url)
    }
}

impl AudioResolver for UrlResolver {
    fn resolve(&self, item: &TimelineItem) -> Result<Option<String>, AudioError> {
        let url = match item.kind {
            ItemKind::Lick => match &item.lick_id {
                Some(lick) => lick
                    .audio_url()
                    .map(str::to_string)
                    .or_else(|| Some(lick.id()).filter(|id| !id.is_empty()).map(|id| self.lick_url(id))),
                None => item.audio_url.clone(),
            },
            ItemKind::Chord | ItemKind::Midi => item.audio_url.clone(),
        };
        Ok(url)
    }
}
