use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use crate::{
    audio::{AudioEngine, AudioError, AudioResolver, PlayerSource, PlayerSpec},
    config::Config,
    core::{
        clip::ItemKind,
        pattern::{chord_midi_events, pattern_steps},
        track::Track,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub pixels_per_second: f64,
    /// Minimum time between two observable position updates
    pub publish_interval: Duration,
    pub reschedule_debounce: Duration,
    pub loop_enabled: bool,
    /// Rhythm used for chord clips that have no rendered audio
    pub pattern: String,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PlaybackOptions {
    fn from(config: &Config) -> Self {
        Self {
            pixels_per_second: config.pixels_per_second,
            publish_interval: Duration::from_millis(config.playhead_publish_interval_ms),
            reschedule_debounce: Duration::from_millis(config.reschedule_debounce_ms),
            loop_enabled: config.loop_enabled,
            pattern: config.default_pattern.clone(),
        }
    }
}

/// Result of one sync loop iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutput {
    pub position: f64,
    /// Playhead position to draw this frame
    pub render_px: f64,
    /// Set when the throttled, observable position was refreshed
    pub observable: Option<f64>,
}

/// Drives the transport and the players pool from the timeline tracks.
///
/// Everything runs on the caller's frame loop: `on_frame` must be called once per frame and
/// takes care of the pending reschedule as well as the playhead.
pub struct PlaybackController<A: AudioEngine, R: AudioResolver> {
    engine: Option<A>,
    resolver: R,
    options: PlaybackOptions,
    state: TransportState,
    tracks: Vec<Track>,
    // Playhead
    position: f64,
    last_raw_position: f64,
    render_px: f64,
    observable_position: f64,
    last_publish: Option<Instant>,
    // Scheduling
    scheduling_initial: bool,
    deferred_reschedule: bool,
    reschedule_at: Option<Instant>,
    disposed: bool,
}

impl<A: AudioEngine, R: AudioResolver> PlaybackController<A, R> {
    pub fn new(engine: Option<A>, resolver: R, options: PlaybackOptions) -> Self {
        Self {
            engine,
            resolver,
            options,
            state: TransportState::Stopped,
            tracks: Vec::new(),
            position: 0.,
            last_raw_position: 0.,
            render_px: 0.,
            observable_position: 0.,
            last_publish: None,
            scheduling_initial: false,
            deferred_reschedule: false,
            reschedule_at: None,
            disposed: false,
        }
    }

    /// Hand over the audio engine once it exists.
    pub fn attach(&mut self, engine: A) {
        self.engine = Some(engine);
    }

    pub fn engine(&self) -> Option<&A> {
        self.engine.as_ref()
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    /// Logical playhead position in seconds.
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn render_px(&self) -> f64 {
        self.render_px
    }

    /// Last position published to the slower observers.
    pub fn observable_position(&self) -> f64 {
        self.observable_position
    }

    pub fn loop_enabled(&self) -> bool {
        self.options.loop_enabled
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.options.loop_enabled = enabled;
    }

    pub fn has_pending_reschedule(&self) -> bool {
        self.reschedule_at.is_some()
    }

    pub fn play(&mut self, tracks: &[Track], bpm: f32) {
        if self.disposed {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            tracing::debug!("Play ignored, no audio engine attached");
            return;
        };
        if let Err(err) = engine.ensure_started() {
            tracing::warn!("Could not start audio: {err}");
            return;
        }
        engine.set_bpm(bpm);
        // Keep the playhead where it is while clips are scheduled
        let position = self.position;
        self.render_px = self.to_px(position);

        self.scheduling_initial = true;
        self.deferred_reschedule = false;
        self.reschedule_at = None;
        self.tracks = tracks.to_vec();
        self.schedule_all();

        // Scheduling moves the players away from the transport, position goes last
        if let Some(engine) = self.engine.as_mut() {
            engine.set_position(position);
            engine.start_transport();
        }
        self.last_raw_position = position;
        self.last_publish = None;
        self.state = TransportState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state != TransportState::Playing {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        // Stopping may reset what the transport reports
        let raw = engine.position();
        engine.pause_transport();
        engine.stop_all_players();

        let position = self.advance(raw);
        self.force_position(position);
        self.reschedule_at = None;
        self.scheduling_initial = false;
        self.deferred_reschedule = false;
        self.state = TransportState::Paused;
    }

    /// Halt everything and go back to the start.
    pub fn stop(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.stop_transport();
            engine.stop_all_players();
            engine.set_position(0.);
        }
        self.force_position(0.);
        self.reschedule_at = None;
        self.scheduling_initial = false;
        self.deferred_reschedule = false;
        self.state = TransportState::Stopped;
    }

    pub fn seek(&mut self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds.max(0.) } else { 0. };
        if self.state == TransportState::Playing
            && let Some(engine) = self.engine.as_mut()
        {
            engine.set_position(seconds);
        }
        self.force_position(seconds);
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        if let Some(engine) = self.engine.as_mut() {
            engine.set_bpm(bpm);
        }
    }

    /// New track list. While playing, players are rescheduled once edits settle.
    pub fn set_tracks(&mut self, tracks: &[Track], now: Instant) {
        if self.tracks == tracks {
            return;
        }
        self.tracks = tracks.to_vec();
        if self.state != TransportState::Playing || self.disposed {
            return;
        }
        if self.scheduling_initial {
            // Wait for the first frame of the transport
            tracing::trace!("Track change during initial scheduling, deferred");
            self.deferred_reschedule = true;
            return;
        }
        self.reschedule_at = Some(now + self.options.reschedule_debounce);
    }

    /// One iteration of the sync loop. `None` unless playing.
    pub fn on_frame(&mut self, now: Instant) -> Option<FrameOutput> {
        if self.state != TransportState::Playing || self.disposed {
            return None;
        }
        if self.scheduling_initial {
            self.scheduling_initial = false;
            if std::mem::take(&mut self.deferred_reschedule) {
                self.reschedule_at = Some(now + self.options.reschedule_debounce);
            }
        }
        if let Some(deadline) = self.reschedule_at
            && now >= deadline
        {
            self.reschedule_at = None;
            self.reschedule();
        }

        let raw = self.engine.as_ref()?.position();
        let position = self.advance(raw);
        self.position = position;
        self.render_px = self.to_px(position);

        let due = self
            .last_publish
            .is_none_or(|last| now.saturating_duration_since(last) >= self.options.publish_interval);
        let observable = due.then(|| {
            self.last_publish = Some(now);
            self.observable_position = position;
            position
        });
        Some(FrameOutput {
            position,
            render_px: self.render_px,
            observable,
        })
    }

    /// Stop the transport and release every player. The controller is inert afterwards.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.stop_transport();
            engine.dispose_all_players();
        }
        self.reschedule_at = None;
        self.scheduling_initial = false;
        self.deferred_reschedule = false;
        self.state = TransportState::Stopped;
        self.disposed = true;
    }

    fn to_px(&self, seconds: f64) -> f64 {
        seconds * self.options.pixels_per_second
    }

    fn timeline_length(&self) -> f64 {
        self.tracks.iter().map(Track::end_time).fold(0., f64::max)
    }

    /// Turn a raw transport reading into the playhead position. The reading never goes back
    /// until the next seek, and wraps on the timeline length in loop mode.
    fn advance(&mut self, raw: f64) -> f64 {
        let raw = raw.max(self.last_raw_position);
        self.last_raw_position = raw;
        let length = self.timeline_length();
        if self.options.loop_enabled && length > 0. {
            raw % length
        } else {
            raw
        }
    }

    fn force_position(&mut self, seconds: f64) {
        self.position = seconds;
        self.last_raw_position = seconds;
        self.render_px = self.to_px(seconds);
        self.observable_position = seconds;
        self.last_publish = None;
    }

    fn reschedule(&mut self) {
        let Some(raw) = self.engine.as_ref().map(AudioEngine::position) else {
            return;
        };
        // A transport reading that went back is not where playback is
        let captured = raw.max(self.last_raw_position);
        tracing::debug!("Rescheduling {} tracks at {captured:.3}s", self.tracks.len());
        self.schedule_all();
        if let Some(engine) = self.engine.as_mut() {
            engine.set_position(captured);
        }
        self.last_raw_position = captured;
    }

    /// Schedule a player for every audible clip and drop players of clips that are gone.
    fn schedule_all(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let steps = pattern_steps(&self.options.pattern);
        let mut live = HashSet::new();
        for track in self.tracks.iter().filter(|track| !track.muted) {
            for item in &track.items {
                let source = match self.resolver.resolve(item) {
                    Ok(Some(url)) => PlayerSource::Url(url),
                    Ok(None) if item.kind != ItemKind::Lick => {
                        let events = chord_midi_events(item, item.duration, steps);
                        if events.is_empty() {
                            tracing::debug!("Clip {} has nothing to play", item.id);
                            continue;
                        }
                        PlayerSource::Midi(events)
                    }
                    Ok(None) => {
                        tracing::debug!("No audio source for clip {}", item.id);
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!("Skipped clip {}: {err}", item.id);
                        continue;
                    }
                };
                let spec = PlayerSpec::new(item, source, track.volume);
                match engine.schedule_player(&item.id, &spec) {
                    Ok(()) => {
                        live.insert(item.id.clone());
                    }
                    Err(AudioError::LoadFailed { url, reason }) => {
                        tracing::warn!("Clip {} stays silent, {url} did not load: {reason}", item.id)
                    }
                    Err(err) => tracing::warn!("Skipped clip {}: {err}", item.id),
                }
            }
        }
        for key in engine.player_keys() {
            if !live.contains(&key) {
                engine.remove_player(&key);
            }
        }
    }
}

impl<A: AudioEngine, R: AudioResolver> Drop for PlaybackController<A, R> {
    fn drop(&mut self) {
        self.dispose();
    }
}
