use std::time::Instant;

use crossbeam::channel::Receiver;
use rtrb::{Consumer, RingBuffer};

use crate::{
    audio::{AudioEngine, AudioResolver, FrameOutput, PlaybackController, PlaybackOptions},
    collab::{ProjectRefresher, Reconciler, presence::LocalIdentity},
    config::Config,
    core::state::{ProjectStore, action::Command},
    message::{InboundMessage, LocalEvent},
};

/// One open project: its state, the link to the other participants and the playback.
pub struct Session<A: AudioEngine, R: AudioResolver, P: ProjectRefresher> {
    store: ProjectStore,
    reconciler: Reconciler<P>,
    playback: PlaybackController<A, R>,
    inbound: Receiver<InboundMessage>,
    // Last values handed to the playback controller
    tracks_revision: u64,
    bpm: f32,
}

impl<A: AudioEngine, R: AudioResolver, P: ProjectRefresher> Session<A, R, P> {
    /// Open a session. The returned consumer yields the local edits to send to the others.
    pub fn new(
        identity: LocalIdentity,
        config: &Config,
        inbound: Receiver<InboundMessage>,
        resolver: R,
        refresher: P,
    ) -> (Self, Consumer<LocalEvent>) {
        let (tx, rx) = RingBuffer::new(config.outbound_capacity.max(1));
        let store = ProjectStore::new(tx);
        let bpm = store.snapshot().settings.bpm;
        let session = Self {
            store,
            reconciler: Reconciler::new(identity, refresher),
            playback: PlaybackController::new(None, resolver, PlaybackOptions::from(config)),
            inbound,
            tracks_revision: 0,
            bpm,
        };
        (session, rx)
    }

    pub fn attach_engine(&mut self, engine: A) {
        self.playback.attach(engine);
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler<P> {
        &self.reconciler
    }

    pub fn playback(&self) -> &PlaybackController<A, R> {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackController<A, R> {
        &mut self.playback
    }

    /// Update each frame the session
    pub fn update(&mut self, now: Instant) -> Option<FrameOutput> {
        self.handle_messages();
        self.sync_playback(now);
        self.playback.on_frame(now)
    }

    /// Apply an edit of the local user.
    pub fn dispatch(&mut self, command: Command) {
        self.store.dispatch(command);
    }

    pub fn undo(&mut self) {
        self.store.undo();
    }

    pub fn redo(&mut self) {
        self.store.redo();
    }

    pub fn announce_editing(&mut self, item_id: &str, is_editing: bool) {
        let event = self.reconciler.announce_editing(item_id, is_editing);
        self.store.send(event);
    }

    // Transport
    pub fn play(&mut self) {
        let state = self.store.state();
        self.playback.play(&state.tracks, state.settings.bpm);
        self.tracks_revision = self.store.tracks_revision();
        self.bpm = state.settings.bpm;
        if self.playback.is_playing() {
            self.store.dispatch(Command::SetPlaying(true));
        }
    }

    pub fn pause(&mut self) {
        self.playback.pause();
        self.store.dispatch(Command::SetPlaying(false));
    }

    pub fn stop(&mut self) {
        self.playback.stop();
        self.store.dispatch(Command::SetPlaying(false));
    }

    pub fn seek(&mut self, seconds: f64) {
        self.playback.seek(seconds);
    }

    /// Stop playback and release the audio players.
    pub fn close(&mut self) {
        self.playback.dispose();
        self.store.dispatch(Command::SetPlaying(false));
    }

    // Drain messages received from the project channel
    fn handle_messages(&mut self) {
        while let Ok(message) = self.inbound.try_recv() {
            self.reconciler.handle(&mut self.store, message);
        }
    }

    /// Hand the latest tracks and tempo to the playback controller.
    fn sync_playback(&mut self, now: Instant) {
        let state = self.store.state();
        if self.store.tracks_revision() != self.tracks_revision {
            self.tracks_revision = self.store.tracks_revision();
            self.playback.set_tracks(&state.tracks, now);
        }
        if state.settings.bpm != self.bpm {
            self.bpm = state.settings.bpm;
            self.playback.set_bpm(self.bpm);
        }
    }
}
