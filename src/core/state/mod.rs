pub mod action;
mod history;
#[cfg(test)]
mod tests;
use std::sync::Arc;

use rtrb::Producer;
use serde_json::{Value, json};

use crate::{
    core::{
        chords::ChordEntry,
        clip::TimelineItem,
        song::{BandMix, BarCursor, ChordCell, Section, SongSettings, chord_id},
        state::action::{Command, Mutation, Origin},
        track::Track,
    },
    message::LocalEvent,
};

/// Everything a participant sees of the song. Snapshots are immutable once published.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SongState {
    pub project_id: Option<String>,
    pub title: String,
    pub owner_id: Option<String>,
    pub settings: SongSettings,
    pub sections: Vec<Section>,
    pub selection: Option<BarCursor>,
    pub band: BandMix,
    pub is_playing: bool,
    pub current_beat: u32,
    pub tracks: Vec<Track>,
}

impl SongState {
    /// Flattened chord per bar, in section order.
    pub fn chord_progression(&self) -> Vec<Option<String>> {
        self.sections
            .iter()
            .flat_map(|section| section.bars.iter().map(|bar| bar.chord.clone()))
            .collect()
    }

    /// Non empty bars of the progression with their notes resolved.
    pub fn chord_cells(&self) -> Vec<ChordCell> {
        self.chord_progression()
            .into_iter()
            .enumerate()
            .filter_map(|(index, chord)| {
                chord.map(|name| ChordCell {
                    id: chord_id(index),
                    entry: ChordEntry::resolve(&name),
                })
            })
            .collect()
    }

    /// Cursor of bar `index` of the flattened progression.
    pub fn cursor_at(&self, index: usize) -> Option<BarCursor> {
        let mut first = 0;
        for (section, bars) in self.sections.iter().map(Section::bar_count).enumerate() {
            if index < first + bars {
                return Some(BarCursor {
                    section,
                    bar: index - first,
                });
            }
            first += bars;
        }
        None
    }

    pub fn total_bars(&self) -> usize {
        self.sections.iter().map(Section::bar_count).sum()
    }

    /// End of the last clip over all tracks, in seconds.
    pub fn timeline_length(&self) -> f64 {
        self.tracks.iter().map(Track::end_time).fold(0., f64::max)
    }

    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id == id)
    }

    /// Clip with the given id and the track holding it.
    pub fn find_item(&self, id: &str) -> Option<(&Track, &TimelineItem)> {
        self.tracks
            .iter()
            .find_map(|track| track.item(id).map(|item| (track, item)))
    }

    /// Project fields in the shape of a snapshot payload.
    pub fn project_value(&self) -> Value {
        let settings = &self.settings;
        json!({
            "_id": self.project_id,
            "title": self.title,
            "ownerId": self.owner_id,
            "tempo": settings.bpm,
            "key": settings.key,
            "style": settings.style,
            "swingAmount": settings.swing_amount,
            "timeSignature": settings.time_signature,
            "backingInstrumentId": settings.backing_instrument_id,
            "sections": self.sections,
            "chordProgression": self.chord_progression(),
        })
    }
}

/// Single writer of the song state. Every change goes through `apply`, local edits are
/// pushed to the outbound queue, remote ones never are.
pub struct ProjectStore {
    snapshot: Arc<SongState>,
    tx: Producer<LocalEvent>,
    // History management
    undo_stack: Vec<Arc<SongState>>,
    redo_stack: Vec<Arc<SongState>>,
    revision: u64,
    tracks_revision: u64,
}

impl ProjectStore {
    pub fn new(tx: Producer<LocalEvent>) -> Self {
        Self::with_state(SongState::default(), tx)
    }

    pub fn with_state(state: SongState, tx: Producer<LocalEvent>) -> Self {
        Self {
            snapshot: Arc::new(state),
            tx,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            revision: 0,
            tracks_revision: 0,
        }
    }

    /// Current snapshot. Cloning the `Arc` is cheap and the snapshot never changes underneath.
    pub fn state(&self) -> Arc<SongState> {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> &SongState {
        &self.snapshot
    }

    /// Bumped on every published snapshot.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Bumped whenever the track list differs from the previous snapshot.
    pub fn tracks_revision(&self) -> u64 {
        self.tracks_revision
    }

    /// Apply an edit made by the local user.
    pub fn dispatch(&mut self, command: Command) {
        self.apply(Mutation::local(command));
    }

    /// Apply an edit received from another participant.
    pub fn apply_remote(&mut self, command: Command) {
        self.apply(Mutation::remote(command));
    }

    pub fn apply(&mut self, mutation: Mutation) {
        let Mutation { origin, command } = mutation;
        let mut next = (*self.snapshot).clone();
        let event = action::apply(&mut next, &command);
        if next == *self.snapshot {
            tracing::trace!("{} left the state unchanged", command.name());
            return;
        }
        tracing::debug!("Applying {} ({origin:?})", command.name());

        match (origin, &command) {
            (_, Command::LoadProject(_)) | (Origin::Remote, _) => self.clear_history(),
            (Origin::Local, command) if command.is_undoable() => {
                self.undo_stack.push(self.snapshot.clone());
                self.redo_stack.clear();
            }
            _ => {}
        }

        self.publish(next);
        if let Some(event) = event {
            self.broadcast(origin, event);
        }
    }

    /// Replace the current snapshot and bump the revisions.
    fn publish(&mut self, next: SongState) {
        if next.tracks != self.snapshot.tracks {
            self.tracks_revision += 1;
        }
        self.revision += 1;
        self.snapshot = Arc::new(next);
    }

    fn broadcast(&mut self, origin: Origin, event: LocalEvent) {
        if origin == Origin::Remote {
            return;
        }
        self.send(event);
    }

    /// Queue an event for the other participants.
    pub fn send(&mut self, event: LocalEvent) {
        let topic = event.topic();
        if self.tx.push(event).is_err() {
            tracing::warn!("Outbound queue is full, dropped {topic} event");
        }
    }
}
