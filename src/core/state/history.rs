use std::sync::Arc;

use crate::{
    core::state::{ProjectStore, SongState},
    message::LocalEvent,
};

impl ProjectStore {
    /// Undo the last local edit. Does nothing if there is no edit.
    pub fn undo(&mut self) {
        if let Some(previous) = self.undo_stack.pop() {
            tracing::debug!("Undoing to revision {}", self.revision + 1);
            let current = self.snapshot.clone();
            self.restore(&previous);
            self.redo_stack.push(current);
        }
    }

    /// Redo the last undone edit. Does nothing if there is no edit.
    pub fn redo(&mut self) {
        if let Some(next) = self.redo_stack.pop() {
            tracing::debug!("Redoing to revision {}", self.revision + 1);
            let current = self.snapshot.clone();
            self.restore(&next);
            self.undo_stack.push(current);
        }
    }

    /// Whether there is still edits to undo
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Whether there is still edits to redo
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// History only covers local edits. Once someone else changed the song it no longer applies.
    pub(super) fn clear_history(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Bring back a document from the history and send it to the others as a snapshot.
    /// Transport and selection are not part of the history.
    fn restore(&mut self, document: &Arc<SongState>) {
        let mut next = (**document).clone();
        next.is_playing = self.snapshot.is_playing;
        next.current_beat = self.snapshot.current_beat;
        next.selection = self.snapshot.selection.filter(|cursor| {
            next.sections
                .get(cursor.section)
                .is_some_and(|section| cursor.bar < section.bar_count())
        });
        let event = LocalEvent::Snapshot {
            project: next.project_value(),
            tracks: next.tracks.clone(),
        };
        self.publish(next);
        self.send(event);
    }
}
