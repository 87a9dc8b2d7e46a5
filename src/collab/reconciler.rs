use crate::{
    collab::presence::{
        ACCEPTED_STATUS, ActiveEditor, Collaborator, DEFAULT_ROLE, LocalIdentity, PresenceState,
        RawCollaborator,
    },
    core::{
        song::{ProjectSnapshot, SongSettings},
        state::{ProjectStore, action::Command},
        track::normalize_track,
    },
    message::{
        EditingActivityPayload, InboundMessage, LocalEvent, PresenceKind, PresencePayload,
        RemoteEvent,
    },
};

/// Asks the backend for a full reload of the project.
pub trait ProjectRefresher {
    fn refresh_project(&mut self, show_loading: bool);
}

/// Text of the settings inputs, kept in sync with the canonical settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsDraft {
    pub tempo: String,
    pub swing: String,
    pub key: String,
    pub style: String,
    pub time_signature: String,
}

impl SettingsDraft {
    pub fn from_settings(settings: &SongSettings) -> Self {
        Self {
            tempo: format!("{}", settings.bpm),
            swing: format!("{}", settings.swing_amount),
            key: settings.key.clone(),
            style: settings.style.clone(),
            time_signature: settings.time_signature.to_string(),
        }
    }
}

/// Turns messages from the project channel into remote mutations of the store.
pub struct Reconciler<R: ProjectRefresher> {
    presence: PresenceState,
    drafts: SettingsDraft,
    refresher: R,
}

impl<R: ProjectRefresher> Reconciler<R> {
    pub fn new(identity: LocalIdentity, refresher: R) -> Self {
        Self {
            presence: PresenceState::new(identity),
            drafts: SettingsDraft::from_settings(&SongSettings::default()),
            refresher,
        }
    }

    pub fn presence(&self) -> &PresenceState {
        &self.presence
    }

    pub fn drafts(&self) -> &SettingsDraft {
        &self.drafts
    }

    pub fn drafts_mut(&mut self) -> &mut SettingsDraft {
        &mut self.drafts
    }

    pub fn refresher(&self) -> &R {
        &self.refresher
    }

    /// Decode and apply one channel message. A message that cannot be decoded is dropped.
    pub fn handle(&mut self, store: &mut ProjectStore, message: InboundMessage) {
        match RemoteEvent::parse(&message.topic, message.payload) {
            Ok(event) => self.apply(store, event),
            Err(err) => tracing::warn!("Ignored remote message: {err}"),
        }
    }

    pub fn apply(&mut self, store: &mut ProjectStore, event: RemoteEvent) {
        match event {
            RemoteEvent::ChordProgression(payload) => {
                let chords = payload.chords.into_iter().map(|slot| slot.0).collect();
                store.apply_remote(Command::ReplaceChordProgression(chords));
            }
            RemoteEvent::LickAdd(payload) => match payload.item {
                Some(item) => store.apply_remote(Command::AddTimelineItem {
                    track_id: payload.track_id,
                    item,
                }),
                None => tracing::warn!("lickAdd for track {} carries no item", payload.track_id),
            },
            RemoteEvent::TimelineUpdate(payload) => {
                let item_id = payload.item_id.clone();
                store.apply_remote(Command::UpdateTimelineItem {
                    item_id,
                    patch: payload.into_patch(),
                });
            }
            RemoteEvent::TimelineDelete(payload) => {
                store.apply_remote(Command::DeleteTimelineItem {
                    item_id: payload.item_id,
                });
            }
            RemoteEvent::TimelineBulkUpdate(payload) => {
                store.apply_remote(Command::BulkUpdateTimelineItems(payload.items));
            }
            RemoteEvent::TimelinePositionUpdate(payload) => {
                store.apply_remote(Command::MoveTimelineItem {
                    item_id: payload.item_id,
                    patch: payload.updates,
                });
            }
            RemoteEvent::TrackAdd(payload) => {
                store.apply_remote(Command::AddTrack(normalize_track(payload.track)));
            }
            RemoteEvent::TrackUpdate(payload) => {
                store.apply_remote(Command::UpdateTrack {
                    track_id: payload.track_id,
                    patch: payload.updates,
                });
            }
            RemoteEvent::TrackDelete(payload) => {
                store.apply_remote(Command::DeleteTrack {
                    track_id: payload.track_id,
                });
            }
            RemoteEvent::SettingsUpdate(patch) => {
                store.apply_remote(Command::UpdateSettings(patch));
                self.drafts = SettingsDraft::from_settings(&store.snapshot().settings);
            }
            RemoteEvent::Presence(payload) => self.apply_presence(payload),
            RemoteEvent::Connection(payload) => {
                tracing::info!(
                    "Project channel {}",
                    if payload.connected { "connected" } else { "disconnected" }
                );
                self.presence.set_connected(payload.connected);
            }
            RemoteEvent::EditingActivity(payload) => self.apply_editing(payload),
            RemoteEvent::Snapshot(payload) => {
                match payload.as_ref().and_then(ProjectSnapshot::from_value) {
                    Some(snapshot) => {
                        store.apply_remote(Command::LoadProject(snapshot));
                        self.drafts = SettingsDraft::from_settings(&store.snapshot().settings);
                    }
                    None => {
                        tracing::info!("Incomplete snapshot, reloading the project");
                        self.refresher.refresh_project(false);
                    }
                }
            }
        }
    }

    fn apply_presence(&mut self, payload: PresencePayload) {
        let remote: Option<Vec<Collaborator>> = payload.collaborators.map(|list| {
            list.into_iter()
                .filter_map(RawCollaborator::into_collaborator)
                .collect()
        });
        match (payload.kind, remote) {
            (PresenceKind::Sync, Some(remote)) | (PresenceKind::Other, Some(remote)) => {
                self.presence.sync(remote);
            }
            (PresenceKind::Join, Some(remote)) => {
                for collaborator in remote {
                    self.presence.join(collaborator);
                }
            }
            (PresenceKind::Join, None) => match payload.user_id {
                Some(user_id) => self.presence.join(Collaborator {
                    user_id,
                    user: None,
                    role: DEFAULT_ROLE.into(),
                    status: ACCEPTED_STATUS.into(),
                }),
                None => tracing::debug!("Presence join without user"),
            },
            (PresenceKind::Leave, remote) => {
                let leaving = remote
                    .into_iter()
                    .flatten()
                    .map(|c| c.user_id)
                    .chain(payload.user_id);
                for user_id in leaving {
                    self.presence.leave(&user_id);
                }
            }
            (_, None) => {
                // Nothing to merge, still make sure owner and current user are listed
                let current = self.presence.collaborators().to_vec();
                self.presence.sync(current);
            }
        }
    }

    fn apply_editing(&mut self, payload: EditingActivityPayload) {
        if payload.user_id == self.presence.identity().current_user.user_id {
            return;
        }
        if payload.is_editing {
            let user_name = payload.user_name.or_else(|| {
                self.presence
                    .collaborator(&payload.user_id)
                    .and_then(|c| c.name())
                    .map(str::to_string)
            });
            self.presence.start_editing(
                &payload.item_id,
                ActiveEditor {
                    user_id: payload.user_id,
                    user_name,
                    avatar_url: payload.avatar_url,
                },
            );
        } else if !self.presence.stop_editing(&payload.item_id, &payload.user_id) {
            tracing::debug!(
                "{} stopped editing {} without holding it",
                payload.user_id,
                payload.item_id
            );
        }
    }

    /// Event telling the others the local user started or stopped editing a clip.
    pub fn announce_editing(&self, item_id: &str, is_editing: bool) -> LocalEvent {
        LocalEvent::EditingActivity {
            user_id: self.presence.identity().current_user.user_id.clone(),
            item_id: item_id.into(),
            is_editing,
        }
    }
}
