use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    collab::presence::RawCollaborator,
    core::{
        clip::{RawTimelineItem, TimelineItem, TimelineItemPatch},
        midi::RawMidiEvent,
        song::{ChordSlot, SettingsPatch},
        track::{RawTrack, Track, TrackPatch},
    },
    utils::lenient_bool,
};

const REMOTE_PREFIX: &str = "remote:";

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("unknown topic {0}")]
    UnknownTopic(String),
    #[error("malformed {topic} payload: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Message as delivered by the project channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub topic: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl InboundMessage {
    pub fn new(topic: &str, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload: Some(payload),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordProgressionPayload {
    pub chords: Vec<ChordSlot>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LickAddPayload {
    pub track_id: String,
    #[serde(default)]
    pub item: Option<RawTimelineItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineUpdatePayload {
    pub item_id: String,
    #[serde(default)]
    pub updates: TimelineItemPatch,
    #[serde(default)]
    pub custom_midi_events: Option<Vec<RawMidiEvent>>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_customized: Option<bool>,
}

impl TimelineUpdatePayload {
    /// The update with the top level midi fields folded into the patch.
    pub fn into_patch(self) -> TimelineItemPatch {
        let mut patch = self.updates;
        if self.custom_midi_events.is_some() {
            patch.custom_midi_events = self.custom_midi_events;
        }
        if self.is_customized.is_some() {
            patch.is_customized = self.is_customized;
        }
        patch
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemIdPayload {
    pub item_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdatePayload {
    pub items: Vec<TimelineItemPatch>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdatePayload {
    pub item_id: String,
    #[serde(default)]
    pub updates: TimelineItemPatch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackAddPayload {
    pub track: RawTrack,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackUpdatePayload {
    pub track_id: String,
    #[serde(default)]
    pub updates: TrackPatch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackIdPayload {
    pub track_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Sync,
    Join,
    Leave,
    Other,
}

impl<'de> Deserialize<'de> for PresenceKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(match value.as_deref().map(str::to_ascii_uppercase).as_deref() {
            Some("SYNC") => PresenceKind::Sync,
            Some("JOIN") => PresenceKind::Join,
            Some("LEAVE") => PresenceKind::Leave,
            _ => PresenceKind::Other,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    #[serde(rename = "type", default = "other_presence")]
    pub kind: PresenceKind,
    #[serde(default)]
    pub collaborators: Option<Vec<RawCollaborator>>,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn other_presence() -> PresenceKind {
    PresenceKind::Other
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPayload {
    pub connected: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditingActivityPayload {
    pub user_id: String,
    pub item_id: String,
    pub is_editing: bool,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A mutation or status change received from another participant.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    ChordProgression(ChordProgressionPayload),
    LickAdd(LickAddPayload),
    TimelineUpdate(TimelineUpdatePayload),
    TimelineDelete(ItemIdPayload),
    TimelineBulkUpdate(BulkUpdatePayload),
    TimelinePositionUpdate(PositionUpdatePayload),
    TrackAdd(TrackAddPayload),
    TrackUpdate(TrackUpdatePayload),
    TrackDelete(TrackIdPayload),
    SettingsUpdate(SettingsPatch),
    Presence(PresencePayload),
    Connection(ConnectionPayload),
    EditingActivity(EditingActivityPayload),
    /// Kept raw: an absent or incomplete snapshot triggers a full reload instead of a merge.
    Snapshot(Option<Value>),
}

fn parse_payload<T>(topic: &str, payload: Option<Value>) -> Result<T, EventError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(payload.unwrap_or(Value::Null)).map_err(|source| EventError::Malformed {
        topic: topic.to_string(),
        source,
    })
}

impl RemoteEvent {
    /// Decode a channel message. The `remote:` prefix is optional.
    pub fn parse(topic: &str, payload: Option<Value>) -> Result<Self, EventError> {
        let name = topic.strip_prefix(REMOTE_PREFIX).unwrap_or(topic);
        let event = match name {
            "chordProgression" => RemoteEvent::ChordProgression(parse_payload(name, payload)?),
            "lickAdd" => RemoteEvent::LickAdd(parse_payload(name, payload)?),
            "timelineUpdate" => RemoteEvent::TimelineUpdate(parse_payload(name, payload)?),
            "timelineDelete" => RemoteEvent::TimelineDelete(parse_payload(name, payload)?),
            "timelineBulkUpdate" => RemoteEvent::TimelineBulkUpdate(parse_payload(name, payload)?),
            "timelinePositionUpdate" => {
                RemoteEvent::TimelinePositionUpdate(parse_payload(name, payload)?)
            }
            "trackAdd" => RemoteEvent::TrackAdd(parse_payload(name, payload)?),
            "trackUpdate" => RemoteEvent::TrackUpdate(parse_payload(name, payload)?),
            "trackDelete" => RemoteEvent::TrackDelete(parse_payload(name, payload)?),
            "settingsUpdate" => RemoteEvent::SettingsUpdate(parse_payload(name, payload)?),
            "presence" => RemoteEvent::Presence(parse_payload(name, payload)?),
            "connection" => RemoteEvent::Connection(parse_payload(name, payload)?),
            "editingActivity" => RemoteEvent::EditingActivity(parse_payload(name, payload)?),
            "snapshot" => RemoteEvent::Snapshot(payload.filter(|p| !p.is_null())),
            _ => return Err(EventError::UnknownTopic(topic.to_string())),
        };
        Ok(event)
    }
}

/// A local edit to broadcast to the other participants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "topic",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum LocalEvent {
    ChordProgression {
        chords: Vec<Option<String>>,
    },
    LickAdd {
        track_id: String,
        item: TimelineItem,
    },
    TimelineUpdate {
        item_id: String,
        updates: TimelineItemPatch,
    },
    TimelineDelete {
        item_id: String,
    },
    TimelineBulkUpdate {
        items: Vec<TimelineItemPatch>,
    },
    TimelinePositionUpdate {
        item_id: String,
        updates: TimelineItemPatch,
    },
    TrackAdd {
        track: Track,
    },
    TrackUpdate {
        track_id: String,
        updates: TrackPatch,
    },
    TrackDelete {
        track_id: String,
    },
    SettingsUpdate(SettingsPatch),
    EditingActivity {
        user_id: String,
        item_id: String,
        is_editing: bool,
    },
    Snapshot {
        project: Value,
        tracks: Vec<Track>,
    },
}

impl LocalEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            LocalEvent::ChordProgression { .. } => "chordProgression",
            LocalEvent::LickAdd { .. } => "lickAdd",
            LocalEvent::TimelineUpdate { .. } => "timelineUpdate",
            LocalEvent::TimelineDelete { .. } => "timelineDelete",
            LocalEvent::TimelineBulkUpdate { .. } => "timelineBulkUpdate",
            LocalEvent::TimelinePositionUpdate { .. } => "timelinePositionUpdate",
            LocalEvent::TrackAdd { .. } => "trackAdd",
            LocalEvent::TrackUpdate { .. } => "trackUpdate",
            LocalEvent::TrackDelete { .. } => "trackDelete",
            LocalEvent::SettingsUpdate(_) => "settingsUpdate",
            LocalEvent::EditingActivity { .. } => "editingActivity",
            LocalEvent::Snapshot { .. } => "snapshot",
        }
    }
}
