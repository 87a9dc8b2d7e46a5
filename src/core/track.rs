use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    core::clip::{RawTimelineItem, TimelineItem, normalize_timeline_item},
    utils::{lenient_bool, lenient_f64},
};

/// A timeline track containing clips sorted by start time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(alias = "trackName")]
    pub title: String,
    pub items: Vec<TimelineItem>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_volume() -> f32 {
    1.
}

impl Track {
    pub fn new(title: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            items: vec![],
            muted: false,
            volume: default_volume(),
        }
    }

    pub fn from(id: &str, title: &str) -> Self {
        let mut track = Self::new(title);
        track.id = id.into();
        track
    }

    /// Restore the start time ordering after a positional change.
    pub fn sort_items(&mut self) {
        self.items
            .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    }

    /// Insert a clip, replacing any clip with the same id.
    pub fn upsert_item(&mut self, item: TimelineItem) {
        self.items.retain(|existing| existing.id != item.id);
        self.items.push(item);
        self.sort_items();
    }

    pub fn item(&self, id: &str) -> Option<&TimelineItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.item(id).is_some()
    }

    /// End of the last clip of the track, in seconds.
    pub fn end_time(&self) -> f64 {
        self.items
            .iter()
            .map(TimelineItem::end_time)
            .fold(0., f64::max)
    }
}

/// Untrusted track as received from the network. Clips that fail to parse are dropped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTrack {
    #[serde(rename = "_id", alias = "id")]
    pub id: Option<String>,
    #[serde(alias = "trackName")]
    pub title: Option<String>,
    #[serde(alias = "timelineItems")]
    pub items: Vec<Value>,
    #[serde(deserialize_with = "lenient_bool")]
    pub muted: Option<bool>,
    #[serde(deserialize_with = "lenient_f64")]
    pub volume: Option<f64>,
}

/// Build a track from an untrusted payload, running every clip through the normalizer.
pub fn normalize_track(raw: RawTrack) -> Track {
    let mut track = Track::new(raw.title.as_deref().unwrap_or("Untitled"));
    if let Some(id) = raw.id.filter(|id| !id.is_empty()) {
        track.id = id;
    }
    track.muted = raw.muted.unwrap_or(false);
    track.volume = raw
        .volume
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0., 1.) as f32)
        .unwrap_or_else(default_volume);
    for value in raw.items {
        match serde_json::from_value::<Option<RawTimelineItem>>(value) {
            Ok(raw_item) => {
                if let Some(item) = normalize_timeline_item(raw_item) {
                    track.items.push(item);
                }
            }
            Err(err) => tracing::trace!("Dropped malformed clip in track {}: {err}", track.id),
        }
    }
    track.sort_items();
    track
}

/// Partial update of a track's own fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackPatch {
    #[serde(alias = "trackName", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_bool")]
    pub muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub volume: Option<f64>,
}

impl TrackPatch {
    pub fn apply(&self, track: &mut Track) {
        if let Some(title) = &self.title {
            track.title = title.clone();
        }
        if let Some(muted) = self.muted {
            track.muted = muted;
        }
        if let Some(volume) = self.volume.filter(|v| v.is_finite()) {
            track.volume = volume.clamp(0., 1.) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_track_sorts_and_drops() {
        let raw: RawTrack = serde_json::from_value(json!({
            "_id": "t1",
            "trackName": "Guitar",
            "items": [
                { "_id": "b", "startTime": 4 },
                { "_id": "a", "startTime": -1 },
                null,
                { "_id": "c", "lickId": 42 }
            ]
        }))
        .unwrap();
        let track = normalize_track(raw);
        assert_eq!(track.id, "t1");
        assert_eq!(track.title, "Guitar");
        let ids: Vec<&str> = track.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_upsert_replaces_and_sorts() {
        let mut track = Track::from("t", "Keys");
        let mut first = TimelineItem::new(crate::core::clip::ItemKind::Chord, 2., 1.);
        first.id = "x".into();
        track.upsert_item(first.clone());
        first.start_time = 0.5;
        track.upsert_item(first);
        let mut second = TimelineItem::new(crate::core::clip::ItemKind::Chord, 1., 1.);
        second.id = "y".into();
        track.upsert_item(second);
        let ids: Vec<&str> = track.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(track.end_time(), 2.);
    }

    #[test]
    fn test_track_patch() {
        let mut track = Track::from("t", "Keys");
        let patch: TrackPatch = serde_json::from_value(json!({ "volume": "3", "title": "Piano" })).unwrap();
        patch.apply(&mut track);
        assert_eq!(track.title, "Piano");
        assert_eq!(track.volume, 1.);
        assert!(!track.muted);
    }
}
