use serde::{Deserialize, Serialize};

use serde_json::Value;

use crate::{
    core::midi::{MAX_PITCH, MidiEvent, RawMidiEvent, normalize_midi_events},
    utils::{lenient_bool, lenient_f64, number_from_value},
};

/// Smallest duration a clip can have, in seconds.
pub const MIN_CLIP_DURATION: f64 = 0.1;
/// Kind given to a clip that declares no type and carries neither a lick nor an audio url.
pub const DEFAULT_ITEM_KIND: ItemKind = ItemKind::Lick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Lick,
    Chord,
    Midi,
}

impl ItemKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lick" => Some(ItemKind::Lick),
            "chord" => Some(ItemKind::Chord),
            "midi" => Some(ItemKind::Midi),
            _ => None,
        }
    }
}

/// Audio resource a lick clip points to, with its own audio url and waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LickResource {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform_data: Option<Vec<f32>>,
}

/// A lick is referenced either by id only or by its populated resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LickRef {
    Id(String),
    Resource(LickResource),
}

impl LickRef {
    pub fn id(&self) -> &str {
        match self {
            LickRef::Id(id) => id,
            LickRef::Resource(resource) => &resource.id,
        }
    }

    pub fn audio_url(&self) -> Option<&str> {
        match self {
            LickRef::Id(_) => None,
            LickRef::Resource(resource) => resource.audio_url.as_deref(),
        }
    }
}

/// A clip placed on a timeline track. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub start_time: f64,
    pub duration: f64,
    /// Trim-in point inside the source
    pub offset: f64,
    pub source_duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lick_id: Option<LickRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chord_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Voicing of a chord clip
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub midi_notes: Vec<u8>,
    #[serde(default)]
    pub custom_midi_events: Vec<MidiEvent>,
    #[serde(default)]
    pub loop_enabled: bool,
    pub playback_rate: f64,
    #[serde(default)]
    pub is_customized: bool,
}

impl TimelineItem {
    /// New clip with a fresh id, already normalized.
    pub fn new(kind: ItemKind, start_time: f64, duration: f64) -> Self {
        normalize_item(RawTimelineItem {
            kind: Some(kind),
            start_time: Some(start_time),
            duration: Some(duration),
            ..Default::default()
        })
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Merge the fields present in `patch` and normalize the result.
    pub fn patched(&self, patch: &TimelineItemPatch) -> Self {
        let mut raw = RawTimelineItem::from(self.clone());
        patch.merge_into(&mut raw);
        normalize_item(raw)
    }
}

/// Untrusted clip as received from an editor or the network.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTimelineItem {
    #[serde(rename = "_id", alias = "id")]
    pub id: Option<String>,
    #[serde(rename = "type", deserialize_with = "deserialize_kind")]
    pub kind: Option<ItemKind>,
    #[serde(deserialize_with = "lenient_f64")]
    pub start_time: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub duration: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub offset: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub source_duration: Option<f64>,
    pub lick_id: Option<LickRef>,
    pub chord_name: Option<String>,
    pub audio_url: Option<String>,
    pub midi_notes: Option<Vec<Value>>,
    pub custom_midi_events: Option<Vec<RawMidiEvent>>,
    #[serde(deserialize_with = "lenient_bool")]
    pub loop_enabled: Option<bool>,
    #[serde(deserialize_with = "lenient_f64")]
    pub playback_rate: Option<f64>,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_customized: Option<bool>,
}

/// Unknown type names are treated as missing so the kind gets inferred.
fn deserialize_kind<'de, D>(deserializer: D) -> Result<Option<ItemKind>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| v.as_str()).and_then(ItemKind::parse))
}

impl From<TimelineItem> for RawTimelineItem {
    fn from(item: TimelineItem) -> Self {
        Self {
            id: Some(item.id),
            kind: Some(item.kind),
            start_time: Some(item.start_time),
            duration: Some(item.duration),
            offset: Some(item.offset),
            source_duration: Some(item.source_duration),
            lick_id: item.lick_id,
            chord_name: item.chord_name,
            audio_url: item.audio_url,
            midi_notes: Some(item.midi_notes.into_iter().map(Value::from).collect()),
            custom_midi_events: Some(
                item.custom_midi_events
                    .into_iter()
                    .map(RawMidiEvent::from)
                    .collect(),
            ),
            loop_enabled: Some(item.loop_enabled),
            playback_rate: Some(item.playback_rate),
            is_customized: Some(item.is_customized),
        }
    }
}

/// Partial update of a clip. Only the fields present are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimelineItemPatch {
    #[serde(rename = "_id", alias = "id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_kind")]
    pub kind: Option<ItemKind>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub source_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lick_id: Option<LickRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chord_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_notes: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_midi_events: Option<Vec<RawMidiEvent>>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_bool")]
    pub loop_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub playback_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_bool")]
    pub is_customized: Option<bool>,
}

impl TimelineItemPatch {
    /// Patch touching only the geometry of a clip.
    pub fn position(start_time: Option<f64>, duration: Option<f64>, offset: Option<f64>) -> Self {
        Self {
            start_time,
            duration,
            offset,
            ..Default::default()
        }
    }

    /// Whether the patch changes where or how long the clip plays.
    pub fn touches_position(&self) -> bool {
        self.start_time.is_some() || self.duration.is_some() || self.offset.is_some()
    }

    fn merge_into(&self, raw: &mut RawTimelineItem) {
        if self.kind.is_some() {
            raw.kind = self.kind;
        }
        if self.start_time.is_some() {
            raw.start_time = self.start_time;
        }
        if self.duration.is_some() {
            raw.duration = self.duration;
        }
        if self.offset.is_some() {
            raw.offset = self.offset;
        }
        if self.source_duration.is_some() {
            raw.source_duration = self.source_duration;
        }
        if let Some(lick) = &self.lick_id {
            raw.lick_id = Some(lick.clone());
        }
        if let Some(chord_name) = &self.chord_name {
            raw.chord_name = Some(chord_name.clone());
        }
        if let Some(audio_url) = &self.audio_url {
            raw.audio_url = Some(audio_url.clone());
        }
        if let Some(notes) = &self.midi_notes {
            raw.midi_notes = Some(notes.clone());
        }
        if let Some(events) = &self.custom_midi_events {
            raw.custom_midi_events = Some(events.clone());
        }
        if self.loop_enabled.is_some() {
            raw.loop_enabled = self.loop_enabled;
        }
        if self.playback_rate.is_some() {
            raw.playback_rate = self.playback_rate;
        }
        if self.is_customized.is_some() {
            raw.is_customized = self.is_customized;
        }
    }
}

fn finite_or(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(default)
}

/// Keep the entries that are valid MIDI pitches, in order.
fn midi_pitches(values: &[Value]) -> Vec<u8> {
    values
        .iter()
        .filter_map(number_from_value)
        .filter(|pitch| pitch.fract() == 0. && (0. ..=MAX_PITCH).contains(pitch))
        .map(|pitch| pitch as u8)
        .collect()
}

/// Repair a clip so it satisfies the timeline invariants.
/// Absence is preserved: `None` in gives `None` out.
pub fn normalize_timeline_item(raw: Option<RawTimelineItem>) -> Option<TimelineItem> {
    raw.map(normalize_item)
}

fn normalize_item(raw: RawTimelineItem) -> TimelineItem {
    let start_time = finite_or(raw.start_time, 0.).max(0.);
    let duration = finite_or(raw.duration, 0.).max(MIN_CLIP_DURATION);
    let offset = finite_or(raw.offset, 0.).max(0.);
    let source_duration = finite_or(raw.source_duration, 0.).max(offset + duration);

    let audio_url = raw.audio_url.filter(|url| !url.trim().is_empty());
    let kind = raw.kind.unwrap_or(if raw.lick_id.is_some() {
        ItemKind::Lick
    } else if audio_url.is_some() {
        ItemKind::Chord
    } else {
        DEFAULT_ITEM_KIND
    });

    let playback_rate = raw
        .playback_rate
        .filter(|rate| rate.is_finite() && *rate > 0.)
        .unwrap_or(1.);

    TimelineItem {
        id: raw
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        kind,
        start_time,
        duration,
        offset,
        source_duration,
        lick_id: raw.lick_id,
        chord_name: raw.chord_name,
        audio_url,
        midi_notes: raw
            .midi_notes
            .as_deref()
            .map(midi_pitches)
            .unwrap_or_default(),
        custom_midi_events: raw
            .custom_midi_events
            .map(|events| normalize_midi_events(&events))
            .unwrap_or_default(),
        loop_enabled: raw.loop_enabled.unwrap_or(false),
        playback_rate,
        is_customized: raw.is_customized.unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> Option<RawTimelineItem> {
        Some(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn test_absence_passes_through() {
        assert_eq!(normalize_timeline_item(None), None);
    }

    #[test]
    fn test_geometry_is_repaired() {
        let item = normalize_timeline_item(raw(json!({ "startTime": -3, "duration": 0.01 }))).unwrap();
        assert_eq!(item.start_time, 0.);
        assert_eq!(item.duration, MIN_CLIP_DURATION);
        assert!(item.source_duration >= item.offset + item.duration);
    }

    #[test]
    fn test_source_duration_is_extended() {
        let item = normalize_timeline_item(raw(json!({
            "_id": "a", "startTime": "2", "duration": "4", "offset": 1, "sourceDuration": 3
        })))
        .unwrap();
        assert_eq!(item.id, "a");
        assert_eq!(item.start_time, 2.);
        assert_eq!(item.source_duration, 5.);

        let longer = normalize_timeline_item(raw(json!({ "duration": 1, "sourceDuration": 10 }))).unwrap();
        assert_eq!(longer.source_duration, 10.);
    }

    #[test]
    fn test_kind_inference_precedence() {
        let lick = normalize_timeline_item(raw(json!({ "lickId": "l1", "audioUrl": "x.mp3" }))).unwrap();
        assert_eq!(lick.kind, ItemKind::Lick);
        let chord = normalize_timeline_item(raw(json!({ "audioUrl": "x.mp3" }))).unwrap();
        assert_eq!(chord.kind, ItemKind::Chord);
        let fallback = normalize_timeline_item(raw(json!({}))).unwrap();
        assert_eq!(fallback.kind, DEFAULT_ITEM_KIND);
        let declared = normalize_timeline_item(raw(json!({ "type": "midi", "lickId": "l1" }))).unwrap();
        assert_eq!(declared.kind, ItemKind::Midi);
        let unknown = normalize_timeline_item(raw(json!({ "type": "video", "audioUrl": "x" }))).unwrap();
        assert_eq!(unknown.kind, ItemKind::Chord);
    }

    #[test]
    fn test_populated_lick_reference() {
        let item = normalize_timeline_item(raw(json!({
            "lickId": { "_id": "l1", "audioUrl": "https://cdn/l1.mp3", "waveformData": [0.1, 0.2] }
        })))
        .unwrap();
        let lick = item.lick_id.unwrap();
        assert_eq!(lick.id(), "l1");
        assert_eq!(lick.audio_url(), Some("https://cdn/l1.mp3"));
    }

    #[test]
    fn test_partial_midi_validity() {
        let item = normalize_timeline_item(raw(json!({
            "type": "midi",
            "customMidiEvents": [
                { "pitch": 60, "startTime": 0, "duration": 1 },
                { "pitch": 300, "startTime": 0, "duration": 1 },
                "garbage"
            ]
        })))
        .unwrap();
        assert_eq!(item.custom_midi_events.len(), 1);
    }

    #[test]
    fn test_invariants_hold_for_odd_inputs() {
        let inputs = [
            json!({ "startTime": "nan", "duration": "inf", "offset": -4 }),
            json!({ "startTime": 1e9, "duration": -1, "sourceDuration": -10 }),
            json!({ "duration": 0.5, "offset": 20, "playbackRate": 0 }),
        ];
        for input in inputs {
            let item = normalize_timeline_item(raw(input)).unwrap();
            assert!(item.duration >= MIN_CLIP_DURATION);
            assert!(item.start_time >= 0.);
            assert!(item.source_duration >= item.offset + item.duration);
            assert!(item.playback_rate > 0.);
        }
    }

    #[test]
    fn test_patch_only_touches_present_fields() {
        let item = normalize_timeline_item(raw(json!({
            "_id": "a", "startTime": 1, "duration": 2, "chordName": "C", "loopEnabled": true
        })))
        .unwrap();
        let patch: TimelineItemPatch = serde_json::from_value(json!({ "duration": 8 })).unwrap();
        let patched = item.patched(&patch);
        assert_eq!(patched.id, "a");
        assert_eq!(patched.start_time, 1.);
        assert_eq!(patched.duration, 8.);
        assert_eq!(patched.chord_name.as_deref(), Some("C"));
        assert!(patched.loop_enabled);
        assert!(patched.source_duration >= 8.);
    }

    #[test]
    fn test_patch_serializes_only_present_fields() {
        let patch = TimelineItemPatch::position(Some(2.), None, None);
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({ "startTime": 2.0 }));
        assert!(patch.touches_position());
    }

    #[test]
    fn test_midi_notes_keep_valid_pitches() {
        let item = normalize_timeline_item(raw(json!({
            "type": "chord", "midiNotes": [69, "72", 128, -1, 60.5, "x", 76]
        })))
        .unwrap();
        assert_eq!(item.midi_notes, vec![69, 72, 76]);

        let patch: TimelineItemPatch = serde_json::from_value(json!({ "midiNotes": [60, 64] })).unwrap();
        assert_eq!(item.patched(&patch).midi_notes, vec![60, 64]);
        let unrelated = TimelineItemPatch::position(Some(3.), None, None);
        assert_eq!(item.patched(&unrelated).midi_notes, vec![69, 72, 76]);
    }
}
