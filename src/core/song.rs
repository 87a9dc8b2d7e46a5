use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{
    core::{
        chords::ChordEntry,
        track::{RawTrack, Track, normalize_track},
    },
    utils::{lenient_f64, number_from_value},
};

pub const DEFAULT_BPM: f32 = 120.;
pub const MIN_BPM: f32 = 10.;
pub const MAX_BPM: f32 = 999.9;
pub const DEFAULT_BARS_PER_SECTION: usize = 8;
const CHORD_ID_PREFIX: &str = "chord-";

/// Id of the chord living in bar `index` of the flattened progression.
pub fn chord_id(index: usize) -> String {
    format!("{CHORD_ID_PREFIX}{index}")
}

/// Bar index encoded in a chord id such as `chord-3`. Garbled ids decode to `None`.
pub fn decode_chord_id(id: &str) -> Option<usize> {
    let digits = id.strip_prefix(CHORD_ID_PREFIX)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub beats: u8,
    pub note_value: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats: 4,
            note_value: 4,
        }
    }
}

impl TimeSignature {
    /// Parse `"3/4"` or `{ "beats": 3, "noteValue": 4 }`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let (beats, note_value) = match value {
            Value::String(text) => {
                let (beats, note_value) = text.split_once('/')?;
                (beats.trim().parse::<f64>().ok()?, note_value.trim().parse::<f64>().ok()?)
            }
            Value::Object(_) => (
                value.get("beats").or(value.get("numerator")).and_then(number_from_value)?,
                value
                    .get("noteValue")
                    .or(value.get("denominator"))
                    .and_then(number_from_value)?,
            ),
            _ => return None,
        };
        let valid = |n: f64| n.fract() == 0. && (1. ..=32.).contains(&n);
        if !valid(beats) || !valid(note_value) {
            return None;
        }
        Some(Self {
            beats: beats as u8,
            note_value: note_value as u8,
        })
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.beats, self.note_value)
    }
}

impl Serialize for TimeSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        TimeSignature::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time signature {value}")))
    }
}

/// Project wide musical settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SongSettings {
    pub key: String,
    #[serde(rename = "tempo")]
    pub bpm: f32,
    pub style: String,
    pub swing_amount: f32,
    pub time_signature: TimeSignature,
    pub backing_instrument_id: Option<String>,
}

impl Default for SongSettings {
    fn default() -> Self {
        Self {
            key: "C".into(),
            bpm: DEFAULT_BPM,
            style: "swing".into(),
            swing_amount: 0.,
            time_signature: TimeSignature::default(),
            backing_instrument_id: None,
        }
    }
}

impl SongSettings {
    /// Length of one bar in seconds at the current tempo.
    pub fn seconds_per_bar(&self) -> f64 {
        60. / self.bpm as f64 * self.time_signature.beats as f64
    }
}

/// Settings fields present in an update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub tempo: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub swing_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_time_signature")]
    pub time_signature: Option<TimeSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_instrument_id: Option<String>,
}

fn lenient_time_signature<'de, D>(deserializer: D) -> Result<Option<TimeSignature>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(TimeSignature::from_value))
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == SettingsPatch::default()
    }

    /// Apply the present fields, clamping numeric ones into range.
    pub fn apply(&self, settings: &mut SongSettings) {
        if let Some(tempo) = self.tempo.filter(|t| t.is_finite()) {
            settings.bpm = (tempo as f32).clamp(MIN_BPM, MAX_BPM);
        }
        if let Some(swing) = self.swing_amount.filter(|s| s.is_finite()) {
            settings.swing_amount = (swing as f32).clamp(0., 1.);
        }
        if let Some(signature) = self.time_signature {
            settings.time_signature = signature;
        }
        if let Some(key) = &self.key {
            settings.key = key.clone();
        }
        if let Some(style) = &self.style {
            settings.style = style.clone();
        }
        if let Some(instrument) = &self.backing_instrument_id {
            settings.backing_instrument_id = Some(instrument.clone()).filter(|i| !i.is_empty());
        }
    }
}

/// A lick attached to a bar. Start and duration are counted in bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LickInstance {
    pub id: String,
    pub lick_id: String,
    pub start_bar: usize,
    pub duration: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bar {
    pub chord: Option<String>,
    #[serde(default)]
    pub licks: Vec<LickInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub label: String,
    pub bars: Vec<Bar>,
}

impl Section {
    pub fn new(label: &str, bar_count: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            bars: vec![Bar::default(); bar_count],
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn licks(&self) -> impl Iterator<Item = &LickInstance> {
        self.bars.iter().flat_map(|bar| bar.licks.iter())
    }
}

/// Position of a bar inside the song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarCursor {
    pub section: usize,
    pub bar: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandChannel {
    pub volume: f32,
    pub muted: bool,
}

impl Default for BandChannel {
    fn default() -> Self {
        Self {
            volume: 0.8,
            muted: false,
        }
    }
}

/// Mix of the backing band instruments, keyed by instrument name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandMix {
    pub channels: BTreeMap<String, BandChannel>,
}

impl Default for BandMix {
    fn default() -> Self {
        let channels = ["drums", "bass", "piano"]
            .into_iter()
            .map(|name| (name.to_string(), BandChannel::default()))
            .collect();
        Self { channels }
    }
}

/// One slot of a chord progression payload. Accepts a chord name, `null`, or an object with
/// a `chordName`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChordSlot(pub Option<String>);

impl ChordSlot {
    pub fn from_value(value: &Value) -> Self {
        let name = match value {
            Value::String(name) => Some(name.trim().to_string()),
            Value::Object(_) => value
                .get("chordName")
                .or(value.get("chord"))
                .and_then(Value::as_str)
                .map(|name| name.trim().to_string()),
            _ => None,
        };
        ChordSlot(name.filter(|name| !name.is_empty()))
    }
}

impl<'de> Deserialize<'de> for ChordSlot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(ChordSlot::from_value(&value))
    }
}

/// Project level fields of a full project payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawProject {
    #[serde(rename = "_id", alias = "id")]
    pub id: Option<String>,
    pub title: Option<String>,
    pub owner_id: Option<String>,
    #[serde(flatten)]
    pub settings: SettingsPatch,
    pub sections: Option<Vec<Section>>,
    pub chord_progression: Option<Vec<ChordSlot>>,
}

/// A full project: fields plus the track list. Used for bulk loads and snapshots.
#[derive(Debug, Clone, Default)]
pub struct ProjectSnapshot {
    pub project: RawProject,
    pub tracks: Vec<Track>,
}

impl ProjectSnapshot {
    /// Parse `{ project, tracks }`. Returns `None` unless both parts are present and usable.
    pub fn from_value(value: &Value) -> Option<Self> {
        let project = value.get("project").filter(|p| p.is_object())?;
        let tracks = value.get("tracks")?.as_array()?;
        let project: RawProject = match serde_json::from_value(project.clone()) {
            Ok(project) => project,
            Err(err) => {
                tracing::debug!("Unusable project payload: {err}");
                return None;
            }
        };
        let tracks = tracks
            .iter()
            .filter_map(|track| match serde_json::from_value::<RawTrack>(track.clone()) {
                Ok(raw) => Some(normalize_track(raw)),
                Err(err) => {
                    tracing::debug!("Dropped malformed track from snapshot: {err}");
                    None
                }
            })
            .collect();
        Some(Self { project, tracks })
    }
}

/// Entry of the chord progression as shown to the user, with its bar id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordCell {
    pub id: String,
    #[serde(flatten)]
    pub entry: ChordEntry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_chord_id() {
        assert_eq!(decode_chord_id("chord-0"), Some(0));
        assert_eq!(decode_chord_id("chord-12"), Some(12));
        assert_eq!(decode_chord_id("chord-"), None);
        assert_eq!(decode_chord_id("chord--1"), None);
        assert_eq!(decode_chord_id("chord-1a"), None);
        assert_eq!(decode_chord_id("bar-1"), None);
        assert_eq!(decode_chord_id(&chord_id(7)), Some(7));
    }

    #[test]
    fn test_time_signature_forms() {
        assert_eq!(
            TimeSignature::from_value(&json!("3/4")),
            Some(TimeSignature { beats: 3, note_value: 4 })
        );
        assert_eq!(
            TimeSignature::from_value(&json!({ "beats": 6, "noteValue": "8" })),
            Some(TimeSignature { beats: 6, note_value: 8 })
        );
        assert_eq!(TimeSignature::from_value(&json!("0/4")), None);
        assert_eq!(TimeSignature::from_value(&json!(4)), None);
        assert_eq!(serde_json::to_value(TimeSignature::default()).unwrap(), json!("4/4"));
    }

    #[test]
    fn test_settings_patch_clamps() {
        let mut settings = SongSettings::default();
        let patch: SettingsPatch =
            serde_json::from_value(json!({ "tempo": "2000", "swingAmount": -1, "key": "Eb" })).unwrap();
        patch.apply(&mut settings);
        assert_eq!(settings.bpm, MAX_BPM);
        assert_eq!(settings.swing_amount, 0.);
        assert_eq!(settings.key, "Eb");
        assert_eq!(settings.style, "swing");
    }

    #[test]
    fn test_chord_slot_forms() {
        let slots: Vec<ChordSlot> =
            serde_json::from_value(json!(["Am7", null, { "chordName": "D7" }, "", 3])).unwrap();
        let names: Vec<Option<&str>> = slots.iter().map(|s| s.0.as_deref()).collect();
        assert_eq!(names, vec![Some("Am7"), None, Some("D7"), None, None]);
    }

    #[test]
    fn test_snapshot_requires_both_parts() {
        assert!(ProjectSnapshot::from_value(&json!({ "project": { "title": "x" } })).is_none());
        assert!(ProjectSnapshot::from_value(&json!({ "tracks": [] })).is_none());
        assert!(ProjectSnapshot::from_value(&json!({ "project": 1, "tracks": [] })).is_none());
        let snapshot = ProjectSnapshot::from_value(&json!({
            "project": { "_id": "p", "tempo": 90 },
            "tracks": [{ "_id": "t", "title": "Keys", "items": [] }, "oops"]
        }))
        .unwrap();
        assert_eq!(snapshot.project.id.as_deref(), Some("p"));
        assert_eq!(snapshot.project.settings.tempo, Some(90.));
        assert_eq!(snapshot.tracks.len(), 1);
    }
}
