use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::utils::number_field;

pub const DEFAULT_VELOCITY: f64 = 0.8;
pub const MIN_VELOCITY: f64 = 0.1;
pub const MAX_VELOCITY: f64 = 1.0;
pub const MAX_PITCH: f64 = 127.;

/// A single note inside a clip. Times are in seconds relative to the clip start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiEvent {
    pub pitch: u8,
    pub start_time: f64,
    pub duration: f64,
    pub velocity: f64,
}

impl MidiEvent {
    /// Build an event from already typed values, applying the same rules as incoming payloads.
    pub fn new(pitch: u8, start_time: f64, duration: f64, velocity: f64) -> Option<Self> {
        normalize_midi_event(&RawMidiEvent {
            pitch: Some(pitch as f64),
            start_time: Some(start_time),
            duration: Some(duration),
            velocity: Some(velocity),
        })
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Untrusted note as received from an editor or the network.
/// Every field is optional, numeric strings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMidiEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
}

impl RawMidiEvent {
    /// Anything that is not an object yields an empty event, which normalization rejects.
    pub fn from_value(value: &Value) -> Self {
        Self {
            pitch: number_field(value, &["pitch", "note"]),
            start_time: number_field(value, &["startTime", "start"]),
            duration: number_field(value, &["duration"]),
            velocity: number_field(value, &["velocity"]),
        }
    }
}

impl From<MidiEvent> for RawMidiEvent {
    fn from(event: MidiEvent) -> Self {
        Self {
            pitch: Some(event.pitch as f64),
            start_time: Some(event.start_time),
            duration: Some(event.duration),
            velocity: Some(event.velocity),
        }
    }
}

impl<'de> Deserialize<'de> for RawMidiEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

/// Validate a raw note. Returns `None` when pitch, start or duration is unusable.
/// Velocity never invalidates a note: it falls back to the default and is clamped.
pub fn normalize_midi_event(raw: &RawMidiEvent) -> Option<MidiEvent> {
    let pitch = raw.pitch?;
    if !pitch.is_finite() || pitch.fract() != 0. || !(0. ..=MAX_PITCH).contains(&pitch) {
        return None;
    }
    let start_time = raw.start_time?;
    if !start_time.is_finite() || start_time < 0. {
        return None;
    }
    let duration = raw.duration?;
    if !duration.is_finite() || duration <= 0. {
        return None;
    }
    let velocity = match raw.velocity {
        Some(velocity) if velocity.is_finite() => velocity.clamp(MIN_VELOCITY, MAX_VELOCITY),
        _ => DEFAULT_VELOCITY,
    };
    Some(MidiEvent {
        pitch: pitch as u8,
        start_time,
        duration,
        velocity,
    })
}

/// Keep the valid notes of a list, dropping the others.
pub fn normalize_midi_events(raws: &[RawMidiEvent]) -> Vec<MidiEvent> {
    let events: Vec<MidiEvent> = raws.iter().filter_map(normalize_midi_event).collect();
    if events.len() != raws.len() {
        tracing::trace!("Dropped {} invalid midi events", raws.len() - events.len());
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawMidiEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_accepts_numeric_strings() {
        let event = normalize_midi_event(&raw(json!({
            "pitch": "60", "startTime": "0.5", "duration": 1, "velocity": "0.5"
        })))
        .unwrap();
        assert_eq!(event.pitch, 60);
        assert_eq!(event.start_time, 0.5);
        assert_eq!(event.duration, 1.);
        assert_eq!(event.velocity, 0.5);
    }

    #[test]
    fn test_rejects_invalid_pitch() {
        for pitch in [json!(-1), json!(128), json!(60.5), json!("C4"), json!(null)] {
            let event = raw(json!({ "pitch": pitch, "startTime": 0, "duration": 1 }));
            assert_eq!(normalize_midi_event(&event), None);
        }
    }

    #[test]
    fn test_rejects_invalid_times() {
        let negative_start = raw(json!({ "pitch": 60, "startTime": -0.1, "duration": 1 }));
        assert_eq!(normalize_midi_event(&negative_start), None);
        let zero_duration = raw(json!({ "pitch": 60, "startTime": 0, "duration": 0 }));
        assert_eq!(normalize_midi_event(&zero_duration), None);
        let infinite = raw(json!({ "pitch": 60, "startTime": "inf", "duration": 1 }));
        assert_eq!(normalize_midi_event(&infinite), None);
        let missing = raw(json!({ "pitch": 60, "duration": 1 }));
        assert_eq!(normalize_midi_event(&missing), None);
    }

    #[test]
    fn test_velocity_is_clamped_not_rejected() {
        let loud = raw(json!({ "pitch": 60, "startTime": 0, "duration": 1, "velocity": 4 }));
        assert_eq!(normalize_midi_event(&loud).unwrap().velocity, MAX_VELOCITY);
        let quiet = raw(json!({ "pitch": 60, "startTime": 0, "duration": 1, "velocity": 0 }));
        assert_eq!(normalize_midi_event(&quiet).unwrap().velocity, MIN_VELOCITY);
        let missing = raw(json!({ "pitch": 60, "startTime": 0, "duration": 1 }));
        assert_eq!(normalize_midi_event(&missing).unwrap().velocity, DEFAULT_VELOCITY);
        let garbage = raw(json!({ "pitch": 60, "startTime": 0, "duration": 1, "velocity": "loud" }));
        assert_eq!(normalize_midi_event(&garbage).unwrap().velocity, DEFAULT_VELOCITY);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let inputs = [
            json!({ "pitch": 0, "startTime": 0, "duration": 0.25 }),
            json!({ "pitch": "127", "startTime": "3", "duration": "2", "velocity": 9 }),
            json!({ "pitch": 64, "startTime": 1.5, "duration": 0.001, "velocity": -3 }),
        ];
        for input in inputs {
            let once = normalize_midi_event(&raw(input)).unwrap();
            let twice = normalize_midi_event(&RawMidiEvent::from(once)).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_non_object_entries_are_dropped() {
        let raws: Vec<RawMidiEvent> = serde_json::from_value(json!([
            null,
            42,
            { "pitch": 62, "startTime": 0, "duration": 1 }
        ]))
        .unwrap();
        let events = normalize_midi_events(&raws);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pitch, 62);
    }
}
