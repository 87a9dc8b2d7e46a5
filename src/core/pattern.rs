use crate::core::{
    chords::chord_notes,
    clip::TimelineItem,
    midi::{MidiEvent, normalize_midi_event, RawMidiEvent},
};

pub const DEFAULT_PATTERN: &str = "whole";

/// Steps of a named rhythm pattern. Each step is a velocity, 0 being silent.
/// Unknown names fall back to a single hit on the downbeat.
pub fn pattern_steps(name: &str) -> &'static [f64] {
    match name {
        "half" => &[1., 0., 1., 0.],
        "quarter" => &[1., 0.7, 0.9, 0.7],
        "eighth" => &[1., 0.5, 0.8, 0.5, 0.9, 0.5, 0.8, 0.5],
        "charleston" => &[1., 0., 0., 0.8, 0., 0., 0., 0.],
        "offbeat" => &[0., 0.8, 0., 0.8, 0., 0.8, 0., 0.8],
        "bossa" => &[1., 0., 0., 0.7, 0., 0., 0.8, 0., 0., 0.7, 0., 0., 0.8, 0., 0., 0.],
        _ => &[1.],
    }
}

/// Spread `pitches` over the slots of a rhythm pattern.
///
/// `total_duration` is divided evenly between the steps. A non zero step emits one event per
/// pitch, lasting one slot, with the step value as velocity. An empty pattern or a
/// non-positive duration produces no events.
pub fn generate_pattern_midi_events(
    pitches: &[u8],
    steps: &[f64],
    total_duration: f64,
) -> Vec<MidiEvent> {
    if steps.is_empty() || !total_duration.is_finite() || total_duration <= 0. {
        return Vec::new();
    }
    let slot = total_duration / steps.len() as f64;
    let mut events = Vec::new();
    for (index, step) in steps.iter().enumerate() {
        if *step == 0. {
            continue;
        }
        let start_time = index as f64 * slot;
        for pitch in pitches {
            let raw = RawMidiEvent {
                pitch: Some(*pitch as f64),
                start_time: Some(start_time),
                duration: Some(slot),
                velocity: Some(*step),
            };
            if let Some(event) = normalize_midi_event(&raw) {
                events.push(event);
            }
        }
    }
    events
}

/// Notes a chord clip plays. Hand-edited events win over generated ones, which use the
/// clip's `midi_notes` when it has some.
pub fn chord_midi_events(
    item: &TimelineItem,
    fallback_duration: f64,
    steps: &[f64],
) -> Vec<MidiEvent> {
    if !item.custom_midi_events.is_empty() {
        return item.custom_midi_events.clone();
    }
    // The clip's own voicing, else the library voicing of its chord
    let pitches = if item.midi_notes.is_empty() {
        item.chord_name
            .as_deref()
            .map(chord_notes)
            .unwrap_or_default()
    } else {
        item.midi_notes.clone()
    };
    let duration = if item.duration > 0. {
        item.duration
    } else {
        fallback_duration
    };
    generate_pattern_midi_events(&pitches, steps, duration)
}
