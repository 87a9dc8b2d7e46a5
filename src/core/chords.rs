use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Octave used for chord roots. C4 = 60.
const ROOT_OCTAVE_BASE: u8 = 60;

/// Intervals in semitones from the root, indexed by chord quality suffix.
static QUALITIES: Lazy<HashMap<&'static str, &'static [u8]>> = Lazy::new(|| {
    let table: [(&'static str, &'static [u8]); 26] = [
        ("", &[0, 4, 7]),
        ("maj", &[0, 4, 7]),
        ("M", &[0, 4, 7]),
        ("m", &[0, 3, 7]),
        ("min", &[0, 3, 7]),
        ("-", &[0, 3, 7]),
        ("7", &[0, 4, 7, 10]),
        ("maj7", &[0, 4, 7, 11]),
        ("M7", &[0, 4, 7, 11]),
        ("m7", &[0, 3, 7, 10]),
        ("min7", &[0, 3, 7, 10]),
        ("-7", &[0, 3, 7, 10]),
        ("mMaj7", &[0, 3, 7, 11]),
        ("dim", &[0, 3, 6]),
        ("dim7", &[0, 3, 6, 9]),
        ("m7b5", &[0, 3, 6, 10]),
        ("aug", &[0, 4, 8]),
        ("+", &[0, 4, 8]),
        ("sus2", &[0, 2, 7]),
        ("sus4", &[0, 5, 7]),
        ("6", &[0, 4, 7, 9]),
        ("m6", &[0, 3, 7, 9]),
        ("9", &[0, 4, 7, 10, 14]),
        ("m9", &[0, 3, 7, 10, 14]),
        ("maj9", &[0, 4, 7, 11, 14]),
        ("add9", &[0, 4, 7, 14]),
    ];
    table.into_iter().collect()
});

/// Semitone offset of a note name (`C`, `F#`, `Bb`...) from C. Returns the offset and the
/// remaining part of the symbol.
fn parse_root(symbol: &str) -> Option<(u8, &str)> {
    let mut chars = symbol.chars();
    let letter = chars.next()?;
    let base: i8 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    let (accidental, rest): (i8, &str) = if let Some(stripped) = rest.strip_prefix('#') {
        (1, stripped)
    } else if let Some(stripped) = rest.strip_prefix('b') {
        (-1, stripped)
    } else {
        (0, rest)
    };
    Some(((base + accidental).rem_euclid(12) as u8, rest))
}

/// MIDI notes of a chord symbol such as `Am7`, `F#dim` or `C/G`. Unknown symbols yield an
/// empty list.
pub fn chord_notes(name: &str) -> Vec<u8> {
    let name = name.trim();
    let (chord, bass) = match name.split_once('/') {
        Some((chord, bass)) => (chord, Some(bass)),
        None => (name, None),
    };
    let Some((root, quality)) = parse_root(chord) else {
        return Vec::new();
    };
    let Some(intervals) = QUALITIES.get(quality) else {
        return Vec::new();
    };
    let root_note = ROOT_OCTAVE_BASE + root;
    let mut notes: Vec<u8> = intervals.iter().map(|i| root_note + i).collect();
    if let Some(bass) = bass {
        match parse_root(bass) {
            Some((bass_root, "")) => notes.insert(0, ROOT_OCTAVE_BASE - 12 + bass_root),
            _ => return Vec::new(),
        }
    }
    notes
}

/// A chord of the progression with its resolved notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordEntry {
    pub chord_name: String,
    pub midi_notes: Vec<u8>,
}

impl ChordEntry {
    /// Unknown chord names still produce an entry, with no notes.
    pub fn resolve(name: &str) -> Self {
        Self {
            chord_name: name.to_string(),
            midi_notes: chord_notes(name),
        }
    }
}
