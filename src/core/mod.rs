pub mod chords;
pub mod clip;
pub mod midi;
pub mod pattern;
pub mod song;
pub mod state;
pub mod track;
