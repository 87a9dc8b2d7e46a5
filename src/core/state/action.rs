use crate::{
    core::{
        clip::{RawTimelineItem, TimelineItemPatch, normalize_timeline_item},
        song::{
            BarCursor, LickInstance, ProjectSnapshot, Section, SettingsPatch, TimeSignature,
            DEFAULT_BARS_PER_SECTION, decode_chord_id,
        },
        state::SongState,
        track::{Track, TrackPatch},
    },
    message::LocalEvent,
};

/// Where a mutation comes from. Only local mutations are broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Every way the project state can change.
#[derive(Debug, Clone)]
pub enum Command {
    // Settings
    SetKey(String),
    SetBpm(f32),
    SetStyle(String),
    SetSwing(f32),
    SetTimeSignature(TimeSignature),
    SetBackingInstrument(Option<String>),
    UpdateSettings(SettingsPatch),
    // Sections and chords
    AddSection { label: String, bars: usize },
    DeleteSection { section_id: String },
    SelectBar(BarCursor),
    /// Select the bar holding a chord cell, by its `chord-<N>` id
    SelectChord(String),
    /// Write into the selected bar and move the selection forward
    WriteChord(Option<String>),
    ReplaceChordProgression(Vec<Option<String>>),
    // Licks on the bar timeline
    AddLick {
        section_id: String,
        lick_id: String,
        start_bar: usize,
        duration: usize,
    },
    MoveLick {
        instance_id: String,
        to_section: String,
        start_bar: usize,
    },
    ResizeLick { instance_id: String, duration: usize },
    RemoveLick { instance_id: String },
    // Band
    SetBandVolume { instrument: String, volume: f32 },
    SetBandMute { instrument: String, muted: bool },
    // Transport
    SetPlaying(bool),
    AdvanceBeat,
    // Timeline tracks and clips
    AddTrack(Track),
    UpdateTrack { track_id: String, patch: TrackPatch },
    DeleteTrack { track_id: String },
    AddTimelineItem { track_id: String, item: RawTimelineItem },
    UpdateTimelineItem { item_id: String, patch: TimelineItemPatch },
    /// Only the geometry fields of the patch are used
    MoveTimelineItem { item_id: String, patch: TimelineItemPatch },
    BulkUpdateTimelineItems(Vec<TimelineItemPatch>),
    DeleteTimelineItem { item_id: String },
    // Whole project
    LoadProject(ProjectSnapshot),
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Command::SetKey(_) => "Set key",
            Command::SetBpm(_) => "Set BPM",
            Command::SetStyle(_) => "Set style",
            Command::SetSwing(_) => "Set swing",
            Command::SetTimeSignature(_) => "Set time signature",
            Command::SetBackingInstrument(_) => "Set backing instrument",
            Command::UpdateSettings(_) => "Update settings",
            Command::AddSection { .. } => "Add section",
            Command::DeleteSection { .. } => "Delete section",
            Command::SelectBar(_) => "Select bar",
            Command::SelectChord(_) => "Select chord",
            Command::WriteChord(_) => "Write chord",
            Command::ReplaceChordProgression(_) => "Replace chord progression",
            Command::AddLick { .. } => "Add lick",
            Command::MoveLick { .. } => "Move lick",
            Command::ResizeLick { .. } => "Resize lick",
            Command::RemoveLick { .. } => "Remove lick",
            Command::SetBandVolume { .. } => "Set band volume",
            Command::SetBandMute { .. } => "Set band mute",
            Command::SetPlaying(_) => "Set playing",
            Command::AdvanceBeat => "Advance beat",
            Command::AddTrack(_) => "Add track",
            Command::UpdateTrack { .. } => "Update track",
            Command::DeleteTrack { .. } => "Delete track",
            Command::AddTimelineItem { .. } => "Add clip",
            Command::UpdateTimelineItem { .. } => "Update clip",
            Command::MoveTimelineItem { .. } => "Move clip",
            Command::BulkUpdateTimelineItems(_) => "Update clips",
            Command::DeleteTimelineItem { .. } => "Delete clip",
            Command::LoadProject(_) => "Load project",
        }
    }

    /// Whether the change belongs in the undo history.
    pub fn is_undoable(&self) -> bool {
        !matches!(
            self,
            Command::SelectBar(_)
                | Command::SelectChord(_)
                | Command::SetPlaying(_)
                | Command::AdvanceBeat
                | Command::LoadProject(_)
        )
    }
}

/// A command tagged with its provenance.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub origin: Origin,
    pub command: Command,
}

impl Mutation {
    pub fn local(command: Command) -> Self {
        Self {
            origin: Origin::Local,
            command,
        }
    }

    pub fn remote(command: Command) -> Self {
        Self {
            origin: Origin::Remote,
            command,
        }
    }
}

/// Produce the next snapshot. Never fails: out of range inputs are clamped, unknown ids are
/// ignored.
pub fn reduce(state: &SongState, command: &Command) -> SongState {
    let mut next = state.clone();
    apply(&mut next, command);
    next
}

/// Apply `command` in place and return the event describing the change to other
/// participants, if the change is one they share.
pub fn apply(state: &mut SongState, command: &Command) -> Option<LocalEvent> {
    match command {
        Command::SetKey(key) => update_settings(
            state,
            &SettingsPatch {
                key: Some(key.clone()),
                ..Default::default()
            },
        ),
        Command::SetBpm(bpm) => update_settings(
            state,
            &SettingsPatch {
                tempo: Some(*bpm as f64),
                ..Default::default()
            },
        ),
        Command::SetStyle(style) => update_settings(
            state,
            &SettingsPatch {
                style: Some(style.clone()),
                ..Default::default()
            },
        ),
        Command::SetSwing(swing) => update_settings(
            state,
            &SettingsPatch {
                swing_amount: Some(*swing as f64),
                ..Default::default()
            },
        ),
        Command::SetTimeSignature(signature) => update_settings(
            state,
            &SettingsPatch {
                time_signature: Some(*signature),
                ..Default::default()
            },
        ),
        Command::SetBackingInstrument(instrument) => update_settings(
            state,
            &SettingsPatch {
                backing_instrument_id: Some(instrument.clone().unwrap_or_default()),
                ..Default::default()
            },
        ),
        Command::UpdateSettings(patch) => update_settings(state, patch),
        Command::AddSection { label, bars } => {
            state.sections.push(Section::new(label, (*bars).max(1)));
            if state.selection.is_none() {
                state.selection = Some(BarCursor {
                    section: state.sections.len() - 1,
                    bar: 0,
                });
            }
            Some(chord_progression_event(state))
        }
        Command::DeleteSection { section_id } => {
            let index = state.sections.iter().position(|s| s.id == *section_id)?;
            state.sections.remove(index);
            if let Some(cursor) = state.selection {
                state.selection = match cursor.section {
                    selected if selected > index => Some(BarCursor {
                        section: selected - 1,
                        bar: cursor.bar,
                    }),
                    selected if selected == index => clamp_cursor(state, cursor),
                    _ => Some(cursor),
                };
            }
            Some(chord_progression_event(state))
        }
        Command::SelectBar(cursor) => {
            state.selection = clamp_cursor(state, *cursor);
            None
        }
        Command::SelectChord(chord_id) => {
            let cursor = decode_chord_id(chord_id).and_then(|index| state.cursor_at(index))?;
            state.selection = Some(cursor);
            None
        }
        Command::WriteChord(chord) => write_chord(state, chord.clone()),
        Command::ReplaceChordProgression(chords) => {
            replace_chord_progression(state, chords);
            Some(chord_progression_event(state))
        }
        Command::AddLick {
            section_id,
            lick_id,
            start_bar,
            duration,
        } => {
            let section = state.sections.iter_mut().find(|s| s.id == *section_id)?;
            let (start_bar, duration) = clamp_lick(section.bar_count(), *start_bar, *duration)?;
            section.bars[start_bar].licks.push(LickInstance {
                id: uuid::Uuid::new_v4().to_string(),
                lick_id: lick_id.clone(),
                start_bar,
                duration,
            });
            None
        }
        Command::MoveLick {
            instance_id,
            to_section,
            start_bar,
        } => {
            let destination = state.sections.iter().position(|s| s.id == *to_section)?;
            let bar_count = state.sections[destination].bar_count();
            let (start_bar, _) = clamp_lick(bar_count, *start_bar, 1)?;
            let mut lick = take_lick(state, instance_id)?;
            let (_, duration) = clamp_lick(bar_count, start_bar, lick.duration)?;
            lick.start_bar = start_bar;
            lick.duration = duration;
            state.sections[destination].bars[start_bar].licks.push(lick);
            None
        }
        Command::ResizeLick {
            instance_id,
            duration,
        } => {
            let section = state
                .sections
                .iter_mut()
                .find(|s| s.licks().any(|l| l.id == *instance_id))?;
            let bar_count = section.bar_count();
            let lick = section
                .bars
                .iter_mut()
                .flat_map(|bar| bar.licks.iter_mut())
                .find(|l| l.id == *instance_id)?;
            let (_, duration) = clamp_lick(bar_count, lick.start_bar, *duration)?;
            lick.duration = duration;
            None
        }
        Command::RemoveLick { instance_id } => {
            take_lick(state, instance_id);
            None
        }
        Command::SetBandVolume { instrument, volume } => {
            if volume.is_finite() {
                state.band.channels.entry(instrument.clone()).or_default().volume =
                    (*volume).clamp(0., 1.);
            }
            None
        }
        Command::SetBandMute { instrument, muted } => {
            state.band.channels.entry(instrument.clone()).or_default().muted = *muted;
            None
        }
        Command::SetPlaying(playing) => {
            state.is_playing = *playing;
            None
        }
        Command::AdvanceBeat => {
            let total_beats = state.total_bars() as u32 * state.settings.time_signature.beats as u32;
            state.current_beat = if total_beats > 0 {
                (state.current_beat + 1) % total_beats
            } else {
                state.current_beat + 1
            };
            None
        }
        Command::AddTrack(track) => {
            let mut track = track.clone();
            track.items = track
                .items
                .into_iter()
                .filter_map(|item| normalize_timeline_item(Some(item.into())))
                .collect();
            track.sort_items();
            match state.tracks.iter_mut().find(|t| t.id == track.id) {
                Some(existing) => *existing = track.clone(),
                None => state.tracks.push(track.clone()),
            }
            Some(LocalEvent::TrackAdd { track })
        }
        Command::UpdateTrack { track_id, patch } => {
            let track = state.tracks.iter_mut().find(|t| t.id == *track_id)?;
            patch.apply(track);
            Some(LocalEvent::TrackUpdate {
                track_id: track_id.clone(),
                updates: patch.clone(),
            })
        }
        Command::DeleteTrack { track_id } => {
            let index = state.tracks.iter().position(|t| t.id == *track_id)?;
            state.tracks.remove(index);
            Some(LocalEvent::TrackDelete {
                track_id: track_id.clone(),
            })
        }
        Command::AddTimelineItem { track_id, item } => {
            let index = state.tracks.iter().position(|t| t.id == *track_id)?;
            let item = normalize_timeline_item(Some(item.clone()))?;
            for track in state.tracks.iter_mut() {
                track.items.retain(|existing| existing.id != item.id);
            }
            state.tracks[index].upsert_item(item.clone());
            Some(LocalEvent::LickAdd {
                track_id: track_id.clone(),
                item,
            })
        }
        Command::UpdateTimelineItem { item_id, patch } => {
            patch_item(state, item_id, patch)?;
            Some(LocalEvent::TimelineUpdate {
                item_id: item_id.clone(),
                updates: patch.clone(),
            })
        }
        Command::MoveTimelineItem { item_id, patch } => {
            let patch = TimelineItemPatch::position(patch.start_time, patch.duration, patch.offset);
            patch_item(state, item_id, &patch)?;
            Some(LocalEvent::TimelinePositionUpdate {
                item_id: item_id.clone(),
                updates: patch,
            })
        }
        Command::BulkUpdateTimelineItems(patches) => {
            let applied: Vec<TimelineItemPatch> = patches
                .iter()
                .filter(|patch| match &patch.id {
                    Some(id) => patch_item(state, id, patch).is_some(),
                    None => false,
                })
                .cloned()
                .collect();
            if applied.is_empty() {
                return None;
            }
            Some(LocalEvent::TimelineBulkUpdate { items: applied })
        }
        Command::DeleteTimelineItem { item_id } => {
            let mut found = false;
            for track in state.tracks.iter_mut() {
                let before = track.items.len();
                track.items.retain(|item| item.id != *item_id);
                found |= track.items.len() != before;
            }
            found.then(|| LocalEvent::TimelineDelete {
                item_id: item_id.clone(),
            })
        }
        Command::LoadProject(snapshot) => {
            load_project(state, snapshot);
            None
        }
    }
}

fn update_settings(state: &mut SongState, patch: &SettingsPatch) -> Option<LocalEvent> {
    if patch.is_empty() {
        return None;
    }
    patch.apply(&mut state.settings);
    let settings = &state.settings;
    // Broadcast the values as stored, after clamping
    let applied = SettingsPatch {
        tempo: patch.tempo.map(|_| settings.bpm as f64),
        swing_amount: patch.swing_amount.map(|_| settings.swing_amount as f64),
        time_signature: patch.time_signature.map(|_| settings.time_signature),
        key: patch.key.as_ref().map(|_| settings.key.clone()),
        style: patch.style.as_ref().map(|_| settings.style.clone()),
        backing_instrument_id: patch
            .backing_instrument_id
            .as_ref()
            .map(|_| settings.backing_instrument_id.clone().unwrap_or_default()),
    };
    Some(LocalEvent::SettingsUpdate(applied))
}

fn chord_progression_event(state: &SongState) -> LocalEvent {
    LocalEvent::ChordProgression {
        chords: state.chord_progression(),
    }
}

/// Closest valid bar to `cursor`, or `None` when the song has no bar.
fn clamp_cursor(state: &SongState, cursor: BarCursor) -> Option<BarCursor> {
    let last_section = state.sections.len().checked_sub(1)?;
    let section = cursor.section.min(last_section);
    let last_bar = state.sections[section].bar_count().checked_sub(1)?;
    Some(BarCursor {
        section,
        bar: cursor.bar.min(last_bar),
    })
}

/// Cursor following `cursor`, rolling over into the next section that has bars.
fn next_cursor(state: &SongState, cursor: BarCursor) -> Option<BarCursor> {
    if cursor.bar + 1 < state.sections[cursor.section].bar_count() {
        return Some(BarCursor {
            section: cursor.section,
            bar: cursor.bar + 1,
        });
    }
    state
        .sections
        .iter()
        .enumerate()
        .skip(cursor.section + 1)
        .find(|(_, section)| section.bar_count() > 0)
        .map(|(section, _)| BarCursor { section, bar: 0 })
}

fn write_chord(state: &mut SongState, chord: Option<String>) -> Option<LocalEvent> {
    let cursor = state.selection?;
    let bar = state
        .sections
        .get_mut(cursor.section)?
        .bars
        .get_mut(cursor.bar)?;
    bar.chord = chord.filter(|c| !c.trim().is_empty());
    // Last bar of the song: the selection stays where it is
    if let Some(next) = next_cursor(state, cursor) {
        state.selection = Some(next);
    }
    Some(chord_progression_event(state))
}

fn replace_chord_progression(state: &mut SongState, chords: &[Option<String>]) {
    let capacity = state.total_bars();
    if chords.len() > capacity {
        if state.sections.is_empty() {
            state.sections.push(Section::new("A", 0));
        }
        if let Some(last) = state.sections.last_mut() {
            last.bars
                .resize_with(last.bars.len() + chords.len() - capacity, Default::default);
        }
    }
    let mut chords = chords.iter();
    for bar in state.sections.iter_mut().flat_map(|s| s.bars.iter_mut()) {
        bar.chord = chords.next().cloned().flatten();
    }
    if state.selection.is_none() && state.total_bars() > 0 {
        state.selection = clamp_cursor(state, BarCursor { section: 0, bar: 0 });
    }
}

/// Fit a lick into a section of `bar_count` bars. `None` when the section has no bar.
fn clamp_lick(bar_count: usize, start_bar: usize, duration: usize) -> Option<(usize, usize)> {
    let last = bar_count.checked_sub(1)?;
    let start_bar = start_bar.min(last);
    let duration = duration.clamp(1, bar_count - start_bar);
    Some((start_bar, duration))
}

fn take_lick(state: &mut SongState, instance_id: &str) -> Option<LickInstance> {
    for bar in state.sections.iter_mut().flat_map(|s| s.bars.iter_mut()) {
        if let Some(index) = bar.licks.iter().position(|l| l.id == instance_id) {
            return Some(bar.licks.remove(index));
        }
    }
    None
}

/// Merge a patch into the clip with id `item_id`. `None` when no track holds it.
fn patch_item(state: &mut SongState, item_id: &str, patch: &TimelineItemPatch) -> Option<()> {
    let track = state.tracks.iter_mut().find(|t| t.contains(item_id))?;
    let item = track.items.iter_mut().find(|i| i.id == item_id)?;
    let mut patched = item.patched(patch);
    // The id is not something a patch can change
    patched.id = item_id.to_string();
    *item = patched;
    track.sort_items();
    Some(())
}

fn load_project(state: &mut SongState, snapshot: &ProjectSnapshot) {
    let project = &snapshot.project;
    if let Some(id) = &project.id {
        state.project_id = Some(id.clone());
    }
    if let Some(title) = &project.title {
        state.title = title.clone();
    }
    if let Some(owner) = &project.owner_id {
        state.owner_id = Some(owner.clone());
    }
    project.settings.apply(&mut state.settings);
    if let Some(sections) = &project.sections {
        state.sections = sections.clone();
    }
    if let Some(chords) = &project.chord_progression {
        let chords: Vec<Option<String>> = chords.iter().map(|slot| slot.0.clone()).collect();
        if state.sections.is_empty() && !chords.is_empty() {
            state
                .sections
                .push(Section::new("A", chords.len().max(DEFAULT_BARS_PER_SECTION)));
        }
        replace_chord_progression(state, &chords);
    }
    state.tracks = snapshot.tracks.clone();
    state.selection = state
        .selection
        .and_then(|cursor| clamp_cursor(state, cursor))
        .or_else(|| clamp_cursor(state, BarCursor { section: 0, bar: 0 }));
}
