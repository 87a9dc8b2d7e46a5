use rtrb::{Consumer, RingBuffer};

use crate::{
    core::{
        clip::{ItemKind, RawTimelineItem, TimelineItem, TimelineItemPatch},
        song::{BarCursor, ProjectSnapshot, SettingsPatch, chord_id},
        state::{
            ProjectStore, SongState,
            action::{Command, reduce},
        },
        track::{Track, TrackPatch},
    },
    message::LocalEvent,
};

fn setup_store() -> (ProjectStore, Consumer<LocalEvent>) {
    let (tx, rx) = RingBuffer::new(128);
    (ProjectStore::new(tx), rx)
}

fn drain(rx: &mut Consumer<LocalEvent>) -> Vec<LocalEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.pop() {
        events.push(event);
    }
    events
}

fn clip(id: &str, start_time: f64, duration: f64) -> TimelineItem {
    let mut item = TimelineItem::new(ItemKind::Lick, start_time, duration);
    item.id = id.into();
    item
}

fn store_with_track() -> (ProjectStore, Consumer<LocalEvent>) {
    let (mut store, mut rx) = setup_store();
    let mut track = Track::from("t1", "Guitar");
    track.items = vec![clip("a", 0., 2.), clip("b", 4., 1.)];
    store.dispatch(Command::AddTrack(track));
    drain(&mut rx);
    (store, rx)
}

fn song_with_sections(bars: &[usize]) -> ProjectStore {
    let (mut store, _) = setup_store();
    for (index, count) in bars.iter().enumerate() {
        store.dispatch(Command::AddSection {
            label: format!("S{index}"),
            bars: *count,
        });
    }
    store
}

#[test]
fn test_local_edit_is_broadcast() {
    let (mut store, mut rx) = setup_store();
    store.dispatch(Command::SetBpm(96.));
    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![LocalEvent::SettingsUpdate(SettingsPatch {
            tempo: Some(96.),
            ..Default::default()
        })]
    );
    assert_eq!(store.snapshot().settings.bpm, 96.);
}

#[test]
fn test_remote_edit_is_not_broadcast() {
    let (mut store, mut rx) = store_with_track();
    store.apply_remote(Command::DeleteTimelineItem { item_id: "a".into() });
    store.apply_remote(Command::SetKey("F".into()));
    assert!(drain(&mut rx).is_empty());
    assert!(store.snapshot().find_item("a").is_none());
    assert_eq!(store.snapshot().settings.key, "F");
}

#[test]
fn test_bpm_is_clamped() {
    let (mut store, mut rx) = setup_store();
    store.dispatch(Command::SetBpm(5000.));
    assert_eq!(store.snapshot().settings.bpm, 999.9);
    let Some(LocalEvent::SettingsUpdate(patch)) = drain(&mut rx).pop() else {
        panic!("expected a settings update");
    };
    assert_eq!(patch.tempo, Some(999.9_f32 as f64));
}

#[test]
fn test_reduce_leaves_previous_snapshot_untouched() {
    let before = SongState::default();
    let after = reduce(&before, &Command::SetStyle("bossa".into()));
    assert_eq!(before.settings.style, "swing");
    assert_eq!(after.settings.style, "bossa");
}

#[test]
fn test_snapshots_are_shared_not_mutated() {
    let (mut store, _) = setup_store();
    let held = store.state();
    store.dispatch(Command::SetKey("Bb".into()));
    assert_eq!(held.settings.key, "C");
    assert_eq!(store.state().settings.key, "Bb");
}

#[test]
fn test_write_chord_advances_across_sections() {
    let mut store = song_with_sections(&[2, 1]);
    assert_eq!(store.snapshot().selection, Some(BarCursor { section: 0, bar: 0 }));
    for chord in ["Dm7", "G7", "Cmaj7"] {
        store.dispatch(Command::WriteChord(Some(chord.into())));
    }
    let state = store.snapshot();
    assert_eq!(
        state.chord_progression(),
        vec![
            Some("Dm7".to_string()),
            Some("G7".to_string()),
            Some("Cmaj7".to_string())
        ]
    );
    // Last bar of the song: the selection holds
    assert_eq!(state.selection, Some(BarCursor { section: 1, bar: 0 }));
    store.dispatch(Command::WriteChord(Some("C6".into())));
    assert_eq!(store.snapshot().chord_progression()[2].as_deref(), Some("C6"));
}

#[test]
fn test_write_chord_without_selection() {
    let (mut store, mut rx) = setup_store();
    store.dispatch(Command::WriteChord(Some("C".into())));
    assert!(drain(&mut rx).is_empty());
    assert_eq!(store.revision(), 0);
}

#[test]
fn test_select_bar_is_clamped() {
    let mut store = song_with_sections(&[4]);
    store.dispatch(Command::SelectBar(BarCursor { section: 3, bar: 9 }));
    assert_eq!(store.snapshot().selection, Some(BarCursor { section: 0, bar: 3 }));
}

#[test]
fn test_replace_progression_extends_last_section() {
    let mut store = song_with_sections(&[2, 2]);
    let chords: Vec<Option<String>> = ["C", "Am", "F", "G", "E7"]
        .iter()
        .map(|c| Some(c.to_string()))
        .collect();
    store.dispatch(Command::ReplaceChordProgression(chords.clone()));
    let state = store.snapshot();
    assert_eq!(state.sections[1].bar_count(), 3);
    assert_eq!(state.chord_progression(), chords);

    store.dispatch(Command::ReplaceChordProgression(vec![Some("D".into())]));
    let progression = store.snapshot().chord_progression();
    assert_eq!(progression.len(), 5);
    assert_eq!(progression[0].as_deref(), Some("D"));
    assert!(progression[1..].iter().all(Option::is_none));
}

#[test]
fn test_replace_progression_on_empty_song() {
    let (mut store, mut rx) = setup_store();
    store.dispatch(Command::ReplaceChordProgression(vec![Some("C".into()), None]));
    let state = store.snapshot();
    assert_eq!(state.sections.len(), 1);
    assert_eq!(state.sections[0].label, "A");
    assert_eq!(state.total_bars(), 2);
    assert_eq!(
        drain(&mut rx),
        vec![LocalEvent::ChordProgression {
            chords: vec![Some("C".into()), None]
        }]
    );
}

#[test]
fn test_chord_cells_use_bar_ids() {
    let mut store = song_with_sections(&[3]);
    store.dispatch(Command::ReplaceChordProgression(vec![None, Some("G7".into())]));
    let cells = store.snapshot().chord_cells();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].id, chord_id(1));
    assert_eq!(cells[0].entry.chord_name, "G7");
    assert!(!cells[0].entry.midi_notes.is_empty());
}

#[test]
fn test_select_chord_by_id() {
    let (mut store, mut rx) = setup_store();
    for bars in [2, 3] {
        store.dispatch(Command::AddSection {
            label: "S".into(),
            bars,
        });
    }
    drain(&mut rx);
    store.dispatch(Command::SelectChord(chord_id(3)));
    assert_eq!(store.snapshot().selection, Some(BarCursor { section: 1, bar: 1 }));

    // Garbled or out of range ids leave the selection alone
    for id in ["chord-9".to_string(), "chord-x".to_string(), "bar-1".to_string()] {
        store.dispatch(Command::SelectChord(id));
        assert_eq!(store.snapshot().selection, Some(BarCursor { section: 1, bar: 1 }));
    }
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_delete_section_fixes_selection() {
    let mut store = song_with_sections(&[2, 2]);
    store.dispatch(Command::SelectBar(BarCursor { section: 1, bar: 1 }));
    let first = store.snapshot().sections[0].id.clone();
    store.dispatch(Command::DeleteSection { section_id: first });
    let state = store.snapshot();
    assert_eq!(state.sections.len(), 1);
    assert_eq!(state.selection, Some(BarCursor { section: 0, bar: 1 }));

    let last = state.sections[0].id.clone();
    store.dispatch(Command::DeleteSection { section_id: last });
    assert_eq!(store.snapshot().selection, None);
}

#[test]
fn test_lick_bounds_are_clamped() {
    let mut store = song_with_sections(&[4, 2]);
    let first = store.snapshot().sections[0].id.clone();
    let second = store.snapshot().sections[1].id.clone();
    store.dispatch(Command::AddLick {
        section_id: first.clone(),
        lick_id: "lick-1".into(),
        start_bar: 10,
        duration: 5,
    });
    let lick = store.snapshot().sections[0].licks().next().cloned().unwrap();
    assert_eq!((lick.start_bar, lick.duration), (3, 1));

    store.dispatch(Command::MoveLick {
        instance_id: lick.id.clone(),
        to_section: second.clone(),
        start_bar: 0,
    });
    store.dispatch(Command::ResizeLick {
        instance_id: lick.id.clone(),
        duration: 9,
    });
    let state = store.snapshot();
    assert_eq!(state.sections[0].licks().count(), 0);
    let moved = state.sections[1].licks().next().unwrap();
    assert_eq!((moved.start_bar, moved.duration), (0, 2));

    // Unknown destination leaves the lick where it is
    store.dispatch(Command::MoveLick {
        instance_id: lick.id.clone(),
        to_section: "nowhere".into(),
        start_bar: 0,
    });
    assert_eq!(store.snapshot().sections[1].licks().count(), 1);

    store.dispatch(Command::RemoveLick { instance_id: lick.id });
    assert_eq!(store.snapshot().sections[1].licks().count(), 0);
}

#[test]
fn test_advance_beat_wraps() {
    let mut store = song_with_sections(&[1]);
    store.dispatch(Command::SetTimeSignature(crate::core::song::TimeSignature {
        beats: 3,
        note_value: 4,
    }));
    for _ in 0..4 {
        store.dispatch(Command::AdvanceBeat);
    }
    assert_eq!(store.snapshot().current_beat, 1);
}

#[test]
fn test_band_volume_is_clamped() {
    let (mut store, mut rx) = setup_store();
    store.dispatch(Command::SetBandVolume {
        instrument: "bass".into(),
        volume: 3.,
    });
    store.dispatch(Command::SetBandMute {
        instrument: "drums".into(),
        muted: true,
    });
    let band = &store.snapshot().band;
    assert_eq!(band.channels["bass"].volume, 1.);
    assert!(band.channels["drums"].muted);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_add_timeline_item_normalizes() {
    let (mut store, mut rx) = store_with_track();
    let raw = RawTimelineItem {
        id: Some("c".into()),
        start_time: Some(-3.),
        duration: Some(0.),
        ..Default::default()
    };
    store.dispatch(Command::AddTimelineItem {
        track_id: "t1".into(),
        item: raw,
    });
    let (_, item) = store.snapshot().find_item("c").unwrap();
    assert_eq!(item.start_time, 0.);
    assert!(item.duration >= crate::core::clip::MIN_CLIP_DURATION);
    let ids: Vec<&str> = store.snapshot().tracks[0]
        .items
        .iter()
        .map(|i| i.id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "c", "b"]);
    assert!(matches!(&drain(&mut rx)[..], [LocalEvent::LickAdd { track_id, .. }] if track_id == "t1"));
}

#[test]
fn test_add_timeline_item_to_unknown_track() {
    let (mut store, mut rx) = store_with_track();
    store.dispatch(Command::AddTimelineItem {
        track_id: "missing".into(),
        item: RawTimelineItem::default(),
    });
    assert!(drain(&mut rx).is_empty());
    assert_eq!(store.snapshot().tracks[0].items.len(), 2);
}

#[test]
fn test_update_missing_item_is_noop() {
    let (mut store, mut rx) = store_with_track();
    let revision = store.revision();
    store.dispatch(Command::UpdateTimelineItem {
        item_id: "ghost".into(),
        patch: TimelineItemPatch::position(Some(1.), None, None),
    });
    assert_eq!(store.revision(), revision);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_move_only_uses_geometry() {
    let (mut store, mut rx) = store_with_track();
    let patch = TimelineItemPatch {
        start_time: Some(8.),
        chord_name: Some("C".into()),
        ..Default::default()
    };
    store.dispatch(Command::MoveTimelineItem {
        item_id: "a".into(),
        patch,
    });
    let (_, item) = store.snapshot().find_item("a").unwrap();
    assert_eq!(item.start_time, 8.);
    assert_eq!(item.chord_name, None);
    assert_eq!(store.snapshot().tracks[0].items[1].id, "a");
    let [LocalEvent::TimelinePositionUpdate { updates, .. }] = &drain(&mut rx)[..] else {
        panic!("expected a position update");
    };
    assert_eq!(updates.chord_name, None);
}

#[test]
fn test_bulk_update_skips_unknown_items() {
    let (mut store, mut rx) = store_with_track();
    let patches = vec![
        TimelineItemPatch {
            id: Some("b".into()),
            duration: Some(3.),
            ..Default::default()
        },
        TimelineItemPatch {
            id: Some("ghost".into()),
            duration: Some(3.),
            ..Default::default()
        },
        TimelineItemPatch {
            duration: Some(3.),
            ..Default::default()
        },
    ];
    store.dispatch(Command::BulkUpdateTimelineItems(patches));
    let (_, item) = store.snapshot().find_item("b").unwrap();
    assert_eq!(item.duration, 3.);
    assert_eq!(item.start_time, 4.);
    let [LocalEvent::TimelineBulkUpdate { items }] = &drain(&mut rx)[..] else {
        panic!("expected a bulk update");
    };
    assert_eq!(items.len(), 1);
}

#[test]
fn test_delete_then_update_keeps_item_absent() {
    let (mut store, _) = store_with_track();
    store.apply_remote(Command::DeleteTimelineItem { item_id: "a".into() });
    store.apply_remote(Command::UpdateTimelineItem {
        item_id: "a".into(),
        patch: TimelineItemPatch::position(Some(2.), None, None),
    });
    assert!(store.snapshot().find_item("a").is_none());
}

#[test]
fn test_track_lifecycle() {
    let (mut store, mut rx) = store_with_track();
    store.dispatch(Command::UpdateTrack {
        track_id: "t1".into(),
        patch: TrackPatch {
            muted: Some(true),
            ..Default::default()
        },
    });
    assert!(store.snapshot().track("t1").unwrap().muted);
    store.dispatch(Command::DeleteTrack {
        track_id: "t1".into(),
    });
    store.dispatch(Command::DeleteTrack {
        track_id: "t1".into(),
    });
    assert!(store.snapshot().tracks.is_empty());
    let topics: Vec<&str> = drain(&mut rx).iter().map(LocalEvent::topic).collect();
    assert_eq!(topics, vec!["trackUpdate", "trackDelete"]);
}

#[test]
fn test_tracks_revision_only_follows_tracks() {
    let (mut store, _) = store_with_track();
    let tracks_revision = store.tracks_revision();
    store.dispatch(Command::SetKey("G".into()));
    assert_eq!(store.tracks_revision(), tracks_revision);
    store.dispatch(Command::DeleteTimelineItem { item_id: "b".into() });
    assert_eq!(store.tracks_revision(), tracks_revision + 1);
}

#[test]
fn test_undo_redo() {
    let (mut store, mut rx) = store_with_track();
    store.dispatch(Command::SetKey("E".into()));
    store.dispatch(Command::DeleteTimelineItem { item_id: "a".into() });
    drain(&mut rx);

    store.undo();
    assert!(store.snapshot().find_item("a").is_some());
    assert_eq!(store.snapshot().settings.key, "E");
    assert!(store.can_redo());
    let [LocalEvent::Snapshot { project, tracks }] = &drain(&mut rx)[..] else {
        panic!("expected a snapshot");
    };
    assert_eq!(project["key"], "E");
    assert_eq!(tracks[0].items.len(), 2);

    store.redo();
    assert!(store.snapshot().find_item("a").is_none());
    store.undo();
    store.undo();
    assert_eq!(store.snapshot().settings.key, "C");

    // A new edit drops what could be redone
    store.dispatch(Command::SetKey("D".into()));
    assert!(!store.can_redo());
}

#[test]
fn test_remote_edit_clears_history() {
    let (mut store, _) = store_with_track();
    store.dispatch(Command::SetKey("E".into()));
    assert!(store.can_undo());
    store.apply_remote(Command::SetStyle("funk".into()));
    assert!(!store.can_undo());
    store.undo();
    assert_eq!(store.snapshot().settings.key, "E");
}

#[test]
fn test_transport_is_not_undoable() {
    let (mut store, _) = setup_store();
    store.dispatch(Command::SetPlaying(true));
    assert!(!store.can_undo());
    store.dispatch(Command::SetKey("A".into()));
    store.undo();
    assert!(store.snapshot().is_playing);
}

#[test]
fn test_load_project() {
    let (mut store, mut rx) = store_with_track();
    let snapshot = ProjectSnapshot::from_value(&serde_json::json!({
        "project": {
            "_id": "p1",
            "title": "Blue Bossa",
            "tempo": "150",
            "timeSignature": "3/4",
            "chordProgression": ["Cm7", null, "Fm7"]
        },
        "tracks": [{ "_id": "t2", "title": "Sax", "items": [{ "_id": "x", "startTime": 1 }] }]
    }))
    .unwrap();
    store.apply_remote(Command::LoadProject(snapshot));
    let state = store.snapshot();
    assert_eq!(state.project_id.as_deref(), Some("p1"));
    assert_eq!(state.title, "Blue Bossa");
    assert_eq!(state.settings.bpm, 150.);
    assert_eq!(state.settings.time_signature.beats, 3);
    assert_eq!(
        state.chord_progression()[..3].to_vec(),
        vec![Some("Cm7".to_string()), None, Some("Fm7".to_string())]
    );
    assert!(state.track("t1").is_none());
    assert!(state.find_item("x").is_some());
    assert_eq!(state.selection, Some(BarCursor { section: 0, bar: 0 }));
    assert!(drain(&mut rx).is_empty());
}
