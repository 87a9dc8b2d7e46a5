use std::{
    fs::File,
    io::{BufRead, BufReader},
    time::{Duration, Instant},
};

use crossbeam::channel::unbounded;
use tonique_jam::{
    Session,
    audio::{AudioEngine, AudioError, PlayerSpec, UrlResolver},
    collab::{
        ProjectRefresher,
        presence::{LocalIdentity, Participant},
    },
    config::Config,
    message::InboundMessage,
    utils::parse_name,
};
use tracing_subscriber::EnvFilter;

/// Audio engine for replays: no device, players are only counted.
struct SilentEngine;

impl AudioEngine for SilentEngine {
    fn ensure_started(&mut self) -> Result<(), AudioError> {
        Err(AudioError::NotReady)
    }
    fn set_bpm(&mut self, _bpm: f32) {}
    fn set_position(&mut self, _seconds: f64) {}
    fn position(&self) -> f64 {
        0.
    }
    fn start_transport(&mut self) {}
    fn pause_transport(&mut self) {}
    fn stop_transport(&mut self) {}
    fn is_transport_playing(&self) -> bool {
        false
    }
    fn schedule_player(&mut self, _key: &str, _spec: &PlayerSpec) -> Result<(), AudioError> {
        Err(AudioError::NotReady)
    }
    fn remove_player(&mut self, _key: &str) {}
    fn player_keys(&self) -> Vec<String> {
        Vec::new()
    }
    fn stop_all_players(&mut self) {}
    fn dispose_all_players(&mut self) {}
}

/// A replay cannot reload anything, it only reports it.
struct LogRefresher;

impl ProjectRefresher for LogRefresher {
    fn refresh_project(&mut self, show_loading: bool) {
        tracing::info!("Project reload requested (show loading: {show_loading})");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: tonique-jam <messages.jsonl> [owner id] [user id]");
        std::process::exit(2);
    };
    let owner = args.next().unwrap_or_else(|| "owner".into());
    let user = args.next().unwrap_or_else(|| owner.clone());

    let config = Config::load();
    let identity = LocalIdentity {
        owner: Participant::new(&owner, None),
        current_user: Participant::new(&user, None),
    };
    let (sender, receiver) = unbounded();
    let (mut session, mut outbound) = Session::<SilentEngine, _, _>::new(
        identity,
        &config,
        receiver,
        UrlResolver::new(&config.api_base_url),
        LogRefresher,
    );
    session.attach_engine(SilentEngine);

    // Feed the channel one frame at a time, like the live client
    let start = Instant::now();
    let reader = BufReader::new(File::open(&path)?);
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(&line) {
            Ok(message) => sender.send(message)?,
            Err(err) => tracing::warn!("Line {} skipped: {err}", index + 1),
        }
        session.update(start + Duration::from_millis(16 * index as u64));
    }

    let state = session.store().state();
    println!("{} ({} BPM, {})", state.title, state.settings.bpm, state.settings.time_signature);
    for (index, track) in state.tracks.iter().enumerate() {
        println!(
            "{}: {} clips, ends at {:.2}s",
            parse_name(&track.title, index),
            track.items.len(),
            track.end_time()
        );
    }
    println!("{}", serde_json::to_string_pretty(&state.chord_cells())?);
    for collaborator in session.reconciler().presence().collaborators() {
        println!(
            "{} ({}) {}",
            collaborator.name().unwrap_or(&collaborator.user_id),
            collaborator.role,
            collaborator.status
        );
    }

    let mut echoed = 0;
    while outbound.pop().is_ok() {
        echoed += 1;
    }
    if echoed > 0 {
        tracing::warn!("{echoed} events would have been sent back");
    }
    session.close();
    Ok(())
}
