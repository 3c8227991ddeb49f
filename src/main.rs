use keys_follow::active_keys::ActiveKeyState;
use keys_follow::console_display::{Canvas, ConsoleDisplay};
use keys_follow::data_logger::DataLogger;
use keys_follow::ingestor::EventIngestor;
use keys_follow::interval_store::NoteIntervalStore;
use keys_follow::key_layout::LayoutParams;
use keys_follow::playback_clock::{ClockConfig, ClockMode, FrameClock, PlaybackClock};
use keys_follow::score::Score;
use keys_follow::simulator::{self, Gesture};
use keys_follow::types::*;

use clap::Parser;
use crossbeam_channel::bounded;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(name = "keys-follow")]
#[command(about = "Piano practice visualizer: follow a score or watch your own playing")]
struct Cli {
    /// Clock mode: "practice" (wait for the right keys) or "realtime"
    #[arg(long, default_value = "practice")]
    mode: String,

    /// Score to practice (JSON: division + tracks of tick/message pairs)
    #[arg(long)]
    score: Option<PathBuf>,

    /// Tempo; defaults to the score's own tempo, then 100
    #[arg(long)]
    bpm: Option<f64>,

    /// Lowest key on the keyboard (MIDI key number)
    #[arg(long, default_value_t = 36)]
    first_key: u8,

    /// Number of keys on the keyboard
    #[arg(long, default_value_t = 49)]
    num_keys: u8,

    /// Canvas width used for geometry
    #[arg(long, default_value_t = 1200.0)]
    width: f64,

    /// Canvas height used for geometry
    #[arg(long, default_value_t = 400.0)]
    height: f64,

    /// Display refresh rate (frames per second)
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Lead-in before song time 0 (ms)
    #[arg(long, default_value_t = 3000)]
    lead_ms: i64,

    /// Visible span of the timeline (ms)
    #[arg(long, default_value_t = 3000)]
    duration_ms: i64,

    /// Record every played note to a session file
    #[arg(long)]
    record: bool,

    /// Output directory for recorded sessions
    #[arg(long, default_value = "./sessions")]
    output_dir: PathBuf,

    /// Play the input with the built-in simulator (uses the demo score when
    /// no --score is given)
    #[arg(long)]
    demo: bool,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();
    let session = SessionClock::new();

    let mode = match cli.mode.as_str() {
        "practice" | "gated" => ClockMode::Gated,
        "realtime" => ClockMode::RealtimeOut,
        other => {
            warn!("Unknown mode '{}', using practice", other);
            ClockMode::Gated
        }
    };

    // ─── Score ──────────────────────────────────────────────────────
    let score = match (&cli.score, cli.demo) {
        (Some(path), _) => match Score::from_path(path) {
            Ok(score) => Some(score),
            Err(e) => {
                error!("Failed to load score {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        (None, true) => Some(simulator::demo_score()),
        (None, false) => None,
    };
    let bpm = cli
        .bpm
        .or_else(|| score.as_ref().and_then(Score::tempo_bpm))
        .unwrap_or(100.0);
    let events: Vec<NoteEvent> = match &score {
        Some(score) => match score.time_base(bpm) {
            Ok(tb) => score.note_events(&tb),
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        None => Vec::new(),
    };

    let layout = LayoutParams {
        first_key: cli.first_key,
        num_keys: cli.num_keys,
        ..LayoutParams::default()
    };
    if layout.num_keys == 0 || layout.first_key as u16 + layout.num_keys as u16 > 128 {
        error!("Key range {}+{} does not fit in 0..=127", layout.first_key, layout.num_keys);
        std::process::exit(1);
    }
    let config = ClockConfig {
        timeline_lead_ms: cli.lead_ms,
        timeline_duration_ms: cli.duration_ms,
    };

    info!("═══════════════════════════════════════════════");
    info!("  KEYS FOLLOW v{}", env!("CARGO_PKG_VERSION"));
    info!("  Mode: {:?}", mode);
    info!("  Keys: {} .. {} ({} keys)", Pitch::from_key(layout.first_key), Pitch::from_key(layout.last_key()), layout.num_keys);
    match &cli.score {
        Some(path) => info!("  Score: {:?} ({} note events, {:.0} bpm)", path, events.len(), bpm),
        None if cli.demo => info!("  Score: built-in demo ({} note events)", events.len()),
        None => info!("  Score: none"),
    }
    if cli.record { info!("  Recording → {:?}", cli.output_dir); }
    info!("═══════════════════════════════════════════════");

    // ─── Shared state ───────────────────────────────────────────────
    let score_notes = Arc::new(NoteIntervalStore::new());
    let player_notes = Arc::new(NoteIntervalStore::new());
    let active_keys = Arc::new(ActiveKeyState::new());

    // Channel: input → ingestor
    let (input_tx, input_rx) = bounded::<RawEvent>(4096);
    // Display stops when this fires or every sender is gone.
    let (stop_tx, stop_rx) = bounded::<()>(1);

    let mut handles = Vec::new();
    let mut ingestor = EventIngestor::new(player_notes.clone()).with_active_keys(active_keys.clone());

    // ─── Session recorder ───────────────────────────────────────────
    if cli.record {
        let (tx, rx) = bounded::<NoteEvent>(4096);
        match DataLogger::new(rx, &cli.output_dir, layout) {
            Ok(logger) => {
                ingestor.add_listener(tx);
                handles.push(thread::Builder::new().name("logger".into()).spawn(move || {
                    if let Err(e) = logger.run() {
                        error!("Recording failed: {}", e);
                    }
                }).expect("spawn logger thread"));
            }
            Err(e) => error!("Recording disabled: {}", e),
        }
    }

    // ─── Ingestor ───────────────────────────────────────────────────
    handles.push(thread::Builder::new().name("ingestor".into()).spawn(move || {
        ingestor.run(input_rx);
    }).expect("spawn ingestor thread"));

    // ─── Clock ──────────────────────────────────────────────────────
    let clock = PlaybackClock::new(config, mode, score_notes.clone(), active_keys.clone());
    let clock_handle = clock.handle();
    let position = clock.position();
    if mode == ClockMode::Gated {
        clock_handle.load(events.clone());
        clock_handle.play();
    }

    // ─── Input source ───────────────────────────────────────────────
    if cli.demo {
        info!("Starting simulator...");
        let sim_clock = session.clone();
        let sim_tx = input_tx.clone();
        // In practice mode the simulator plays along with song time.
        let gestures = match mode {
            ClockMode::Gated => simulator::gestures_for(&events),
            ClockMode::RealtimeOut => improv_gestures(),
        };
        let stop = stop_tx.clone();
        handles.push(thread::Builder::new().name("simulator".into()).spawn(move || {
            simulator::Simulator::new(sim_clock, sim_tx)
                .with_position(position)
                .run(&gestures);
            thread::sleep(std::time::Duration::from_millis(1000));
            let _ = stop.try_send(());
        }).expect("spawn simulator thread"));
    } else {
        info!("No input source attached; showing the score only.");
    }
    drop(input_tx);

    // ─── Frame loop on the main thread ──────────────────────────────
    let mut display = ConsoleDisplay::new(
        FrameClock::new(clock),
        score_notes,
        player_notes,
        active_keys,
        session,
    )
    .with_layout(layout, Canvas { width: cli.width, height: cli.height })
    .with_bpm(bpm)
    .with_fps(cli.fps);
    display.run(stop_rx, cli.frames);
    // Dropping the clock releases a simulator still waiting on song time.
    drop(display);
    drop(stop_tx);

    for h in handles {
        let _ = h.join();
    }
}

/// A few bars of free playing for realtime mode.
fn improv_gestures() -> Vec<Gesture> {
    let chord = |keys: &[u8], ms: u32| {
        [
            Gesture::Press { keys: keys.to_vec(), velocity: 80 },
            Gesture::Hold { ms },
            Gesture::Release { keys: keys.to_vec() },
        ]
    };
    let mut g = vec![Gesture::Hold { ms: 500 }, Gesture::Sustain { down: true }];
    g.extend(chord(&[48, 60, 64, 67], 800));
    g.extend(chord(&[53, 60, 65, 69], 800));
    g.extend(chord(&[55, 59, 62, 67], 800));
    g.push(Gesture::Sustain { down: false });
    for key in [72u8, 71, 69, 67, 65, 64, 62, 60] {
        g.extend(chord(&[key], 200));
    }
    g
}
