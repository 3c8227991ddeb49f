//! The playback clock: the single source of "now" for every renderer.
//!
//! In realtime mode "now" is the wall clock. In gated (practice) mode "now"
//! is a song offset that only advances while the player holds the notes
//! the score asks for at that instant:
//!
//! ```text
//!   Idle ──load──▶ GatedPaused ──play──▶ GatedRunning
//!                      ▲                     │
//!                      └───────pause─────────┘
//! ```
//!
//! The clock is owned by the thread that calls `tick()`. Other threads talk
//! to it through a `ClockHandle`; their requests are queued and applied at
//! the top of the next tick, so loading a score can never interleave with a
//! half-finished tick.

use crate::active_keys::ActiveKeyState;
use crate::interval_store::{NoteInterval, NoteIntervalStore};
use crate::key_layout::{KeyLayout, LayoutParams};
use crate::types::NoteEvent;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockMode {
    /// Pass-through: now = wall clock, notes scroll out of the keyboard.
    RealtimeOut,
    /// Practice: song time advances only while the right keys are held.
    Gated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Idle,
    RealtimeOut,
    GatedRunning,
    GatedPaused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// How far before song time 0 playback starts, so the first notes can
    /// scroll in before they must be played.
    pub timeline_lead_ms: i64,
    /// Span of song time visible on the timeline.
    pub timeline_duration_ms: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            timeline_lead_ms: 3000,
            timeline_duration_ms: 3000,
        }
    }
}

/// Clock bookkeeping. Only the clock owner mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    pub mode: ClockMode,
    pub running: bool,
    pub paused: bool,
    pub song_offset_ms: i64,
    /// Wall clock of the previous running tick; `None` means the next tick
    /// only sets the baseline.
    pub last_wall_clock_ms: Option<i64>,
}

/// Requests queued from other threads.
#[derive(Debug, Clone)]
pub enum ClockCommand {
    Play,
    Pause,
    /// Replace the score with these events and rewind.
    Load(Vec<NoteEvent>),
    SetMode(ClockMode),
}

/// Cloneable, `Send` handle for requesting clock transitions.
///
/// Requests sent after the clock has been dropped are discarded.
#[derive(Clone)]
pub struct ClockHandle {
    tx: Sender<ClockCommand>,
}

impl ClockHandle {
    pub fn play(&self) {
        self.send(ClockCommand::Play);
    }

    pub fn pause(&self) {
        self.send(ClockCommand::Pause);
    }

    pub fn load(&self, events: Vec<NoteEvent>) {
        self.send(ClockCommand::Load(events));
    }

    pub fn set_mode(&self, mode: ClockMode) {
        self.send(ClockCommand::SetMode(mode));
    }

    fn send(&self, cmd: ClockCommand) {
        if self.tx.send(cmd).is_err() {
            debug!("Clock gone, request dropped");
        }
    }
}

/// The clock's published "now", readable from any thread.
///
/// Holds `None` until the first tick. Closed when the clock is dropped, so
/// anyone waiting on song time can give up.
#[derive(Debug, Clone)]
pub struct SongPosition {
    now_ms: Arc<AtomicI64>,
    closed: Arc<AtomicBool>,
}

impl SongPosition {
    const UNPUBLISHED: i64 = i64::MIN;

    pub fn new() -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(Self::UNPUBLISHED)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn get(&self) -> Option<i64> {
        match self.now_ms.load(Ordering::Acquire) {
            Self::UNPUBLISHED => None,
            ms => Some(ms),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn publish(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::Release);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Default for SongPosition {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Match test ─────────────────────────────────────────────────────────────

/// Result of comparing held keys with what the score expects at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Notes in their first half: must be held.
    pub required: BTreeSet<u8>,
    /// Notes in their second half: may be held or already released.
    pub optional: BTreeSet<u8>,
    pub held: BTreeSet<u8>,
    pub passed: bool,
}

impl MatchOutcome {
    /// Required keys the player is not holding.
    pub fn missing(&self) -> BTreeSet<u8> {
        self.required.difference(&self.held).copied().collect()
    }

    /// Held keys the score does not call for.
    pub fn unexpected(&self) -> BTreeSet<u8> {
        self.held
            .iter()
            .filter(|k| !self.required.contains(k) && !self.optional.contains(k))
            .copied()
            .collect()
    }
}

/// Classify the intervals sounding at `song_offset_ms` and compare them with
/// the held keys. Every required key must be held and nothing outside
/// required ∪ optional may be held. Negative offsets (lead-in) always pass.
pub fn evaluate_match(
    intervals: &[NoteInterval],
    held: &BTreeSet<u8>,
    song_offset_ms: i64,
) -> MatchOutcome {
    let mut outcome = MatchOutcome {
        held: held.clone(),
        ..MatchOutcome::default()
    };
    if song_offset_ms < 0 {
        outcome.passed = true;
        return outcome;
    }

    for n in intervals.iter().filter(|n| n.contains(song_offset_ms)) {
        if n.in_first_half(song_offset_ms) {
            outcome.required.insert(n.key());
        } else {
            outcome.optional.insert(n.key());
        }
    }
    // A key that is required by one interval is not also optional.
    let required = outcome.required.clone();
    outcome.optional.retain(|k| !required.contains(k));

    outcome.passed = outcome.missing().is_empty() && outcome.unexpected().is_empty();
    outcome
}

// ─── Clock ──────────────────────────────────────────────────────────────────

pub struct PlaybackClock {
    config: ClockConfig,
    state: PlaybackState,
    phase: ClockState,
    score: Arc<NoteIntervalStore>,
    active_keys: Arc<ActiveKeyState>,
    command_tx: Sender<ClockCommand>,
    command_rx: Receiver<ClockCommand>,
    now_ms: i64,
    last_match: Option<MatchOutcome>,
    stalled_ticks: u64,
    position: SongPosition,
}

impl PlaybackClock {
    pub fn new(
        config: ClockConfig,
        mode: ClockMode,
        score: Arc<NoteIntervalStore>,
        active_keys: Arc<ActiveKeyState>,
    ) -> Self {
        let (command_tx, command_rx) = unbounded();
        Self {
            config,
            state: PlaybackState {
                mode,
                running: false,
                paused: false,
                song_offset_ms: 0,
                last_wall_clock_ms: None,
            },
            phase: match mode {
                ClockMode::RealtimeOut => ClockState::RealtimeOut,
                ClockMode::Gated => ClockState::Idle,
            },
            score,
            active_keys,
            command_tx,
            command_rx,
            now_ms: 0,
            last_match: None,
            stalled_ticks: 0,
            position: SongPosition::new(),
        }
    }

    pub fn handle(&self) -> ClockHandle {
        ClockHandle {
            tx: self.command_tx.clone(),
        }
    }

    /// Shared view of the published "now", updated by every tick.
    pub fn position(&self) -> SongPosition {
        self.position.clone()
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn phase(&self) -> ClockState {
        self.phase
    }

    /// The "now" published by the last tick.
    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn song_offset_ms(&self) -> i64 {
        self.state.song_offset_ms
    }

    /// Outcome of the most recent match test, if the last tick ran one.
    pub fn match_outcome(&self) -> Option<&MatchOutcome> {
        self.last_match.as_ref()
    }

    /// Ticks spent stalled since the last play.
    pub fn stalled_ticks(&self) -> u64 {
        self.stalled_ticks
    }

    /// Song time currently under consideration: `[offset, offset + duration)`.
    pub fn decision_window(&self) -> (i64, i64) {
        let start = self.state.song_offset_ms;
        (start, start + self.config.timeline_duration_ms)
    }

    // ─── Transitions ────────────────────────────────────────────────────

    /// Replace the score and rewind to the lead-in, paused.
    pub fn load(&mut self, events: &[NoteEvent]) {
        self.score.cleanup();
        for e in events {
            self.score.on_note_event(e);
        }
        self.state = PlaybackState {
            mode: ClockMode::Gated,
            running: false,
            paused: false,
            song_offset_ms: -self.config.timeline_lead_ms,
            last_wall_clock_ms: None,
        };
        self.phase = ClockState::GatedPaused;
        self.last_match = None;
        self.stalled_ticks = 0;
        info!(
            "Score loaded: {} events, {} intervals",
            events.len(),
            self.score.len()
        );
    }

    /// Start from the lead-in, or resume if paused mid-song.
    pub fn play(&mut self) {
        match self.phase {
            ClockState::GatedPaused if self.state.running && self.state.paused => {
                self.state.paused = false;
                self.state.last_wall_clock_ms = None;
                self.phase = ClockState::GatedRunning;
                debug!("Resume at {}ms", self.state.song_offset_ms);
            }
            ClockState::GatedPaused | ClockState::Idle => {
                self.state.running = true;
                self.state.paused = false;
                self.state.song_offset_ms = -self.config.timeline_lead_ms;
                self.state.last_wall_clock_ms = None;
                self.phase = ClockState::GatedRunning;
                self.stalled_ticks = 0;
                debug!("Play from {}ms", self.state.song_offset_ms);
            }
            ClockState::GatedRunning | ClockState::RealtimeOut => {
                debug!("Play ignored in {:?}", self.phase);
            }
        }
    }

    pub fn pause(&mut self) {
        if self.phase == ClockState::GatedRunning {
            self.state.paused = true;
            self.state.last_wall_clock_ms = None;
            self.phase = ClockState::GatedPaused;
            debug!("Pause at {}ms", self.state.song_offset_ms);
        }
    }

    pub fn set_mode(&mut self, mode: ClockMode) {
        if mode == self.state.mode {
            return;
        }
        self.state.mode = mode;
        self.state.running = false;
        self.state.paused = false;
        self.state.last_wall_clock_ms = None;
        self.last_match = None;
        self.phase = match mode {
            ClockMode::RealtimeOut => ClockState::RealtimeOut,
            ClockMode::Gated => {
                self.state.song_offset_ms = 0;
                ClockState::Idle
            }
        };
        info!("Clock mode → {:?}", mode);
    }

    fn apply(&mut self, cmd: ClockCommand) {
        match cmd {
            ClockCommand::Play => self.play(),
            ClockCommand::Pause => self.pause(),
            ClockCommand::Load(events) => self.load(&events),
            ClockCommand::SetMode(mode) => self.set_mode(mode),
        }
    }

    // ─── Tick ───────────────────────────────────────────────────────────

    /// Advance the clock to `now_wall_ms` and return the published "now".
    /// Call once per frame from the owning thread.
    pub fn tick(&mut self, now_wall_ms: i64) -> i64 {
        while let Ok(cmd) = self.command_rx.try_recv() {
            self.apply(cmd);
        }

        self.now_ms = match self.phase {
            ClockState::RealtimeOut => now_wall_ms,
            ClockState::Idle | ClockState::GatedPaused => {
                self.state.last_wall_clock_ms = None;
                self.state.song_offset_ms
            }
            ClockState::GatedRunning => self.advance_gated(now_wall_ms),
        };
        self.position.publish(self.now_ms);
        self.now_ms
    }

    fn advance_gated(&mut self, now_wall_ms: i64) -> i64 {
        let offset = self.state.song_offset_ms;
        let outcome = evaluate_match(
            &self.score.intervals_at(offset),
            &self.active_keys.key_codes(),
            offset,
        );

        if let Some(prev) = self.state.last_wall_clock_ms {
            if outcome.passed {
                self.state.song_offset_ms += (now_wall_ms - prev).max(0);
            } else {
                self.stalled_ticks += 1;
                if self.stalled_ticks % 60 == 1 {
                    debug!(
                        "Stalled at {}ms: missing {:?}, unexpected {:?}",
                        offset,
                        outcome.missing(),
                        outcome.unexpected()
                    );
                }
            }
        }
        // A stalled tick still moves the baseline, so no time debt builds up.
        self.state.last_wall_clock_ms = Some(now_wall_ms);
        self.last_match = Some(outcome);
        self.state.song_offset_ms
    }
}

impl Drop for PlaybackClock {
    fn drop(&mut self) {
        self.position.close();
    }
}

// ─── Frame clock ────────────────────────────────────────────────────────────

/// What the host loop hands to renderers each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedNow {
    pub now_ms: i64,
    /// The canvas size or layout parameters changed since the last frame;
    /// renderers should repaint everything.
    pub reset_required: bool,
}

/// A playback clock plus the key layout cache, ticked together once per frame.
pub struct FrameClock {
    clock: PlaybackClock,
    layout: KeyLayout,
}

impl FrameClock {
    pub fn new(clock: PlaybackClock) -> Self {
        Self {
            clock,
            layout: KeyLayout::new(),
        }
    }

    pub fn tick(
        &mut self,
        now_wall_ms: i64,
        canvas_height: f64,
        canvas_width: f64,
        params: &LayoutParams,
    ) -> PublishedNow {
        let now_ms = self.clock.tick(now_wall_ms);
        let reset_required = self.layout.update(params, canvas_height, canvas_width);
        PublishedNow {
            now_ms,
            reset_required,
        }
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut PlaybackClock {
        &mut self.clock
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }
}
