use crate::active_keys::ActiveKeyState;
use crate::interval_store::NoteIntervalStore;
use crate::key_layout::LayoutParams;
use crate::playback_clock::{ClockMode, FrameClock, PublishedNow};
use crate::staff::{clef_for, Clef};
use crate::timeline::{beat_line_offsets, prune_cutoff, timeline_height, visible_notes, TimelineParams};
use crate::types::*;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

const PRUNE_EVERY_FRAMES: u64 = 300;

/// Canvas the display pretends to draw on. Only affects geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub width: f64,
    pub height: f64,
}

/// The host frame loop, rendered as a live ASCII dashboard.
///
/// Every frame it ticks the clock, refreshes the key layout, projects the
/// visible notes and prints the result. Score notes are shown while
/// practicing, the player's own notes in realtime mode.
pub struct ConsoleDisplay {
    frame_clock: FrameClock,
    score_notes: Arc<NoteIntervalStore>,
    player_notes: Arc<NoteIntervalStore>,
    active_keys: Arc<ActiveKeyState>,
    session: SessionClock,
    layout_params: LayoutParams,
    canvas: Canvas,
    duration_ms: i64,
    bpm: f64,
    fps: u32,
    frames: u64,
}

impl ConsoleDisplay {
    pub fn new(
        frame_clock: FrameClock,
        score_notes: Arc<NoteIntervalStore>,
        player_notes: Arc<NoteIntervalStore>,
        active_keys: Arc<ActiveKeyState>,
        session: SessionClock,
    ) -> Self {
        let duration_ms = frame_clock.clock().config().timeline_duration_ms;
        Self {
            frame_clock,
            score_notes,
            player_notes,
            active_keys,
            session,
            layout_params: LayoutParams::default(),
            canvas: Canvas {
                width: 1200.0,
                height: 400.0,
            },
            duration_ms,
            bpm: 100.0,
            fps: 30,
            frames: 0,
        }
    }

    pub fn with_layout(mut self, params: LayoutParams, canvas: Canvas) -> Self {
        self.layout_params = params;
        self.canvas = canvas;
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn frame_clock(&self) -> &FrameClock {
        &self.frame_clock
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Direction follows the clock: realtime scrolls out, practice scrolls in.
    fn timeline_params(&self) -> TimelineParams {
        TimelineParams {
            duration_ms: self.duration_ms,
            out: self.frame_clock.clock().state().mode == ClockMode::RealtimeOut,
        }
    }

    /// Advance one frame at wall time `now_wall_ms` and return the rendered text.
    pub fn frame(&mut self, now_wall_ms: i64) -> (PublishedNow, String) {
        let published = self.frame_clock.tick(
            now_wall_ms,
            self.canvas.height,
            self.canvas.width,
            &self.layout_params,
        );
        self.frames += 1;

        let timeline = self.timeline_params();
        if timeline.out && self.frames % PRUNE_EVERY_FRAMES == 0 {
            let removed = self.player_notes.prune(prune_cutoff(published.now_ms, &timeline));
            if removed > 0 {
                debug!("Pruned {} expired player notes", removed);
            }
        }
        let text = self.render(published, &timeline);
        (published, text)
    }

    fn render(&self, published: PublishedNow, timeline: &TimelineParams) -> String {
        let clock = self.frame_clock.clock();
        let mut out = String::new();

        out.push_str("╔══════════════════════════════════════════════════════════╗\n");
        out.push_str("║  KEYS FOLLOW: Live Monitor\n");
        out.push_str("╠══════════════════════════════════════════════════════════╣\n");
        out.push_str(&format!(
            "║  State: {:?}   now: {:.2}s\n",
            clock.phase(),
            published.now_ms as f64 / 1000.0
        ));

        let Some(layout) = self.frame_clock.layout().layout() else {
            out.push_str("║  (no layout)\n");
            return out;
        };

        let source = if timeline.out { &self.player_notes } else { &self.score_notes };
        let notes = visible_notes(
            source,
            layout,
            published.now_ms,
            self.canvas.height,
            self.canvas.width,
            timeline,
        );
        let beats = beat_line_offsets(
            published.now_ms,
            self.bpm,
            timeline_height(self.canvas.height, layout.metrics.white_key_height),
            timeline,
        );
        out.push_str(&format!(
            "║  Visible notes: {}   beat lines: {}\n",
            notes.len(),
            beats.len()
        ));

        let held = self.active_keys.key_codes();
        let expected = clock
            .match_outcome()
            .map(|m| m.required.clone())
            .unwrap_or_default();
        if !expected.is_empty() {
            let sounding = self.score_notes.intervals_at(clock.song_offset_ms());
            let names: Vec<String> = expected
                .iter()
                .map(|&k| {
                    let p = Pitch::from_key(k);
                    let track = sounding
                        .iter()
                        .find(|n| n.key() == k)
                        .map_or(LIVE_TRACK, |n| n.track);
                    let clef = match clef_for(&p, track) {
                        Clef::Treble => "treble",
                        Clef::Bass => "bass",
                    };
                    format!("{}({})", p, clef)
                })
                .collect();
            out.push_str(&format!("║  Expect: {}\n", names.join(" ")));
        }

        out.push_str(&format!(
            "║  {}\n",
            keyboard_row(&self.layout_params, |k| held.contains(&k), |k| expected.contains(&k))
        ));
        out.push_str("╚══════════════════════════════════════════════════════════╝\n");
        out
    }

    /// Run the frame loop at the configured rate until `stop` fires or
    /// disconnects, or `max_frames` have been drawn. Blocks the calling thread.
    pub fn run(&mut self, stop: Receiver<()>, max_frames: Option<u64>) {
        let frame_time = Duration::from_millis(1000 / self.fps as u64);
        let mut stdout = io::stdout();
        info!("Console display running at {} fps", self.fps);

        loop {
            let (published, text) = self.frame(self.session.now_ms());
            if published.reset_required {
                // Clear screen and move cursor home
                print!("\x1b[2J");
            }
            print!("\x1b[H{}", text);
            let _ = stdout.flush();

            if max_frames.map_or(false, |n| self.frames >= n) {
                break;
            }
            match stop.recv_timeout(frame_time) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Console display stopped after {} frames", self.frames);
    }
}

/// One character per key: `*` held, `^` expected, `#` black, `-` white.
pub fn keyboard_row(
    params: &LayoutParams,
    held: impl Fn(u8) -> bool,
    expected: impl Fn(u8) -> bool,
) -> String {
    (params.first_key..=params.last_key())
        .map(|k| {
            if held(k) {
                '*'
            } else if expected(k) {
                '^'
            } else if NoteClass::of_key(k).is_black() {
                '#'
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback_clock::{ClockConfig, PlaybackClock};

    fn display(mode: ClockMode) -> ConsoleDisplay {
        let score = Arc::new(NoteIntervalStore::new());
        let player = Arc::new(NoteIntervalStore::new());
        let keys = Arc::new(ActiveKeyState::new());
        let config = ClockConfig {
            timeline_lead_ms: 0,
            timeline_duration_ms: 3000,
        };
        let clock = PlaybackClock::new(config, mode, score.clone(), keys.clone());
        ConsoleDisplay::new(FrameClock::new(clock), score, player, keys, SessionClock::new())
    }

    #[test]
    fn test_keyboard_row() {
        let params = LayoutParams {
            first_key: 60,
            num_keys: 13,
            ..LayoutParams::default()
        };
        let row = keyboard_row(&params, |k| k == 64, |k| k == 72);
        assert_eq!(row, "-#-#*-#-#-#-^");
    }

    #[test]
    fn test_first_frame_resets() {
        let mut d = display(ClockMode::RealtimeOut);
        let (first, text) = d.frame(1000);
        assert!(first.reset_required);
        assert_eq!(first.now_ms, 1000);
        assert!(text.contains("RealtimeOut"));
        let (second, _) = d.frame(1033);
        assert!(!second.reset_required);
        assert_eq!(d.frames(), 2);
    }

    #[test]
    fn test_practice_frame_shows_expected_notes() {
        let mut d = display(ClockMode::Gated);
        let clock = d.frame_clock.clock_mut();
        clock.load(&[NoteEvent::on(64, 80, 1, 0), NoteEvent::off(64, 1, 1000)]);
        clock.play();
        d.frame(0);
        let (now, text) = d.frame(16);
        // Nothing held: stalled on the first note.
        assert_eq!(now.now_ms, 0);
        assert!(text.contains("Expect: E4(treble)"), "{}", text);
        assert!(text.contains("Visible notes: 1"), "{}", text);
    }

    #[test]
    fn test_expected_clef_follows_score_track() {
        let mut d = display(ClockMode::Gated);
        let clock = d.frame_clock.clock_mut();
        // E4 written for the left hand sits on the bass staff.
        clock.load(&[NoteEvent::on(64, 80, 2, 0), NoteEvent::off(64, 2, 1000)]);
        clock.play();
        d.frame(0);
        let (_, text) = d.frame(16);
        assert!(text.contains("Expect: E4(bass)"), "{}", text);
    }
}
