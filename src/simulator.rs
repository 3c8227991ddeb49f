use crate::playback_clock::SongPosition;
use crate::score::{Division, Score, ScoreEvent};
use crate::types::*;
use crossbeam_channel::Sender;
use log::{info, warn};
use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

const CC_SUSTAIN: u8 = 64;
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Stands in for a keyboard: plays scripted gestures as raw messages on the
/// input channel, stamped with session time on the live track.
///
/// With a song position attached it can also play along with the gated
/// clock, waiting for song time instead of wall time.
pub struct Simulator {
    clock: SessionClock,
    tx: Sender<RawEvent>,
    position: Option<SongPosition>,
    held: BTreeSet<u8>,
    sent: u64,
}

// ─── Gesture types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gesture {
    Hold { ms: u32 },
    /// Wait until the clock's song time reaches `song_ms`.
    WaitFor { song_ms: i64 },
    Press { keys: Vec<u8>, velocity: u8 },
    Release { keys: Vec<u8> },
    ReleaseAll,
    /// Sustain pedal; controller traffic the ingestor must ignore.
    Sustain { down: bool },
}

impl Simulator {
    pub fn new(clock: SessionClock, tx: Sender<RawEvent>) -> Self {
        Self {
            clock,
            tx,
            position: None,
            held: BTreeSet::new(),
            sent: 0,
        }
    }

    pub fn with_position(mut self, position: SongPosition) -> Self {
        self.position = Some(position);
        self
    }

    /// Raw messages sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Play every gesture in order and leave no key held. Blocks the calling
    /// thread; stops early if the clock it follows goes away.
    pub fn run(&mut self, gestures: &[Gesture]) {
        info!("Simulator playing {} gestures...", gestures.len());
        for gesture in gestures {
            if !self.execute(gesture) {
                warn!("Clock closed, simulator stopping early");
                break;
            }
        }
        self.execute(&Gesture::ReleaseAll);
        info!("Simulator done after {} messages", self.sent);
    }

    /// Returns `false` when there is no point playing on.
    fn execute(&mut self, gesture: &Gesture) -> bool {
        match gesture {
            Gesture::Hold { ms } => {
                thread::sleep(Duration::from_millis(*ms as u64));
            }

            Gesture::WaitFor { song_ms } => {
                let Some(position) = &self.position else {
                    warn!("No song position attached; not waiting for {}ms", song_ms);
                    return true;
                };
                while position.get().map_or(true, |now| now < *song_ms) {
                    if position.is_closed() {
                        return false;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }

            Gesture::Press { keys, velocity } => {
                for &k in keys {
                    self.emit(STATUS_NOTE_ON, k, *velocity);
                    self.held.insert(k);
                }
            }

            Gesture::Release { keys } => {
                for &k in keys {
                    // Note-on with velocity 0, as most keyboards send it.
                    self.emit(STATUS_NOTE_ON, k, 0);
                    self.held.remove(&k);
                }
            }

            Gesture::ReleaseAll => {
                let keys: Vec<u8> = self.held.iter().copied().collect();
                for k in keys {
                    self.emit(STATUS_NOTE_OFF, k, 0);
                }
                self.held.clear();
            }

            Gesture::Sustain { down } => {
                self.emit(0xB0, CC_SUSTAIN, if *down { 127 } else { 0 });
            }
        }
        true
    }

    fn emit(&mut self, status: u8, data1: u8, data2: u8) {
        let raw = RawEvent::new([status, data1, data2], LIVE_TRACK, self.clock.now_ms());
        if self.tx.send(raw).is_ok() {
            self.sent += 1;
        }
    }
}

/// Gestures that play `events` along with the gated clock: each group of
/// same-time events waits for its song time, then becomes one chord.
/// Releases at a given time go before presses.
pub fn gestures_for(events: &[NoteEvent]) -> Vec<Gesture> {
    let mut sorted = events.to_vec();
    sorted.sort_by_key(|e| (e.timestamp_ms, e.is_active()));

    let mut gestures = Vec::new();
    let mut cursor = None;
    for e in sorted {
        if cursor != Some(e.timestamp_ms) {
            gestures.push(Gesture::WaitFor {
                song_ms: e.timestamp_ms,
            });
            cursor = Some(e.timestamp_ms);
        }
        let key = e.key();
        let merged = match gestures.last_mut() {
            Some(Gesture::Press { keys, velocity }) if e.is_active() && *velocity == e.velocity => {
                keys.push(key);
                true
            }
            Some(Gesture::Release { keys }) if !e.is_active() => {
                keys.push(key);
                true
            }
            _ => false,
        };
        if !merged {
            gestures.push(if e.is_active() {
                Gesture::Press {
                    keys: vec![key],
                    velocity: e.velocity,
                }
            } else {
                Gesture::Release { keys: vec![key] }
            });
        }
    }
    gestures
}

/// A short two-hand C-major exercise at 100 bpm: the right hand walks up a
/// scale in quarter notes over two held bass notes.
pub fn demo_score() -> Score {
    const Q: u64 = 480;
    let note = |tick: u64, key: u8, len: u64, vel: u8| {
        [
            ScoreEvent::new(tick, &[STATUS_NOTE_ON, key, vel]),
            ScoreEvent::new(tick + len, &[STATUS_NOTE_OFF, key, 0]),
        ]
    };

    // 600000 µs per quarter = 100 bpm
    let mut right = vec![ScoreEvent::new(0, &[0xFF, 0x51, 0x03, 0x09, 0x27, 0xC0])];
    for (i, key) in [60u8, 62, 64, 65, 67, 69, 71, 72].into_iter().enumerate() {
        right.extend(note(i as u64 * Q, key, Q - 40, 80));
    }

    let mut left = Vec::new();
    left.extend(note(0, 48, 4 * Q - 20, 64));
    left.extend(note(4 * Q, 43, 4 * Q - 20, 64));

    Score {
        division: Division::Ppq { resolution: Q as u32 },
        tracks: vec![right, left],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestor::decode_raw;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_demo_score_decodes() {
        let score = demo_score();
        assert_eq!(score.tempo_bpm(), Some(100.0));
        let tb = score.time_base(100.0).unwrap();
        let events = score.note_events(&tb);
        assert_eq!(events.len(), 2 * (8 + 2));
        assert_eq!(events[0].timestamp_ms, 0);
        assert!(events.iter().filter(|e| e.track == 2).all(|e| e.key() < 62));
    }

    #[test]
    fn test_gestures_group_chords() {
        let events = vec![
            NoteEvent::on(60, 80, 1, 0),
            NoteEvent::on(64, 80, 1, 0),
            NoteEvent::off(60, 1, 500),
            NoteEvent::off(64, 1, 500),
        ];
        let g = gestures_for(&events);
        assert_eq!(
            g,
            vec![
                Gesture::WaitFor { song_ms: 0 },
                Gesture::Press { keys: vec![60, 64], velocity: 80 },
                Gesture::WaitFor { song_ms: 500 },
                Gesture::Release { keys: vec![60, 64] },
            ]
        );
    }

    #[test]
    fn test_gestures_release_before_press() {
        let events = vec![
            NoteEvent::on(60, 80, 1, 0),
            NoteEvent::on(60, 80, 1, 400),
            NoteEvent::off(60, 1, 400),
            NoteEvent::off(60, 1, 800),
        ];
        let g = gestures_for(&events);
        assert_eq!(g[2], Gesture::WaitFor { song_ms: 400 });
        assert_eq!(g[3], Gesture::Release { keys: vec![60] });
        assert_eq!(g[4], Gesture::Press { keys: vec![60], velocity: 80 });
    }

    #[test]
    fn test_wait_for_follows_song_position() {
        use crate::active_keys::ActiveKeyState;
        use crate::interval_store::NoteIntervalStore;
        use crate::playback_clock::{ClockConfig, ClockMode, PlaybackClock};
        use std::sync::Arc;

        let mut clock = PlaybackClock::new(
            ClockConfig {
                timeline_lead_ms: 100,
                timeline_duration_ms: 3000,
            },
            ClockMode::RealtimeOut,
            Arc::new(NoteIntervalStore::new()),
            Arc::new(ActiveKeyState::new()),
        );
        let (tx, rx) = unbounded();
        let mut sim = Simulator::new(SessionClock::new(), tx).with_position(clock.position());
        let player = thread::spawn(move || {
            sim.run(&[Gesture::WaitFor { song_ms: 1000 }, Gesture::Press { keys: vec![60], velocity: 80 }]);
            sim.sent()
        });

        clock.tick(500);
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err(), "pressed before song time 1000");

        clock.tick(1000);
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(decode_raw(&first).unwrap().key(), 60);
        // Press plus the final release.
        assert_eq!(player.join().unwrap(), 2);
    }

    #[test]
    fn test_wait_for_gives_up_when_clock_dropped() {
        use crate::active_keys::ActiveKeyState;
        use crate::interval_store::NoteIntervalStore;
        use crate::playback_clock::{ClockConfig, ClockMode, PlaybackClock};
        use std::sync::Arc;

        let clock = PlaybackClock::new(
            ClockConfig::default(),
            ClockMode::Gated,
            Arc::new(NoteIntervalStore::new()),
            Arc::new(ActiveKeyState::new()),
        );
        let (tx, rx) = unbounded();
        let mut sim = Simulator::new(SessionClock::new(), tx).with_position(clock.position());
        let player = thread::spawn(move || {
            sim.run(&[Gesture::WaitFor { song_ms: 1000 }, Gesture::Press { keys: vec![60], velocity: 80 }]);
        });
        drop(clock);
        player.join().unwrap();
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_simulator_emits_live_messages() {
        let (tx, rx) = unbounded();
        let mut sim = Simulator::new(SessionClock::new(), tx);
        sim.run(&[
            Gesture::Press { keys: vec![60, 67], velocity: 90 },
            Gesture::Sustain { down: true },
            Gesture::Release { keys: vec![60] },
        ]);
        // 2 presses, 1 controller, 1 release, then 67 released at the end.
        assert_eq!(sim.sent(), 5);
        let raws: Vec<RawEvent> = rx.try_iter().collect();
        assert!(raws.iter().all(|r| r.track == LIVE_TRACK));
        let notes: Vec<NoteEvent> = raws.iter().filter_map(decode_raw).collect();
        assert_eq!(notes.len(), 4);
        assert!(!notes.last().unwrap().is_active());
        assert_eq!(notes.last().unwrap().key(), 67);
    }
}
