use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ─── Note classes ───────────────────────────────────────────────────────────

/// One of the twelve pitch classes, ordered from C = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NoteClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

pub const NOTE_CLASSES: [NoteClass; 12] = [
    NoteClass::C,
    NoteClass::CSharp,
    NoteClass::D,
    NoteClass::DSharp,
    NoteClass::E,
    NoteClass::F,
    NoteClass::FSharp,
    NoteClass::G,
    NoteClass::GSharp,
    NoteClass::A,
    NoteClass::ASharp,
    NoteClass::B,
];

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Black keys, indexed by note class.
const IS_BLACK: [bool; 12] = [
    false, true, false, true, false, false, true, false, true, false, true, false,
];

impl NoteClass {
    /// Note class of a MIDI key number (`key % 12`).
    pub fn of_key(key: u8) -> Self {
        NOTE_CLASSES[(key % 12) as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        NOTE_NAMES[self.index()]
    }

    pub fn is_black(self) -> bool {
        IS_BLACK[self.index()]
    }

    pub fn is_white(self) -> bool {
        !self.is_black()
    }

    /// The note class one semitone up, wrapping B → C.
    pub fn next(self) -> Self {
        NOTE_CLASSES[(self.index() + 1) % 12]
    }

    /// Whether the step to the next key on the keyboard is a semitone that
    /// places a black key in between. False at the E–F and B–C boundaries,
    /// where two naturals sit side by side.
    pub fn next_interval_is_semitone(self) -> bool {
        if self.is_black() {
            return true;
        }
        // B → C wraps to a natural, so the lookup below covers it too.
        self.next().is_black()
    }
}

impl fmt::Display for NoteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Pitch ──────────────────────────────────────────────────────────────────

/// A specific key: note class, octave (scientific pitch, C4 = 60) and the
/// MIDI key number it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pitch {
    pub note_class: NoteClass,
    pub octave: i8,
    pub key: u8,
}

impl Pitch {
    pub fn from_key(key: u8) -> Self {
        Self {
            note_class: NoteClass::of_key(key),
            octave: (key / 12) as i8 - 1,
            key,
        }
    }

    pub fn is_black(&self) -> bool {
        self.note_class.is_black()
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.note_class, self.octave)
    }
}

// ─── Note events ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    On,
    Off,
}

/// A decoded note-on/note-off. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: Pitch,
    pub command: Command,
    pub velocity: u8,
    pub track: u32,
    /// Milliseconds on the timeline this event belongs to: wall clock for
    /// live input, song time for score events.
    pub timestamp_ms: i64,
}

impl NoteEvent {
    pub fn new(key: u8, command: Command, velocity: u8, track: u32, timestamp_ms: i64) -> Self {
        Self {
            pitch: Pitch::from_key(key),
            command,
            velocity,
            track,
            timestamp_ms,
        }
    }

    /// Shorthand for a note-on.
    pub fn on(key: u8, velocity: u8, track: u32, timestamp_ms: i64) -> Self {
        Self::new(key, Command::On, velocity, track, timestamp_ms)
    }

    /// Shorthand for a note-off.
    pub fn off(key: u8, track: u32, timestamp_ms: i64) -> Self {
        Self::new(key, Command::Off, 0, track, timestamp_ms)
    }

    pub fn key(&self) -> u8 {
        self.pitch.key
    }

    /// A note-on with velocity 0 is a note-off.
    pub fn is_active(&self) -> bool {
        self.command == Command::On && self.velocity > 0
    }
}

impl fmt::Display for NoteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cmd = match self.command {
            Command::On => "ON ",
            Command::Off => "OFF",
        };
        write!(
            f,
            "t={:>8}ms  {} {:<4}({:>3})  vel={:>3}  track={}",
            self.timestamp_ms, cmd, self.pitch, self.pitch.key, self.velocity, self.track,
        )
    }
}

// ─── Raw input ──────────────────────────────────────────────────────────────

/// A MIDI short message as delivered by an input device or a score track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    pub track: u32,
    pub timestamp_ms: i64,
}

impl RawEvent {
    pub fn new(message: [u8; 3], track: u32, timestamp_ms: i64) -> Self {
        Self {
            status: message[0],
            data1: message[1],
            data2: message[2],
            track,
            timestamp_ms,
        }
    }

    /// Upper nibble of the status byte (0x80 note-off, 0x90 note-on, ...).
    pub fn command_nibble(&self) -> u8 {
        self.status & 0xF0
    }

    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }
}

pub const STATUS_NOTE_OFF: u8 = 0x80;
pub const STATUS_NOTE_ON: u8 = 0x90;

/// Track number stamped on events played live on the keyboard.
pub const LIVE_TRACK: u32 = 99;

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic wall clock for the practice session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_class_cycle() {
        assert_eq!(NoteClass::of_key(60), NoteClass::C);
        assert_eq!(NoteClass::of_key(21), NoteClass::A);
        assert_eq!(NoteClass::of_key(61), NoteClass::CSharp);
        assert_eq!(NoteClass::B.next(), NoteClass::C);
        for k in 0..128u8 {
            assert_eq!(NoteClass::of_key(k).index(), (k % 12) as usize);
        }
    }

    #[test]
    fn test_semitone_boundaries() {
        assert!(NoteClass::C.next_interval_is_semitone());
        assert!(NoteClass::CSharp.next_interval_is_semitone());
        assert!(!NoteClass::E.next_interval_is_semitone());
        assert!(!NoteClass::B.next_interval_is_semitone());
        assert!(NoteClass::A.next_interval_is_semitone());
    }

    #[test]
    fn test_pitch_octaves() {
        assert_eq!(Pitch::from_key(60).to_string(), "C4");
        assert_eq!(Pitch::from_key(21).to_string(), "A0");
        assert_eq!(Pitch::from_key(108).to_string(), "C8");
        assert_eq!(Pitch::from_key(0).octave, -1);
    }

    #[test]
    fn test_velocity_zero_is_inactive() {
        assert!(NoteEvent::on(60, 64, 1, 0).is_active());
        assert!(!NoteEvent::on(60, 0, 1, 0).is_active());
        assert!(!NoteEvent::off(60, 1, 0).is_active());
    }
}
