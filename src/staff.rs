//! Grand-staff placement: which clef a note is written on and how far down
//! the staff image it sits.

use crate::interval_store::NoteInterval;
use crate::types::{NoteClass, Pitch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clef {
    Treble,
    Bass,
}

/// Lowest key written on the treble staff when the track does not decide (D4).
pub const TREBLE_FLOOR_KEY: u8 = 62;

/// Diatonic step within the octave. A sharp sits on its natural's line.
const DIATONIC_STEP: [i32; 12] = [0, 0, 1, 1, 2, 3, 3, 4, 4, 5, 5, 6];

const STEP_FACTOR: f64 = 0.025;
const C0_FACTOR: f64 = 1.125;
const BASS_OFFSET: f64 = 0.162;

/// Track 1 is the right hand, track 2 the left. Anything else (live input,
/// single-track scores) is split at D4.
pub fn clef_for(pitch: &Pitch, track: u32) -> Clef {
    match track {
        1 => Clef::Treble,
        2 => Clef::Bass,
        _ if pitch.key < TREBLE_FLOOR_KEY => Clef::Bass,
        _ => Clef::Treble,
    }
}

pub fn diatonic_step(class: NoteClass) -> i32 {
    DIATONIC_STEP[class.index()]
}

/// Vertical position as a fraction of one staff row's height.
pub fn staff_offset_factor(pitch: &Pitch, clef: Clef) -> f64 {
    let steps = 7 * pitch.octave as i32 + diatonic_step(pitch.note_class);
    let clef_offset = match clef {
        Clef::Treble => 0.0,
        Clef::Bass => BASS_OFFSET,
    };
    C0_FACTOR - STEP_FACTOR * steps as f64 + clef_offset
}

pub fn staff_y(pitch: &Pitch, clef: Clef, staff_height: f64) -> f64 {
    staff_height * staff_offset_factor(pitch, clef)
}

/// Top and bottom of a measure line: the treble F5 line down to the bass G2 line.
pub fn measure_line_span(staff_height: f64) -> (f64, f64) {
    (
        staff_y(&Pitch::from_key(77), Clef::Treble, staff_height),
        staff_y(&Pitch::from_key(43), Clef::Bass, staff_height),
    )
}

/// Horizontal head and tail of a note on a staff row covering
/// `[window_end_ms - duration_ms, window_end_ms)`, with notes entering on
/// the right. In realtime mode the direction flips and an open note's tail
/// stays pinned at the left edge. Head factors clamp at 0 so a note's head
/// rests at the edge until the note ends.
pub fn note_x_span(
    interval: &NoteInterval,
    window_end_ms: i64,
    duration_ms: i64,
    left: f64,
    width: f64,
    realtime: bool,
) -> (f64, f64) {
    let factor = |t: i64| (1.0 - (window_end_ms - t) as f64 / duration_ms as f64).max(0.0);
    let mut start = factor(interval.start_ms);
    let mut end = interval.end_ms.map_or(1.0, factor);
    if realtime {
        start = 1.0 - start;
        end = match interval.end_ms {
            Some(_) => 1.0 - end,
            None => 0.0,
        };
    }
    (left + start * width, left + end * width)
}
