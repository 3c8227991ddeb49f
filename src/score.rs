//! Pre-parsed scores and the tick → millisecond time base.
//!
//! A score is a list of tracks, each an ordered list of `(tick, message)`
//! pairs, plus the file's division. Reading standard MIDI files is left to
//! whatever produces these; here they are loaded from JSON.

use crate::error::{Error, Result};
use crate::ingestor::decode_raw;
use crate::types::{NoteEvent, RawEvent};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const META_STATUS: u8 = 0xFF;
const META_TEMPO: u8 = 0x51;

/// How ticks relate to musical time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Division {
    /// Ticks per quarter note.
    Ppq { resolution: u32 },
    /// SMPTE timing: frames per second and ticks per frame.
    Smpte { frames_per_second: f64, resolution: u32 },
}

impl Division {
    /// Ticks per quarter note used for the ms conversion. For SMPTE
    /// divisions the frame rate stands in directly.
    pub fn ppqn(&self) -> f64 {
        match *self {
            Division::Ppq { resolution } => resolution as f64,
            Division::Smpte { frames_per_second, .. } => frames_per_second,
        }
    }
}

/// Tempo plus division: everything needed to place a tick in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBase {
    bpm: f64,
    ppqn: f64,
}

impl TimeBase {
    pub fn new(bpm: f64, division: &Division) -> Result<Self> {
        Self::from_ppqn(bpm, division.ppqn())
    }

    pub fn from_ppqn(bpm: f64, ppqn: f64) -> Result<Self> {
        if !(bpm > 0.0) {
            return Err(Error::TimeBase(format!("bpm must be positive, got {}", bpm)));
        }
        if !(ppqn > 0.0) {
            return Err(Error::TimeBase(format!("ppqn must be positive, got {}", ppqn)));
        }
        Ok(Self { bpm, ppqn })
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn ppqn(&self) -> f64 {
        self.ppqn
    }

    /// `(60000 / bpm) / ppqn`
    pub fn ms_per_tick(&self) -> f64 {
        (60_000.0 / self.bpm) / self.ppqn
    }

    pub fn tick_to_ms(&self, tick: u64) -> f64 {
        tick as f64 * self.ms_per_tick()
    }

    /// Nearest tick for a millisecond offset. Negative offsets clamp to 0.
    pub fn ms_to_tick(&self, ms: f64) -> u64 {
        (ms / self.ms_per_tick()).round().max(0.0) as u64
    }

    /// Whole milliseconds, as stamped on note events.
    pub fn tick_to_ms_rounded(&self, tick: u64) -> i64 {
        self.tick_to_ms(tick).round() as i64
    }
}

/// Tempo meta payload (microseconds per quarter note, big endian) → bpm.
pub fn tempo_to_bpm(data: [u8; 3]) -> Option<f64> {
    let us_per_quarter = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | data[2] as u32;
    if us_per_quarter == 0 {
        return None;
    }
    Some(60_000_000.0 / us_per_quarter as f64)
}

/// One message of a score track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub tick: u64,
    /// Channel message bytes, or a meta message as `FF type len data...`.
    pub message: Vec<u8>,
}

impl ScoreEvent {
    pub fn new(tick: u64, message: &[u8]) -> Self {
        Self {
            tick,
            message: message.to_vec(),
        }
    }

    /// The event as a raw short message, if it is one.
    pub fn to_raw(&self, track: u32, timestamp_ms: i64) -> Option<RawEvent> {
        match self.message.as_slice() {
            &[status, data1, data2, ..] if status < 0xF0 => {
                Some(RawEvent::new([status, data1, data2], track, timestamp_ms))
            }
            _ => None,
        }
    }

    /// Bpm carried by a tempo meta message.
    pub fn tempo_bpm(&self) -> Option<f64> {
        match self.message.as_slice() {
            &[META_STATUS, META_TEMPO, 3, a, b, c] => tempo_to_bpm([a, b, c]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub division: Division,
    pub tracks: Vec<Vec<ScoreEvent>>,
}

impl Score {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn time_base(&self, bpm: f64) -> Result<TimeBase> {
        TimeBase::new(bpm, &self.division)
    }

    /// First tempo found in any track.
    pub fn tempo_bpm(&self) -> Option<f64> {
        self.tracks.iter().flatten().find_map(ScoreEvent::tempo_bpm)
    }

    /// Every note event in the score, stamped with song time and ordered
    /// by time (stable, so per-track order is kept). Tracks are numbered
    /// from 1; non-note messages are dropped.
    pub fn note_events(&self, time_base: &TimeBase) -> Vec<NoteEvent> {
        let mut events: Vec<NoteEvent> = self
            .tracks
            .iter()
            .enumerate()
            .flat_map(|(i, track)| {
                let track_num = i as u32 + 1;
                track.iter().filter_map(move |e| {
                    e.to_raw(track_num, time_base.tick_to_ms_rounded(e.tick))
                        .and_then(|raw| decode_raw(&raw))
                })
            })
            .collect();
        events.sort_by_key(|e| e.timestamp_ms);
        events
    }

    pub fn last_tick(&self) -> u64 {
        self.tracks.iter().flatten().map(|e| e.tick).max().unwrap_or(0)
    }
}
