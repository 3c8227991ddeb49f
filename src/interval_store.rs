//! Note intervals keyed by MIDI key number.
//!
//! Producers append and close intervals from the input thread while the
//! render/clock thread reads them. Readers never iterate the live lists:
//! every read copies what it needs under the lock and iterates the copy.

use crate::types::{NoteEvent, Pitch};
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// How long a note sounds: opened by a note-on, closed by the matching off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteInterval {
    pub start_ms: i64,
    /// `None` while the note is still held.
    pub end_ms: Option<i64>,
    pub track: u32,
    pub pitch: Pitch,
}

impl NoteInterval {
    pub fn open(start_ms: i64, track: u32, pitch: Pitch) -> Self {
        Self {
            start_ms,
            end_ms: None,
            track,
            pitch,
        }
    }

    pub fn closed(start_ms: i64, end_ms: i64, track: u32, pitch: Pitch) -> Self {
        Self {
            start_ms,
            end_ms: Some(end_ms),
            track,
            pitch,
        }
    }

    pub fn key(&self) -> u8 {
        self.pitch.key
    }

    pub fn is_open(&self) -> bool {
        self.end_ms.is_none()
    }

    /// `start <= t < end`; an open interval extends forever.
    pub fn contains(&self, t_ms: i64) -> bool {
        self.start_ms <= t_ms && self.end_ms.map_or(true, |end| t_ms < end)
    }

    /// Whether any part of the interval falls in `[from_ms, to_ms)`.
    pub fn overlaps(&self, from_ms: i64, to_ms: i64) -> bool {
        self.start_ms < to_ms && self.end_ms.map_or(true, |end| end > from_ms)
    }

    /// True during the first half of the note. Open intervals have no
    /// midpoint and count as first half throughout.
    pub fn in_first_half(&self, t_ms: i64) -> bool {
        match self.end_ms {
            Some(end) => t_ms < self.start_ms + (end - self.start_ms) / 2,
            None => true,
        }
    }
}

/// Concurrent per-key interval lists. Share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct NoteIntervalStore {
    notes: Mutex<HashMap<u8, Vec<NoteInterval>>>,
}

impl NoteIntervalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u8, Vec<NoteInterval>>> {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open an interval on an active event; otherwise close the most
    /// recently opened interval on that key that is still open.
    ///
    /// Same-key notes are paired last-in regardless of track, so two
    /// overlapping notes of the same pitch on different tracks can be
    /// mis-paired. An off with nothing open is ignored.
    pub fn on_note_event(&self, event: &NoteEvent) {
        let key = event.key();
        let mut notes = self.lock();
        if event.is_active() {
            notes
                .entry(key)
                .or_default()
                .push(NoteInterval::open(event.timestamp_ms, event.track, event.pitch));
            return;
        }

        let open = notes
            .get_mut(&key)
            .and_then(|list| list.iter_mut().rev().find(|n| n.is_open()));
        match open {
            Some(interval) => interval.end_ms = Some(event.timestamp_ms),
            None => trace!("Ignoring note-off for {} with no open interval", event.pitch),
        }
    }

    /// Append an already closed interval (score loading, replay).
    pub fn insert(&self, interval: NoteInterval) {
        self.lock().entry(interval.key()).or_default().push(interval);
    }

    /// Snapshot of one key's intervals in arrival order. The returned
    /// iterator owns its copy; later mutations are not reflected.
    pub fn for_each_interval(&self, key: u8) -> std::vec::IntoIter<NoteInterval> {
        let copy = self.lock().get(&key).cloned().unwrap_or_default();
        copy.into_iter()
    }

    /// Snapshot of every key's intervals, ordered by key.
    pub fn snapshot(&self) -> Vec<(u8, Vec<NoteInterval>)> {
        let mut all: Vec<(u8, Vec<NoteInterval>)> = self
            .lock()
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(&k, list)| (k, list.clone()))
            .collect();
        all.sort_by_key(|(k, _)| *k);
        all
    }

    /// Every interval sounding at `t_ms`.
    pub fn intervals_at(&self, t_ms: i64) -> Vec<NoteInterval> {
        self.lock()
            .values()
            .flat_map(|list| list.iter().filter(|n| n.contains(t_ms)).copied())
            .collect()
    }

    /// Remove everything. Used when a new score is loaded.
    pub fn cleanup(&self) {
        self.lock().clear();
    }

    /// Remove closed intervals that ended before `cutoff_ms`. Returns how
    /// many were dropped. Never called implicitly.
    pub fn prune(&self, cutoff_ms: i64) -> usize {
        let mut notes = self.lock();
        let mut removed = 0;
        for list in notes.values_mut() {
            let before = list.len();
            list.retain(|n| n.end_ms.map_or(true, |end| end >= cutoff_ms));
            removed += before - list.len();
        }
        notes.retain(|_, list| !list.is_empty());
        removed
    }

    /// Total number of intervals across all keys.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys that have at least one interval, ascending.
    pub fn keys(&self) -> Vec<u8> {
        let mut keys: Vec<u8> = self
            .lock()
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(&k, _)| k)
            .collect();
        keys.sort_unstable();
        keys
    }
}
