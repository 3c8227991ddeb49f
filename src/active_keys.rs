use crate::types::NoteEvent;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Keys currently held on the live keyboard, with the event that pressed them.
///
/// Written by the ingestor, read by the playback clock and renderers. Reads
/// return copies so no caller holds the lock longer than the copy takes.
#[derive(Debug, Default)]
pub struct ActiveKeyState {
    keys: Mutex<BTreeMap<u8, NoteEvent>>,
}

impl ActiveKeyState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u8, NoteEvent>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert on an active event, remove otherwise.
    pub fn apply(&self, event: &NoteEvent) {
        let mut keys = self.lock();
        if event.is_active() {
            keys.insert(event.key(), *event);
        } else {
            keys.remove(&event.key());
        }
    }

    pub fn snapshot(&self) -> BTreeMap<u8, NoteEvent> {
        self.lock().clone()
    }

    pub fn key_codes(&self) -> BTreeSet<u8> {
        self.lock().keys().copied().collect()
    }

    pub fn is_held(&self, key: u8) -> bool {
        self.lock().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
