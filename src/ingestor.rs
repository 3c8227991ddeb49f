use crate::active_keys::ActiveKeyState;
use crate::interval_store::NoteIntervalStore;
use crate::types::*;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, trace};
use std::sync::Arc;

/// Decode a raw short message into a note event.
///
/// Only note-on (0x9n) and note-off (0x8n) are recognized; everything else
/// (controllers, pitch bend, clock, ...) is routine traffic and yields
/// `None`. A note-on with velocity 0 is kept as an `On` event whose
/// `is_active()` is false.
pub fn decode_raw(raw: &RawEvent) -> Option<NoteEvent> {
    let command = match raw.command_nibble() {
        STATUS_NOTE_ON => Command::On,
        STATUS_NOTE_OFF => Command::Off,
        _ => return None,
    };
    Some(NoteEvent::new(
        raw.data1 & 0x7F,
        command,
        raw.data2 & 0x7F,
        raw.track,
        raw.timestamp_ms,
    ))
}

/// The ingestor turns raw input into note events and fans them out.
///
/// For every decoded event, in this order:
///   1. the active-key state is updated (live input only),
///   2. the interval store records the note,
///   3. every registered listener receives a copy.
///
/// Listeners therefore never see an event before the shared state reflects
/// it. A listener whose receiver has been dropped is unregistered.
pub struct EventIngestor {
    store: Arc<NoteIntervalStore>,
    active_keys: Option<Arc<ActiveKeyState>>,
    listeners: Vec<Sender<NoteEvent>>,
    event_count: u64,
}

impl EventIngestor {
    pub fn new(store: Arc<NoteIntervalStore>) -> Self {
        Self {
            store,
            active_keys: None,
            listeners: Vec::new(),
            event_count: 0,
        }
    }

    /// Track held keys in `state` (for the live keyboard path).
    pub fn with_active_keys(mut self, state: Arc<ActiveKeyState>) -> Self {
        self.active_keys = Some(state);
        self
    }

    pub fn add_listener(&mut self, tx: Sender<NoteEvent>) {
        self.listeners.push(tx);
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Decode and dispatch one raw message. Non-note messages are dropped.
    pub fn on_raw_event(&mut self, raw: &RawEvent) -> Option<NoteEvent> {
        match decode_raw(raw) {
            Some(event) => {
                self.on_note_event(&event);
                Some(event)
            }
            None => {
                trace!("Ignoring non-note message 0x{:02X}", raw.status);
                None
            }
        }
    }

    /// Dispatch an already decoded event.
    pub fn on_note_event(&mut self, event: &NoteEvent) {
        if let Some(ref keys) = self.active_keys {
            keys.apply(event);
        }
        self.store.on_note_event(event);
        self.listeners.retain(|tx| tx.send(*event).is_ok());

        self.event_count += 1;
        trace!("{}", event);
        if self.event_count % 500 == 0 {
            debug!("Ingestor: {} note events processed", self.event_count);
        }
    }

    /// Consume raw events until every sender is dropped. Blocks the
    /// calling thread.
    pub fn run(&mut self, rx: Receiver<RawEvent>) {
        info!(
            "Ingestor running (active key tracking: {}, {} listeners)",
            if self.active_keys.is_some() { "ON" } else { "OFF" },
            self.listeners.len()
        );

        for raw in rx.iter() {
            self.on_raw_event(&raw);
        }

        info!("Ingestor shutting down after {} note events", self.event_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_decode_note_on_off() {
        let on = decode_raw(&RawEvent::new([0x90, 60, 100], 1, 5)).unwrap();
        assert_eq!(on.command, Command::On);
        assert_eq!(on.pitch.to_string(), "C4");
        assert!(on.is_active());

        let off = decode_raw(&RawEvent::new([0x83, 60, 40], 1, 9)).unwrap();
        assert_eq!(off.command, Command::Off);
        assert!(!off.is_active());

        let silent_on = decode_raw(&RawEvent::new([0x90, 60, 0], 1, 9)).unwrap();
        assert_eq!(silent_on.command, Command::On);
        assert!(!silent_on.is_active());
    }

    #[test]
    fn test_decode_ignores_other_messages() {
        for status in [0xB0u8, 0xC0, 0xE0, 0xA0, 0xD0, 0xF8, 0xFE] {
            assert!(decode_raw(&RawEvent::new([status, 1, 2], 1, 0)).is_none());
        }
    }

    #[test]
    fn test_state_updated_before_listener() {
        let store = Arc::new(NoteIntervalStore::new());
        let keys = Arc::new(ActiveKeyState::new());
        let (tx, rx) = unbounded();
        let mut ing = EventIngestor::new(store.clone()).with_active_keys(keys.clone());
        ing.add_listener(tx);

        ing.on_raw_event(&RawEvent::new([0x90, 64, 90], LIVE_TRACK, 100));
        let seen = rx.try_recv().unwrap();
        assert_eq!(seen.key(), 64);
        assert!(keys.is_held(64));
        assert_eq!(store.for_each_interval(64).count(), 1);
    }

    #[test]
    fn test_dropped_listener_is_removed() {
        let store = Arc::new(NoteIntervalStore::new());
        let (tx, rx) = unbounded();
        let mut ing = EventIngestor::new(store);
        ing.add_listener(tx);
        drop(rx);
        ing.on_raw_event(&RawEvent::new([0x90, 64, 90], 1, 0));
        assert!(ing.listeners.is_empty());
        assert_eq!(ing.event_count(), 1);
    }

    #[test]
    fn test_score_path_leaves_active_keys_alone() {
        let store = Arc::new(NoteIntervalStore::new());
        let mut ing = EventIngestor::new(store.clone());
        assert!(ing.on_raw_event(&RawEvent::new([0xB0, 64, 127], 1, 0)).is_none());
        ing.on_note_event(&NoteEvent::on(60, 80, 1, 0));
        assert_eq!(store.len(), 1);
        assert_eq!(ing.event_count(), 1);
    }
}
