use crate::error::Result;
use crate::key_layout::LayoutParams;
use crate::types::*;
use crossbeam_channel::Receiver;
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SESSION_FORMAT: &str = "keys-follow";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const STATS_FILE: &str = "stats.json";

const FLUSH_EVERY: u64 = 256;

/// Totals written to `stats.json` when a recording ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStats {
    pub total_events: u64,
    pub note_ons: u64,
    pub first_timestamp_ms: Option<i64>,
    pub last_timestamp_ms: Option<i64>,
}

impl RecordingStats {
    fn record(&mut self, event: &NoteEvent) {
        self.total_events += 1;
        if event.is_active() {
            self.note_ons += 1;
        }
        self.first_timestamp_ms.get_or_insert(event.timestamp_ms);
        self.last_timestamp_ms = Some(event.timestamp_ms);
    }
}

/// First line of every recorded session.
pub fn session_header(layout: &LayoutParams) -> serde_json::Value {
    json!({
        "format": SESSION_FORMAT,
        "version": env!("CARGO_PKG_VERSION"),
        "layout": layout,
    })
}

/// Records every note event it receives, one JSON object per line.
///
/// Register the sender half with the ingestor; the logger stops when the
/// ingestor goes away.
pub struct DataLogger {
    rx: Receiver<NoteEvent>,
    session_dir: PathBuf,
    layout: LayoutParams,
}

impl DataLogger {
    /// Creates `<output_dir>/session_<unix seconds>/`.
    pub fn new(rx: Receiver<NoteEvent>, output_dir: &Path, layout: LayoutParams) -> Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let session_dir = output_dir.join(format!("session_{}", timestamp));
        fs::create_dir_all(&session_dir)?;

        Ok(Self {
            rx,
            session_dir,
            layout,
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn events_path(&self) -> PathBuf {
        self.session_dir.join(EVENTS_FILE)
    }

    /// Run the logger until the channel closes. Blocks the calling thread.
    pub fn run(&self) -> Result<RecordingStats> {
        info!("Data logger → {:?}", self.session_dir);

        let file = File::create(self.events_path())?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", session_header(&self.layout))?;

        let mut stats = RecordingStats::default();
        for event in self.rx.iter() {
            writeln!(writer, "{}", serde_json::to_string(&event)?)?;
            stats.record(&event);

            if stats.total_events % FLUSH_EVERY == 0 {
                writer.flush()?;
                info!("Logged {} note events", stats.total_events);
            }
        }
        writer.flush()?;

        let stats_path = self.session_dir.join(STATS_FILE);
        match serde_json::to_string_pretty(&stats) {
            Ok(text) => fs::write(&stats_path, text)
                .unwrap_or_else(|e| error!("Failed to write stats: {}", e)),
            Err(e) => error!("Failed to encode stats: {}", e),
        }

        info!(
            "Session saved: {} events ({} note-ons) → {:?}",
            stats.total_events, stats.note_ons, self.session_dir
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_header_names_format() {
        let h = session_header(&LayoutParams::default());
        assert_eq!(h["format"], "keys-follow");
        assert_eq!(h["layout"]["first_key"], 36);
        assert!(h["version"].is_string());
    }

    #[test]
    fn test_logger_writes_events_and_stats() {
        let out = std::env::temp_dir().join(format!("keys_follow_logger_{}", std::process::id()));
        let (tx, rx) = unbounded();
        let logger = DataLogger::new(rx, &out, LayoutParams::default()).unwrap();

        tx.send(NoteEvent::on(60, 90, LIVE_TRACK, 10)).unwrap();
        tx.send(NoteEvent::off(60, LIVE_TRACK, 200)).unwrap();
        drop(tx);

        let stats = logger.run().unwrap();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.note_ons, 1);
        assert_eq!(stats.first_timestamp_ms, Some(10));
        assert_eq!(stats.last_timestamp_ms, Some(200));

        let text = fs::read_to_string(logger.events_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let second: NoteEvent = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(second, NoteEvent::off(60, LIVE_TRACK, 200));
        assert!(logger.session_dir().join(STATS_FILE).exists());

        let _ = fs::remove_dir_all(&out);
    }
}
