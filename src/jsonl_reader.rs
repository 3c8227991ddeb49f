//! JSONL session reader: parses recorded sessions back into note events.
//!
//! Reads the header line written by the data logger, then yields events one
//! at a time. Works with any `BufRead`: files, in-memory buffers, stdin.

use crate::data_logger::SESSION_FORMAT;
use crate::error::{Error, Result};
use crate::key_layout::LayoutParams;
use crate::types::NoteEvent;
use log::warn;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Parsed first line of a session file.
#[derive(Debug)]
pub struct SessionHeader {
    pub format: String,
    pub version: String,
    /// Layout in use while recording, if the header carried a valid one.
    pub layout: Option<LayoutParams>,
    pub raw: serde_json::Value,
}

/// Line-by-line JSONL session reader.
pub struct SessionReader<R: BufRead> {
    reader: R,
    pub header: SessionHeader,
    line_buf: String,
    line_no: usize,
}

impl SessionReader<BufReader<File>> {
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(BufReader::new(File::open(path)?))
    }
}

impl<R: BufRead> SessionReader<R> {
    /// Read and validate the header line. Fails if the header is missing,
    /// unparseable, or not a keys-follow session.
    pub fn open(mut reader: R) -> Result<Self> {
        let mut first_line = String::new();
        reader.read_line(&mut first_line)?;

        let first_line = first_line.trim();
        if first_line.is_empty() {
            return Err(Error::Session("empty file".into()));
        }

        let raw: serde_json::Value = serde_json::from_str(first_line)?;
        let format = raw["format"]
            .as_str()
            .ok_or_else(|| Error::Session("missing \"format\" field".into()))?
            .to_string();
        if format != SESSION_FORMAT {
            return Err(Error::Session(format!("unknown format: {}", format)));
        }

        let version = raw["version"].as_str().unwrap_or("").to_string();
        let layout = serde_json::from_value(raw["layout"].clone()).ok();

        Ok(Self {
            reader,
            header: SessionHeader {
                format,
                version,
                layout,
                raw,
            },
            line_buf: String::new(),
            line_no: 1,
        })
    }

    /// Read the next event. Returns `None` at EOF, `Err` for unparseable lines.
    pub fn next_event(&mut self) -> Option<Result<NoteEvent>> {
        loop {
            self.line_buf.clear();
            match self.reader.read_line(&mut self.line_buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_no += 1;
                    let trimmed = self.line_buf.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(serde_json::from_str::<NoteEvent>(trimmed).map_err(|e| {
                        Error::Session(format!("line {}: {}", self.line_no, e))
                    }));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    /// Read all remaining events, skipping malformed lines.
    pub fn read_all(mut self) -> Vec<NoteEvent> {
        let mut events = Vec::new();
        while let Some(result) = self.next_event() {
            match result {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping {}", e),
            }
        }
        events
    }

    /// All events with timestamps shifted so the first one lands at 0, ready
    /// to be loaded as a score.
    pub fn into_score_events(self) -> Vec<NoteEvent> {
        let mut events = self.read_all();
        if let Some(first) = events.iter().map(|e| e.timestamp_ms).min() {
            for e in &mut events {
                e.timestamp_ms -= first;
            }
        }
        events.sort_by_key(|e| e.timestamp_ms);
        events
    }
}
