use thiserror::Error;

/// Recoverable failures: bad score files, bad recorded sessions, bad time bases.
///
/// Live-input anomalies (unknown messages, unmatched note-offs) and missing
/// key geometry are not errors and never show up here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid time base: {0}")]
    TimeBase(String),

    #[error("invalid session: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, Error>;
