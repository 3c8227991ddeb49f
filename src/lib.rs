pub mod active_keys;
pub mod console_display;
pub mod data_logger;
pub mod error;
pub mod ingestor;
pub mod interval_store;
pub mod jsonl_reader;
pub mod key_layout;
pub mod playback_clock;
pub mod score;
pub mod simulator;
pub mod staff;
pub mod timeline;
pub mod types;
