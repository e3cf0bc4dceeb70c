//! Application command handlers for wavext.
//!
//! Each submodule handles one CLI command.
//!
//! # Commands
//! - `extract`: Extract a fixed-length waveform from an audio source
//! - `config`: Open configuration file in user's preferred editor
//! - `logs`: Display recent log entries

pub mod config;
pub mod extract;
pub mod logs;

pub use config::handle_config;
pub use extract::{handle_extract, ExtractArgs};
pub use logs::handle_logs;
