//! Configuration management for wavext.
//!
//! This module handles loading and saving application configuration from a TOML file in the
//! user's config directory. Command-line flags override the values loaded here.

pub mod file;

pub use file::{
    get_config_path, BackendKind, DecoderConfig, LimitsConfig, WaveformConfig, WavextConfig,
};
