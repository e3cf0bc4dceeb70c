//! Configuration file management for wavext.
//!
//! This module handles loading and saving application configuration from TOML files.
//! Configuration is stored in the user's config directory. Every field has a default, so a
//! missing file or a partial file is valid.

use crate::waveform::{Limits, Metric, DEFAULT_POINTS, MAX_SAMPLES};
use anyhow::{anyhow, Context};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Decoder used to turn a source into PCM frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// WAV decoder for `.wav` files, ffmpeg for everything else
    #[default]
    Auto,
    /// Built-in WAV decoder only
    Wav,
    /// ffmpeg subprocess for every source
    Ffmpeg,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Wav => write!(f, "wav"),
            Self::Ffmpeg => write!(f, "ffmpeg"),
        }
    }
}

/// Output shape of extracted waveforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformConfig {
    /// Number of output points (clamped to 1-500)
    #[serde(default = "default_samples")]
    pub samples: i64,
    /// Bucket reduction: "amplitude", "peak", "rms" or "logarithmic"
    #[serde(default)]
    pub metric: Metric,
}

fn default_samples() -> i64 {
    DEFAULT_POINTS as i64
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            metric: Metric::default(),
        }
    }
}

/// Decoder selection and tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecoderConfig {
    /// Decoder backend: "auto", "wav" or "ffmpeg"
    #[serde(default)]
    pub backend: BackendKind,
    /// Explicit ffmpeg binary, skips discovery when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit ffprobe binary, skips discovery when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffprobe_path: Option<PathBuf>,
    /// Size in bytes of each PCM frame handed to the pipeline
    #[serde(default = "default_frame_bytes")]
    pub frame_bytes: usize,
    /// Longest wait for a single decoded frame, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_frame_bytes() -> usize {
    8192
}

fn default_poll_timeout_ms() -> u64 {
    10
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            ffmpeg_path: None,
            ffprobe_path: None,
            frame_bytes: default_frame_bytes(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Resource bounds for a single extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Ceiling on retained decimated samples; longer sources are truncated
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Optional wall-clock deadline in seconds, enforced by cancelling the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_max_samples() -> usize {
    MAX_SAMPLES
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
            timeout_secs: None,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WavextConfig {
    #[serde(default)]
    pub waveform: WaveformConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl WavextConfig {
    /// Loads configuration from the user's config directory.
    ///
    /// Falls back to defaults when no config file exists yet.
    ///
    /// # Errors
    /// - If the config directory cannot be determined
    /// - If the config file cannot be read
    /// - If the TOML is malformed
    pub fn load() -> anyhow::Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from(&config_path)
    }

    /// Loads configuration from an explicit path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let config_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: WavextConfig = toml::from_str(&config_content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Saves configuration to the user's config directory.
    ///
    /// # Errors
    /// - If the config directory cannot be determined or created
    /// - If the file cannot be written
    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = get_config_path()?;
        self.save_to(&config_path)?;
        tracing::info!("Configuration saved");
        Ok(())
    }

    /// Saves configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        let config_content = toml::to_string_pretty(self)?;
        fs::write(path, config_content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Resource bounds for the extractor.
    pub fn limits(&self) -> Limits {
        Limits {
            max_samples: self.limits.max_samples,
            poll_timeout: Duration::from_millis(self.decoder.poll_timeout_ms.max(1)),
        }
    }
}

/// Retrieves the path to the config file, creating its directory if needed.
///
/// # Errors
/// - If the home directory cannot be determined
/// - If the config directory cannot be created
pub fn get_config_path() -> anyhow::Result<PathBuf> {
    let config_dir = dirs::home_dir()
        .ok_or_else(|| anyhow!("Could not determine home directory"))?
        .join(".config")
        .join("wavext");

    fs::create_dir_all(&config_dir)
        .map_err(|e| anyhow!("Failed to create config directory: {e}"))?;

    Ok(config_dir.join("wavext.toml"))
}
