//! Decoders that turn an audio source into PCM frames.
//!
//! The waveform pipeline only sees the [`Decoder`] trait. Two implementations ship with the
//! crate: a WAV reader built on `hound` and an ffmpeg subprocess for every other format
//! (including remote URLs). [`AutoBackend`] picks one per source.

pub mod ffmpeg;
pub mod wav;

pub use ffmpeg::{find_tool, FfmpegDecoder, FfmpegTools};
pub use wav::WavDecoder;

use crate::config::{BackendKind, DecoderConfig};
use crate::waveform::{ExtractError, FramePoll, TrackInfo};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A pull-based source of decoded frames for one audio track.
pub trait Decoder: Send {
    /// Format of the selected audio track.
    fn track(&self) -> &TrackInfo;

    /// Waits up to `timeout` for the next frame.
    fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll, ExtractError>;

    /// Releases decoder resources. Safe to call after a failure and more than once.
    fn close(&mut self) -> Result<(), ExtractError>;
}

/// Opens decoders for sources.
pub trait DecoderBackend: Send + Sync {
    /// Opens `source` and discovers its first audio track.
    ///
    /// # Errors
    /// - `InvalidInput` if the source cannot be resolved
    /// - `NoAudioTrack` if the source has no audio stream
    /// - `DecodeFailure` if the container cannot be read
    fn open(&self, source: &str) -> Result<Box<dyn Decoder>, ExtractError>;
}

/// Where audio comes from once a source string is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Local file
    File(PathBuf),
    /// Anything with a URL scheme, handed to ffmpeg untouched
    Url(String),
}

impl Source {
    /// Resolves a source string, stripping a `file://` prefix.
    ///
    /// # Errors
    /// - `InvalidInput` if the source is empty or names a missing local file
    pub fn resolve(source: &str) -> Result<Self, ExtractError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ExtractError::InvalidInput(
                "audio source must not be empty".to_string(),
            ));
        }

        if let Some(path) = source.strip_prefix("file://") {
            return Self::local(path);
        }
        if source.contains("://") {
            return Ok(Source::Url(source.to_string()));
        }
        Self::local(source)
    }

    fn local(path: &str) -> Result<Self, ExtractError> {
        let path = PathBuf::from(path);
        if !path.is_file() {
            return Err(ExtractError::InvalidInput(format!(
                "audio file not found: {}",
                path.display()
            )));
        }
        Ok(Source::File(path))
    }

    fn is_wav(&self) -> bool {
        match self {
            Source::File(path) => has_wav_extension(path),
            Source::Url(_) => false,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::File(path) => write!(f, "{}", path.display()),
            Source::Url(url) => write!(f, "{url}"),
        }
    }
}

fn has_wav_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav") || ext.eq_ignore_ascii_case("wave"))
}

/// Config-driven backend choosing between the WAV and ffmpeg decoders.
#[derive(Debug, Clone)]
pub struct AutoBackend {
    config: DecoderConfig,
}

impl AutoBackend {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    fn open_ffmpeg(&self, source: &Source) -> Result<Box<dyn Decoder>, ExtractError> {
        let tools = FfmpegTools::locate(
            self.config.ffmpeg_path.as_deref(),
            self.config.ffprobe_path.as_deref(),
        )
        .map_err(ExtractError::decode)?;
        Ok(Box::new(FfmpegDecoder::open(
            &tools,
            source,
            self.config.frame_bytes,
        )?))
    }
}

impl DecoderBackend for AutoBackend {
    fn open(&self, source: &str) -> Result<Box<dyn Decoder>, ExtractError> {
        let source = Source::resolve(source)?;
        let use_wav = match self.config.backend {
            BackendKind::Wav => true,
            BackendKind::Ffmpeg => false,
            BackendKind::Auto => source.is_wav(),
        };
        tracing::debug!(
            "Opening {} with the {} decoder",
            source,
            if use_wav { "wav" } else { "ffmpeg" }
        );

        if !use_wav {
            return self.open_ffmpeg(&source);
        }
        match &source {
            Source::File(path) => Ok(Box::new(WavDecoder::open(path, self.config.frame_bytes)?)),
            Source::Url(url) => Err(ExtractError::InvalidInput(format!(
                "the wav decoder only reads local files, got {url}"
            ))),
        }
    }
}
