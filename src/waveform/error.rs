//! Error kinds surfaced by waveform extraction.
//!
//! Library callers match on [`ExtractError`] to tell a cancelled run from a broken source.
//! Frame-level problems use [`FrameError`] and never abort a run on their own.

use thiserror::Error;

/// Outcome of a failed or aborted extraction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// Missing/empty source or otherwise malformed request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The source has no decodable audio stream.
    #[error("no audio track found in {0}")]
    NoAudioTrack(String),

    /// The decoder or demuxer reported an unrecoverable error.
    #[error("audio decoding failed: {0}")]
    DecodeFailure(String),

    /// The run was aborted through its cancel flag.
    #[error("waveform extraction cancelled")]
    Cancelled,

    /// Another extraction is already running on this extractor.
    #[error("another waveform extraction is already in progress")]
    Busy,
}

impl ExtractError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            ExtractError::InvalidInput(_) => "INVALID_INPUT",
            ExtractError::NoAudioTrack(_) => "NO_AUDIO_TRACK",
            ExtractError::DecodeFailure(_) => "DECODE_ERROR",
            ExtractError::Cancelled => "CANCELLED",
            ExtractError::Busy => "BUSY",
        }
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        ExtractError::DecodeFailure(err.to_string())
    }
}

/// A single decoded frame that violates the interleaving contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid frame: {len} samples cannot be split across {channels} channels")]
    InvalidFrame { channels: usize, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            ExtractError::InvalidInput("x".into()),
            ExtractError::NoAudioTrack("x".into()),
            ExtractError::DecodeFailure("x".into()),
            ExtractError::Cancelled,
            ExtractError::Busy,
        ];
        let mut codes: Vec<_> = errors.iter().map(ExtractError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_frame_error_message() {
        let err = FrameError::InvalidFrame { channels: 2, len: 3 };
        assert_eq!(
            err.to_string(),
            "invalid frame: 3 samples cannot be split across 2 channels"
        );
    }
}
