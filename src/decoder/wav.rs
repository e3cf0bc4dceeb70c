//! WAV decoding through `hound`.
//!
//! Samples of any PCM width are delivered as 16-bit so every decoder shares one full scale.

use super::Decoder;
use crate::waveform::{ExtractError, Frame, FramePoll, TrackInfo, FULL_SCALE};
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

/// Reads a local WAV file in fixed-size frames.
pub struct WavDecoder {
    reader: WavReader<BufReader<File>>,
    track: TrackInfo,
    format: SampleFormat,
    bits_per_sample: u16,
    /// Interleaved samples per frame, a whole number of sample frames
    frame_samples: usize,
    /// Interleaved samples not yet delivered
    remaining: usize,
    /// Sample frames delivered so far, drives timestamps
    delivered: u64,
}

impl WavDecoder {
    /// Opens `path` and reads its header.
    ///
    /// # Arguments
    /// * `path` - Local WAV file
    /// * `frame_bytes` - Target size of each frame as 16-bit PCM
    ///
    /// # Errors
    /// - `NoAudioTrack` if the header declares no channels
    /// - `DecodeFailure` if the file is not a readable WAV file
    pub fn open(path: &Path, frame_bytes: usize) -> Result<Self, ExtractError> {
        let reader = WavReader::open(path).map_err(|e| {
            ExtractError::DecodeFailure(format!("failed to read {}: {e}", path.display()))
        })?;
        let spec = reader.spec();

        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(ExtractError::NoAudioTrack(path.display().to_string()));
        }

        let channels = spec.channels as usize;
        let frame_samples = (frame_bytes / 2 / channels).max(1) * channels;
        let track = TrackInfo {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            duration: Some(reader.duration() as f64 / spec.sample_rate as f64),
        };

        tracing::debug!(
            "WAV header: {}Hz, {} channels, {} bit {:?}, {} samples",
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format,
            reader.len()
        );

        Ok(Self {
            remaining: reader.len() as usize,
            reader,
            track,
            format: spec.sample_format,
            bits_per_sample: spec.bits_per_sample,
            frame_samples,
            delivered: 0,
        })
    }

    fn read_samples(&mut self, count: usize) -> Result<Vec<i16>, hound::Error> {
        let bits = self.bits_per_sample;
        match self.format {
            SampleFormat::Int if bits <= 16 => {
                let shift = 16 - bits;
                self.reader
                    .samples::<i16>()
                    .take(count)
                    .map(|s| s.map(|v| v << shift))
                    .collect()
            }
            SampleFormat::Int => {
                let shift = bits.saturating_sub(16).min(31);
                self.reader
                    .samples::<i32>()
                    .take(count)
                    .map(|s| s.map(|v| (v >> shift) as i16))
                    .collect()
            }
            SampleFormat::Float => self
                .reader
                .samples::<f32>()
                .take(count)
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) as f64 * FULL_SCALE).round() as i16))
                .collect(),
        }
    }
}

impl Decoder for WavDecoder {
    fn track(&self) -> &TrackInfo {
        &self.track
    }

    fn next_frame(&mut self, _timeout: Duration) -> Result<FramePoll, ExtractError> {
        if self.remaining == 0 {
            return Ok(FramePoll::EndOfStream);
        }

        let count = self.frame_samples.min(self.remaining);
        let samples = self.read_samples(count).map_err(ExtractError::decode)?;
        self.remaining -= count;

        if samples.is_empty() {
            // Header promised more data than the file holds.
            tracing::warn!("WAV data ended early with {} samples missing", self.remaining);
            self.remaining = 0;
            return Ok(FramePoll::EndOfStream);
        }

        let timestamp = self.delivered as f64 / self.track.sample_rate as f64;
        self.delivered += (samples.len() / self.track.channels as usize) as u64;
        Ok(FramePoll::Ready(Frame::new(samples, timestamp)))
    }

    fn close(&mut self) -> Result<(), ExtractError> {
        self.remaining = 0;
        Ok(())
    }
}
