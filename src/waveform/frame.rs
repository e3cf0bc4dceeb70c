//! Decoded PCM frames and track metadata handed over by a decoder.

/// One decode unit: interleaved 16-bit samples plus the presentation time of the first sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Interleaved samples across all channels
    pub samples: Vec<i16>,
    /// Presentation timestamp in seconds
    pub timestamp: f64,
}

impl Frame {
    pub fn new(samples: Vec<i16>, timestamp: f64) -> Self {
        Self { samples, timestamp }
    }
}

/// Audio stream properties reported by track discovery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackInfo {
    /// Number of interleaved channels
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Duration from container metadata, when the container carries one
    pub duration: Option<f64>,
}

impl TrackInfo {
    /// Seconds between two consecutive sample frames.
    pub fn sample_interval(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            1.0 / self.sample_rate as f64
        }
    }
}

/// Result of polling a decoder for its next frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePoll {
    /// A decoded frame is available
    Ready(Frame),
    /// Nothing arrived within the poll timeout; try again
    Pending,
    /// The stream is exhausted
    EndOfStream,
}
