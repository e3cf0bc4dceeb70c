//! Peak decimation of the mono stream into a bounded, time-ordered series.
//!
//! Every frame contributes at most ~100 points regardless of the decoder's buffer size, and the
//! whole series is capped at a hard ceiling so memory stays flat on arbitrarily long sources.

/// Hard ceiling on retained decimated samples per run.
pub const MAX_SAMPLES: usize = 1_000_000;

/// Upper bound on decimated points contributed by a single frame.
const RUNS_PER_FRAME: usize = 100;

/// Peak magnitude of one run of consecutive mono samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecimatedSample {
    /// Time of the first sample in the run, in seconds
    pub time: f64,
    /// Maximum absolute magnitude within the run
    pub magnitude: u16,
}

/// Whether the series can take more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Keep pulling frames
    Accepted,
    /// The ceiling is reached with the whole input kept; stop pulling frames
    Full,
    /// The ceiling cut this input short
    Dropped,
}

/// Append-only series of decimated samples, non-decreasing in time.
#[derive(Debug, Clone)]
pub struct DecimatedSeries {
    samples: Vec<DecimatedSample>,
    limit: usize,
}

impl Default for DecimatedSeries {
    fn default() -> Self {
        Self::with_limit(MAX_SAMPLES)
    }
}

impl DecimatedSeries {
    /// Creates an empty series capped at `limit` samples (at least one).
    pub fn with_limit(limit: usize) -> Self {
        Self {
            samples: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Decimates one frame's mono magnitudes and appends the result.
    ///
    /// # Arguments
    /// * `mono` - Mono magnitudes of the frame
    /// * `start` - Presentation time of the first sample in seconds
    /// * `interval` - Seconds per sample (`1 / sample_rate`)
    pub fn push_frame(&mut self, mono: &[u16], start: f64, interval: f64) -> Ingest {
        let step = (mono.len() / RUNS_PER_FRAME).max(1);

        for (run_index, run) in mono.chunks(step).enumerate() {
            if self.is_full() {
                return Ingest::Dropped;
            }
            let magnitude = run.iter().copied().max().unwrap_or(0);
            let offset = run_index * step;
            self.append(start + offset as f64 * interval, magnitude);
        }

        self.state()
    }

    /// Appends a single zero-magnitude sample, used when a frame had to be discarded.
    pub fn push_silence(&mut self, time: f64) -> Ingest {
        if self.is_full() {
            return Ingest::Dropped;
        }
        self.append(time, 0);
        self.state()
    }

    fn append(&mut self, time: f64, magnitude: u16) {
        // Keeps the series non-decreasing in time if a decoder misorders timestamps.
        let time = match self.samples.last() {
            Some(last) if time < last.time => last.time,
            _ => time,
        };
        self.samples.push(DecimatedSample { time, magnitude });
    }

    fn state(&self) -> Ingest {
        if self.is_full() {
            Ingest::Full
        } else {
            Ingest::Accepted
        }
    }

    /// Returns true once the series holds `limit` samples.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.limit
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn as_slice(&self) -> &[DecimatedSample] {
        &self.samples
    }
}
