//! Streaming waveform extraction.
//!
//! Decoded PCM frames are downmixed to mono magnitudes, decimated into a bounded series of
//! peaks, and finally re-bucketed into a fixed number of normalized points.

pub mod bucket;
pub mod decimate;
pub mod downmix;
pub mod error;
pub mod frame;
pub mod metric;
pub mod run;

pub use bucket::{bucketize, WaveformPoint};
pub use decimate::{DecimatedSample, DecimatedSeries, Ingest, MAX_SAMPLES};
pub use downmix::downmix;
pub use error::{ExtractError, FrameError};
pub use frame::{Frame, FramePoll, TrackInfo};
pub use metric::{settle, Metric, FULL_SCALE, SILENCE_THRESHOLD};
pub use run::{
    CancelHandle, Extractor, Limits, RunHandle, RunStats, Waveform, WaveformRequest,
    DEFAULT_POINTS, MAX_POINTS, MIN_POINTS,
};
