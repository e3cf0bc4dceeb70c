//! Fixed-length waveform extraction from arbitrary audio sources.
//!
//! ```no_run
//! use wavext::config::DecoderConfig;
//! use wavext::decoder::AutoBackend;
//! use wavext::waveform::{Extractor, Limits, Metric, WaveformRequest};
//!
//! let extractor = Extractor::new(AutoBackend::new(DecoderConfig::default()), Limits::default());
//! let waveform = extractor.extract(WaveformRequest::new("song.mp3", 200, Metric::Amplitude))?;
//! println!("{} points", waveform.points.len());
//! # Ok::<(), wavext::waveform::ExtractError>(())
//! ```

pub mod config;
pub mod decoder;
pub mod waveform;
