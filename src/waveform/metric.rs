//! Reduction of a bucket's magnitudes to one normalized value.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Largest positive 16-bit sample, used as full scale.
pub const FULL_SCALE: f64 = 32767.0;

/// Values below this are treated as decoder dither and reported as silence.
pub const SILENCE_THRESHOLD: f64 = 0.001;

/// Amplitude reduction applied to each bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Mean magnitude
    #[default]
    Amplitude,
    /// Maximum magnitude
    Peak,
    /// Root mean square of the magnitudes
    Rms,
    /// Mean magnitude on a log10 scale
    Logarithmic,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amplitude => write!(f, "amplitude"),
            Self::Peak => write!(f, "peak"),
            Self::Rms => write!(f, "rms"),
            Self::Logarithmic => write!(f, "logarithmic"),
        }
    }
}

impl Metric {
    /// Reduces magnitudes to a settled value in [0, 1].
    ///
    /// An empty bucket is silence and never reaches the metric.
    pub fn reduce(self, magnitudes: &[u16]) -> f64 {
        if magnitudes.is_empty() {
            return 0.0;
        }
        settle(self.raw(magnitudes))
    }

    fn raw(self, magnitudes: &[u16]) -> f64 {
        let count = magnitudes.len() as f64;
        match self {
            Self::Amplitude => mean(magnitudes) / FULL_SCALE,
            Self::Peak => magnitudes.iter().copied().max().unwrap_or(0) as f64 / FULL_SCALE,
            Self::Rms => {
                let sum_squares: f64 = magnitudes.iter().map(|&m| (m as f64) * (m as f64)).sum();
                (sum_squares / count).sqrt() / FULL_SCALE
            }
            Self::Logarithmic => (1.0 + mean(magnitudes)).log10() / (1.0 + FULL_SCALE).log10(),
        }
    }
}

fn mean(magnitudes: &[u16]) -> f64 {
    let sum: u64 = magnitudes.iter().map(|&m| m as u64).sum();
    sum as f64 / magnitudes.len() as f64
}

/// Degrades a raw bucket value into the output range.
///
/// Non-finite values become 0, values under [`SILENCE_THRESHOLD`] snap to 0, and the
/// result is clamped to [0, 1].
pub fn settle(value: f64) -> f64 {
    if !value.is_finite() || value < SILENCE_THRESHOLD {
        return 0.0;
    }
    value.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ALL: [Metric; 4] = [Metric::Amplitude, Metric::Peak, Metric::Rms, Metric::Logarithmic];

    #[test]
    fn test_silence_reduces_to_zero_for_every_metric() {
        for metric in ALL {
            assert_eq!(metric.reduce(&[0, 0, 0]), 0.0, "{metric}");
            assert_eq!(metric.reduce(&[]), 0.0, "{metric}");
        }
    }

    #[test]
    fn test_amplitude_is_mean() {
        assert_relative_eq!(
            Metric::Amplitude.reduce(&[16384, 16384]),
            16384.0 / 32767.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            Metric::Amplitude.reduce(&[0, 32767]),
            0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_peak_is_max() {
        assert_relative_eq!(Metric::Peak.reduce(&[10, 32767, 5]), 1.0);
    }

    #[test]
    fn test_rms() {
        let expected = ((3000.0f64.powi(2) + 4000.0f64.powi(2)) / 2.0).sqrt() / 32767.0;
        assert_relative_eq!(Metric::Rms.reduce(&[3000, 4000]), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_logarithmic_full_scale_is_one() {
        assert_relative_eq!(Metric::Logarithmic.reduce(&[32767]), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_logarithmic_lifts_quiet_signal() {
        let linear = Metric::Amplitude.reduce(&[100]);
        let log = Metric::Logarithmic.reduce(&[100]);
        assert!(log > linear);
    }

    #[test]
    fn test_dither_snaps_to_zero() {
        // 20 / 32767 ≈ 0.0006
        assert_eq!(Metric::Amplitude.reduce(&[20]), 0.0);
        assert_eq!(Metric::Peak.reduce(&[20]), 0.0);
    }

    #[test]
    fn test_most_negative_sample_is_clamped() {
        assert_eq!(Metric::Peak.reduce(&[32768]), 1.0);
    }

    #[test]
    fn test_settle() {
        assert_eq!(settle(f64::NAN), 0.0);
        assert_eq!(settle(f64::INFINITY), 0.0);
        assert_eq!(settle(-0.5), 0.0);
        assert_eq!(settle(0.0009), 0.0);
        assert_eq!(settle(0.001), 0.001);
        assert_eq!(settle(1.7), 1.0);
    }

    #[test]
    fn test_metric_names_round_trip_through_serde() {
        let metric: Metric = serde_json::from_str("\"logarithmic\"").unwrap();
        assert_eq!(metric, Metric::Logarithmic);
        assert_eq!(serde_json::to_string(&Metric::Rms).unwrap(), "\"rms\"");
    }
}
