//! Re-bucketing of the decimated series into exactly N waveform points.

use super::decimate::DecimatedSample;
use super::metric::Metric;
use serde::{Deserialize, Serialize};

/// One output point of the waveform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformPoint {
    /// Midpoint of the bucket in seconds
    pub time: f64,
    /// Normalized value in [0, 1]
    pub value: f64,
    /// Position in the output sequence
    pub index: usize,
}

/// Splits `samples` into `points` equal-width time buckets and reduces each with `metric`.
///
/// `samples` must be sorted by time. The sweep keeps a single forward cursor, so the whole
/// pass is linear in `samples.len() + points`. Returns an empty vector when there is nothing to
/// bucket or `points` is zero.
pub fn bucketize(samples: &[DecimatedSample], points: usize, metric: Metric) -> Vec<WaveformPoint> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Vec::new();
    };
    if points == 0 {
        return Vec::new();
    }

    let origin = first.time;
    let duration = last.time - origin;
    if !(duration.is_finite() && duration > 0.0) {
        tracing::debug!(
            "Degenerate duration ({}s); emitting {} silent points",
            duration,
            points
        );
        return (0..points)
            .map(|index| WaveformPoint {
                time: origin,
                value: 0.0,
                index,
            })
            .collect();
    }

    let width = duration / points as f64;
    let mut cursor = 0;
    let mut bucket: Vec<u16> = Vec::new();
    let mut result = Vec::with_capacity(points);

    for index in 0..points {
        let start = origin + index as f64 * width;
        let end = start + width;

        while cursor < samples.len() && samples[cursor].time < start {
            cursor += 1;
        }

        bucket.clear();
        while cursor < samples.len() && samples[cursor].time < end {
            bucket.push(samples[cursor].magnitude);
            cursor += 1;
        }

        // Exhausted cursor leaves the bucket empty, which reduces to 0.
        let value = metric.reduce(&bucket);
        result.push(WaveformPoint {
            time: start + width / 2.0,
            value,
            index,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn constant_series(rate: f64, seconds: f64, magnitude: u16) -> Vec<DecimatedSample> {
        let count = (rate * seconds) as usize;
        (0..count)
            .map(|i| DecimatedSample {
                time: i as f64 / rate,
                magnitude,
            })
            .collect()
    }

    #[test]
    fn test_constant_signal_four_buckets() {
        let series = constant_series(8000.0, 1.0, 16384);
        let points = bucketize(&series, 4, Metric::Amplitude);

        assert_eq!(points.len(), 4);
        let duration = 7999.0 / 8000.0;
        for (i, point) in points.iter().enumerate() {
            assert_eq!(point.index, i);
            assert_relative_eq!(
                point.time,
                duration * (2 * i + 1) as f64 / 8.0,
                epsilon = 1e-9
            );
            assert_relative_eq!(point.value, 16384.0 / 32767.0, epsilon = 1e-9);
        }
        assert_relative_eq!(points[0].time, 0.125, epsilon = 1e-3);
        assert_relative_eq!(points[3].time, 0.875, epsilon = 1e-3);
    }

    #[test]
    fn test_exact_count_and_ranges_for_many_sizes() {
        let series: Vec<DecimatedSample> = (0..997)
            .map(|i| DecimatedSample {
                time: i as f64 * 0.013,
                magnitude: ((i * 7919) % 32768) as u16,
            })
            .collect();

        for n in [1, 2, 3, 7, 100, 333, 499, 500] {
            for metric in [Metric::Amplitude, Metric::Peak, Metric::Rms, Metric::Logarithmic] {
                let points = bucketize(&series, n, metric);
                assert_eq!(points.len(), n);
                for (position, point) in points.iter().enumerate() {
                    assert_eq!(point.index, position);
                    assert!((0.0..=1.0).contains(&point.value));
                }
                for pair in points.windows(2) {
                    assert!(pair[0].time < pair[1].time);
                }
            }
        }
    }

    #[test]
    fn test_more_buckets_than_samples_leaves_gaps_silent() {
        let series = vec![
            DecimatedSample { time: 0.0, magnitude: 32767 },
            DecimatedSample { time: 1.0, magnitude: 32767 },
        ];
        let points = bucketize(&series, 10, Metric::Peak);

        assert_eq!(points.len(), 10);
        assert_eq!(points[0].value, 1.0);
        assert!(points[1..9].iter().all(|p| p.value == 0.0));
    }

    #[test]
    fn test_trailing_silence() {
        let mut series = constant_series(100.0, 1.0, 20000);
        series.extend((100..200).map(|i| DecimatedSample {
            time: i as f64 / 100.0,
            magnitude: 0,
        }));
        let points = bucketize(&series, 4, Metric::Rms);

        assert!(points[0].value > 0.5);
        assert!(points[1].value > 0.5);
        assert_eq!(points[2].value, 0.0);
        assert_eq!(points[3].value, 0.0);
    }

    #[test]
    fn test_single_sample_is_degenerate() {
        let series = vec![DecimatedSample { time: 2.5, magnitude: 30000 }];
        let points = bucketize(&series, 5, Metric::Peak);

        assert_eq!(points.len(), 5);
        for (i, point) in points.iter().enumerate() {
            assert_eq!(point.index, i);
            assert_eq!(point.time, 2.5);
            assert_eq!(point.value, 0.0);
        }
    }

    #[test]
    fn test_shared_timestamp_is_degenerate() {
        let series = vec![
            DecimatedSample { time: 1.0, magnitude: 30000 },
            DecimatedSample { time: 1.0, magnitude: 30000 },
        ];
        let points = bucketize(&series, 3, Metric::Amplitude);
        assert!(points.iter().all(|p| p.value == 0.0));
    }

    #[test]
    fn test_empty_input() {
        assert!(bucketize(&[], 10, Metric::Amplitude).is_empty());
    }

    #[test]
    fn test_zero_points() {
        let series = constant_series(10.0, 1.0, 100);
        assert!(bucketize(&series, 0, Metric::Amplitude).is_empty());
    }

    #[test]
    fn test_is_deterministic() {
        let series = constant_series(441.0, 3.0, 1234);
        assert_eq!(
            bucketize(&series, 200, Metric::Logarithmic),
            bucketize(&series, 200, Metric::Logarithmic)
        );
    }
}
