//! Channel reduction of interleaved frames to mono magnitudes.

use super::error::FrameError;

/// Downmixes interleaved samples to mono by averaging absolute magnitudes per sample frame.
///
/// Integer division truncates toward zero, matching the 16-bit source width.
/// Mono input is passed through as absolute values.
///
/// # Errors
/// - If `channels` is zero
/// - If `samples.len()` is not a multiple of `channels`
pub fn downmix(samples: &[i16], channels: usize) -> Result<Vec<u16>, FrameError> {
    if channels == 0 || samples.len() % channels != 0 {
        return Err(FrameError::InvalidFrame {
            channels,
            len: samples.len(),
        });
    }

    let mono = match channels {
        1 => samples.iter().map(|s| s.unsigned_abs()).collect(),
        _ => samples
            .chunks_exact(channels)
            .map(|chunk| {
                let sum: u32 = chunk.iter().map(|s| s.unsigned_abs() as u32).sum();
                (sum / channels as u32) as u16
            })
            .collect(),
    };

    Ok(mono)
}
