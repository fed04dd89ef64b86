//! Sample rate conversion for synthesized speech

use rubato::{FftFixedInOut, Resampler};

use crate::{Error, Result};

/// Input chunk size handed to the FFT resampler
const CHUNK_SIZE: usize = 1024;

/// Resample mono audio between two rates
///
/// # Errors
///
/// Returns error if the resampler cannot be constructed for the given rates
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 1)
            .map_err(|e| Error::Audio(format!("resampler setup failed: {e}")))?;

    let expected = (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round()
        as usize;
    // The filter delays its output; skip that lead-in and flush the tail out
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(delay + expected + CHUNK_SIZE);

    let mut position = 0;
    while position < samples.len() || output.len() < delay + expected {
        let needed = resampler.input_frames_next();
        let start = position.min(samples.len());
        let end = (position + needed).min(samples.len());

        // Zero-pad so every call sees a full chunk
        let mut chunk = samples[start..end].to_vec();
        chunk.resize(needed, 0.0);

        let processed = resampler
            .process(std::slice::from_ref(&chunk), None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        match processed.first() {
            Some(channel) if !channel.is_empty() => output.extend_from_slice(channel),
            _ => break,
        }

        position += needed;
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

/// Convert 16-bit linear samples to normalized floats
#[must_use]
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Convert normalized floats back to 16-bit linear samples
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).round().clamp(-32768.0, 32767.0) as i16)
        .collect()
}
