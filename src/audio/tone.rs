//! Synthetic tone generation for diagnostics

use super::frame::{AudioFrame, SAMPLE_RATE, frames_from_samples};

/// Loudest tone amplitude allowed, as a fraction of full scale
pub const MAX_TONE_AMPLITUDE: f32 = 0.4;

/// Default tone amplitude
pub const DEFAULT_TONE_AMPLITUDE: f32 = 0.3;

/// Generate a pure sine tone at the transport sample rate
///
/// Negative or non-finite durations produce no samples. Amplitude is clamped
/// to `[0, MAX_TONE_AMPLITUDE]` to leave headroom.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn generate_tone(frequency_hz: f32, duration_secs: f32, amplitude: f32) -> Vec<i16> {
    let duration = if duration_secs.is_finite() {
        duration_secs.max(0.0)
    } else {
        0.0
    };
    let amplitude = if amplitude.is_finite() {
        amplitude.clamp(0.0, MAX_TONE_AMPLITUDE)
    } else {
        DEFAULT_TONE_AMPLITUDE
    };

    let sample_rate = SAMPLE_RATE as f32;
    let num_samples = (duration * sample_rate).ceil() as usize;
    let peak = amplitude * f32::from(i16::MAX);

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate;
            let value = peak * (2.0 * std::f32::consts::PI * frequency_hz * t).sin();
            value.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
        })
        .collect()
}

/// Generate a tone already encoded and cut into 20 ms frames
#[must_use]
pub fn tone_frames(frequency_hz: f32, duration_secs: f32) -> Vec<AudioFrame> {
    let samples = generate_tone(frequency_hz, duration_secs, DEFAULT_TONE_AMPLITUDE);
    frames_from_samples(&samples)
}
