//! Energy-based utterance endpointing
//!
//! Finds one spoken utterance in a stream of 8 kHz samples: speech starts
//! when frame energy rises above a threshold and ends after a stretch of
//! trailing silence.

use crate::audio::SAMPLE_RATE;

/// Minimum RMS energy (normalized) to consider speech
const ENERGY_THRESHOLD: f32 = 0.02;

/// Minimum utterance length before silence can end it (0.3 seconds)
const MIN_SPEECH_SAMPLES: usize = SAMPLE_RATE as usize * 3 / 10;

/// Trailing silence that ends an utterance (0.5 seconds)
const SILENCE_SAMPLES: usize = SAMPLE_RATE as usize / 2;

/// Hard cap on a single utterance (15 seconds)
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 15;

/// Result of feeding one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorStep {
    /// Nothing new
    Continue,
    /// Speech onset in this chunk
    SpeechStarted,
    /// Utterance finished; take it with [`UtteranceDetector::take_utterance`]
    Complete,
}

/// Accumulates one utterance from a sample stream
#[derive(Debug, Default)]
pub struct UtteranceDetector {
    speaking: bool,
    complete: bool,
    buffer: Vec<i16>,
    silence_counter: usize,
}

impl UtteranceDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of samples
    pub fn push(&mut self, samples: &[i16]) -> DetectorStep {
        if self.complete {
            return DetectorStep::Complete;
        }

        let is_speech = calculate_energy(samples) > ENERGY_THRESHOLD;

        if !self.speaking {
            if !is_speech {
                return DetectorStep::Continue;
            }
            self.speaking = true;
            self.buffer.extend_from_slice(samples);
            self.silence_counter = 0;
            tracing::trace!("speech onset");
            return DetectorStep::SpeechStarted;
        }

        self.buffer.extend_from_slice(samples);
        if is_speech {
            self.silence_counter = 0;
        } else {
            self.silence_counter += samples.len();
        }

        let ended_by_silence =
            self.silence_counter > SILENCE_SAMPLES && self.buffer.len() > MIN_SPEECH_SAMPLES;
        if ended_by_silence || self.buffer.len() >= MAX_UTTERANCE_SAMPLES {
            tracing::debug!(samples = self.buffer.len(), "utterance complete");
            self.complete = true;
            return DetectorStep::Complete;
        }

        DetectorStep::Continue
    }

    /// Whether speech has been heard
    #[must_use]
    pub const fn has_speech(&self) -> bool {
        self.speaking
    }

    /// Whether an utterance has been closed off
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Take the accumulated utterance and reset
    pub fn take_utterance(&mut self) -> Vec<i16> {
        self.speaking = false;
        self.complete = false;
        self.silence_counter = 0;
        std::mem::take(&mut self.buffer)
    }
}

/// Calculate RMS energy of samples, normalized to full scale
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = f32::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}
