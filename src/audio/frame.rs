//! Fixed-duration μ-law audio frames

use std::time::Duration;

use super::codec;

/// Transport sample rate (narrowband telephony)
pub const SAMPLE_RATE: u32 = 8000;

/// Duration of one frame
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Samples (and μ-law bytes) in one full frame
pub const SAMPLES_PER_FRAME: usize = 160;

/// Direction an audio frame travels relative to the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Caller audio received from the transport
    Inbound,
    /// Synthesized audio sent to the transport
    Outbound,
}

/// An immutable chunk of μ-law audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    payload: Vec<u8>,
    origin: FrameOrigin,
}

impl AudioFrame {
    /// Wrap caller audio received from the transport
    #[must_use]
    pub const fn inbound(payload: Vec<u8>) -> Self {
        Self {
            payload,
            origin: FrameOrigin::Inbound,
        }
    }

    /// Wrap synthesized audio headed for the transport
    #[must_use]
    pub const fn outbound(payload: Vec<u8>) -> Self {
        Self {
            payload,
            origin: FrameOrigin::Outbound,
        }
    }

    /// Encode linear samples into an outbound frame
    #[must_use]
    pub fn from_samples(samples: &[i16]) -> Self {
        Self::outbound(codec::encode_samples(samples))
    }

    /// Raw μ-law bytes
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Direction of travel
    #[must_use]
    pub const fn origin(&self) -> FrameOrigin {
        self.origin
    }

    /// Number of samples carried (one byte per sample)
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.payload.len()
    }

    /// Playback duration of this frame
    #[must_use]
    pub fn duration(&self) -> Duration {
        let micros = self.payload.len() as u64 * 1_000_000 / u64::from(SAMPLE_RATE);
        Duration::from_micros(micros)
    }

    /// Decode to linear samples
    #[must_use]
    pub fn to_samples(&self) -> Vec<i16> {
        codec::decode_samples(&self.payload)
    }
}

/// Cut a μ-law stream into outbound frames of at most 160 samples
#[must_use]
pub fn frames_from_mulaw(audio: &[u8]) -> Vec<AudioFrame> {
    audio
        .chunks(SAMPLES_PER_FRAME)
        .map(|chunk| AudioFrame::outbound(chunk.to_vec()))
        .collect()
}

/// Encode linear samples and cut them into outbound frames
#[must_use]
pub fn frames_from_samples(samples: &[i16]) -> Vec<AudioFrame> {
    samples
        .chunks(SAMPLES_PER_FRAME)
        .map(AudioFrame::from_samples)
        .collect()
}
