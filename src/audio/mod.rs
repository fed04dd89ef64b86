//! Telephony audio primitives
//!
//! μ-law codec, 20 ms framing, diagnostic tones, resampling and WAV encoding.

pub mod codec;
mod frame;
mod resample;
mod tone;
mod wav;

pub use frame::{
    AudioFrame, FRAME_DURATION, FrameOrigin, SAMPLE_RATE, SAMPLES_PER_FRAME, frames_from_mulaw,
    frames_from_samples,
};
pub use resample::{f32_to_i16, i16_to_f32, resample};
pub use tone::{DEFAULT_TONE_AMPLITUDE, MAX_TONE_AMPLITUDE, generate_tone, tone_frames};
pub use wav::{samples_to_wav, write_wav_file};
