//! Speech-to-text
//!
//! A [`RecognitionEngine`] runs one recognition session over a stream of
//! μ-law chunks. The [`SttSessionManager`] owns the single open session of a
//! call and reports its results back onto the call's event queue.

mod detector;
mod manager;
mod transcribe;
mod utterance;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::audio::SAMPLE_RATE;
use crate::call::SessionEvent;

pub use detector::{DetectorStep, UtteranceDetector};
pub use manager::SttSessionManager;
pub use transcribe::{SpeechToText, Transcription};
pub use utterance::UtteranceRecognizer;

/// Sample encoding of the audio fed to recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// G.711 μ-law, one byte per sample
    Mulaw,
}

/// Parameters for one recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionConfig {
    pub encoding: AudioEncoding,
    pub sample_rate_hz: u32,
    pub language: String,
    pub punctuation: bool,

    /// Close the session after the first complete utterance
    pub single_utterance: bool,

    /// Emit non-final hypotheses (diagnostics only)
    pub interim_results: bool,
}

impl RecognitionConfig {
    /// Configuration matching the telephony transport
    #[must_use]
    pub fn telephony(language: impl Into<String>) -> Self {
        Self {
            encoding: AudioEncoding::Mulaw,
            sample_rate_hz: SAMPLE_RATE,
            language: language.into(),
            punctuation: true,
            single_utterance: true,
            interim_results: true,
        }
    }
}

/// A hypothesis produced by recognition
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    pub confidence: Option<f32>,
}

impl TranscriptEvent {
    /// A final transcript
    #[must_use]
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence: None,
        }
    }

    /// A non-final hypothesis
    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence: None,
        }
    }
}

/// Channel an engine delivers transcripts through for one session
#[derive(Debug, Clone)]
pub struct TranscriptSender {
    generation: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl TranscriptSender {
    pub(crate) const fn new(generation: u64, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, events }
    }

    /// Session this sender belongs to
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver a transcript; returns false once the call has gone away
    pub fn send(&self, event: TranscriptEvent) -> bool {
        self.events
            .send(SessionEvent::Transcript {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A streaming speech recognizer
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Run one recognition session to completion
    ///
    /// Audio arrives on `audio` until the session is closed (the channel
    /// ends). In single-utterance mode the engine returns after delivering
    /// one final transcript.
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails; the caller restarts the session
    async fn recognize(
        &self,
        config: &RecognitionConfig,
        audio: mpsc::Receiver<Vec<u8>>,
        transcripts: TranscriptSender,
    ) -> Result<()>;
}
