//! Call sessions
//!
//! Each media stream gets one [`TurnController`] task that owns the call's
//! state. Everything that happens to the call, whether transport messages,
//! transcripts, finished playback or timers, arrives as a [`SessionEvent`]
//! on that task's queue and is handled one at a time.

mod controller;
mod registry;
mod session;

use std::sync::Arc;
use std::time::Duration;

use crate::audio::FRAME_DURATION;
use crate::config::Config;
use crate::dialogue::DialoguePolicy;
use crate::playback::PlaybackOutcome;
use crate::stt::{RecognitionConfig, RecognitionEngine, TranscriptEvent};
use crate::transport::InboundEvent;
use crate::tts::SpeechSynthesizer;

pub use controller::TurnController;
pub use registry::{CallSummary, SessionRegistry};
pub use session::{CallSession, CallState};

/// Something that happened to a call
#[derive(Debug)]
pub enum SessionEvent {
    /// Parsed message from the media stream
    Transport(InboundEvent),

    /// Media stream message that could not be parsed
    Malformed(String),

    /// Hypothesis from a recognition session
    Transcript { generation: u64, event: TranscriptEvent },

    /// A recognition session stopped, on its own or with an engine error
    RecognitionEnded { generation: u64, error: Option<String> },

    /// Backoff elapsed; reopen recognition
    RestartRecognition { token: u64 },

    /// Dialogue policy finished
    ReplyReady { reply: Result<String, String> },

    /// A playback job ended
    PlaybackFinished { job_id: u64, outcome: PlaybackOutcome },

    /// Play a diagnostic tone if the line is idle
    DiagnosticTone { frequency_hz: f32, duration_secs: f32 },

    /// The transport connection is gone
    Disconnected(String),
}

/// Behavior knobs for a call
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub greeting: String,
    pub fallback_prompt: String,
    pub recognition: RecognitionConfig,
    pub restart_backoff: Duration,
    pub frame_interval: Duration,

    /// Policy calls running longer than this fall back to `fallback_prompt`
    pub reply_timeout: Duration,

    /// Synthesis running longer than this counts as failed
    pub synthesis_timeout: Duration,
}

impl CallSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            greeting: config.dialogue.greeting.clone(),
            fallback_prompt: config.dialogue.fallback_prompt.clone(),
            recognition: RecognitionConfig::telephony(config.speech.language.clone()),
            restart_backoff: config.speech.restart_backoff,
            frame_interval: FRAME_DURATION,
            reply_timeout: config.dialogue.reply_timeout,
            synthesis_timeout: config.speech.synthesis_timeout,
        }
    }
}

/// Engines and settings shared by every call
#[derive(Clone)]
pub struct CallServices {
    pub recognizer: Arc<dyn RecognitionEngine>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub policy: Arc<dyn DialoguePolicy>,
    pub settings: CallSettings,
}

impl std::fmt::Debug for CallServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallServices")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
