//! Per-call recognition session ownership

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::{RecognitionConfig, RecognitionEngine, TranscriptSender};
use crate::audio::AudioFrame;
use crate::call::SessionEvent;

/// Audio chunks buffered toward the engine (about 1.3 seconds)
const AUDIO_QUEUE_DEPTH: usize = 64;

/// The currently open recognition session
#[derive(Debug)]
struct ActiveRecognition {
    generation: u64,
    audio: mpsc::Sender<Vec<u8>>,
    task: JoinHandle<()>,
    finalized: bool,
}

/// Owns at most one open recognition session for a call
///
/// Sessions are numbered; events from a closed session carry a stale
/// generation and are discarded by the caller.
pub struct SttSessionManager {
    engine: Arc<dyn RecognitionEngine>,
    config: RecognitionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    active: Option<ActiveRecognition>,
    last_generation: u64,
    frames_fed: u64,
}

impl std::fmt::Debug for SttSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SttSessionManager")
            .field("config", &self.config)
            .field("active", &self.active)
            .field("last_generation", &self.last_generation)
            .field("frames_fed", &self.frames_fed)
            .finish_non_exhaustive()
    }
}

impl SttSessionManager {
    /// Create a manager reporting onto a call's event queue
    #[must_use]
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        config: RecognitionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            engine,
            config,
            events,
            active: None,
            last_generation: 0,
            frames_fed: 0,
        }
    }

    /// Open a fresh session, closing any session still open
    ///
    /// Returns the new session's generation.
    pub fn open(&mut self) -> u64 {
        self.close();

        self.last_generation += 1;
        let generation = self.last_generation;

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();
        let events = self.events.clone();
        let transcripts = TranscriptSender::new(generation, events.clone());

        let task = tokio::spawn(async move {
            let error = engine
                .recognize(&config, audio_rx, transcripts)
                .await
                .err()
                .map(|e| e.to_string());
            let _ = events.send(SessionEvent::RecognitionEnded { generation, error });
        });

        tracing::debug!(generation, "recognition session opened");

        self.active = Some(ActiveRecognition {
            generation,
            audio: audio_tx,
            task,
            finalized: false,
        });
        generation
    }

    /// Close the open session, if any
    ///
    /// Returns whether a session was closed. Safe to call repeatedly.
    pub fn close(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        // Ending the audio stream lets the engine wind down; aborting makes
        // sure nothing from this generation is reported afterwards
        drop(active.audio);
        active.task.abort();

        tracing::debug!(generation = active.generation, "recognition session closed");
        true
    }

    /// Write one inbound frame to the open session
    ///
    /// Returns whether the frame was accepted.
    pub fn feed(&mut self, frame: &AudioFrame) -> bool {
        let Some(active) = self.active.as_ref() else {
            return false;
        };
        if active.finalized {
            return false;
        }

        match active.audio.try_send(frame.payload().to_vec()) {
            Ok(()) => {
                self.frames_fed += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(generation = active.generation, "recognition backlog full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(generation = active.generation, "recognition session no longer reading audio");
                false
            }
        }
    }

    /// Claim the final transcript of a session
    ///
    /// Returns true at most once per session, and only for the open one.
    pub fn accept_final(&mut self, generation: u64) -> bool {
        match self.active.as_mut() {
            Some(active) if active.generation == generation && !active.finalized => {
                active.finalized = true;
                true
            }
            _ => false,
        }
    }

    /// Whether `generation` is the open session
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.generation == generation)
    }

    /// Generation of the open session
    #[must_use]
    pub fn current_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.generation)
    }

    /// Whether a session is open
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// Total sessions opened over the call
    #[must_use]
    pub const fn sessions_opened(&self) -> u64 {
        self.last_generation
    }

    /// Total frames written to any session
    #[must_use]
    pub const fn frames_fed(&self) -> u64 {
        self.frames_fed
    }
}

impl Drop for SttSessionManager {
    fn drop(&mut self) {
        self.close();
    }
}
