//! One outbound utterance, from text to paced frames

use std::time::Duration;

use crate::audio::{AudioFrame, frames_from_mulaw};
use crate::tts::SpeechSynthesizer;
use crate::{Error, Result};

use super::scheduler::{FrameScheduler, FrameSink, ScheduleOutcome};

/// What a playback job is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackKind {
    /// Spoken when the call connects
    Greeting,
    /// Answer to a caller utterance
    Reply,
    /// Test tone, outside the turn cycle
    Diagnostic,
}

impl PlaybackKind {
    /// Prefix for completion marker labels
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Reply => "reply",
            Self::Diagnostic => "diagnostic",
        }
    }
}

/// Audio to be played
#[derive(Debug, Clone)]
pub enum PlaybackSource {
    /// Synthesize this text first
    Text(String),
    /// Already framed audio
    Frames(Vec<AudioFrame>),
}

/// How a playback job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every frame went out, followed by the marker if the job had one
    Completed {
        frames: usize,
        marker: Option<String>,
    },
    /// The transport went away mid-playback
    Cancelled { sent: usize },
    /// The synthesizer failed or produced no audio
    SynthesisFailed(String),
}

/// An outbound playback owned by a call's turn controller
#[derive(Debug, Clone)]
pub struct PlaybackJob {
    id: u64,
    kind: PlaybackKind,
    source: PlaybackSource,
    marker: Option<String>,
    synthesis_timeout: Option<Duration>,
}

impl PlaybackJob {
    /// Speech that ends with the completion marker `marker`
    #[must_use]
    pub fn speech(id: u64, kind: PlaybackKind, text: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            source: PlaybackSource::Text(text.into()),
            marker: Some(marker.into()),
            synthesis_timeout: None,
        }
    }

    /// Diagnostic frames, sent without a marker
    #[must_use]
    pub const fn diagnostic(id: u64, frames: Vec<AudioFrame>) -> Self {
        Self {
            id,
            kind: PlaybackKind::Diagnostic,
            source: PlaybackSource::Frames(frames),
            marker: None,
            synthesis_timeout: None,
        }
    }

    /// Give up on synthesis that has not finished within `limit`
    #[must_use]
    pub const fn with_synthesis_timeout(mut self, limit: Duration) -> Self {
        self.synthesis_timeout = Some(limit);
        self
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> PlaybackKind {
        self.kind
    }

    #[must_use]
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// Synthesize if needed, then pace the frames out through `sink`
    pub async fn run<S>(
        self,
        synthesizer: &dyn SpeechSynthesizer,
        scheduler: &FrameScheduler,
        sink: &mut S,
    ) -> PlaybackOutcome
    where
        S: FrameSink + ?Sized,
    {
        let limit = self.synthesis_timeout;
        let frames = match self.source {
            PlaybackSource::Frames(frames) => frames,
            PlaybackSource::Text(text) => match synthesize(synthesizer, &text, limit).await {
                Ok(audio) if audio.is_empty() => {
                    return PlaybackOutcome::SynthesisFailed("synthesizer returned no audio".to_string());
                }
                Ok(audio) => frames_from_mulaw(&audio),
                Err(e) => {
                    tracing::warn!(job = self.id, kind = ?self.kind, error = %e, "synthesis failed");
                    return PlaybackOutcome::SynthesisFailed(e.to_string());
                }
            },
        };

        tracing::debug!(job = self.id, kind = ?self.kind, frames = frames.len(), "playback starting");

        match scheduler.run(&frames, sink).await {
            ScheduleOutcome::Cancelled { sent } => PlaybackOutcome::Cancelled { sent },
            ScheduleOutcome::Completed { frames } => {
                if let Some(label) = &self.marker {
                    if let Err(e) = sink.send_mark(label).await {
                        tracing::debug!(job = self.id, error = %e, "marker not sent, transport closed");
                        return PlaybackOutcome::Cancelled { sent: frames };
                    }
                }
                PlaybackOutcome::Completed {
                    frames,
                    marker: self.marker,
                }
            }
        }
    }
}

async fn synthesize(
    synthesizer: &dyn SpeechSynthesizer,
    text: &str,
    limit: Option<Duration>,
) -> Result<Vec<u8>> {
    let Some(limit) = limit else {
        return synthesizer.synthesize(text).await;
    };
    tokio::time::timeout(limit, synthesizer.synthesize(text))
        .await
        .map_err(|_| Error::Tts(format!("synthesis timed out after {limit:?}")))?
}
