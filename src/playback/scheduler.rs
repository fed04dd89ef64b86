//! Real-time frame pacing
//!
//! Frames are emitted one per interval, the first immediately. The timer is
//! re-armed only after a frame has been handed to the sink, so a slow
//! consumer delays the stream instead of receiving a burst.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::{AudioFrame, FRAME_DURATION};
use crate::transport::OutboundMessage;
use crate::{Error, Result};

/// Destination for outbound frames and completion markers
#[async_trait]
pub trait FrameSink: Send {
    /// Emit one frame
    ///
    /// # Errors
    ///
    /// Returns error if the transport is no longer writable
    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<()>;

    /// Emit a completion marker
    ///
    /// # Errors
    ///
    /// Returns error if the transport is no longer writable
    async fn send_mark(&mut self, label: &str) -> Result<()>;
}

/// Sink writing into a call's outbound transport queue
#[derive(Debug, Clone)]
pub struct TransportSink {
    stream_sid: String,
    tx: mpsc::Sender<OutboundMessage>,
}

impl TransportSink {
    /// Bind a sink to a stream's outbound queue
    #[must_use]
    pub fn new(stream_sid: impl Into<String>, tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            stream_sid: stream_sid.into(),
            tx,
        }
    }
}

#[async_trait]
impl FrameSink for TransportSink {
    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        self.tx
            .send(OutboundMessage::media(&self.stream_sid, frame))
            .await
            .map_err(|_| Error::Transport("outbound channel closed".to_string()))
    }

    async fn send_mark(&mut self, label: &str) -> Result<()> {
        self.tx
            .send(OutboundMessage::mark(&self.stream_sid, label))
            .await
            .map_err(|_| Error::Transport("outbound channel closed".to_string()))
    }
}

/// How a scheduling run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Every frame was emitted
    Completed { frames: usize },
    /// The sink stopped accepting frames
    Cancelled { sent: usize },
}

/// Paces frames to wall-clock time
#[derive(Debug, Clone, Copy)]
pub struct FrameScheduler {
    interval: Duration,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(FRAME_DURATION)
    }
}

impl FrameScheduler {
    /// Create a scheduler with a fixed per-frame interval
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Per-frame interval
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Emit `frames` through `sink` at the configured cadence
    pub async fn run<S>(&self, frames: &[AudioFrame], sink: &mut S) -> ScheduleOutcome
    where
        S: FrameSink + ?Sized,
    {
        for (index, frame) in frames.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.interval).await;
            }

            if let Err(e) = sink.send_frame(frame).await {
                tracing::debug!(sent = index, remaining = frames.len() - index, error = %e, "frame sink closed, stopping playback");
                return ScheduleOutcome::Cancelled { sent: index };
            }

            tracing::trace!(index, "frame emitted");
        }

        ScheduleOutcome::Completed {
            frames: frames.len(),
        }
    }
}
