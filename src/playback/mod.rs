//! Outbound audio playback
//!
//! A [`PlaybackJob`] turns text into frames and hands them to the
//! [`FrameScheduler`], which paces them to wall-clock time.

mod job;
mod scheduler;

pub use job::{PlaybackJob, PlaybackKind, PlaybackOutcome, PlaybackSource};
pub use scheduler::{FrameScheduler, FrameSink, ScheduleOutcome, TransportSink};
