//! Switchboard - Real-time telephony voice bridge
//!
//! Connects a telephony media stream to a speech pipeline:
//! - μ-law codec, 20 ms framing and real-time frame pacing
//! - Speech recognition sessions restarted after every utterance
//! - Speech synthesis played back with completion markers
//! - A per-call turn controller with a barge-in guard
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Telephony provider (media stream)           │
//! └────────────────────┬────────────────────────────────┘
//!                      │ JSON over WebSocket
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Turn Controller                     │
//! │   CallSession  │  SessionRegistry  │  Dialogue      │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │
//! ┌──────────▼──────────┐       ┌──────────▼────────────┐
//! │  STT session manager │       │  Playback job         │
//! │  (recognition engine)│       │  (TTS → frames → pace)│
//! └─────────────────────┘       └───────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod call;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod playback;
pub mod stt;
pub mod telephony;
pub mod transport;
pub mod tts;

pub use call::{CallServices, CallSettings, CallState, SessionEvent, SessionRegistry, TurnController};
pub use config::Config;
pub use error::{Error, Result};
