//! Media stream wire protocol
//!
//! JSON text frames exchanged with the telephony provider over the media
//! WebSocket. Inbound events are keyed by `event`; audio travels as base64
//! μ-law in `media.payload`.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::audio::AudioFrame;
use crate::{Error, Result};

/// Event received from the transport
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Protocol handshake, informational only
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    /// Stream metadata; opens the call session
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMetadata,
    },
    /// One chunk of caller audio
    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: InboundMedia,
    },
    /// Acknowledgement of a marker we sent
    Mark {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        mark: MarkLabel,
    },
    /// The stream has ended
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        #[serde(default)]
        stop: Option<StopMetadata>,
    },
}

/// Metadata carried by the `start` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

/// Audio format announced by the transport
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Audio chunk carried by an inbound `media` event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMedia {
    /// Base64-encoded μ-law bytes
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl InboundMedia {
    /// Decode the payload into an inbound frame
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not valid base64
    pub fn to_frame(&self) -> Result<AudioFrame> {
        let bytes = BASE64
            .decode(self.payload.as_bytes())
            .map_err(|e| Error::Transport(format!("invalid media payload: {e}")))?;
        Ok(AudioFrame::inbound(bytes))
    }
}

/// Marker label, used in both directions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkLabel {
    pub name: String,
}

/// Metadata carried by the `stop` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMetadata {
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
}

impl InboundEvent {
    /// Parse a text frame from the transport
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not a recognized event
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Transport(format!("malformed event: {e}")))
    }

    /// Short event name for logging
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Start { .. } => "start",
            Self::Media { .. } => "media",
            Self::Mark { .. } => "mark",
            Self::Stop { .. } => "stop",
        }
    }
}

/// Message sent to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Flush any audio buffered on the far end
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    /// One outbound audio frame
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Completion marker echoed back once playback reaches it
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkLabel,
    },
}

/// Audio chunk carried by an outbound `media` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundMessage {
    /// Build a `clear` message
    #[must_use]
    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    /// Build a `media` message from a frame
    #[must_use]
    pub fn media(stream_sid: &str, frame: &AudioFrame) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: BASE64.encode(frame.payload()),
            },
        }
    }

    /// Build a `mark` message
    #[must_use]
    pub fn mark(stream_sid: &str, label: &str) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkLabel {
                name: label.to_string(),
            },
        }
    }

    /// Serialize to the JSON text frame sent on the socket
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
