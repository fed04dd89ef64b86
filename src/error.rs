//! Error types for Switchboard

use thiserror::Error;

/// Result type alias for Switchboard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Switchboard
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio conversion error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Dialogue policy error
    #[error("policy error: {0}")]
    Policy(String),

    /// Media stream transport error (malformed or unexpected payloads)
    #[error("transport error: {0}")]
    Transport(String),

    /// Outbound call placement failed (bad number, auth failure, provider error)
    #[error("call control error: {0}")]
    CallControl(String),

    /// Call session not found
    #[error("call not found: {0}")]
    CallNotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
