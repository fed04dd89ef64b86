//! TOML configuration file loading
//!
//! Supports `~/.config/switchboard/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dialogue::KeywordRule;
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SwitchboardConfigFile {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Speech engine configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Telephony provider credentials
    #[serde(default)]
    pub telephony: TelephonyFileConfig,

    /// Conversation behavior
    #[serde(default)]
    pub dialogue: DialogueFileConfig,

    /// API keys for speech providers
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// HTTP listen port
    pub port: Option<u16>,

    /// Externally reachable base URL (e.g. `https://calls.example.com`)
    pub public_url: Option<String>,
}

/// Speech engine configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1", "nova-2-phonecall")
    pub stt_model: Option<String>,

    /// "openai" or "elevenlabs"
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// BCP-47 language tag
    pub language: Option<String>,

    /// Delay before reopening a failed recognition session
    pub restart_backoff_ms: Option<u64>,

    /// Limit on synthesizing one reply
    pub synthesis_timeout_ms: Option<u64>,
}

/// Telephony provider configuration
#[derive(Debug, Default, Deserialize)]
pub struct TelephonyFileConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
}

/// Conversation configuration
#[derive(Debug, Default, Deserialize)]
pub struct DialogueFileConfig {
    /// Sentence spoken when a call connects
    pub greeting: Option<String>,

    /// Sentence spoken when no reply could be produced
    pub fallback_prompt: Option<String>,

    /// Remote dialogue policy endpoint
    pub policy_url: Option<String>,

    /// Limit on one policy call
    pub reply_timeout_ms: Option<u64>,

    /// Keyword-triggered replies
    #[serde(default)]
    pub rules: Vec<KeywordRule>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `SwitchboardConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SwitchboardConfigFile {
    let Some(path) = config_file_path() else {
        return SwitchboardConfigFile::default();
    };

    if !path.exists() {
        return SwitchboardConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            SwitchboardConfigFile::default()
        }
    }
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<SwitchboardConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/switchboard/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("switchboard").join("config.toml"))
}
