//! Configuration management for Switchboard
//!
//! Values resolve env > TOML file > defaults.

pub mod file;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::dialogue::KeywordRule;
use crate::{Error, Result};

pub use file::SwitchboardConfigFile;

/// Default HTTP listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Default greeting spoken when a call connects
pub const DEFAULT_GREETING: &str = "Hello! How can I help you today?";

/// Default sentence spoken when no reply could be produced
pub const DEFAULT_FALLBACK_PROMPT: &str = "Sorry, I didn't catch that. Could you say it again?";

/// Default limit on a dialogue policy call
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 8000;

/// Default limit on synthesizing one reply
pub const DEFAULT_SYNTHESIS_TIMEOUT_MS: u64 = 10_000;

/// Switchboard configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Speech engine configuration
    pub speech: SpeechConfig,

    /// Telephony provider configuration
    pub telephony: TelephonyConfig,

    /// Conversation behavior
    pub dialogue: DialogueConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Externally reachable base URL, used to build webhook and stream URLs
    pub public_url: Option<Url>,
}

impl ServerConfig {
    /// WebSocket URL the provider connects its media stream to
    ///
    /// # Errors
    ///
    /// Returns error if no public URL is configured
    pub fn media_stream_url(&self) -> Result<String> {
        let base = self
            .public_url
            .as_ref()
            .ok_or_else(|| Error::Config("public_url is not configured".to_string()))?;
        media_stream_url_for(base)
    }

    /// URL the provider fetches setup markup from
    ///
    /// # Errors
    ///
    /// Returns error if no public URL is configured
    pub fn voice_webhook_url(&self) -> Result<String> {
        let base = self
            .public_url
            .as_ref()
            .ok_or_else(|| Error::Config("public_url is not configured".to_string()))?;
        base.join("voice")
            .map(String::from)
            .map_err(|e| Error::Config(format!("invalid public_url: {e}")))
    }
}

/// Derive the `wss://…/media` URL from an `https://` base
///
/// # Errors
///
/// Returns error if the base URL has an unsupported scheme
pub fn media_stream_url_for(base: &Url) -> Result<String> {
    let mut url = base
        .join("media")
        .map_err(|e| Error::Config(format!("invalid public_url: {e}")))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(Error::Config(format!("unsupported public_url scheme: {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::Config(format!("cannot use scheme {scheme}")))?;

    Ok(url.into())
}

/// STT backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl SttProvider {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// TTS backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

impl TtsProvider {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Speech engine configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2-phonecall")
    pub stt_model: String,

    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1", "`eleven_turbo_v2`")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// BCP-47 language tag passed to recognition
    pub language: String,

    /// Delay before reopening a recognition session after an error
    pub restart_backoff: Duration,

    /// Longest a reply may take to synthesize before it is abandoned
    pub synthesis_timeout: Duration,
}

/// Telephony provider configuration
#[derive(Debug, Clone, Default)]
pub struct TelephonyConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<SecretString>,

    /// Caller ID for outbound calls, E.164
    pub from_number: Option<String>,
}

/// Conversation configuration
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    pub greeting: String,
    pub fallback_prompt: String,

    /// Remote policy endpoint; keyword rules are used when absent
    pub policy_url: Option<String>,

    /// Longest the policy may take before the fallback prompt is spoken
    pub reply_timeout: Duration,

    pub rules: Vec<KeywordRule>,
}

/// API keys for speech providers
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<SecretString>,

    /// Deepgram API key (optional STT)
    pub deepgram: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and the default config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        let fc = std::env::var("SWITCHBOARD_CONFIG").map_or_else(
            |_| Ok(file::load_config_file()),
            |path| file::read_config_file(Path::new(&path)),
        )?;
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Load configuration using an explicit config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or a value is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        let fc = file::read_config_file(path)?;
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with variables from `env`
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn resolve(
        fc: SwitchboardConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // Server (env > toml > default)
        let port = match env("SWITCHBOARD_PORT").or_else(|| env("PORT")) {
            Some(value) => value
                .parse()
                .map_err(|_| Error::Config(format!("invalid port: {value}")))?,
            None => fc.server.port.unwrap_or(DEFAULT_PORT),
        };
        let public_url = env("SWITCHBOARD_PUBLIC_URL")
            .or(fc.server.public_url)
            .map(|raw| {
                Url::parse(&raw).map_err(|e| Error::Config(format!("invalid public_url {raw}: {e}")))
            })
            .transpose()?;

        // Speech (env > toml > default)
        let stt_provider = env("SWITCHBOARD_STT_PROVIDER")
            .or(fc.speech.stt_provider)
            .map_or(Ok(SttProvider::Whisper), |p| SttProvider::parse(&p))?;
        let tts_provider = env("SWITCHBOARD_TTS_PROVIDER")
            .or(fc.speech.tts_provider)
            .map_or(Ok(TtsProvider::OpenAI), |p| TtsProvider::parse(&p))?;
        let default_stt_model = match stt_provider {
            SttProvider::Whisper => "whisper-1",
            SttProvider::Deepgram => "nova-2-phonecall",
        };
        let default_tts_model = match tts_provider {
            TtsProvider::OpenAI => "tts-1",
            TtsProvider::ElevenLabs => "eleven_turbo_v2",
        };
        let default_voice = match tts_provider {
            TtsProvider::OpenAI => "alloy",
            TtsProvider::ElevenLabs => "21m00Tcm4TlvDq8ikWAM",
        };
        let speech = SpeechConfig {
            stt_provider,
            stt_model: env("SWITCHBOARD_STT_MODEL")
                .or(fc.speech.stt_model)
                .unwrap_or_else(|| default_stt_model.to_string()),
            tts_provider,
            tts_model: env("SWITCHBOARD_TTS_MODEL")
                .or(fc.speech.tts_model)
                .unwrap_or_else(|| default_tts_model.to_string()),
            tts_voice: env("SWITCHBOARD_TTS_VOICE")
                .or(fc.speech.tts_voice)
                .unwrap_or_else(|| default_voice.to_string()),
            tts_speed: fc.speech.tts_speed.unwrap_or(1.0).clamp(0.25, 4.0),
            language: env("SWITCHBOARD_LANGUAGE")
                .or(fc.speech.language)
                .unwrap_or_else(|| "en-US".to_string()),
            restart_backoff: Duration::from_millis(fc.speech.restart_backoff_ms.unwrap_or(50)),
            synthesis_timeout: Duration::from_millis(
                fc.speech.synthesis_timeout_ms.unwrap_or(DEFAULT_SYNTHESIS_TIMEOUT_MS),
            ),
        };

        // Telephony (env > toml)
        let telephony = TelephonyConfig {
            account_sid: env("TWILIO_ACCOUNT_SID").or(fc.telephony.account_sid),
            auth_token: env("TWILIO_AUTH_TOKEN")
                .or(fc.telephony.auth_token)
                .map(SecretString::from),
            from_number: env("TWILIO_FROM_NUMBER").or(fc.telephony.from_number),
        };

        // Dialogue (env > toml > default)
        let dialogue = DialogueConfig {
            greeting: env("SWITCHBOARD_GREETING")
                .or(fc.dialogue.greeting)
                .unwrap_or_else(|| DEFAULT_GREETING.to_string()),
            fallback_prompt: fc
                .dialogue
                .fallback_prompt
                .unwrap_or_else(|| DEFAULT_FALLBACK_PROMPT.to_string()),
            policy_url: env("SWITCHBOARD_POLICY_URL").or(fc.dialogue.policy_url),
            reply_timeout: Duration::from_millis(
                fc.dialogue.reply_timeout_ms.unwrap_or(DEFAULT_REPLY_TIMEOUT_MS),
            ),
            rules: fc.dialogue.rules,
        };

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            deepgram: env("DEEPGRAM_API_KEY")
                .or(fc.api_keys.deepgram)
                .map(SecretString::from),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or(fc.api_keys.elevenlabs)
                .map(SecretString::from),
        };

        Ok(Self {
            server: ServerConfig { port, public_url },
            speech,
            telephony,
            dialogue,
            api_keys,
        })
    }
}
