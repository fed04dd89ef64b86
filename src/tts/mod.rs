//! Text-to-speech
//!
//! Synthesizers return complete utterances as 8 kHz μ-law, ready to be
//! framed for the media stream.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::audio::{SAMPLE_RATE, codec, f32_to_i16, i16_to_f32, resample};
use crate::config::{ApiKeys, SpeechConfig, TtsProvider};
use crate::{Error, Result};

/// Sample rate of `OpenAI` raw PCM output
const OPENAI_PCM_RATE: u32 = 24_000;

/// Upper bound on one synthesis request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Produces transport-ready speech audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` into 8 kHz μ-law bytes
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Synthesizes speech through a hosted API
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl std::fmt::Debug for TextToSpeech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextToSpeech")
            .field("voice", &self.voice)
            .field("model", &self.model)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: SecretString, voice: String, speed: f32, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(Error::Http)?,
            api_key,
            voice,
            speed,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: SecretString, voice_id: String, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(Error::Http)?,
            api_key,
            voice: voice_id,
            speed: 1.0,
            model,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Build from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the selected provider has no API key
    pub fn from_config(speech: &SpeechConfig, keys: &ApiKeys) -> Result<Self> {
        match speech.tts_provider {
            TtsProvider::OpenAI => {
                let key = keys
                    .openai
                    .clone()
                    .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))?;
                Self::new_openai(
                    key,
                    speech.tts_voice.clone(),
                    speech.tts_speed,
                    speech.tts_model.clone(),
                )
            }
            TtsProvider::ElevenLabs => {
                let key = keys
                    .elevenlabs
                    .clone()
                    .ok_or_else(|| Error::Config("ELEVENLABS_API_KEY is not set".to_string()))?;
                Self::new_elevenlabs(key, speech.tts_voice.clone(), speech.tts_model.clone())
            }
        }
    }

    /// Synthesize using `OpenAI` TTS, converting 24 kHz PCM to μ-law
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "pcm",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let pcm = response.bytes().await?;
        tracing::debug!(pcm_bytes = pcm.len(), "OpenAI synthesis received");

        // Resampling is CPU bound; keep it off the reactor
        tokio::task::spawn_blocking(move || pcm_to_mulaw(&pcm, OPENAI_PCM_RATE))
            .await
            .map_err(|e| Error::Tts(format!("conversion task failed: {e}")))?
    }

    /// Synthesize using ElevenLabs TTS, which can emit μ-law directly
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .query(&[("output_format", "ulaw_8000")])
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let audio = match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text).await?,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await?,
        };

        if audio.is_empty() {
            return Err(Error::Tts("engine returned no audio".to_string()));
        }

        tracing::debug!(provider = ?self.provider, bytes = audio.len(), "synthesis complete");
        Ok(audio)
    }
}

/// Convert little-endian 16-bit PCM at `rate` into 8 kHz μ-law
///
/// # Errors
///
/// Returns error if resampling fails
pub fn pcm_to_mulaw(pcm: &[u8], rate: u32) -> Result<Vec<u8>> {
    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    let narrowband = if rate == SAMPLE_RATE {
        samples
    } else {
        f32_to_i16(&resample(&i16_to_f32(&samples), rate, SAMPLE_RATE)?)
    };

    Ok(codec::encode_samples(&narrowband))
}
