//! Batch transcription of a captured utterance

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::config::{ApiKeys, SpeechConfig, SttProvider};
use crate::{Error, Result};

/// Upper bound on one transcription upload
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// A transcription and the engine's confidence in it
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub confidence: Option<f32>,
}

/// Transcribes WAV audio through a hosted speech API
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
}

impl std::fmt::Debug for SpeechToText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechToText")
            .field("model", &self.model)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(Error::Http)?,
            api_key,
            model,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(Error::Http)?,
            api_key,
            model,
            provider: SttProvider::Deepgram,
        })
    }

    /// Build from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the selected provider has no API key
    pub fn from_config(speech: &SpeechConfig, keys: &ApiKeys) -> Result<Self> {
        match speech.stt_provider {
            SttProvider::Whisper => {
                let key = keys
                    .openai
                    .clone()
                    .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))?;
                Self::new_whisper(key, speech.stt_model.clone())
            }
            SttProvider::Deepgram => {
                let key = keys
                    .deepgram
                    .clone()
                    .ok_or_else(|| Error::Config("DEEPGRAM_API_KEY is not set".to_string()))?;
                Self::new_deepgram(key, speech.stt_model.clone())
            }
        }
    }

    /// Transcribe WAV audio
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe(
        &self,
        wav: &[u8],
        language: &str,
        punctuate: bool,
    ) -> Result<Transcription> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav, language).await,
            SttProvider::Deepgram => self.transcribe_deepgram(wav, language, punctuate).await,
        }
    }

    /// Transcribe using `OpenAI` Whisper
    async fn transcribe_whisper(&self, wav: &[u8], language: &str) -> Result<Transcription> {
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", whisper_language(language).to_string());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(Transcription {
            text: result.text,
            confidence: None,
        })
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(
        &self,
        wav: &[u8],
        language: &str,
        punctuate: bool,
    ) -> Result<Transcription> {
        tracing::debug!(audio_bytes = wav.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post("https://api.deepgram.com/v1/listen")
            .query(&[
                ("model", self.model.as_str()),
                ("language", language),
                ("punctuate", if punctuate { "true" } else { "false" }),
            ])
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(wav.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;

        let transcription = result
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| Transcription {
                text: a.transcript,
                confidence: a.confidence,
            })
            .unwrap_or_else(|| Transcription {
                text: String::new(),
                confidence: None,
            });

        tracing::debug!(transcript = %transcription.text, "transcription complete");
        Ok(transcription)
    }
}

/// Whisper takes ISO-639-1 codes, not full BCP-47 tags
fn whisper_language(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}
