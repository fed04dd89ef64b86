//! Dialogue policies
//!
//! A policy turns the caller's final transcript into the sentence spoken
//! back. The turn controller treats errors and empty replies alike and
//! falls back to a generic prompt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DialogueConfig;
use crate::{Error, Result};

/// Produces a reply for a caller utterance
#[async_trait]
pub trait DialoguePolicy: Send + Sync {
    /// Reply to `transcript` on the call `call_sid`
    ///
    /// # Errors
    ///
    /// Returns error if no reply could be produced
    async fn reply(&self, call_sid: Option<&str>, transcript: &str) -> Result<String>;
}

/// A canned reply triggered by any of its keywords
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    pub reply: String,
}

impl KeywordRule {
    fn matches(&self, transcript: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && transcript.contains(&k.to_lowercase()))
    }
}

/// Local policy: first matching keyword rule, otherwise an acknowledgement
#[derive(Debug, Clone, Default)]
pub struct KeywordPolicy {
    rules: Vec<KeywordRule>,
}

impl KeywordPolicy {
    #[must_use]
    pub const fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl DialoguePolicy for KeywordPolicy {
    async fn reply(&self, _call_sid: Option<&str>, transcript: &str) -> Result<String> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Ok(String::new());
        }

        let lowered = transcript.to_lowercase();
        if let Some(rule) = self.rules.iter().find(|r| r.matches(&lowered)) {
            return Ok(rule.reply.clone());
        }

        Ok(format!("You said: {transcript}"))
    }
}

#[derive(Serialize)]
struct PolicyRequest<'a> {
    call_sid: Option<&'a str>,
    transcript: &'a str,
}

#[derive(Deserialize)]
struct PolicyResponse {
    reply: String,
}

/// Remote policy reached over HTTP
///
/// POSTs `{ "call_sid", "transcript" }` and expects `{ "reply" }`.
#[derive(Debug, Clone)]
pub struct HttpPolicy {
    client: reqwest::Client,
    url: String,
}

impl HttpPolicy {
    /// Create a policy client whose requests give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DialoguePolicy for HttpPolicy {
    async fn reply(&self, call_sid: Option<&str>, transcript: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&PolicyRequest {
                call_sid,
                transcript,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Policy(format!("policy endpoint returned {status}: {body}")));
        }

        let parsed: PolicyResponse = response.json().await?;
        Ok(parsed.reply)
    }
}

/// Select the policy described by configuration
///
/// # Errors
///
/// Returns error if the remote policy client cannot be built
pub fn from_config(config: &DialogueConfig) -> Result<Arc<dyn DialoguePolicy>> {
    match &config.policy_url {
        Some(url) => {
            tracing::info!(url = %url, timeout = ?config.reply_timeout, "using remote dialogue policy");
            Ok(Arc::new(HttpPolicy::new(url.clone(), config.reply_timeout)?))
        }
        None => {
            tracing::info!(rules = config.rules.len(), "using keyword dialogue policy");
            Ok(Arc::new(KeywordPolicy::new(config.rules.clone())))
        }
    }
}
