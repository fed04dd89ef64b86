//! Telephony provider integration
//!
//! Places outbound calls through the Twilio REST API and builds the TwiML
//! that points a call's media stream at this server.

mod markup;

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::TelephonyConfig;
use crate::{Error, Result};

pub use markup::stream_markup;

/// Twilio REST API base
const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Upper bound on one call-control request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A call the provider accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedCall {
    /// Provider call identifier
    pub sid: String,
    /// Provider status string (`queued`, `ringing`, ...)
    pub status: String,
}

#[derive(Deserialize)]
struct TwilioErrorBody {
    message: Option<String>,
    code: Option<u32>,
}

/// Twilio voice API client
pub struct TwilioClient {
    client: Client,
    account_sid: String,
    auth_token: SecretString,
    from_number: String,
}

impl std::fmt::Debug for TwilioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioClient")
            .field("account_sid", &self.account_sid)
            .field("from_number", &self.from_number)
            .finish_non_exhaustive()
    }
}

impl TwilioClient {
    /// Create a client for one account and caller ID
    ///
    /// # Errors
    ///
    /// Returns error if the caller ID is not an E.164 number
    pub fn new(account_sid: String, auth_token: SecretString, from_number: String) -> Result<Self> {
        validate_e164(&from_number)?;
        Ok(Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(Error::Http)?,
            account_sid,
            auth_token,
            from_number,
        })
    }

    /// Build from configuration
    ///
    /// # Errors
    ///
    /// Returns error if any credential is missing
    pub fn from_config(config: &TelephonyConfig) -> Result<Self> {
        let account_sid = config
            .account_sid
            .clone()
            .ok_or_else(|| Error::Config("TWILIO_ACCOUNT_SID is not set".to_string()))?;
        let auth_token = config
            .auth_token
            .clone()
            .ok_or_else(|| Error::Config("TWILIO_AUTH_TOKEN is not set".to_string()))?;
        let from_number = config
            .from_number
            .clone()
            .ok_or_else(|| Error::Config("TWILIO_FROM_NUMBER is not set".to_string()))?;
        Self::new(account_sid, auth_token, from_number)
    }

    /// Place a call to `to`; the provider fetches setup markup from `callback_url`
    ///
    /// # Errors
    ///
    /// Returns [`Error::CallControl`] for malformed numbers, rejected
    /// credentials or any other provider failure
    pub async fn place_call(&self, to: &str, callback_url: &str) -> Result<PlacedCall> {
        validate_e164(to)?;

        let url = format!("{TWILIO_API_BASE}/Accounts/{}/Calls.json", self.account_sid);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&[
                ("To", to),
                ("From", self.from_number.as_str()),
                ("Url", callback_url),
            ])
            .send()
            .await
            .map_err(|e| Error::CallControl(format!("call request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<TwilioErrorBody>(&body)
                .ok()
                .and_then(|b| {
                    b.message
                        .map(|m| b.code.map_or_else(|| m.clone(), |c| format!("{m} (code {c})")))
                })
                .unwrap_or(body);
            tracing::warn!(status = %status, to = %to, detail = %detail, "call placement rejected");
            return Err(Error::CallControl(format!("provider returned {status}: {detail}")));
        }

        let call: PlacedCall = response
            .json()
            .await
            .map_err(|e| Error::CallControl(format!("unreadable provider response: {e}")))?;

        tracing::info!(call_sid = %call.sid, status = %call.status, to = %to, "outbound call placed");
        Ok(call)
    }
}

/// Check that `number` is `+` followed by 8 to 15 digits, first digit non-zero
///
/// # Errors
///
/// Returns [`Error::CallControl`] describing the problem
pub fn validate_e164(number: &str) -> Result<()> {
    let Some(digits) = number.strip_prefix('+') else {
        return Err(Error::CallControl(format!(
            "{number:?} is not in E.164 format (missing leading +)"
        )));
    };

    let valid = (8..=15).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0');

    if valid {
        Ok(())
    } else {
        Err(Error::CallControl(format!("{number:?} is not a valid E.164 number")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_e164() {
        assert!(validate_e164("+14155550123").is_ok());
        assert!(validate_e164("+442071838750").is_ok());

        assert!(validate_e164("14155550123").is_err());
        assert!(validate_e164("+0155550123").is_err());
        assert!(validate_e164("+1415555").is_err());
        assert!(validate_e164("+1415-555-0123").is_err());
        assert!(validate_e164("+1234567890123456").is_err());
    }

    #[test]
    fn test_bad_caller_id_rejected() {
        let result = TwilioClient::new(
            "AC123".to_string(),
            SecretString::from("token".to_string()),
            "555-0100".to_string(),
        );
        assert!(matches!(result, Err(Error::CallControl(_))));
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = TelephonyConfig {
            account_sid: Some("AC123".to_string()),
            auth_token: None,
            from_number: Some("+14155550100".to_string()),
        };
        assert!(matches!(
            TwilioClient::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_destination_fails_before_request() {
        let client = TwilioClient::new(
            "AC123".to_string(),
            SecretString::from("token".to_string()),
            "+14155550100".to_string(),
        )
        .unwrap();

        let result = client.place_call("not-a-number", "https://example.com/voice").await;
        assert!(matches!(result, Err(Error::CallControl(_))));
    }

    #[test]
    fn test_placed_call_parses_provider_response() {
        let body = r#"{"sid":"CA42","status":"queued","direction":"outbound-api","to":"+14155550123"}"#;
        let call: PlacedCall = serde_json::from_str(body).unwrap();
        assert_eq!(call.sid, "CA42");
        assert_eq!(call.status, "queued");
    }
}
