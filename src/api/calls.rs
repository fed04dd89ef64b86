//! Call setup and call control endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::call::CallSummary;
use crate::config::media_stream_url_for;
use crate::telephony::{PlacedCall, stream_markup, validate_e164};

/// Highest tone frequency representable at 8 kHz
const MAX_TONE_HZ: f32 = 3900.0;

/// Longest diagnostic tone accepted
const MAX_TONE_SECS: f32 = 10.0;

/// Build calls router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/voice", get(voice_webhook).post(voice_webhook))
        .route("/calls", get(list_calls).post(place_call))
        .route("/calls/{stream_sid}/tone", post(play_tone))
        .with_state(state)
}

/// Return markup connecting the call to `/media`
///
/// Uses the configured public URL, or the request's `Host` when none is set.
async fn voice_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Response, CallsError> {
    let ws_url = match &state.public_url {
        Some(base) => {
            media_stream_url_for(base).map_err(|e| CallsError::NotConfigured(e.to_string()))?
        }
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .ok_or_else(|| CallsError::BadRequest("missing Host header".to_string()))?;
            format!("wss://{host}/media")
        }
    };

    tracing::debug!(ws_url = %ws_url, "serving stream markup");

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        stream_markup(&ws_url),
    )
        .into_response())
}

/// List live calls
async fn list_calls(State(state): State<Arc<ApiState>>) -> Json<Vec<CallSummary>> {
    Json(state.registry.list().await)
}

/// Outbound call request
#[derive(Debug, Deserialize)]
pub struct PlaceCallRequest {
    /// Destination in E.164 format
    pub to: String,
}

/// Place an outbound call that streams back to this server
async fn place_call(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<PlaceCallRequest>,
) -> Result<(StatusCode, Json<PlacedCall>), CallsError> {
    let client = state
        .telephony
        .as_ref()
        .ok_or_else(|| CallsError::NotConfigured("telephony credentials are not configured".to_string()))?;

    let callback_url = state
        .public_url
        .as_ref()
        .ok_or_else(|| CallsError::NotConfigured("public_url is required to place calls".to_string()))?
        .join("voice")
        .map_err(|e| CallsError::NotConfigured(format!("invalid public_url: {e}")))?;

    validate_e164(&request.to).map_err(|e| CallsError::BadRequest(e.to_string()))?;

    let call = client
        .place_call(&request.to, callback_url.as_str())
        .await
        .map_err(|e| CallsError::CallControl(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(call)))
}

/// Diagnostic tone request
#[derive(Debug, Deserialize)]
pub struct ToneRequest {
    #[serde(default = "default_frequency")]
    pub frequency_hz: f32,
    #[serde(default = "default_duration")]
    pub duration_secs: f32,
}

const fn default_frequency() -> f32 {
    440.0
}

const fn default_duration() -> f32 {
    1.0
}

/// Tone request accepted
#[derive(Debug, Serialize)]
pub struct ToneAccepted {
    pub stream_sid: String,
    pub frequency_hz: f32,
    pub duration_secs: f32,
}

/// Ask a live call to play a tone
///
/// The call plays it only if the line is idle.
async fn play_tone(
    State(state): State<Arc<ApiState>>,
    Path(stream_sid): Path<String>,
    Json(request): Json<ToneRequest>,
) -> Result<(StatusCode, Json<ToneAccepted>), CallsError> {
    if !(request.frequency_hz > 0.0 && request.frequency_hz <= MAX_TONE_HZ) {
        return Err(CallsError::BadRequest(format!(
            "frequency_hz must be in (0, {MAX_TONE_HZ}]"
        )));
    }
    if !(request.duration_secs > 0.0 && request.duration_secs <= MAX_TONE_SECS) {
        return Err(CallsError::BadRequest(format!(
            "duration_secs must be in (0, {MAX_TONE_SECS}]"
        )));
    }

    state
        .registry
        .play_tone(&stream_sid, request.frequency_hz, request.duration_secs)
        .await
        .map_err(|_| CallsError::NotFound(format!("no live call for stream {stream_sid}")))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ToneAccepted {
            stream_sid,
            frequency_hz: request.frequency_hz,
            duration_secs: request.duration_secs,
        }),
    ))
}

/// Call API errors
#[derive(Debug)]
pub enum CallsError {
    NotConfigured(String),
    BadRequest(String),
    NotFound(String),
    CallControl(String),
}

impl IntoResponse for CallsError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NotConfigured(msg) => (StatusCode::SERVICE_UNAVAILABLE, "not_configured", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::CallControl(msg) => (StatusCode::BAD_GATEWAY, "call_control_failed", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
