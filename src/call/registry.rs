//! Live call lookup by stream identifier

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};

use super::SessionEvent;
use crate::{Error, Result};

struct SessionEntry {
    call_sid: Option<String>,
    started_at: DateTime<Utc>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Public view of a live call
#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub stream_sid: String,
    pub call_sid: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Registry of live calls
///
/// Holds only each call's event queue; call state stays with its
/// turn controller.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a call; replaces any stale entry under the same stream
    pub async fn register(
        &self,
        stream_sid: &str,
        call_sid: Option<String>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        let entry = SessionEntry {
            call_sid,
            started_at: Utc::now(),
            events,
        };

        let mut sessions = self.sessions.write().await;
        if sessions.insert(stream_sid.to_string(), entry).is_some() {
            tracing::warn!(stream_sid = %stream_sid, "replaced existing session entry");
        }
        tracing::debug!(stream_sid = %stream_sid, active = sessions.len(), "session registered");
    }

    /// Remove a call registered with `events`; returns whether it was removed
    ///
    /// An entry that has since been replaced by another call under the same
    /// stream is left in place.
    pub async fn deregister(
        &self,
        stream_sid: &str,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> bool {
        let mut sessions = self.sessions.write().await;
        let owned = sessions
            .get(stream_sid)
            .is_some_and(|entry| entry.events.same_channel(events));
        if !owned {
            tracing::trace!(stream_sid = %stream_sid, "no session entry owned by this call");
            return false;
        }

        sessions.remove(stream_sid);
        tracing::debug!(stream_sid = %stream_sid, active = sessions.len(), "session deregistered");
        true
    }

    /// Number of live calls
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Summaries of live calls, oldest first
    pub async fn list(&self) -> Vec<CallSummary> {
        let sessions = self.sessions.read().await;
        let mut calls: Vec<CallSummary> = sessions
            .iter()
            .map(|(stream_sid, entry)| CallSummary {
                stream_sid: stream_sid.clone(),
                call_sid: entry.call_sid.clone(),
                started_at: entry.started_at,
            })
            .collect();
        calls.sort_by_key(|c| c.started_at);
        calls
    }

    /// Ask a live call to play a diagnostic tone
    ///
    /// # Errors
    ///
    /// Returns [`Error::CallNotFound`] if no live call has this stream
    pub async fn play_tone(&self, stream_sid: &str, frequency_hz: f32, duration_secs: f32) -> Result<()> {
        self.post(
            stream_sid,
            SessionEvent::DiagnosticTone {
                frequency_hz,
                duration_secs,
            },
        )
        .await
    }

    /// Post an event to one call
    ///
    /// # Errors
    ///
    /// Returns [`Error::CallNotFound`] if the call is gone
    pub async fn post(&self, stream_sid: &str, event: SessionEvent) -> Result<()> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(stream_sid)
            .ok_or_else(|| Error::CallNotFound(stream_sid.to_string()))?;
        entry
            .events
            .send(event)
            .map_err(|_| Error::CallNotFound(stream_sid.to_string()))
    }

    /// Ask every live call to disconnect; returns how many were notified
    pub async fn close_all(&self, reason: &str) -> usize {
        let sessions = self.sessions.read().await;
        let notified = sessions
            .values()
            .filter(|entry| {
                entry
                    .events
                    .send(SessionEvent::Disconnected(reason.to_string()))
                    .is_ok()
            })
            .count();
        tracing::info!(notified, reason = %reason, "closing live calls");
        notified
    }
}
