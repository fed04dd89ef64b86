//! Per-call mutable state

use std::collections::HashSet;
use std::fmt;

use crate::playback::PlaybackKind;

/// Lifecycle of a call as seen by the turn controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Connected, stream not started
    Idle,
    /// Greeting is playing; recognition is already open
    Greeting,
    /// Caller audio flows to recognition
    Listening,
    /// Final transcript in hand, waiting for the reply text
    Finalizing,
    /// Reply is playing
    Speaking,
    /// Torn down; no further events are processed
    Closed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Greeting => "greeting",
            Self::Listening => "listening",
            Self::Finalizing => "finalizing",
            Self::Speaking => "speaking",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State of one call, owned by its turn controller
#[derive(Debug)]
pub struct CallSession {
    stream_sid: Option<String>,
    call_sid: Option<String>,
    state: CallState,
    history: Vec<CallState>,

    /// True iff a playback job is emitting frames
    speaking: bool,

    inbound_frames: u64,
    dropped_frames: u64,
    marker_seq: u64,
    pending_marks: HashSet<String>,
    acknowledged_marks: u64,
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stream_sid: None,
            call_sid: None,
            state: CallState::Idle,
            history: vec![CallState::Idle],
            speaking: false,
            inbound_frames: 0,
            dropped_frames: 0,
            marker_seq: 0,
            pending_marks: HashSet::new(),
            acknowledged_marks: 0,
        }
    }

    /// Bind the transport-assigned identifiers
    pub fn bind(&mut self, stream_sid: String, call_sid: Option<String>) {
        self.stream_sid = Some(stream_sid);
        self.call_sid = call_sid;
    }

    #[must_use]
    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    #[must_use]
    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    #[must_use]
    pub const fn state(&self) -> CallState {
        self.state
    }

    /// Every state entered, in order, starting with `Idle`
    #[must_use]
    pub fn history(&self) -> &[CallState] {
        &self.history
    }

    /// Move to `next`; returns the previous state
    pub fn transition(&mut self, next: CallState) -> CallState {
        let previous = self.state;
        if previous != next {
            self.state = next;
            self.history.push(next);
            tracing::debug!(
                stream_sid = self.stream_sid.as_deref().unwrap_or("-"),
                from = %previous,
                to = %next,
                "call state changed"
            );
        }
        previous
    }

    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub const fn set_speaking(&mut self, speaking: bool) {
        self.speaking = speaking;
    }

    /// Count an inbound frame
    pub const fn record_inbound(&mut self) {
        self.inbound_frames += 1;
    }

    /// Count an inbound frame that was not forwarded
    pub const fn record_dropped(&mut self) {
        self.dropped_frames += 1;
    }

    #[must_use]
    pub const fn inbound_frames(&self) -> u64 {
        self.inbound_frames
    }

    #[must_use]
    pub const fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Allocate a marker label unique for the life of the call
    pub fn next_marker(&mut self, kind: PlaybackKind) -> String {
        self.marker_seq += 1;
        let label = format!("{}-{}", kind.label(), self.marker_seq);
        self.pending_marks.insert(label.clone());
        label
    }

    /// Forget a marker that will never be sent
    pub fn discard_marker(&mut self, label: &str) {
        self.pending_marks.remove(label);
    }

    /// Match an acknowledgement against outstanding markers
    pub fn acknowledge(&mut self, label: &str) -> bool {
        if self.pending_marks.remove(label) {
            self.acknowledged_marks += 1;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn pending_marks(&self) -> usize {
        self.pending_marks.len()
    }

    #[must_use]
    pub const fn acknowledged_marks(&self) -> u64 {
        self.acknowledged_marks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_records_changes_only() {
        let mut session = CallSession::new();
        session.transition(CallState::Greeting);
        session.transition(CallState::Greeting);
        session.transition(CallState::Listening);

        assert_eq!(
            session.history(),
            &[CallState::Idle, CallState::Greeting, CallState::Listening]
        );
    }

    #[test]
    fn test_markers_are_unique_and_acknowledged_once() {
        let mut session = CallSession::new();
        let greeting = session.next_marker(PlaybackKind::Greeting);
        let reply = session.next_marker(PlaybackKind::Reply);

        assert_eq!(greeting, "greeting-1");
        assert_eq!(reply, "reply-2");
        assert_eq!(session.pending_marks(), 2);

        assert!(session.acknowledge(&reply));
        assert!(!session.acknowledge(&reply));
        assert!(!session.acknowledge("reply-99"));
        assert_eq!(session.acknowledged_marks(), 1);

        session.discard_marker(&greeting);
        assert_eq!(session.pending_marks(), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CallState::Finalizing.to_string(), "finalizing");
        assert_eq!(CallState::Closed.to_string(), "closed");
    }
}
