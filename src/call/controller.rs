//! Turn-taking state machine for one call
//!
//! ```text
//! Idle -> Greeting -> Listening -> Finalizing -> Speaking -> Listening ...
//!                         any state -> Closed
//! ```
//!
//! Caller audio reaches recognition only while `Listening` and nothing is
//! playing. Frames that arrive while the line is busy are dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{CallServices, CallSession, CallState, SessionEvent, SessionRegistry};
use crate::audio::tone_frames;
use crate::playback::{FrameScheduler, PlaybackJob, PlaybackKind, PlaybackOutcome, TransportSink};
use crate::stt::{SttSessionManager, TranscriptEvent};
use crate::transport::{InboundEvent, InboundMedia, OutboundMessage, StartMetadata};

struct ActivePlayback {
    job_id: u64,
    kind: PlaybackKind,
    marker: Option<String>,
    task: JoinHandle<()>,
}

struct PendingRestart {
    token: u64,
    task: JoinHandle<()>,
}

/// Single owner of a call's state
///
/// Long-running work (playback, recognition, the dialogue policy, restart
/// timers) runs in spawned tasks that report back as [`SessionEvent`]s, so
/// state is only ever touched from [`TurnController::handle`].
pub struct TurnController {
    session: CallSession,
    services: CallServices,
    stt: SttSessionManager,
    scheduler: FrameScheduler,
    events: mpsc::UnboundedSender<SessionEvent>,
    outbound: mpsc::Sender<OutboundMessage>,
    registry: Option<SessionRegistry>,
    playback: Option<ActivePlayback>,
    policy_task: Option<JoinHandle<()>>,
    restart: Option<PendingRestart>,
    restart_seq: u64,
    job_seq: u64,
    cleanups: u32,
}

impl std::fmt::Debug for TurnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnController")
            .field("session", &self.session)
            .field("stt", &self.stt)
            .field("cleanups", &self.cleanups)
            .finish_non_exhaustive()
    }
}

impl TurnController {
    /// Create a controller writing to `outbound`
    ///
    /// Returns the controller and the receiving end of its event queue.
    #[must_use]
    pub fn new(
        services: CallServices,
        outbound: mpsc::Sender<OutboundMessage>,
        registry: Option<SessionRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let stt = SttSessionManager::new(
            Arc::clone(&services.recognizer),
            services.settings.recognition.clone(),
            events.clone(),
        );
        let scheduler = FrameScheduler::new(services.settings.frame_interval);

        let controller = Self {
            session: CallSession::new(),
            services,
            stt,
            scheduler,
            events,
            outbound,
            registry,
            playback: None,
            policy_task: None,
            restart: None,
            restart_seq: 0,
            job_seq: 0,
            cleanups: 0,
        };
        (controller, rx)
    }

    /// Sender for posting events to this call
    #[must_use]
    pub fn events(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.events.clone()
    }

    #[must_use]
    pub const fn session(&self) -> &CallSession {
        &self.session
    }

    #[must_use]
    pub const fn state(&self) -> CallState {
        self.session.state()
    }

    #[must_use]
    pub const fn recognition(&self) -> &SttSessionManager {
        &self.stt
    }

    /// Number of teardowns actually performed (0 or 1)
    #[must_use]
    pub const fn cleanup_count(&self) -> u32 {
        self.cleanups
    }

    /// Process events until the call closes
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            if self.session.state() == CallState::Closed {
                break;
            }
        }
        self.close("event queue closed").await;
    }

    /// Apply one event
    pub async fn handle(&mut self, event: SessionEvent) {
        if self.session.state() == CallState::Closed {
            return;
        }

        match event {
            SessionEvent::Transport(event) => self.on_transport(event).await,
            SessionEvent::Malformed(reason) => {
                tracing::warn!(
                    stream_sid = self.session.stream_sid().unwrap_or("-"),
                    reason = %reason,
                    "discarding malformed transport message"
                );
            }
            SessionEvent::Transcript { generation, event } => self.on_transcript(generation, event),
            SessionEvent::RecognitionEnded { generation, error } => {
                self.on_recognition_ended(generation, error);
            }
            SessionEvent::RestartRecognition { token } => self.on_restart(token),
            SessionEvent::ReplyReady { reply } => self.on_reply(reply),
            SessionEvent::PlaybackFinished { job_id, outcome } => {
                self.on_playback_finished(job_id, outcome).await;
            }
            SessionEvent::DiagnosticTone {
                frequency_hz,
                duration_secs,
            } => self.on_diagnostic_tone(frequency_hz, duration_secs),
            SessionEvent::Disconnected(reason) => self.close(&reason).await,
        }
    }

    /// Tear the call down; later calls are no-ops
    pub async fn close(&mut self, reason: &str) {
        if self.session.state() == CallState::Closed {
            tracing::trace!(reason = %reason, "call already closed");
            return;
        }

        let playback_cancelled = self.cancel_playback();
        if let Some(task) = self.policy_task.take() {
            task.abort();
        }
        if let Some(pending) = self.restart.take() {
            pending.task.abort();
        }
        let recognition_closed = self.stt.close();

        if let (Some(registry), Some(stream_sid)) = (&self.registry, self.session.stream_sid()) {
            registry.deregister(stream_sid, &self.events).await;
        }

        self.session.transition(CallState::Closed);
        self.cleanups += 1;

        tracing::info!(
            stream_sid = self.session.stream_sid().unwrap_or("-"),
            call_sid = self.session.call_sid().unwrap_or("-"),
            reason = %reason,
            inbound_frames = self.session.inbound_frames(),
            dropped_frames = self.session.dropped_frames(),
            recognition_sessions = self.stt.sessions_opened(),
            playback_cancelled,
            recognition_closed,
            "call closed"
        );
    }

    async fn on_transport(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Connected { protocol, version } => {
                tracing::debug!(protocol = ?protocol, version = ?version, "media stream connected");
            }
            InboundEvent::Start { stream_sid, start } => self.on_start(stream_sid, start).await,
            InboundEvent::Media { media, .. } => self.on_media(&media),
            InboundEvent::Mark { mark, .. } => {
                if self.session.acknowledge(&mark.name) {
                    tracing::debug!(mark = %mark.name, "playback acknowledged");
                } else {
                    tracing::debug!(mark = %mark.name, "acknowledgement for unknown marker");
                }
            }
            InboundEvent::Stop { .. } => self.close("stream stopped").await,
        }
    }

    async fn on_start(&mut self, stream_sid: String, start: StartMetadata) {
        if self.session.state() != CallState::Idle {
            tracing::warn!(stream_sid = %stream_sid, "duplicate start ignored");
            return;
        }

        tracing::info!(
            stream_sid = %stream_sid,
            call_sid = start.call_sid.as_deref().unwrap_or("-"),
            tracks = ?start.tracks,
            "media stream started"
        );
        self.session.bind(stream_sid.clone(), start.call_sid.clone());

        if self.outbound.send(OutboundMessage::clear(&stream_sid)).await.is_err() {
            self.close("outbound transport closed").await;
            return;
        }

        if let Some(registry) = &self.registry {
            registry
                .register(&stream_sid, start.call_sid, self.events.clone())
                .await;
        }

        let greeting = self.services.settings.greeting.trim().to_string();
        if greeting.is_empty() {
            self.session.transition(CallState::Listening);
        } else {
            self.session.transition(CallState::Greeting);
            self.start_speech(PlaybackKind::Greeting, greeting);
        }
        self.open_recognition();
    }

    fn on_media(&mut self, media: &InboundMedia) {
        if self.session.state() == CallState::Idle {
            tracing::trace!("media before start ignored");
            return;
        }
        self.session.record_inbound();

        let frame = match media.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "discarding undecodable media");
                return;
            }
        };

        // Barge-in guard
        if self.session.is_speaking() || self.session.state() != CallState::Listening {
            self.session.record_dropped();
            tracing::trace!(state = %self.session.state(), "inbound frame dropped");
            return;
        }

        if !self.stt.feed(&frame) {
            self.session.record_dropped();
        }
    }

    fn on_transcript(&mut self, generation: u64, event: TranscriptEvent) {
        if !event.is_final {
            tracing::trace!(generation, text = %event.text, "interim transcript");
            return;
        }

        if self.session.state() != CallState::Listening || !self.stt.accept_final(generation) {
            tracing::debug!(generation, state = %self.session.state(), "final transcript ignored");
            return;
        }

        tracing::info!(
            stream_sid = self.session.stream_sid().unwrap_or("-"),
            transcript = %event.text,
            confidence = ?event.confidence,
            "caller utterance"
        );

        self.session.transition(CallState::Finalizing);
        self.stt.close();
        self.request_reply(event.text);
    }

    fn request_reply(&mut self, transcript: String) {
        let policy = Arc::clone(&self.services.policy);
        let call_sid = self.session.call_sid().map(str::to_string);
        let events = self.events.clone();
        let limit = self.services.settings.reply_timeout;

        self.policy_task = Some(tokio::spawn(async move {
            let pending = policy.reply(call_sid.as_deref(), &transcript);
            let reply = match tokio::time::timeout(limit, pending).await {
                Ok(reply) => reply.map_err(|e| e.to_string()),
                Err(_) => Err(format!("no reply within {limit:?}")),
            };
            let _ = events.send(SessionEvent::ReplyReady { reply });
        }));
    }

    fn on_reply(&mut self, reply: Result<String, String>) {
        self.policy_task = None;
        if self.session.state() != CallState::Finalizing {
            tracing::debug!(state = %self.session.state(), "reply arrived outside finalizing, ignored");
            return;
        }

        let text = match reply {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!("dialogue policy returned an empty reply, using fallback prompt");
                self.services.settings.fallback_prompt.clone()
            }
            Err(e) => {
                tracing::warn!(error = %e, "dialogue policy failed, using fallback prompt");
                self.services.settings.fallback_prompt.clone()
            }
        };

        self.session.transition(CallState::Speaking);
        self.start_speech(PlaybackKind::Reply, text);
    }

    async fn on_playback_finished(&mut self, job_id: u64, outcome: PlaybackOutcome) {
        let Some(active) = self.playback.take_if(|p| p.job_id == job_id) else {
            tracing::trace!(job_id, "stale playback result ignored");
            return;
        };
        self.session.set_speaking(false);

        match outcome {
            PlaybackOutcome::Completed { frames, marker } => {
                tracing::debug!(job_id, kind = ?active.kind, frames, marker = ?marker, "playback complete");
                self.after_playback(active.kind, true);
            }
            PlaybackOutcome::Cancelled { sent } => {
                if let Some(marker) = &active.marker {
                    self.session.discard_marker(marker);
                }
                tracing::debug!(job_id, kind = ?active.kind, sent, "playback cut short by transport");
                self.close("outbound transport closed").await;
            }
            PlaybackOutcome::SynthesisFailed(reason) => {
                if let Some(marker) = &active.marker {
                    self.session.discard_marker(marker);
                }
                tracing::warn!(job_id, kind = ?active.kind, reason = %reason, "synthesis failed, returning to listening");
                self.after_playback(active.kind, false);
            }
        }
    }

    fn after_playback(&mut self, kind: PlaybackKind, completed: bool) {
        match kind {
            PlaybackKind::Greeting => {
                if self.session.state() == CallState::Greeting {
                    self.session.transition(CallState::Listening);
                }
            }
            PlaybackKind::Reply => {
                if self.session.state() == CallState::Speaking {
                    self.session.transition(CallState::Listening);
                    if completed {
                        self.open_recognition();
                    } else {
                        self.schedule_restart();
                    }
                }
            }
            PlaybackKind::Diagnostic => {}
        }
    }

    fn on_recognition_ended(&mut self, generation: u64, error: Option<String>) {
        if !self.stt.is_current(generation) {
            tracing::trace!(generation, "stale recognition session ended");
            return;
        }
        self.stt.close();

        match error {
            Some(e) => tracing::warn!(generation, error = %e, "recognition failed, restarting"),
            None => tracing::debug!(generation, "recognition ended without a transcript, restarting"),
        }

        if matches!(
            self.session.state(),
            CallState::Listening | CallState::Greeting
        ) {
            self.schedule_restart();
        }
    }

    fn schedule_restart(&mut self) {
        if let Some(pending) = self.restart.take() {
            pending.task.abort();
        }

        self.restart_seq += 1;
        let token = self.restart_seq;
        let backoff = self.services.settings.restart_backoff;
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = events.send(SessionEvent::RestartRecognition { token });
        });
        self.restart = Some(PendingRestart { token, task });
    }

    fn on_restart(&mut self, token: u64) {
        if self.restart.as_ref().is_none_or(|r| r.token != token) {
            return;
        }
        self.restart = None;

        if matches!(
            self.session.state(),
            CallState::Listening | CallState::Greeting
        ) && !self.stt.is_open()
        {
            self.open_recognition();
        }
    }

    fn open_recognition(&mut self) {
        if let Some(pending) = self.restart.take() {
            pending.task.abort();
        }
        let generation = self.stt.open();
        tracing::debug!(
            stream_sid = self.session.stream_sid().unwrap_or("-"),
            generation,
            "listening for caller"
        );
    }

    fn on_diagnostic_tone(&mut self, frequency_hz: f32, duration_secs: f32) {
        if self.session.state() != CallState::Listening || self.session.is_speaking() {
            tracing::debug!(state = %self.session.state(), "diagnostic tone ignored, line busy");
            return;
        }

        let frames = tone_frames(frequency_hz, duration_secs);
        if frames.is_empty() {
            return;
        }

        tracing::info!(frequency_hz, duration_secs, "playing diagnostic tone");
        self.job_seq += 1;
        self.spawn_playback(PlaybackJob::diagnostic(self.job_seq, frames));
    }

    fn start_speech(&mut self, kind: PlaybackKind, text: String) {
        let marker = self.session.next_marker(kind);
        self.job_seq += 1;
        let job = PlaybackJob::speech(self.job_seq, kind, text, marker)
            .with_synthesis_timeout(self.services.settings.synthesis_timeout);
        self.spawn_playback(job);
    }

    fn spawn_playback(&mut self, job: PlaybackJob) {
        self.cancel_playback();

        let Some(stream_sid) = self.session.stream_sid() else {
            return;
        };
        let mut sink = TransportSink::new(stream_sid, self.outbound.clone());
        let synthesizer = Arc::clone(&self.services.synthesizer);
        let scheduler = self.scheduler;
        let events = self.events.clone();

        let job_id = job.id();
        let kind = job.kind();
        let marker = job.marker().map(str::to_string);

        let task = tokio::spawn(async move {
            let outcome = job.run(synthesizer.as_ref(), &scheduler, &mut sink).await;
            let _ = events.send(SessionEvent::PlaybackFinished { job_id, outcome });
        });

        self.session.set_speaking(true);
        self.playback = Some(ActivePlayback {
            job_id,
            kind,
            marker,
            task,
        });
    }

    fn cancel_playback(&mut self) -> bool {
        let Some(active) = self.playback.take() else {
            return false;
        };
        active.task.abort();
        if let Some(marker) = &active.marker {
            self.session.discard_marker(marker);
        }
        self.session.set_speaking(false);
        tracing::debug!(job_id = active.job_id, kind = ?active.kind, "playback cancelled");
        true
    }
}

impl Drop for TurnController {
    fn drop(&mut self) {
        if let Some(active) = self.playback.take() {
            active.task.abort();
        }
        if let Some(task) = self.policy_task.take() {
            task.abort();
        }
        if let Some(pending) = self.restart.take() {
            pending.task.abort();
        }
    }
}
