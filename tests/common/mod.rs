//! Shared test utilities
//!
//! Scripted engines that stand in for the hosted speech services and the
//! dialogue policy, plus a harness that drives one turn controller event by
//! event.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use switchboard::call::{CallServices, CallSettings, CallState, SessionEvent, TurnController};
use switchboard::dialogue::DialoguePolicy;
use switchboard::stt::{
    RecognitionConfig, RecognitionEngine, TranscriptEvent, TranscriptSender,
};
use switchboard::transport::{InboundEvent, OutboundMessage};
use switchboard::tts::SpeechSynthesizer;
use switchboard::{Error, Result};
use tokio::sync::mpsc;

pub const STREAM_SID: &str = "MZ00000000000000000000000000000001";
pub const CALL_SID: &str = "CA00000000000000000000000000000001";

/// Counters shared between a scripted recognizer and the test
#[derive(Debug, Default)]
pub struct RecognizerStats {
    pub opened: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub chunks: AtomicUsize,
}

impl RecognizerStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn chunks(&self) -> usize {
        self.chunks.load(Ordering::SeqCst)
    }
}

/// Marks a recognition session live for as long as it exists
struct ActiveGuard(Arc<RecognizerStats>);

impl ActiveGuard {
    fn enter(stats: &Arc<RecognizerStats>) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_active.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(stats))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Recognizer that finalizes `transcript` after `chunks_per_utterance` chunks
pub struct ScriptedRecognizer {
    pub stats: Arc<RecognizerStats>,
    transcript: String,
    chunks_per_utterance: usize,
    failures: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new(transcript: &str, chunks_per_utterance: usize) -> Self {
        Self {
            stats: Arc::new(RecognizerStats::default()),
            transcript: transcript.to_string(),
            chunks_per_utterance,
            failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` sessions immediately
    pub fn failing_first(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl RecognitionEngine for ScriptedRecognizer {
    async fn recognize(
        &self,
        _config: &RecognitionConfig,
        mut audio: mpsc::Receiver<Vec<u8>>,
        transcripts: TranscriptSender,
    ) -> Result<()> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let _guard = ActiveGuard::enter(&self.stats);

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Stt("scripted engine failure".to_string()));
        }

        let mut received = 0;
        while let Some(_chunk) = audio.recv().await {
            self.stats.chunks.fetch_add(1, Ordering::SeqCst);
            received += 1;
            if received == 1 {
                transcripts.send(TranscriptEvent::interim(""));
            }
            if received == self.chunks_per_utterance {
                transcripts.send(TranscriptEvent::final_text(self.transcript.clone()));
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Synthesizer returning `frames` frames of silence per sentence
pub struct ScriptedSynthesizer {
    frames: usize,
    fail: bool,
    stall: bool,
    pub spoken: Mutex<Vec<String>>,
}

impl ScriptedSynthesizer {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            fail: false,
            stall: false,
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }

    /// Never finishes synthesizing
    pub fn stalled() -> Self {
        Self {
            stall: true,
            ..Self::new(0)
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.stall {
            return std::future::pending().await;
        }
        if self.fail {
            return Err(Error::Tts("scripted synthesis failure".to_string()));
        }
        Ok(vec![0xFF; self.frames * 160])
    }
}

/// Policy returning a fixed reply, or an error when `reply` is `None`
pub struct ScriptedPolicy {
    reply: Option<String>,
    stall: bool,
    pub heard: Mutex<Vec<String>>,
}

impl ScriptedPolicy {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            stall: false,
            heard: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            stall: false,
            heard: Mutex::new(Vec::new()),
        }
    }

    /// Never answers
    pub fn stalled() -> Self {
        Self {
            reply: None,
            stall: true,
            heard: Mutex::new(Vec::new()),
        }
    }

    pub fn heard(&self) -> Vec<String> {
        self.heard.lock().unwrap().clone()
    }
}

#[async_trait]
impl DialoguePolicy for ScriptedPolicy {
    async fn reply(&self, _call_sid: Option<&str>, transcript: &str) -> Result<String> {
        self.heard.lock().unwrap().push(transcript.to_string());
        if self.stall {
            return std::future::pending().await;
        }
        self.reply
            .clone()
            .ok_or_else(|| Error::Policy("scripted policy failure".to_string()))
    }
}

/// Settings with a fast frame clock so tests finish quickly
pub fn fast_settings() -> CallSettings {
    CallSettings {
        greeting: "Welcome to the test line.".to_string(),
        fallback_prompt: "Sorry, could you repeat that?".to_string(),
        recognition: RecognitionConfig::telephony("en-US"),
        restart_backoff: Duration::from_millis(10),
        frame_interval: Duration::from_millis(2),
        reply_timeout: Duration::from_millis(100),
        synthesis_timeout: Duration::from_millis(100),
    }
}

pub fn services(
    recognizer: Arc<ScriptedRecognizer>,
    synthesizer: Arc<ScriptedSynthesizer>,
    policy: Arc<ScriptedPolicy>,
) -> CallServices {
    CallServices {
        recognizer,
        synthesizer,
        policy,
        settings: fast_settings(),
    }
}

pub fn start_event() -> SessionEvent {
    transport(&format!(
        r#"{{"event":"start","sequenceNumber":"1","streamSid":"{STREAM_SID}","start":{{"streamSid":"{STREAM_SID}","accountSid":"AC0001","callSid":"{CALL_SID}","tracks":["inbound"],"mediaFormat":{{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1}},"customParameters":{{}}}}}}"#
    ))
}

pub fn media_event() -> SessionEvent {
    let payload = BASE64.encode([0xFFu8; 160]);
    transport(&format!(
        r#"{{"event":"media","streamSid":"{STREAM_SID}","media":{{"track":"inbound","chunk":"1","timestamp":"20","payload":"{payload}"}}}}"#
    ))
}

pub fn mark_event(label: &str) -> SessionEvent {
    transport(&format!(
        r#"{{"event":"mark","streamSid":"{STREAM_SID}","mark":{{"name":"{label}"}}}}"#
    ))
}

pub fn stop_event() -> SessionEvent {
    transport(&format!(
        r#"{{"event":"stop","streamSid":"{STREAM_SID}","stop":{{"accountSid":"AC0001","callSid":"{CALL_SID}"}}}}"#
    ))
}

fn transport(json: &str) -> SessionEvent {
    SessionEvent::Transport(InboundEvent::parse(json).expect("test event should parse"))
}

/// One turn controller driven directly by the test
pub struct CallHarness {
    pub controller: TurnController,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub outbound: mpsc::Receiver<OutboundMessage>,
    pub sent: Vec<OutboundMessage>,
}

impl CallHarness {
    pub fn new(services: CallServices) -> Self {
        let (outbound_tx, outbound) = mpsc::channel(4096);
        let (controller, events) = TurnController::new(services, outbound_tx, None);
        Self {
            controller,
            events,
            outbound,
            sent: Vec::new(),
        }
    }

    pub async fn handle(&mut self, event: SessionEvent) {
        self.controller.handle(event).await;
    }

    pub fn state(&self) -> CallState {
        self.controller.state()
    }

    /// Apply queued internal events until `done` holds
    pub async fn pump_until(&mut self, done: impl Fn(&TurnController) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !done(&self.controller) {
            let event = tokio::time::timeout_at(deadline, self.events.recv())
                .await
                .expect("timed out waiting for call to progress")
                .expect("event queue closed");
            self.controller.handle(event).await;
        }
    }

    pub async fn pump_until_state(&mut self, state: CallState) {
        self.pump_until(|c| c.state() == state).await;
    }

    /// Apply whatever internal events arrive within `window`
    pub async fn pump_for(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            self.controller.handle(event).await;
        }
    }

    /// Collect outbound messages sent so far
    pub fn drain_outbound(&mut self) -> &[OutboundMessage] {
        while let Ok(message) = self.outbound.try_recv() {
            self.sent.push(message);
        }
        &self.sent
    }

    pub fn marks(&mut self) -> Vec<String> {
        self.drain_outbound()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Mark { mark, .. } => Some(mark.name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn media_count(&mut self) -> usize {
        self.drain_outbound()
            .iter()
            .filter(|m| matches!(m, OutboundMessage::Media { .. }))
            .count()
    }
}
