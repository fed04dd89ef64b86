//! Turn controller behavior over whole calls

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    CALL_SID, CallHarness, STREAM_SID, ScriptedPolicy, ScriptedRecognizer, ScriptedSynthesizer,
    mark_event, media_event, services, start_event, stop_event,
};
use switchboard::call::{CallState, SessionEvent, SessionRegistry, TurnController};
use switchboard::transport::OutboundMessage;
use tokio::sync::mpsc;

const GREETING: &str = "Welcome to the test line.";
const FALLBACK: &str = "Sorry, could you repeat that?";

struct Fixture {
    harness: CallHarness,
    recognizer: Arc<ScriptedRecognizer>,
    synthesizer: Arc<ScriptedSynthesizer>,
    policy: Arc<ScriptedPolicy>,
}

fn fixture(
    recognizer: ScriptedRecognizer,
    synthesizer: ScriptedSynthesizer,
    policy: ScriptedPolicy,
) -> Fixture {
    let recognizer = Arc::new(recognizer);
    let synthesizer = Arc::new(synthesizer);
    let policy = Arc::new(policy);
    let harness = CallHarness::new(services(
        Arc::clone(&recognizer),
        Arc::clone(&synthesizer),
        Arc::clone(&policy),
    ));
    Fixture {
        harness,
        recognizer,
        synthesizer,
        policy,
    }
}

fn default_fixture() -> Fixture {
    fixture(
        ScriptedRecognizer::new("hello", 3),
        ScriptedSynthesizer::new(3),
        ScriptedPolicy::replying("Hi there"),
    )
}

/// Start the call and wait out the greeting
async fn answer(harness: &mut CallHarness) {
    harness.handle(start_event()).await;
    harness.pump_until_state(CallState::Listening).await;
}

/// Speak enough frames to finalize one utterance, then wait for the reply
async fn speak_and_wait_for_reply(harness: &mut CallHarness, frames: usize) {
    for _ in 0..frames {
        harness.handle(media_event()).await;
    }
    harness.pump_until_state(CallState::Speaking).await;
    harness
        .pump_until(|c| c.state() == CallState::Listening && !c.session().is_speaking())
        .await;
}

#[tokio::test]
async fn test_full_turn_cycle() {
    let Fixture {
        mut harness,
        synthesizer,
        policy,
        ..
    } = default_fixture();

    answer(&mut harness).await;
    speak_and_wait_for_reply(&mut harness, 3).await;
    assert!(harness.controller.recognition().is_open());

    harness.handle(stop_event()).await;

    assert_eq!(
        harness.controller.session().history(),
        &[
            CallState::Idle,
            CallState::Greeting,
            CallState::Listening,
            CallState::Finalizing,
            CallState::Speaking,
            CallState::Listening,
            CallState::Closed,
        ]
    );
    assert_eq!(policy.heard(), vec!["hello".to_string()]);
    assert_eq!(
        synthesizer.spoken(),
        vec![GREETING.to_string(), "Hi there".to_string()]
    );
    assert_eq!(harness.controller.session().stream_sid(), Some(STREAM_SID));
    assert_eq!(harness.controller.session().call_sid(), Some(CALL_SID));
}

#[tokio::test]
async fn test_first_message_clears_the_line() {
    let mut harness = default_fixture().harness;
    answer(&mut harness).await;

    let sent = harness.drain_outbound();
    assert!(matches!(
        sent.first(),
        Some(OutboundMessage::Clear { stream_sid }) if stream_sid == STREAM_SID
    ));
    // Greeting audio follows, then its marker
    assert!(matches!(sent.get(1), Some(OutboundMessage::Media { .. })));
    assert!(matches!(sent.last(), Some(OutboundMessage::Mark { .. })));
}

#[tokio::test]
async fn test_no_audio_reaches_recognition_while_speaking() {
    let Fixture {
        mut harness,
        recognizer,
        ..
    } = fixture(
        ScriptedRecognizer::new("hello", 3),
        ScriptedSynthesizer::new(50),
        ScriptedPolicy::replying("Hi there"),
    );

    harness.handle(start_event()).await;
    assert!(harness.controller.session().is_speaking());

    for _ in 0..10 {
        harness.handle(media_event()).await;
    }
    assert_eq!(harness.controller.session().dropped_frames(), 10);
    assert_eq!(harness.controller.recognition().frames_fed(), 0);

    harness.pump_until_state(CallState::Listening).await;
    for _ in 0..3 {
        harness.handle(media_event()).await;
    }
    harness.pump_until_state(CallState::Speaking).await;
    let fed = harness.controller.recognition().frames_fed();
    assert_eq!(fed, 3);

    // Caller talks over the reply
    for _ in 0..5 {
        harness.handle(media_event()).await;
    }
    assert_eq!(harness.controller.session().dropped_frames(), 15);
    assert_eq!(harness.controller.recognition().frames_fed(), fed);
    assert_eq!(recognizer.stats.chunks(), 3);
    assert_eq!(harness.controller.session().inbound_frames(), 18);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let Fixture {
        mut harness,
        recognizer,
        ..
    } = default_fixture();
    answer(&mut harness).await;

    harness.handle(stop_event()).await;
    harness
        .handle(SessionEvent::Disconnected("socket gone".to_string()))
        .await;
    harness.controller.close("shutdown").await;

    assert_eq!(harness.state(), CallState::Closed);
    assert_eq!(harness.controller.cleanup_count(), 1);
    assert!(!harness.controller.recognition().is_open());

    // Events after close change nothing
    harness.handle(media_event()).await;
    assert_eq!(harness.controller.session().inbound_frames(), 0);

    for _ in 0..100 {
        if recognizer.stats.active() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(recognizer.stats.active(), 0);
}

#[tokio::test]
async fn test_markers_are_unique_per_call() {
    let mut harness = default_fixture().harness;
    answer(&mut harness).await;
    speak_and_wait_for_reply(&mut harness, 3).await;

    let marks = harness.marks();
    assert_eq!(marks, vec!["greeting-1".to_string(), "reply-2".to_string()]);

    for mark in &marks {
        harness.handle(mark_event(mark)).await;
    }
    harness.handle(mark_event("reply-99")).await;
    harness.handle(mark_event("greeting-1")).await;

    assert_eq!(harness.controller.session().acknowledged_marks(), 2);
    assert_eq!(harness.controller.session().pending_marks(), 0);
}

#[tokio::test]
async fn test_second_turn_uses_a_new_recognition_session() {
    let Fixture {
        mut harness,
        recognizer,
        policy,
        ..
    } = default_fixture();
    answer(&mut harness).await;

    speak_and_wait_for_reply(&mut harness, 3).await;
    speak_and_wait_for_reply(&mut harness, 3).await;

    assert_eq!(policy.heard().len(), 2);
    assert_eq!(harness.controller.recognition().sessions_opened(), 3);
    assert_eq!(recognizer.stats.max_active(), 1);
    assert_eq!(harness.marks().len(), 3);
}

#[tokio::test]
async fn test_policy_failure_speaks_fallback() {
    let Fixture {
        mut harness,
        synthesizer,
        ..
    } = fixture(
        ScriptedRecognizer::new("hello", 3),
        ScriptedSynthesizer::new(3),
        ScriptedPolicy::failing(),
    );
    answer(&mut harness).await;
    speak_and_wait_for_reply(&mut harness, 3).await;

    assert_eq!(synthesizer.spoken().last().map(String::as_str), Some(FALLBACK));
    assert_eq!(harness.state(), CallState::Listening);
}

#[tokio::test]
async fn test_empty_reply_speaks_fallback() {
    let Fixture {
        mut harness,
        synthesizer,
        ..
    } = fixture(
        ScriptedRecognizer::new("hello", 3),
        ScriptedSynthesizer::new(3),
        ScriptedPolicy::replying("   "),
    );
    answer(&mut harness).await;
    speak_and_wait_for_reply(&mut harness, 3).await;

    assert_eq!(synthesizer.spoken().last().map(String::as_str), Some(FALLBACK));
}

#[tokio::test]
async fn test_unanswered_policy_speaks_fallback() {
    let Fixture {
        mut harness,
        synthesizer,
        policy,
        ..
    } = fixture(
        ScriptedRecognizer::new("hello", 3),
        ScriptedSynthesizer::new(3),
        ScriptedPolicy::stalled(),
    );
    answer(&mut harness).await;
    speak_and_wait_for_reply(&mut harness, 3).await;

    assert_eq!(policy.heard(), vec!["hello".to_string()]);
    assert_eq!(synthesizer.spoken().last().map(String::as_str), Some(FALLBACK));
    assert!(harness.controller.recognition().is_open());

    // Caller audio flows to recognition again
    let dropped = harness.controller.session().dropped_frames();
    harness.handle(media_event()).await;
    assert_eq!(harness.controller.session().dropped_frames(), dropped);
}

#[tokio::test]
async fn test_stalled_synthesis_returns_to_listening() {
    let Fixture {
        mut harness,
        recognizer,
        ..
    } = fixture(
        ScriptedRecognizer::new("hello", 3),
        ScriptedSynthesizer::stalled(),
        ScriptedPolicy::replying("Hi there"),
    );

    answer(&mut harness).await;
    assert!(!harness.controller.session().is_speaking());

    for _ in 0..3 {
        harness.handle(media_event()).await;
    }
    harness.pump_until_state(CallState::Speaking).await;
    harness
        .pump_until(|c| c.state() == CallState::Listening && c.recognition().is_open())
        .await;

    assert_eq!(recognizer.stats.opened(), 2);
    assert!(!harness.controller.session().is_speaking());
    assert!(harness.marks().is_empty());
}

#[tokio::test]
async fn test_synthesis_failure_returns_to_listening() {
    let Fixture {
        mut harness,
        recognizer,
        ..
    } = fixture(
        ScriptedRecognizer::new("hello", 3),
        ScriptedSynthesizer::failing(),
        ScriptedPolicy::replying("Hi there"),
    );

    // Greeting cannot be synthesized; the call listens anyway
    answer(&mut harness).await;
    assert!(harness.marks().is_empty());
    assert_eq!(harness.controller.session().pending_marks(), 0);

    for _ in 0..3 {
        harness.handle(media_event()).await;
    }
    harness.pump_until_state(CallState::Speaking).await;
    harness
        .pump_until(|c| c.state() == CallState::Listening && c.recognition().is_open())
        .await;

    assert_eq!(recognizer.stats.opened(), 2);
    assert!(!harness.controller.session().is_speaking());
}

#[tokio::test]
async fn test_recognition_restarts_after_engine_error() {
    let Fixture {
        mut harness,
        recognizer,
        ..
    } = fixture(
        ScriptedRecognizer::new("hello", 3).failing_first(1),
        ScriptedSynthesizer::new(3),
        ScriptedPolicy::replying("Hi there"),
    );

    harness.handle(start_event()).await;
    harness
        .pump_until(|c| {
            c.recognition().sessions_opened() == 2
                && c.recognition().is_open()
                && c.state() == CallState::Listening
        })
        .await;

    assert_eq!(recognizer.stats.opened(), 2);
    assert_eq!(recognizer.stats.max_active(), 1);

    // The restarted session still completes a turn
    speak_and_wait_for_reply(&mut harness, 3).await;
    assert_eq!(harness.marks().len(), 2);
}

#[tokio::test]
async fn test_diagnostic_tone_plays_without_marker() {
    let mut harness = default_fixture().harness;
    answer(&mut harness).await;

    let history = harness.controller.session().history().to_vec();
    let media_before = harness.media_count();
    let marks_before = harness.marks();

    harness
        .handle(SessionEvent::DiagnosticTone {
            frequency_hz: 440.0,
            duration_secs: 0.1,
        })
        .await;
    assert!(harness.controller.session().is_speaking());
    assert_eq!(harness.state(), CallState::Listening);

    harness.pump_until(|c| !c.session().is_speaking()).await;

    assert!(harness.media_count() > media_before);
    assert_eq!(harness.marks(), marks_before);
    assert_eq!(harness.controller.session().history(), history.as_slice());
}

#[tokio::test]
async fn test_diagnostic_tone_ignored_while_busy() {
    let mut harness = fixture(
        ScriptedRecognizer::new("hello", 3),
        ScriptedSynthesizer::new(50),
        ScriptedPolicy::replying("Hi there"),
    )
    .harness;

    harness.handle(start_event()).await;
    assert_eq!(harness.state(), CallState::Greeting);

    harness
        .handle(SessionEvent::DiagnosticTone {
            frequency_hz: 440.0,
            duration_secs: 0.1,
        })
        .await;
    harness.pump_until_state(CallState::Listening).await;

    // Only the greeting was played: 50 frames then its marker
    assert_eq!(harness.media_count(), 50);
}

#[tokio::test]
async fn test_malformed_messages_change_nothing() {
    let mut harness = default_fixture().harness;

    harness
        .handle(SessionEvent::Malformed("expected value at line 1".to_string()))
        .await;
    assert_eq!(harness.state(), CallState::Idle);

    answer(&mut harness).await;
    let history = harness.controller.session().history().to_vec();

    harness
        .handle(SessionEvent::Malformed("unknown variant `dtmf`".to_string()))
        .await;
    assert_eq!(harness.state(), CallState::Listening);
    assert_eq!(harness.controller.session().history(), history.as_slice());
}

#[tokio::test]
async fn test_media_before_start_is_ignored() {
    let mut harness = default_fixture().harness;

    harness.handle(media_event()).await;

    assert_eq!(harness.state(), CallState::Idle);
    assert_eq!(harness.controller.session().inbound_frames(), 0);
    assert!(harness.drain_outbound().is_empty());
}

#[tokio::test]
async fn test_duplicate_start_is_ignored() {
    let mut harness = default_fixture().harness;
    answer(&mut harness).await;
    let opened = harness.controller.recognition().sessions_opened();

    harness.handle(start_event()).await;

    assert_eq!(harness.state(), CallState::Listening);
    assert_eq!(harness.controller.recognition().sessions_opened(), opened);
}

#[tokio::test]
async fn test_stop_during_reply_cancels_playback() {
    let mut harness = fixture(
        ScriptedRecognizer::new("hello", 3),
        ScriptedSynthesizer::new(3),
        ScriptedPolicy::replying("Hi there"),
    )
    .harness;
    answer(&mut harness).await;

    for _ in 0..3 {
        harness.handle(media_event()).await;
    }
    harness.pump_until_state(CallState::Speaking).await;
    harness.handle(stop_event()).await;

    assert_eq!(harness.state(), CallState::Closed);
    assert!(!harness.controller.session().is_speaking());
    assert_eq!(harness.controller.cleanup_count(), 1);
    // The reply marker will never be acknowledged
    assert_eq!(harness.controller.session().pending_marks(), 1);
}

#[tokio::test]
async fn test_closed_outbound_transport_ends_the_call() {
    let recognizer = Arc::new(ScriptedRecognizer::new("hello", 3));
    let synthesizer = Arc::new(ScriptedSynthesizer::new(3));
    let policy = Arc::new(ScriptedPolicy::replying("Hi there"));
    let (outbound_tx, outbound_rx) = mpsc::channel(16);
    drop(outbound_rx);

    let (mut controller, _events) = TurnController::new(
        services(recognizer, synthesizer, policy),
        outbound_tx,
        None,
    );
    controller.handle(start_event()).await;

    assert_eq!(controller.state(), CallState::Closed);
    assert_eq!(controller.cleanup_count(), 1);
}

#[tokio::test]
async fn test_run_loop_registers_and_deregisters() {
    let registry = SessionRegistry::new();
    let recognizer = Arc::new(ScriptedRecognizer::new("hello", 3));
    let synthesizer = Arc::new(ScriptedSynthesizer::new(3));
    let policy = Arc::new(ScriptedPolicy::replying("Hi there"));
    let (outbound_tx, mut outbound_rx) = mpsc::channel(4096);

    let (controller, events_rx) = TurnController::new(
        services(recognizer, synthesizer, policy),
        outbound_tx,
        Some(registry.clone()),
    );
    let events = controller.events();
    let task = tokio::spawn(controller.run(events_rx));

    events.send(start_event()).unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), outbound_rx.recv())
        .await
        .unwrap();
    assert!(matches!(first, Some(OutboundMessage::Clear { .. })));

    for _ in 0..100 {
        if registry.active_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let calls = registry.list().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].stream_sid, STREAM_SID);
    assert_eq!(calls[0].call_sid.as_deref(), Some(CALL_SID));

    events.send(stop_event()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(registry.active_count().await, 0);
    assert!(registry.play_tone(STREAM_SID, 440.0, 0.5).await.is_err());
}

#[tokio::test]
async fn test_closing_replaced_call_keeps_new_entry() {
    let registry = SessionRegistry::new();
    let spawn_call = || {
        let (outbound_tx, outbound_rx) = mpsc::channel(4096);
        let (controller, events) = TurnController::new(
            services(
                Arc::new(ScriptedRecognizer::new("hello", 3)),
                Arc::new(ScriptedSynthesizer::new(3)),
                Arc::new(ScriptedPolicy::replying("Hi there")),
            ),
            outbound_tx,
            Some(registry.clone()),
        );
        (controller, events, outbound_rx)
    };

    let (mut first, _first_events, _first_out) = spawn_call();
    let (mut second, mut second_events, _second_out) = spawn_call();

    // Both calls announce the same stream; the later one owns the entry
    first.handle(start_event()).await;
    second.handle(start_event()).await;
    assert_eq!(registry.active_count().await, 1);

    first.close("stop").await;
    assert_eq!(first.state(), CallState::Closed);
    assert_eq!(registry.active_count().await, 1);

    registry.play_tone(STREAM_SID, 440.0, 0.5).await.unwrap();
    let routed = std::iter::from_fn(|| second_events.try_recv().ok())
        .any(|e| matches!(e, SessionEvent::DiagnosticTone { .. }));
    assert!(routed);

    second.close("stop").await;
    assert_eq!(registry.active_count().await, 0);
}
