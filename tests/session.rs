//! Session orchestrator integration tests
//!
//! Drives the state machine against mock hardware and a scripted connection

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use beacon_satellite::net::ConnectionEvent;
use beacon_satellite::session::SessionState;

mod common;

use common::{SinkCall, harness, voiced};

const TTS_END: &str = r#"{"type":"tts_end"}"#;

#[tokio::test]
async fn test_wake_with_live_connection_opens_session() {
    let mut h = harness(true, None);

    assert!(h.orchestrator.on_wake().await);

    assert_eq!(h.orchestrator.state(), SessionState::Active);
    assert_eq!(h.sink.writes(), 1, "confirmation cue plays once");
    assert!(h.capture.is_recording());
    assert!(h.jitter.is_streaming());
    assert_eq!(h.connection.connect_calls(), 0);
    assert_eq!(h.stats.snapshot().sessions_started, 1);
}

#[tokio::test]
async fn test_wake_connects_dead_connection() {
    let mut h = harness(false, None);

    assert!(h.orchestrator.on_wake().await);

    assert_eq!(h.orchestrator.state(), SessionState::Active);
    assert_eq!(h.connection.connect_calls(), 1);
    assert!(h.capture.is_recording());
}

#[tokio::test]
async fn test_wake_stays_idle_when_connect_fails() {
    let mut h = harness(false, None);
    h.connection.set_connect_succeeds(false);

    assert!(!h.orchestrator.on_wake().await);

    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert!(!h.capture.is_recording());
    assert!(!h.jitter.is_streaming());
    assert_eq!(h.sink.writes(), 0, "no cue without a session");
    assert_eq!(h.resets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mid_session_disconnect_resumes_after_reconnect() {
    let mut h = harness(true, None);
    h.orchestrator.on_wake().await;
    h.orchestrator
        .handle_event(ConnectionEvent::Binary(voiced(400, 0)))
        .await;

    h.connection.drop_link();
    h.orchestrator.handle_event(ConnectionEvent::Disconnected).await;

    assert_eq!(h.orchestrator.state(), SessionState::Active);
    assert_eq!(h.connection.disconnect_calls(), 1);
    assert_eq!(h.connection.connect_calls(), 1, "exactly one reconnect attempt");
    assert_eq!(
        h.connection.state_at_connect(),
        vec![(false, false)],
        "capture and playback were stopped before reconnecting"
    );
    assert!(h.capture.is_recording());
    assert!(h.jitter.is_streaming());
    assert_eq!(h.jitter.available(), 0, "stale reply audio was cleared");
    assert!(h.sink.calls().contains(&SinkCall::Write(voiced(400, 0))));
    assert_eq!(h.stats.snapshot().reconnects, 1);
}

#[tokio::test]
async fn test_mid_session_disconnect_ends_session_when_reconnect_fails() {
    let mut h = harness(true, None);
    h.orchestrator.on_wake().await;
    h.connection.set_connect_succeeds(false);

    h.connection.drop_link();
    h.orchestrator.handle_event(ConnectionEvent::Disconnected).await;

    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert_eq!(h.connection.connect_calls(), 1);
    assert_eq!(h.connection.state_at_connect(), vec![(false, false)]);
    assert!(!h.capture.is_recording());
    assert!(!h.jitter.is_streaming());
}

#[tokio::test]
async fn test_disconnect_while_idle_does_not_reconnect() {
    let mut h = harness(true, None);

    h.connection.drop_link();
    h.orchestrator.handle_event(ConnectionEvent::Disconnected).await;

    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert_eq!(h.connection.connect_calls(), 0);
    assert_eq!(h.resets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reply_end_flushes_tail_and_keeps_capturing() {
    let mut h = harness(true, None);
    h.orchestrator.on_wake().await;

    h.orchestrator
        .handle_event(ConnectionEvent::Binary(voiced(500, 0)))
        .await;
    h.orchestrator
        .handle_event(ConnectionEvent::Text(TTS_END.to_string()))
        .await;

    let calls = h.sink.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[SinkCall::Write(voiced(500, 0)), SinkCall::Stop]
    );
    assert_eq!(h.orchestrator.state(), SessionState::Active);
    assert!(h.capture.is_recording());
    assert!(!h.jitter.is_streaming());
    assert_eq!(h.jitter.cursors(), (0, 0));
}

#[tokio::test]
async fn test_next_reply_reprimes_playback() {
    let mut h = harness(true, None);
    h.orchestrator.on_wake().await;
    h.orchestrator
        .handle_event(ConnectionEvent::Text(TTS_END.to_string()))
        .await;

    h.orchestrator
        .handle_event(ConnectionEvent::Binary(voiced(600, 0)))
        .await;

    assert!(h.jitter.is_streaming());
    assert_eq!(h.jitter.available(), 600);
}

#[tokio::test]
async fn test_other_text_messages_are_ignored() {
    let mut h = harness(true, None);
    h.orchestrator.on_wake().await;
    h.orchestrator
        .handle_event(ConnectionEvent::Binary(voiced(600, 0)))
        .await;

    h.orchestrator
        .handle_event(ConnectionEvent::Text(r#"{"type":"ready"}"#.to_string()))
        .await;
    h.orchestrator
        .handle_event(ConnectionEvent::Text("not json".to_string()))
        .await;

    assert!(h.jitter.is_streaming());
    assert_eq!(h.jitter.available(), 600);
}

#[tokio::test]
async fn test_audio_outside_session_is_dropped() {
    let mut h = harness(true, None);

    h.orchestrator
        .handle_event(ConnectionEvent::Binary(voiced(1600, 0)))
        .await;

    assert!(h.sink.calls().is_empty());
    assert_eq!(h.stats.snapshot().chunks_rejected, 1);
}

#[tokio::test]
async fn test_reply_idle_timeout_ends_session_and_exports() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(true, Some(dir.path().to_path_buf()));
    h.orchestrator.on_wake().await;
    h.capture.tick();

    h.orchestrator
        .handle_event(ConnectionEvent::Text(TTS_END.to_string()))
        .await;
    h.orchestrator.tick().await;
    assert_eq!(h.orchestrator.state(), SessionState::Active);

    tokio::time::sleep(Duration::from_millis(150)).await;
    h.orchestrator.tick().await;

    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert!(!h.capture.is_recording());

    let exported: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(exported.len(), 1);
}

#[tokio::test]
async fn test_idle_tick_polls_trigger() {
    let mut h = harness(true, None);

    h.orchestrator.tick().await;
    assert_eq!(h.orchestrator.state(), SessionState::Idle);

    h.fire.store(true, Ordering::SeqCst);
    h.orchestrator.tick().await;
    assert_eq!(h.orchestrator.state(), SessionState::Active);
}

#[tokio::test]
async fn test_startup_failure_is_not_fatal() {
    let mut h = harness(false, None);
    h.connection.set_connect_succeeds(false);

    assert!(!h.orchestrator.startup().await);
    assert_eq!(h.orchestrator.state(), SessionState::Idle);

    h.connection.set_connect_succeeds(true);
    assert!(h.orchestrator.startup().await);
}

#[tokio::test]
async fn test_run_loop_handles_wake_and_shutdown() {
    let h = harness(true, None);
    let (events_tx, events_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let capture = h.capture.clone();
    let jitter = h.jitter.clone();
    let sink = h.sink.clone();
    let fire = h.fire.clone();
    let task = tokio::spawn(h.orchestrator.run(events_rx, shutdown_rx));

    fire.store(true, Ordering::SeqCst);
    for _ in 0..100 {
        if capture.is_recording() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(capture.is_recording());

    events_tx
        .send(ConnectionEvent::Binary(voiced(300, 0)))
        .await
        .unwrap();
    events_tx
        .send(ConnectionEvent::Text(TTS_END.to_string()))
        .await
        .unwrap();
    for _ in 0..100 {
        if !jitter.is_streaming() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(sink.calls().contains(&SinkCall::Write(voiced(300, 0))));

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
    assert!(!capture.is_recording());
}
