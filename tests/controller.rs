//! Session controller integration tests
//!
//! Runs whole sessions against fake devices and a fake live endpoint

use std::time::Duration;

use aurea_voice::transport::SessionEvent;
use aurea_voice::{Error, SessionState, UiEvent};
use tokio_test::{assert_err, assert_ok};

mod common;

use common::{BackendFailure, Harness, audio_message, interrupted, setup_complete};

fn close_to(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

fn errors(events: &[UiEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            UiEvent::Error(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_full_session_flow() {
    let mut h = Harness::new(BackendFailure::None);

    h.controller.initialize().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Ready);
    assert!(h.controller.session_id().is_some());
    assert!(h.wire.lock().unwrap().sent[0].starts_with(r#"{"setup":"#));

    h.controller.toggle_recording().unwrap();
    assert_eq!(h.controller.state(), SessionState::Recording);

    h.speak(&[0.25; 8]);
    h.settle().await;
    {
        let wire = h.wire.lock().unwrap();
        let audio = wire.audio_messages();
        assert_eq!(audio.len(), 2);
        let msg: serde_json::Value = serde_json::from_str(audio[0]).unwrap();
        assert_eq!(
            msg["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
    }

    h.server_sends(audio_message(&[0.5, 0.3, 0.2]));
    h.settle().await;
    {
        let output = h.output.lock().unwrap();
        let starts: Vec<f64> = output.started.iter().map(|(_, start, _)| *start).collect();
        assert_eq!(starts.len(), 3);
        assert!(close_to(starts[0], 0.0));
        assert!(close_to(starts[1], 0.5));
        assert!(close_to(starts[2], 0.8));
    }
    assert!(h.controller.is_speaking());

    let events = h.drain_ui();
    assert!(events.contains(&UiEvent::Speaking(true)));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, UiEvent::AudioReceived(d) if close_to(*d, 0.5)))
    );

    h.output.lock().unwrap().finish_all();
    h.settle().await;
    assert!(!h.controller.is_speaking());
    assert!(h.drain_ui().contains(&UiEvent::Speaking(false)));

    h.controller.toggle_recording().unwrap();
    assert_eq!(h.controller.state(), SessionState::Ready);
    assert_eq!(h.mic.lock().unwrap().released, 1);

    h.controller.close();
    assert_eq!(h.controller.state(), SessionState::Closed);
    assert_eq!(h.output.lock().unwrap().shutdowns, 1);
    assert_eq!(h.wire.lock().unwrap().closed, 1);
}

#[tokio::test]
async fn test_initialization_reports_progress() {
    let mut h = Harness::new(BackendFailure::None);
    h.controller.initialize().await.unwrap();

    let statuses: Vec<String> = h
        .drain_ui()
        .into_iter()
        .filter_map(|e| match e {
            UiEvent::Status(text) => Some(text),
            _ => None,
        })
        .collect();

    assert_eq!(
        statuses,
        vec![
            "Initializing...",
            "Loading configuration...",
            "Fetching access token...",
            "Token received. Connecting...",
            "Session open!",
            "Ready! Tap to talk",
        ]
    );
}

#[tokio::test]
async fn test_permission_denied_stays_ready() {
    let mut h = Harness::new(BackendFailure::None);
    h.mic.lock().unwrap().deny = true;
    h.controller.initialize().await.unwrap();
    h.drain_ui();

    let result = h.controller.start_recording();
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
    assert_eq!(h.controller.state(), SessionState::Ready);

    let events = h.drain_ui();
    assert!(!events.contains(&UiEvent::State(SessionState::Recording)));
    assert!(errors(&events)[0].contains("permission denied"));
    assert_eq!(
        events.last(),
        Some(&UiEvent::Status("Tap to talk".to_string()))
    );
}

#[tokio::test]
async fn test_interrupt_stops_all_playing_sources() {
    let mut h = Harness::new(BackendFailure::None);
    h.controller.initialize().await.unwrap();

    h.server_sends(audio_message(&[0.5, 0.5]));
    h.settle().await;
    assert_eq!(h.output.lock().unwrap().playing(), 2);

    h.output.lock().unwrap().now = 0.2;
    h.server_sends(interrupted());
    h.settle().await;

    {
        let output = h.output.lock().unwrap();
        assert_eq!(output.playing(), 0);
        assert_eq!(output.stopped.len(), 2);
    }
    assert!(!h.controller.is_speaking());
    assert_eq!(h.controller.state(), SessionState::Ready);

    h.server_sends(audio_message(&[0.1]));
    h.settle().await;
    let output = h.output.lock().unwrap();
    let (_, start, _) = output.started.last().copied().unwrap();
    assert!(close_to(start, 0.2));
}

#[tokio::test]
async fn test_remote_close_tears_down() {
    let mut h = Harness::new(BackendFailure::None);
    h.controller.initialize().await.unwrap();
    h.controller.start_recording().unwrap();
    h.server_sends(audio_message(&[0.4]));
    h.settle().await;
    h.drain_ui();

    h.server_sends(SessionEvent::Closed(Some("going away".to_string())));
    h.settle().await;

    assert_eq!(h.controller.state(), SessionState::Error);
    assert_eq!(h.mic.lock().unwrap().released, 1);
    assert_eq!(h.output.lock().unwrap().playing(), 0);
    assert!(!h.controller.is_speaking());
    assert_eq!(errors(&h.drain_ui()), vec!["Session closed: going away"]);

    assert!(matches!(
        h.controller.start_recording(),
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn test_transport_error_enters_error_state() {
    let mut h = Harness::new(BackendFailure::None);
    h.controller.initialize().await.unwrap();

    h.server_sends(SessionEvent::Error("connection reset".to_string()));
    h.server_sends(SessionEvent::Closed(None));
    h.settle().await;

    assert_eq!(h.controller.state(), SessionState::Error);
    // The close after the error belongs to the released connection
    assert_eq!(
        errors(&h.drain_ui()),
        vec!["Session error: connection reset"]
    );
}

#[tokio::test]
async fn test_recording_before_open_is_rejected() {
    let mut h = Harness::new(BackendFailure::None);
    h.wire.lock().unwrap().auto_ack = false;

    let pending = tokio::time::timeout(Duration::from_millis(50), h.controller.initialize()).await;
    assert!(pending.is_err());
    assert_eq!(h.controller.state(), SessionState::Initializing);

    assert!(matches!(
        h.controller.start_recording(),
        Err(Error::NotConnected)
    ));
    assert_eq!(h.mic.lock().unwrap().acquired, 0);

    h.server_sends(setup_complete());
    h.settle().await;
    assert_eq!(h.controller.state(), SessionState::Ready);
    assert_ok!(h.controller.start_recording());
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let mut h = Harness::new(BackendFailure::None);
    assert_ok!(h.controller.initialize().await);
    assert_ok!(h.controller.start_recording());

    let err = assert_err!(h.controller.start_recording());
    assert!(matches!(err, Error::CaptureActive));
    assert_eq!(h.mic.lock().unwrap().acquired, 1);
}

#[tokio::test]
async fn test_send_failure_returns_to_ready() {
    let mut h = Harness::new(BackendFailure::None);
    h.controller.initialize().await.unwrap();
    h.controller.start_recording().unwrap();
    h.drain_ui();

    h.wire.lock().unwrap().fail_send = true;
    h.speak(&[0.1; 4]);
    h.settle().await;

    assert_eq!(h.controller.state(), SessionState::Ready);
    assert_eq!(h.mic.lock().unwrap().released, 1);
    assert_eq!(h.wire.lock().unwrap().closed, 0);
    let events = h.drain_ui();
    assert!(errors(&events)[0].starts_with("failed to send audio"));
    assert_eq!(
        events.last(),
        Some(&UiEvent::Status("Tap to talk".to_string()))
    );
}

#[tokio::test]
async fn test_navigate_away_stops_recording() {
    let mut h = Harness::new(BackendFailure::None);
    h.controller.initialize().await.unwrap();
    h.controller.start_recording().unwrap();

    h.controller.navigate_away();
    h.controller.navigate_away();

    assert_eq!(h.controller.state(), SessionState::Ready);
    assert_eq!(h.mic.lock().unwrap().released, 1);
    assert_eq!(h.wire.lock().unwrap().closed, 0);
}

#[tokio::test]
async fn test_reinitialize_opens_fresh_session() {
    let mut h = Harness::new(BackendFailure::None);
    h.controller.initialize().await.unwrap();
    let first_id = h.controller.session_id();
    let old_sink = h.wire.lock().unwrap().sink();

    h.controller.start_recording().unwrap();
    h.server_sends(audio_message(&[0.3]));
    h.settle().await;

    h.controller.reinitialize().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Ready);
    assert_ne!(h.controller.session_id(), first_id);
    {
        let wire = h.wire.lock().unwrap();
        assert_eq!(wire.connects, 2);
        assert_eq!(wire.closed, 1);
    }
    assert_eq!(h.mic.lock().unwrap().released, 1);
    assert_eq!(h.output.lock().unwrap().playing(), 0);

    old_sink.emit(SessionEvent::Closed(Some("stale".to_string())));
    h.settle().await;
    assert_eq!(h.controller.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_reinitialize_recovers_from_error() {
    let mut h = Harness::new(BackendFailure::None);
    h.wire.lock().unwrap().fail_connect = true;

    let result = h.controller.initialize().await;
    assert!(matches!(result, Err(Error::Connect(_))));
    assert_eq!(h.controller.state(), SessionState::Error);

    h.wire.lock().unwrap().fail_connect = false;
    h.controller.reinitialize().await.unwrap();
    assert_eq!(h.controller.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_config_failure_opens_nothing() {
    let mut h = Harness::new(BackendFailure::Config);

    let result = h.controller.initialize().await;
    assert!(matches!(result, Err(Error::ConfigFetch(_))));
    assert_eq!(h.controller.state(), SessionState::Error);
    assert_eq!(h.wire.lock().unwrap().connects, 0);
    assert!(errors(&h.drain_ui())[0].starts_with("failed to fetch configuration"));
}

#[tokio::test]
async fn test_token_failure_opens_nothing() {
    let mut h = Harness::new(BackendFailure::Token);

    let result = h.controller.initialize().await;
    assert!(matches!(result, Err(Error::CredentialFetch(_))));
    assert_eq!(h.wire.lock().unwrap().connects, 0);
}

#[tokio::test]
async fn test_malformed_audio_is_dropped() {
    let mut h = Harness::new(BackendFailure::None);
    h.controller.initialize().await.unwrap();

    let msg = serde_json::json!({
        "serverContent": { "modelTurn": { "parts": [{ "inlineData": { "data": "%%%" } }] } }
    });
    h.server_sends(SessionEvent::Message(serde_json::from_value(msg).unwrap()));
    h.settle().await;

    assert_eq!(h.controller.state(), SessionState::Ready);
    assert!(h.output.lock().unwrap().started.is_empty());
    assert!(!h.controller.is_speaking());
}

#[tokio::test]
async fn test_close_is_terminal() {
    let mut h = Harness::new(BackendFailure::None);
    h.controller.initialize().await.unwrap();
    h.controller.start_recording().unwrap();

    h.controller.close();
    h.controller.close();

    assert_eq!(h.controller.state(), SessionState::Closed);
    assert_eq!(h.mic.lock().unwrap().released, 1);
    assert_eq!(h.output.lock().unwrap().shutdowns, 1);
    assert!(!h.controller.step().await);
    assert!(matches!(h.controller.initialize().await, Err(Error::Closed)));
    assert!(matches!(
        h.controller.reinitialize().await,
        Err(Error::Closed)
    ));
    assert!(matches!(h.controller.start_recording(), Err(Error::Closed)));
}
