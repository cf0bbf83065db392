//! Session integration tests
//!
//! Runs the full wake -> stream -> exit cycle against fake audio hardware,
//! a fake live connection and a scripted transcriber.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use hivoice::voice::AudioDevice;
use hivoice::{Error, Session, SessionState};

mod common;

use common::{
    FakeConnector, FakeDevice, SETUP_COMPLETE, ScriptedTranscriber, TURN_COMPLETE, audio_message,
    session_config, utterance,
};

const WAIT: Duration = Duration::from_secs(5);

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wake_stream_and_exit() {
    let device = FakeDevice::new();
    let (connector, server) = FakeConnector::new();
    let transcriber = ScriptedTranscriber::new(&["Hi Voice", "okay bye now"]);

    server.send(SETUP_COMPLETE.to_string()).unwrap();
    device.speak(utterance());

    let session = Session::new(
        session_config(),
        Arc::clone(&device) as Arc<dyn AudioDevice>,
        connector.clone(),
        transcriber.clone(),
    );
    let mut states = session.state();
    let run = tokio::spawn(session.run());

    tokio::time::timeout(WAIT, states.wait_for(|s| *s == SessionState::Active))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(connector.sent()[0], r#"{"setup":{"model":"models/test-live"}}"#);
    wait_until(|| connector.audio_frames_sent() > 0).await;

    // Two deltas before any turn complete are played in arrival order
    server.send(audio_message(100)).unwrap();
    server.send(audio_message(200)).unwrap();
    wait_until(|| device.written_lengths().len() == 2).await;
    assert_eq!(device.written_lengths(), vec![100, 200]);
    assert_eq!(*states.borrow(), SessionState::Speaking);

    server.send(TURN_COMPLETE.to_string()).unwrap();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == SessionState::Active))
        .await
        .unwrap()
        .unwrap();

    // The exit phrase ends the session
    device.speak(utterance());
    let result = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert!(result.is_ok(), "session failed: {result:?}");

    assert_eq!(*states.borrow(), SessionState::Closing);
    assert_eq!(device.inputs_opened.load(Ordering::SeqCst), 1);
    assert!(device.input_closed.load(Ordering::SeqCst));
    assert!(device.output_closed.load(Ordering::SeqCst));
    assert!(connector.closed.load(Ordering::SeqCst));
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nothing_streams_before_wake_phrase() {
    let device = FakeDevice::new();
    let (connector, server) = FakeConnector::new();
    let transcriber = ScriptedTranscriber::new(&["good morning"]);

    server.send(SETUP_COMPLETE.to_string()).unwrap();
    device.speak(utterance());
    // Model audio that arrives early waits for activation
    server.send(audio_message(64)).unwrap();

    let session = Session::new(
        session_config(),
        Arc::clone(&device) as Arc<dyn AudioDevice>,
        connector.clone(),
        transcriber.clone(),
    );
    let exit = session.exit_signal();
    let states = session.state();
    let run = tokio::spawn(session.run());

    wait_until(|| transcriber.calls.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*states.borrow(), SessionState::Armed);
    assert_eq!(connector.sent().len(), 1);
    assert_eq!(device.outputs_opened.load(Ordering::SeqCst), 0);

    // Exit before activation is a clean shutdown
    exit.set();
    let result = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(device.written_lengths().is_empty());
    assert!(device.input_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_missing_setup_ack_is_fatal_and_silent() {
    let device = FakeDevice::new();
    let (connector, _server) = FakeConnector::new();
    let transcriber = ScriptedTranscriber::new(&[]);

    let session = Session::new(
        session_config(),
        Arc::clone(&device) as Arc<dyn AudioDevice>,
        connector.clone(),
        transcriber.clone(),
    );
    let result = session.run().await;

    let err = result.unwrap_err();
    assert!(matches!(err, Error::Handshake(_)));
    assert!(err.is_fatal());
    assert_eq!(connector.sent().len(), 1);
    assert_eq!(device.inputs_opened.load(Ordering::SeqCst), 0);
    assert_eq!(device.outputs_opened.load(Ordering::SeqCst), 0);
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_fatal() {
    let device = FakeDevice::new();
    let session = Session::new(
        session_config(),
        Arc::clone(&device) as Arc<dyn AudioDevice>,
        FakeConnector::unreachable(),
        ScriptedTranscriber::new(&[]),
    );

    let err = session.run().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(device.inputs_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_error_ends_active_session() {
    let device = FakeDevice::new();
    let (connector, server) = FakeConnector::new();
    let transcriber = ScriptedTranscriber::new(&["hey assistant"]);

    server.send(SETUP_COMPLETE.to_string()).unwrap();
    device.speak(utterance());

    let session = Session::new(
        session_config(),
        Arc::clone(&device) as Arc<dyn AudioDevice>,
        connector.clone(),
        transcriber,
    );
    let mut states = session.state();
    let run = tokio::spawn(session.run());

    tokio::time::timeout(WAIT, states.wait_for(|s| *s == SessionState::Active))
        .await
        .unwrap()
        .unwrap();
    server
        .send(r#"{"error":{"code":429,"message":"resource exhausted"}}"#.to_string())
        .unwrap();

    let result = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::Protocol(msg)) if msg.contains("resource exhausted")));
    assert!(device.input_closed.load(Ordering::SeqCst));
}
