//! Recording session lifecycle tests
//!
//! Exercises the state machine against scripted microphones and engines:
//! teardown idempotence, capture-strategy selection, the restart cycle
//! bound, and error recovery.

use std::sync::Arc;
use std::time::Duration;

use voxlet::config::Tuning;
use voxlet::voice::recognition::{
    EngineErrorKind, EngineEvent, RecognizedSegment, TranscriptResult,
};
use voxlet::voice::{ResourceSet, SessionBuilder, SessionState};

mod common;

use common::{ScriptedEngineProvider, TestMicrophone};

type TranscriptRx = tokio::sync::mpsc::UnboundedReceiver<TranscriptResult>;

fn continuous_session(
    amplitude: f32,
) -> (
    voxlet::RecordingSession,
    TranscriptRx,
    Arc<common::EngineControl>,
    Arc<std::sync::atomic::AtomicUsize>,
) {
    let mic = TestMicrophone::granting(amplitude);
    let opens = mic.open_count();
    let (provider, control) = ScriptedEngineProvider::supported();

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let session = SessionBuilder::new(Arc::new(mic))
        .engine_provider(provider)
        .tuning(Tuning::default())
        .build(tx);

    (session, rx, control, opens)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn test_reset_on_empty_set_is_idempotent() {
    let mut set = ResourceSet::new();

    set.reset(|| {});
    assert!(set.is_empty());

    set.reset(|| {});
    assert!(set.is_empty());
}

#[tokio::test]
async fn test_reset_on_populated_set() {
    let mut set = ResourceSet::new();
    set.meter_task = Some(tokio::spawn(std::future::pending::<()>()));
    set.restart_timer = Some(tokio::spawn(std::future::pending::<()>()));
    set.event_pump = Some(tokio::spawn(std::future::pending::<()>()));

    set.reset(|| {});
    assert!(set.is_empty());

    // A second pass over the now-empty set must be a no-op
    set.reset(|| {});
    assert!(set.is_empty());
}

#[tokio::test]
async fn test_stop_before_start_is_safe() {
    let (session, _rx, _control, _opens) = continuous_session(0.5);

    session.stop();
    assert!(!session.is_recording());
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_start_selects_exactly_one_capture_strategy() {
    let (session, _rx, _control, _opens) = continuous_session(0.5);

    session.start().await.unwrap();
    session.with_resources(|res| {
        assert!(res.engine.is_some());
        assert!(res.recorder.is_none());
    });

    session.stop();
}

#[tokio::test]
async fn test_unsupported_host_falls_back_to_chunked() {
    let mic = TestMicrophone::granting(0.5);
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let session = SessionBuilder::new(Arc::new(mic))
        .engine_provider(ScriptedEngineProvider::unsupported())
        .build(tx);

    session.start().await.unwrap();
    session.with_resources(|res| {
        assert!(res.engine.is_none());
        assert!(res.recorder.is_some());
    });

    session.stop();
}

#[tokio::test]
async fn test_start_twice_is_noop() {
    let (session, _rx, control, opens) = continuous_session(0.5);

    session.start().await.unwrap();
    session.start().await.unwrap();

    assert_eq!(control.created(), 1);
    assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 1);

    session.stop();
}

#[tokio::test]
async fn test_denied_microphone_surfaces_error() {
    let mic = TestMicrophone::denying();
    let (provider, _control) = ScriptedEngineProvider::supported();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let session = SessionBuilder::new(Arc::new(mic))
        .engine_provider(provider)
        .build(tx);

    let result = session.start().await;
    assert!(result.is_err());
    assert!(!session.is_recording());
    assert_eq!(session.state(), SessionState::Error);

    let error = session.last_error().expect("error surfaced");
    assert_eq!(error.kind, EngineErrorKind::NotAllowed);

    // Nothing stays acquired after the failed start
    session.with_resources(|res| assert!(res.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_audio_level_rises_while_recording() {
    let (session, _rx, _control, _opens) = continuous_session(0.5);

    session.start().await.unwrap();
    assert!(session.is_recording());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.audio_level() > 0.0);

    session.stop();
    assert_eq!(session.audio_level(), 0.0);
}

#[tokio::test]
async fn test_stop_releases_everything() {
    let (session, _rx, _control, _opens) = continuous_session(0.5);

    session.start().await.unwrap();
    session.stop();

    assert!(!session.is_recording());
    assert_eq!(session.audio_level(), 0.0);
    session.with_resources(|res| assert!(res.is_empty()));

    // And again, from the already-stopped state
    session.stop();
    session.with_resources(|res| assert!(res.is_empty()));
}

#[tokio::test]
async fn test_transcripts_flow_through_session() {
    let (session, mut rx, control, _opens) = continuous_session(0.5);

    session.start().await.unwrap();
    settle().await;

    control.send(EngineEvent::Result {
        start_index: 0,
        segments: vec![
            RecognizedSegment {
                text: "turn on".to_string(),
                is_final: false,
            },
            RecognizedSegment {
                text: "turn on the lights".to_string(),
                is_final: true,
            },
        ],
    });
    settle().await;

    let first = rx.recv().await.unwrap();
    assert!(!first.is_final);
    assert_eq!(first.text, "turn on");

    let second = rx.recv().await.unwrap();
    assert!(second.is_final);
    assert_eq!(second.text, "turn on the lights");

    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_engine_end_restarts_with_cycle_accounting() {
    let (session, _rx, control, opens) = continuous_session(0.5);

    session.start().await.unwrap();
    assert_eq!(control.created(), 1);

    control.send(EngineEvent::End);
    tokio::time::sleep(Duration::from_millis(350)).await;

    assert_eq!(session.cycle_count(), 1);
    assert_eq!(control.created(), 2);
    assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(session.is_recording());

    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_cycle_threshold_forces_full_rebuild() {
    let (session, _rx, control, opens) = continuous_session(0.5);

    session.start().await.unwrap();

    // Three quick restarts: engine recreated, microphone untouched
    for cycle in 1..=3 {
        control.send(EngineEvent::End);
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(session.cycle_count(), cycle);
        assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(session.is_recording());
    }

    // The fourth consecutive end crosses the threshold: full rebuild,
    // microphone reacquired, counter back to zero
    control.send(EngineEvent::End);
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(session.cycle_count(), 0);
    assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(control.created(), 5);
    assert!(session.is_recording());

    session.with_resources(|res| {
        assert!(res.engine.is_some());
        assert!(res.stream.is_some());
    });

    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_network_error_triggers_delayed_restart() {
    let (session, _rx, control, _opens) = continuous_session(0.5);

    session.start().await.unwrap();
    assert_eq!(control.created(), 1);

    control.send(EngineEvent::Error {
        kind: EngineErrorKind::Network,
        message: "network".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Error is surfaced but recording is still presented as on
    let error = session.last_error().expect("transient error surfaced");
    assert_eq!(error.kind, EngineErrorKind::Network);
    assert!(session.is_recording());
    assert_eq!(control.created(), 1);

    // After the restart delay the engine handle is recreated
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(control.created(), 2);
    assert!(session.is_recording());

    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_does_not_restart() {
    let (session, _rx, control, _opens) = continuous_session(0.5);

    session.start().await.unwrap();

    control.send(EngineEvent::Error {
        kind: EngineErrorKind::Other("bad-grammar".to_string()),
        message: "bad grammar".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(2000)).await;

    assert_eq!(control.created(), 1);
    assert!(session.last_error().is_some());

    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_end_after_stop_does_not_restart() {
    let (session, _rx, control, _opens) = continuous_session(0.5);

    session.start().await.unwrap();
    session.stop();

    control.send(EngineEvent::End);
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(control.created(), 1);
    assert!(!session.is_recording());
    assert_eq!(session.cycle_count(), 0);
}
