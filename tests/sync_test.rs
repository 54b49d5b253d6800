//! Rendezvous over a real loopback socket.

use hrv_biofeedback::actuator::RecordingSink;
use hrv_biofeedback::clock::ManualClock;
use hrv_biofeedback::collector::ReplayDriver;
use hrv_biofeedback::config::Config;
use hrv_biofeedback::core::Mode;
use hrv_biofeedback::session::{CancellationToken, ControlLoop, SessionContext, SessionResources};
use hrv_biofeedback::sync::{send_start, Rendezvous, SyncError, SyncGate, SyncOutcome, START_TOKEN};
use hrv_biofeedback::SessionError;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn send_later(target: SocketAddr, payload: &'static str) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        send_start(target, payload).unwrap();
    })
}

#[test]
fn test_start_token_unblocks() {
    let mut gate = SyncGate::bind(loopback(), START_TOKEN).unwrap();
    let sender = send_later(gate.local_addr(), START_TOKEN);

    let outcome = gate
        .await_start(Some(Duration::from_secs(5)), &CancellationToken::new())
        .unwrap();
    sender.join().unwrap();

    assert!(matches!(outcome, SyncOutcome::Started { .. }));
}

#[test]
fn test_unexpected_payload_still_unblocks() {
    let mut gate = SyncGate::bind(loopback(), START_TOKEN).unwrap();
    let sender = send_later(gate.local_addr(), "go");

    let outcome = gate
        .await_start(Some(Duration::from_secs(5)), &CancellationToken::new())
        .unwrap();
    sender.join().unwrap();

    match outcome {
        SyncOutcome::UnexpectedSignal { payload, .. } => assert_eq!(payload, "go"),
        other => panic!("expected UnexpectedSignal, got {other:?}"),
    }
}

#[test]
fn test_sync_timeout_tears_down_without_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.sensor.sample_rate_hz = 4;
    config.window = Duration::from_secs(2);
    config.sync.timeout = Some(Duration::from_millis(300));

    let clock = ManualClock::new();
    let sink = RecordingSink::new();
    let gate = SyncGate::bind(loopback(), START_TOKEN).unwrap();
    let ctx = SessionContext::new(2, Mode::Modulated, dir.path().to_path_buf(), config).unwrap();
    let resources = SessionResources {
        lock: None,
        rendezvous: Box::new(gate),
        sensor: Box::new(ReplayDriver::new(vec![0.0; 100], 4, clock.clone())),
        audio: Some(Box::new(sink.clone())),
    };

    let result = ControlLoop::new(ctx, resources, CancellationToken::new())
        .with_clock(clock)
        .run();

    assert!(matches!(
        result,
        Err(SessionError::Sync(SyncError::Timeout(_)))
    ));
    assert!(sink.is_closed());
    assert!(!dir.path().join("ppg_data_cond_2.csv").exists());
}
