//! Session Lifecycle Tests
//!
//! Mode transitions, stop policies and device commands of a
//! [`CaptureSession`] attached to an in-memory duplex link.

use std::f64::consts::TAU;
use std::ops::Range;
use std::time::Duration;

use gaitscope::config::CaptureConfig;
use gaitscope::pipeline::{CaptureSession, ProcessingMode};
use gaitscope::storage::StorageError;
use gaitscope::types::Channel;
use gaitscope::{CycleRecord, SessionError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

fn connect(session: &mut CaptureSession) -> DuplexStream {
    let (device, host) = tokio::io::duplex(8192);
    let (reader, writer) = tokio::io::split(host);
    session.connect_io("duplex", reader, writer).expect("connect");
    device
}

fn filtered_lines(start_ms: u64, count: u64) -> String {
    (0..count)
        .map(|i| {
            let t = start_ms + i * 10;
            format!("{{\"t\":{t},\"h\":{i}.5,\"hf\":{i}.0,\"hvf\":1.5,\"phase\":0,\"a\":-2.0,\"act\":true}}\n")
        })
        .collect()
}

/// Hip sinusoid with a 1.2 s period, shifted so it crosses zero upward at `offset_ms`.
fn hip_wave(offset_ms: f64, range: Range<u64>) -> String {
    range
        .step_by(10)
        .map(|t| {
            let h = 30.0 * (TAU * (t as f64 - offset_ms) / 1_200.0).sin();
            format!("{}\n", serde_json::json!({ "t": t, "h": h }))
        })
        .collect()
}

/// Poll `cond` until it holds or two seconds pass.
async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn test_raw_stop_discards_history() {
    let mut session = CaptureSession::new(CaptureConfig::default());
    let mut device = connect(&mut session);
    session.activate(ProcessingMode::Raw).expect("activate");

    device.write_all(filtered_lines(0, 50).as_bytes()).await.expect("write");
    let store = session.store(ProcessingMode::Raw);
    assert!(eventually(|| store.len() == 50).await);
    assert_eq!(store.snapshot(Channel::Ankle).expect("ankle").len(), 50);
    // Raw mode keeps only its own channels.
    assert!(store.snapshot(Channel::HipFiltered).is_none());

    assert_eq!(session.deactivate().await.expect("deactivate"), ProcessingMode::Raw);
    assert!(store.is_empty());
    assert!(session.active_mode().is_none());

    session.activate(ProcessingMode::Raw).expect("reactivate");
    assert!(session.store(ProcessingMode::Raw).is_empty());
    session.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_filtered_stop_retains_history_until_clear() {
    let mut session = CaptureSession::new(CaptureConfig::default());
    let mut device = connect(&mut session);
    session.activate(ProcessingMode::Filtered).expect("activate");

    device.write_all(filtered_lines(1_000, 40).as_bytes()).await.expect("write");
    let store = session.store(ProcessingMode::Filtered);
    assert!(eventually(|| store.len() == 40).await);

    session.deactivate().await.expect("deactivate");
    assert_eq!(store.len(), 40);
    assert_eq!(store.latest(Channel::HipFiltered), Some(39.0));
    assert_eq!(store.latest(Channel::Assist), Some(1.0));
    assert_eq!(store.latest(Channel::SwingProgress), None);
    assert_eq!(store.latest_timestamp(), Some(1_390));

    session.clear();
    assert!(store.is_empty());
    session.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_second_mode_rejected_while_active() {
    let mut session = CaptureSession::new(CaptureConfig::default());
    let _device = connect(&mut session);
    session.activate(ProcessingMode::Filtered).expect("activate");

    let err = session.activate(ProcessingMode::Raw).expect_err("second mode");
    assert!(matches!(
        err,
        SessionError::ModeActive {
            active: ProcessingMode::Filtered,
            requested: ProcessingMode::Raw,
        }
    ));
    assert_eq!(session.active_mode(), Some(ProcessingMode::Filtered));

    let err = session.activate(ProcessingMode::Filtered).expect_err("same mode twice");
    assert!(matches!(err, SessionError::ModeActive { .. }));

    session.deactivate().await.expect("deactivate");
    session.activate(ProcessingMode::Raw).expect("switch after stop");
    assert_eq!(session.active_mode(), Some(ProcessingMode::Raw));
    session.disconnect().await.expect("disconnect");
    assert!(session.active_mode().is_none());
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_samples_while_idle_are_not_replayed() {
    let mut session = CaptureSession::new(CaptureConfig::default());
    let mut device = connect(&mut session);

    device.write_all(filtered_lines(0, 30).as_bytes()).await.expect("write");
    assert!(eventually(|| session.stats().ingest.samples_published == 30).await);

    session.activate(ProcessingMode::Filtered).expect("activate");
    device.write_all(filtered_lines(5_000, 5).as_bytes()).await.expect("write");
    let store = session.store(ProcessingMode::Filtered);
    assert!(eventually(|| store.len() == 5).await);
    assert_eq!(store.timestamps().first(), Some(&5_000));
    session.disconnect().await.expect("disconnect");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_snapshots_stay_aligned_under_ingest() {
    let mut session = CaptureSession::new(CaptureConfig::default());
    let mut device = connect(&mut session);
    session.activate(ProcessingMode::Filtered).expect("activate");
    let store = session.store(ProcessingMode::Filtered);

    let writer = tokio::spawn(async move {
        for chunk in 0..20 {
            let lines = filtered_lines(chunk * 1_000, 100);
            device.write_all(lines.as_bytes()).await.expect("write");
            tokio::task::yield_now().await;
        }
        device
    });

    for _ in 0..200 {
        let snapshot = store.snapshot_all();
        for channel in Channel::ALL {
            let series = snapshot.get(channel).expect("filtered channel");
            assert_eq!(series.len(), snapshot.timestamps.len());
        }
        tokio::task::yield_now().await;
    }

    let _device = writer.await.expect("writer task");
    assert!(eventually(|| store.len() == 2_000).await);
    assert_eq!(store.timestamps().len(), 2_000);
    session.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_clear_empties_stores_and_cycle() {
    let mut session = CaptureSession::new(CaptureConfig::default());
    let mut device = connect(&mut session);
    session.activate(ProcessingMode::Raw).expect("activate");

    let mut lines = String::new();
    for t in (0..4_000u64).step_by(10) {
        let h = 30.0 * (std::f64::consts::TAU * t as f64 / 1_200.0).sin();
        lines.push_str(&serde_json::json!({ "t": t, "h": h }).to_string());
        lines.push('\n');
    }
    device.write_all(lines.as_bytes()).await.expect("write");
    let store = session.store(ProcessingMode::Raw);
    assert!(eventually(|| store.len() == 400).await);
    let cycles = session.cycles();
    assert!(cycles.generation() >= 2);
    assert!(cycles.latest().is_some());

    session.clear();
    assert!(cycles.latest().is_none());
    assert!(store.is_empty());
    assert_eq!(session.active_mode(), Some(ProcessingMode::Raw));
    session.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_clear_restarts_cycle_detection() {
    let mut session = CaptureSession::new(CaptureConfig::default());
    let mut device = connect(&mut session);
    session.activate(ProcessingMode::Raw).expect("activate");
    let store = session.store(ProcessingMode::Raw);
    let cycles = session.cycles();

    // Maximum at 300 ms anchors the detector.
    device.write_all(hip_wave(0.0, 0..700).as_bytes()).await.expect("write");
    assert!(eventually(|| store.len() == 70).await);
    session.clear();

    // Next maximum at 1300 ms. Paired with the pre-clear anchor it would
    // close a 1 s cycle.
    device.write_all(hip_wave(1_000.0, 1_000..2_000).as_bytes()).await.expect("write");
    assert!(eventually(|| store.len() == 100).await);
    assert!(cycles.latest().is_none());
    assert_eq!(cycles.generation(), 0);

    device.write_all(hip_wave(1_000.0, 2_000..2_800).as_bytes()).await.expect("write");
    assert!(eventually(|| cycles.generation() == 1).await);
    let latest = cycles.latest().expect("cycle after clear");
    assert_eq!(latest.device_start_ms, 1_300);
    assert_eq!(latest.sample_count(), 121);
    session.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_device_clock_regression_restarts_detection() {
    let mut session = CaptureSession::new(CaptureConfig::default());
    let mut device = connect(&mut session);
    session.activate(ProcessingMode::Raw).expect("activate");
    let store = session.store(ProcessingMode::Raw);
    let cycles = session.cycles();

    device.write_all(hip_wave(0.0, 0..700).as_bytes()).await.expect("write");
    assert!(eventually(|| store.len() == 70).await);

    // Device rebooted: the clock restarts at zero without a clear. Minima at
    // 500 and 1700 ms bound the only cycle of the new run.
    device.write_all(hip_wave(800.0, 0..2_000).as_bytes()).await.expect("write");
    assert!(eventually(|| store.len() == 270).await);
    assert!(eventually(|| cycles.generation() >= 1).await);

    assert_eq!(cycles.generation(), 1);
    let latest = cycles.latest().expect("cycle after regression");
    assert_eq!(latest.device_start_ms, 500);
    assert_eq!(latest.sample_count(), 121);
    assert!((latest.duration_secs - 1.2).abs() < 1e-9);
    session.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_commands_reach_device() {
    let mut config = CaptureConfig::default();
    config.upload.handshake_delay_ms = 5;
    let mut session = CaptureSession::new(config);
    let device = connect(&mut session);
    let (device_rx, _device_tx) = tokio::io::split(device);
    let mut device_lines = BufReader::new(device_rx).lines();

    session.send_command("gc").await.expect("send");
    assert_eq!(device_lines.next_line().await.expect("read").as_deref(), Some("gc"));

    let record = CycleRecord::from_samples(&[(100, 1.0, Some(2.0)), (110, 3.0, Some(4.0))]).expect("record");
    session.upload_gait(&record).await.expect("upload");
    assert_eq!(device_lines.next_line().await.expect("read").as_deref(), Some("loadgait"));
    let payload = device_lines.next_line().await.expect("read").expect("payload line");
    let value: serde_json::Value = serde_json::from_str(&payload).expect("payload json");
    assert_eq!(value["data_type"], "gait_cycle");
    assert_eq!(value["data_points"], 2);
    assert_eq!(value["ankle_angle"][1], 4.0);

    session.disconnect().await.expect("disconnect");
    assert!(matches!(session.send_command("gcs").await, Err(SessionError::NotConnected)));
}

#[tokio::test]
async fn test_rejected_upload_sends_nothing() {
    let mut config = CaptureConfig::default();
    config.upload.handshake_delay_ms = 5;
    let mut session = CaptureSession::new(config);
    let device = connect(&mut session);
    let (device_rx, _device_tx) = tokio::io::split(device);
    let mut device_lines = BufReader::new(device_rx).lines();

    let gappy = CycleRecord::from_samples(&[(100, 1.0, Some(2.0)), (110, 3.0, None)]).expect("record");
    let err = session.upload_gait(&gappy).await.expect_err("ankle gap");
    assert!(matches!(err, SessionError::Storage(StorageError::MissingAnkle { missing: 1 })));

    let samples: Vec<_> = (0..201u64).map(|i| (i * 5, 1.0, Some(0.0))).collect();
    let oversized = CycleRecord::from_samples(&samples).expect("record");
    let err = session.upload_gait(&oversized).await.expect_err("too many points");
    assert!(matches!(
        err,
        SessionError::Storage(StorageError::TooManyPoints { points: 201, max: 200 })
    ));

    // Neither attempt wrote to the link.
    session.send_command("gc").await.expect("send");
    assert_eq!(device_lines.next_line().await.expect("read").as_deref(), Some("gc"));
    session.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_upload_ack_from_device() {
    let mut config = CaptureConfig::default();
    config.upload.handshake_delay_ms = 5;
    let mut session = CaptureSession::new(config);
    let device = connect(&mut session);
    let (device_rx, mut device_tx) = tokio::io::split(device);
    let mut device_lines = BufReader::new(device_rx).lines();

    let record = CycleRecord::from_samples(&[(100, 1.0, Some(2.0)), (110, 3.0, Some(4.0))]).expect("record");
    let before = session.stats().ingest.upload_acks;
    session.upload_gait(&record).await.expect("upload");
    assert!(!session.wait_for_upload_ack(before, Duration::from_millis(50)).await);

    assert_eq!(device_lines.next_line().await.expect("read").as_deref(), Some("loadgait"));
    device_lines.next_line().await.expect("read").expect("payload line");
    device_tx
        .write_all(b">>> Gait trajectory loaded: 2 points, duration=0.01 s\n")
        .await
        .expect("device reply");

    assert!(session.wait_for_upload_ack(before, Duration::from_secs(2)).await);
    assert_eq!(session.stats().ingest.upload_acks, before + 1);
    // Status lines are prompts, not forwarded text.
    assert!(session.drain_raw_lines().is_empty());
    session.disconnect().await.expect("disconnect");
}
