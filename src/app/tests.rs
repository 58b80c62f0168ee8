use super::*;
use crate::config::DepthcamConfig;
use crate::events::{DepthcamEvent, EventBus};
use crate::registry::{ChannelInfo, FrameRegistry};
use crate::session::{Recorder, RecordingOptions};
use crate::source::SyntheticSensor;
use crate::frame::{FrameDescription, PixelFormat};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn test_config(output: &std::path::Path) -> DepthcamConfig {
    let mut config = DepthcamConfig::default();
    config.recording.output_path = output.to_string_lossy().to_string();
    config.recording.frame_rate = 50;
    config.sensor.fps = 100;
    config
}

fn small_orchestrator(config: DepthcamConfig) -> DepthcamOrchestrator {
    DepthcamOrchestrator::with_sensors(
        config,
        Box::new(SyntheticSensor::color(8, 4, 100)),
        Box::new(SyntheticSensor::depth(8, 4, 100)),
    )
}

fn recorder(root: &std::path::Path) -> Mutex<Recorder> {
    let registry = Arc::new(FrameRegistry::new([ChannelInfo {
        name: "ColorStream".to_string(),
        description: FrameDescription::new(2, 2, PixelFormat::Rgba32),
    }]));
    Mutex::new(Recorder::new(registry, RecordingOptions::new(root, 30)))
}

#[test]
fn test_format_record_time() {
    assert_eq!(format_record_time(Duration::from_secs(0)), "00:00:00");
    assert_eq!(format_record_time(Duration::from_secs(59)), "00:00:59");
    assert_eq!(format_record_time(Duration::from_secs(3723)), "01:02:03");
    assert_eq!(format_record_time(Duration::from_millis(61_900)), "00:01:01");
}

#[tokio::test]
async fn test_toggle_starts_then_stops() {
    let root = tempfile::tempdir().unwrap();
    let recorder = recorder(root.path());
    let bus = EventBus::new(10);
    let mut notifications = bus.subscribe();

    assert!(handle_command(&recorder, &bus, DepthcamEvent::toggle_recording())
        .await
        .is_none());
    assert!(recorder.lock().await.is_active());
    assert_eq!(
        notifications.recv().await.unwrap().event_type(),
        "recording_started"
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle_command(&recorder, &bus, DepthcamEvent::toggle_recording()).await;
    assert!(!recorder.lock().await.is_active());
    assert_eq!(
        notifications.recv().await.unwrap().event_type(),
        "recording_stopped"
    );
}

#[tokio::test]
async fn test_start_while_active_reports_failure() {
    let root = tempfile::tempdir().unwrap();
    let recorder = recorder(root.path());
    let bus = EventBus::new(10);
    let mut notifications = bus.subscribe();

    let start = || DepthcamEvent::StartRecording {
        timestamp: std::time::SystemTime::now(),
    };
    handle_command(&recorder, &bus, start()).await;
    handle_command(&recorder, &bus, start()).await;

    let _started = notifications.recv().await.unwrap();
    match notifications.recv().await.unwrap() {
        DepthcamEvent::RecordingFailed { reason } => assert!(reason.contains("already active")),
        other => panic!("Unexpected event: {:?}", other),
    }

    recorder.lock().await.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_command_returns_reason() {
    let root = tempfile::tempdir().unwrap();
    let recorder = recorder(root.path());
    let bus = EventBus::new(10);

    let reason = handle_command(&recorder, &bus, DepthcamEvent::shutdown("test")).await;
    assert_eq!(reason, Some(ShutdownReason::UserRequest("test".to_string())));
}

#[tokio::test]
async fn test_timed_recording_runs_to_completion() {
    let root = tempfile::tempdir().unwrap();
    let mut orchestrator = small_orchestrator(test_config(root.path()));
    orchestrator.set_record_duration(Some(Duration::from_millis(300)));

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let exit_code = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit_code, 0);

    // One session directory with both channel files and the manifest
    let sessions: Vec<_> = std::fs::read_dir(root.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(sessions.len(), 1);
    for file in [
        "ColorStream.frames",
        "DepthStream.frames",
        "recordings.log",
        "session.json",
        "LUT.csv",
    ] {
        assert!(sessions[0].join(file).exists(), "missing {}", file);
    }

    assert_eq!(
        orchestrator.get_component_state("acquisition").await,
        Some(ComponentState::Stopped)
    );
    assert!(!orchestrator.recorder().lock().await.is_active());
}

#[tokio::test]
async fn test_shutdown_without_session_is_clean() {
    let root = tempfile::tempdir().unwrap();
    let mut orchestrator = small_orchestrator(test_config(root.path()));
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orchestrator.registry().latest("DepthStream").unwrap().sequence > 0);

    assert_eq!(orchestrator.shutdown().await.unwrap(), 0);
    assert_eq!(std::fs::read_dir(root.path()).map(|d| d.count()).unwrap_or(0), 0);
}
