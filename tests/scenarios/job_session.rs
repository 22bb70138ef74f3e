//! Test: whole acquisition sessions against the simulator

use crate::helpers::*;
use stagescan::controller::{ControllerError, ControllerState, Dialect, MotionController, SimulatedFirmware};
use stagescan::core::config::{JobMode, SessionConfig};
use stagescan::core::{Axis, ExecutionStatus, PipelineError};
use stagescan::execution::{input_channel, InputEvent, Job, JobError, JobEvent, StepRegistry, PARAMETERS_FILE};
use stagescan::persistence::{InMemoryPersistence, PersistenceBackend};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

fn raw_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "raw"))
        .count()
}

fn job_with_mock_sensor(config: SessionConfig, sensor: MockSensor) -> Job {
    let sim = SimulatedFirmware::new(config.controller.dialect, &config.controller.axes());
    let controller = MotionController::new(config.controller.clone(), Box::new(sim)).unwrap();
    Job::new(config, controller, Box::new(sensor), &StepRegistry::with_builtins()).unwrap()
}

#[tokio::test]
async fn test_automatic_session() {
    let root = tempfile::tempdir().unwrap();
    let config = session_config(
        root.path(),
        r#"  name: scan
  sequence: "x(0,1,1)y(0,1,1)"
  pipeline:
    - {m: sensor, f: capture, i: camera}
    - {m: frame, f: save, i: 0}"#,
    );
    let mut job = simulated_job(config);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    job.add_event_handler(move |event| sink.lock().unwrap().push(event));

    job.execute(None).await.unwrap();

    assert_eq!(job.state().status, ExecutionStatus::Completed);
    assert_eq!(job.state().completed_waypoints, 4);
    assert_eq!(job.controller().state(), ControllerState::Shutdown);
    for axis in [Axis::X, Axis::Y, Axis::Z] {
        assert_eq!(job.controller().position().get(axis), Some("0.000"));
    }

    let session_dir = job.session_directory().to_path_buf();
    assert!(session_dir.starts_with(root.path()));
    assert!(job.name().starts_with("scan_"));
    assert_eq!(raw_files(&session_dir), 4);

    let events = events.lock().unwrap();
    let reached = events
        .iter()
        .filter(|event| matches!(event, JobEvent::WaypointReached { .. }))
        .count();
    assert_eq!(reached, 4);
    assert!(events.iter().any(|event| matches!(event, JobEvent::ReturnedHome)));
    assert!(matches!(
        events.last(),
        Some(JobEvent::SessionFinished { status: ExecutionStatus::Completed })
    ));
}

/// The resolved configuration lands next to the frames and loads back
#[tokio::test]
async fn test_parameters_written() {
    let root = tempfile::tempdir().unwrap();
    let config = session_config(
        root.path(),
        r#"  name: params
  coordinates: [[0.5, 0.5], [1.0]]
  return_home: false"#,
    );
    let mut job = simulated_job(config);

    job.execute(None).await.unwrap();

    let saved = SessionConfig::from_file(job.session_directory().join(PARAMETERS_FILE)).unwrap();
    assert_eq!(saved.job.name, "params");
    assert_eq!(saved.controller.baud_rate, 115_200);
    assert!(!saved.job.return_home);
    assert_eq!(job.controller().position().get(Axis::X), Some("1.000"));
    assert_eq!(job.controller().position().get(Axis::Y), Some("0.500"));
}

/// A kill step fails the session but both devices are still released
#[tokio::test]
async fn test_kill_shuts_everything_down() {
    let root = tempfile::tempdir().unwrap();
    let config = session_config(
        root.path(),
        r#"  name: fenced
  sequence: "x(0,2,1)"
  pipeline:
    - {m: pipeline, f: kill, kw: {x_max: 0.5}}"#,
    );
    let sensor = MockSensor::default();
    let shutdowns = Arc::clone(&sensor.shutdowns);
    let mut job = job_with_mock_sensor(config, sensor);

    let result = job.execute(None).await;

    assert!(matches!(result, Err(JobError::Pipeline(PipelineError::Abort { .. }))));
    assert_eq!(job.state().status, ExecutionStatus::Failed);
    assert_eq!(job.state().completed_waypoints, 2);
    assert_eq!(job.controller().state(), ControllerState::Shutdown);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_setup_failure_still_shuts_down() {
    let root = tempfile::tempdir().unwrap();
    let config = session_config(root.path(), "  name: broken\n  sequence: \"x(0,1,1)\"");
    let controller = MotionController::new(
        config.controller.clone(),
        Box::new(ScriptedTransport::new(["", "Smoothie"])),
    )
    .unwrap();
    let sensor = MockSensor::default();
    let shutdowns = Arc::clone(&sensor.shutdowns);
    let mut job = Job::new(config, controller, Box::new(sensor), &StepRegistry::with_builtins()).unwrap();

    let result = job.execute(None).await;

    assert!(matches!(result, Err(JobError::Controller(ControllerError::Protocol(_)))));
    assert_eq!(job.state().status, ExecutionStatus::Failed);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_interactive_session() {
    let root = tempfile::tempdir().unwrap();
    let config = session_config(root.path(), "  name: manual\n  mode: interactive");
    assert_eq!(config.job.mode, JobMode::Interactive);
    let mut job = simulated_job(config);
    assert!(job.is_interactive());
    assert!(job.sequence().is_empty());

    let (sender, receiver) = input_channel();
    sender.send(InputEvent::Jog { axis: Axis::X, forward: true }).await.unwrap();
    sender.send(InputEvent::Jog { axis: Axis::Y, forward: false }).await.unwrap();
    sender.send(InputEvent::ShowPosition).await.unwrap();
    sender.send(InputEvent::Exposure { increase: true }).await.unwrap();
    sender.send(InputEvent::Quit).await.unwrap();

    job.execute(Some(receiver)).await.unwrap();

    assert_eq!(job.state().status, ExecutionStatus::Completed);
    assert_eq!(job.controller().position().get(Axis::X), Some("1.000"));
    assert_eq!(job.controller().position().get(Axis::Y), Some("-1.000"));
    assert_eq!(job.status(), "");

    let summary = job.summary();
    assert_eq!(summary.mode, JobMode::Interactive);
    assert_eq!(summary.total_waypoints, 0);
}

/// Dropping the sender ends interactive mode like `Quit`
#[tokio::test]
async fn test_interactive_ends_when_input_closes() {
    let root = tempfile::tempdir().unwrap();
    let config = session_config(
        root.path(),
        "  name: manual\n  mode: interactive\n  pipeline:\n    - {m: pipeline, f: log}",
    );
    let mut job = simulated_job(config);
    let (sender, receiver) = input_channel();
    sender.send(InputEvent::Home).await.unwrap();
    drop(sender);

    job.execute(Some(receiver)).await.unwrap();
    assert_eq!(job.state().status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_interactive_needs_input() {
    let root = tempfile::tempdir().unwrap();
    let config = session_config(root.path(), "  name: manual\n  mode: interactive");
    let mut job = simulated_job(config);

    let result = job.execute(None).await;
    assert!(matches!(result, Err(JobError::MissingInput)));
}

#[tokio::test]
async fn test_session_history() {
    let root = tempfile::tempdir().unwrap();
    let config = session_config(root.path(), "  name: logged\n  sequence: \"z(0,0.5,0.25)\"");
    let mut job = simulated_job(config);
    job.execute(None).await.unwrap();

    let store = InMemoryPersistence::new();
    store.save_session(&job.summary()).await.unwrap();

    let sessions = store.list_sessions("logged").await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_name, job.name());
    assert_eq!(sessions[0].completed_waypoints, 3);
    assert_eq!(sessions[0].progress, 1.0);
    assert!(sessions[0].completed_at.is_some());
}

#[test]
fn test_dialect_from_config() {
    let root = tempfile::tempdir().unwrap();
    let yaml = session_yaml(root.path(), "  name: m\n  sequence: \"x(0,1,1)\"")
        .replace("  port: sim", "  dialect: marlin\n  port: sim");
    let config = SessionConfig::from_yaml(&yaml).unwrap();
    assert_eq!(config.controller.dialect, Dialect::Marlin);
}

#[test]
fn test_demo_configs_validate() {
    for name in ["scan.yaml", "manual.yaml"] {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(name);
        let config = SessionConfig::from_file(&path).unwrap();
        Job::build_sequence(&config).unwrap();
        stagescan::core::Pipeline::from_config(&config.job.pipeline, &StepRegistry::with_builtins()).unwrap();
    }
}
