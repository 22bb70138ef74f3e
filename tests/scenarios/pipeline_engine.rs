//! Test: pipeline chains built from configuration

use crate::helpers::*;
use serde_json::{json, Value};
use stagescan::core::config::{SessionConfig, StepConfig};
use stagescan::core::{AmbientContext, Axis, Kwargs, Pipeline, PipelineError, Position, StepValue};
use stagescan::execution::{PipelineEngine, PipelineEvent, StepRegistry};
use stagescan::sensor::SyntheticSensor;
use stagescan::sensor::Sensor;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

fn steps(yaml: &str) -> Vec<StepConfig> {
    serde_yaml::from_str(yaml).unwrap()
}

fn ambient_at(x: f64, y: f64) -> AmbientContext {
    let mut position = Position::zeroed(&XYZ);
    position.update(Axis::X, x);
    position.update(Axis::Y, y);
    AmbientContext::from_position(&position)
}

fn echo_registry() -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();
    registry.register("test", "echo", false, |_, kwargs: &Kwargs| {
        Ok(StepValue::Json(Value::Object(kwargs.clone())))
    });
    registry
}

/// Explicit kwargs shadow ambient values of the same name
#[tokio::test]
async fn test_explicit_kwargs_win() {
    let registry = echo_registry();
    let mut pipeline = Pipeline::from_config(
        &steps("- {m: test, f: echo, kw: {x_pos: 9.0, label: tile}}"),
        &registry,
    )
    .unwrap();
    let mut sensor = MockSensor::default();

    let report = PipelineEngine::new()
        .run(&mut pipeline, &ambient_at(1.0, 2.0), &mut sensor)
        .await
        .unwrap();

    match report.output(0) {
        Some(StepValue::Json(kwargs)) => {
            assert_eq!(kwargs["x_pos"], json!(9.0));
            assert_eq!(kwargs["y_pos"], json!(2.0));
            assert_eq!(kwargs["label"], json!("tile"));
            assert_eq!(kwargs["pos"]["x"], json!("1.000"));
        }
        other => panic!("unexpected output {:?}", other),
    }
    assert_eq!(sensor.captures.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unknown_step_rejected_at_build() {
    let result = Pipeline::from_config(&steps("- {m: frame, f: sharpen}"), &StepRegistry::with_builtins());
    assert!(matches!(result, Err(PipelineError::Reference { index: 0, .. })));
}

#[test]
fn test_forward_reference_rejected_at_build() {
    let result = Pipeline::from_config(
        &steps("- {m: frame, f: stats, i: 1}\n- {m: sensor, f: capture, i: camera}"),
        &StepRegistry::with_builtins(),
    );
    assert!(matches!(result, Err(PipelineError::Reference { index: 0, .. })));
}

/// One live frame feeds both the stats and the saved file
#[tokio::test]
async fn test_capture_stats_and_save() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::from_config(
        &steps(
            r#"
- {m: sensor, f: capture, i: camera}
- {m: frame, f: stats, i: 0}
- {m: frame, f: save, i: 0}
"#,
        ),
        &StepRegistry::with_builtins(),
    )
    .unwrap();
    let mut sensor = MockSensor::default();
    let ambient = ambient_at(0.5, 0.0).with_session_directory(dir.path());

    let mut engine = PipelineEngine::new();
    let report = engine.run(&mut pipeline, &ambient, &mut sensor).await.unwrap();

    assert_eq!(sensor.captures.load(Ordering::SeqCst), 1);
    match report.output(1) {
        Some(StepValue::Json(stats)) => {
            assert_eq!(stats["min"], json!(1));
            assert_eq!(stats["max"], json!(4));
        }
        other => panic!("unexpected stats {:?}", other),
    }
    let saved: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(saved.len(), 1);
    assert_eq!(engine.last_timings().split(", ").count(), 3);
    assert!(pipeline.steps().iter().all(|step| step.last_duration.is_some()));
}

#[tokio::test]
async fn test_guard_skips_remaining_steps() {
    let mut pipeline = Pipeline::from_config(
        &steps("- {m: pipeline, f: noop, kw: {x_min: 0.0, x_max: 10.0}}\n- {m: sensor, f: capture, i: camera}"),
        &StepRegistry::with_builtins(),
    )
    .unwrap();
    let mut engine = PipelineEngine::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));
    let mut sensor = MockSensor::default();

    let inside = engine.run(&mut pipeline, &ambient_at(5.0, 0.0), &mut sensor).await.unwrap();
    assert!(!inside.stopped_early());
    assert_eq!(sensor.captures.load(Ordering::SeqCst), 1);

    let outside = engine.run(&mut pipeline, &ambient_at(12.0, 0.0), &mut sensor).await.unwrap();
    assert_eq!(outside.stopped_at, Some(0));
    assert!(outside.output(1).is_none());
    assert_eq!(sensor.captures.load(Ordering::SeqCst), 1);

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|event| matches!(event, PipelineEvent::GuardStopped { index: 0, .. })));
}

#[tokio::test]
async fn test_kill_reports_position_and_limits() {
    let mut pipeline = Pipeline::from_config(
        &steps("- {m: pipeline, f: kill, kw: {y_max: 1.0}}"),
        &StepRegistry::with_builtins(),
    )
    .unwrap();

    let result = PipelineEngine::new()
        .run(&mut pipeline, &ambient_at(0.0, 3.0), &mut MockSensor::default())
        .await;

    match result {
        Err(PipelineError::Abort { position, limits, .. }) => {
            assert!(position.contains("y=3.000"));
            assert!(limits.contains("y_max"));
        }
        other => panic!("expected an abort, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sensor_failure_surfaces() {
    let mut pipeline = Pipeline::from_config(
        &steps("- {m: frame, f: stats}"),
        &StepRegistry::with_builtins(),
    )
    .unwrap();
    let mut sensor = MockSensor {
        fail_capture: true,
        ..MockSensor::default()
    };

    let result = PipelineEngine::new()
        .run(&mut pipeline, &AmbientContext::new(), &mut sensor)
        .await;
    assert!(matches!(result, Err(PipelineError::Sensor(_))));
}

#[tokio::test]
async fn test_bad_limit_argument() {
    let mut pipeline = Pipeline::from_config(
        &steps("- {m: pipeline, f: guard, kw: {x_max: wide}}"),
        &StepRegistry::with_builtins(),
    )
    .unwrap();
    let mut sensor = SyntheticSensor::new(&sensor_config());
    sensor.initialize().await.unwrap();

    let result = PipelineEngine::new()
        .run(&mut pipeline, &ambient_at(0.0, 0.0), &mut sensor)
        .await;
    assert!(matches!(result, Err(PipelineError::StepFailed { index: 0, .. })));
}

/// A guard fed by an earlier step's output ends the run without error
#[tokio::test]
async fn test_guard_with_input_loaded_from_config() {
    let root = tempfile::tempdir().unwrap();
    let config: SessionConfig = session_config(
        root.path(),
        r#"  name: guarded
  sequence: "x(0,1,1)"
  pipeline:
    - {m: sensor, f: capture, i: camera}
    - {m: frame, f: stats, i: 0}
    - {m: pipeline, f: guard, i: 1, kw: {x_max: -1.0}}
    - {m: frame, f: stats, i: 0}"#,
    );
    let registry = StepRegistry::with_builtins();
    let mut pipeline = Pipeline::from_config(&config.job.pipeline, &registry).unwrap();
    let mut sensor = MockSensor::default();

    let report = PipelineEngine::new()
        .run(&mut pipeline, &ambient_at(0.0, 0.0), &mut sensor)
        .await
        .unwrap();

    assert_eq!(report.stopped_at, Some(2));
    assert!(report.output(1).is_some());
    assert!(report.output(3).is_none());
    assert_eq!(sensor.captures.load(Ordering::SeqCst), 1);
}
