//! Test utility functions for stagescan
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use stagescan::controller::{Dialect, MotionController, SerialTransport, SimulatedFirmware};
use stagescan::core::config::{ControllerConfig, SensorConfig, SessionConfig};
use stagescan::core::Axis;
use stagescan::execution::{Job, StepRegistry};
use stagescan::sensor::{Frame, Sensor, SensorError, SyntheticSensor};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const XYZ: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

/// Transport that replays canned firmware lines and records everything written
pub struct ScriptedTransport {
    replies: VecDeque<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    open: bool,
    /// Block forever instead of timing out once the script runs dry
    hang_when_empty: bool,
}

impl ScriptedTransport {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            replies: lines
                .into_iter()
                .map(|line| format!("{}\r\n", line.as_ref()).into_bytes())
                .collect(),
            written: Arc::new(Mutex::new(Vec::new())),
            open: false,
            hang_when_empty: false,
        }
    }

    pub fn with_raw_line(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang_when_empty = true;
        self
    }

    /// Everything the controller wrote, shared with the test
    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }
}

/// Written bytes split into lines
pub fn written_lines(written: &Arc<Mutex<Vec<u8>>>) -> Vec<String> {
    let bytes = written.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes)
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl SerialTransport for ScriptedTransport {
    async fn open(&mut self, _port: &str, _baud_rate: u32, _read_timeout: Duration) -> io::Result<()> {
        self.open = true;
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.written.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.replies.pop_front() {
            Some(line) => Ok(Some(line)),
            None if self.hang_when_empty => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Sensor that counts calls and optionally fails on capture
#[derive(Default)]
pub struct MockSensor {
    pub captures: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    pub fail_capture: bool,
}

#[async_trait]
impl Sensor for MockSensor {
    async fn initialize(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Frame, SensorError> {
        if self.fail_capture {
            return Err(SensorError::Acquisition("lens cap on".to_string()));
        }
        let sequence = self.captures.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(Frame::new(2, 2, vec![1, 2, 3, 4], sequence))
    }

    fn current_settings(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    async fn set_setting(&mut self, key: &str, _value: f64) -> Result<f64, SensorError> {
        Err(SensorError::UnknownSetting(key.to_string()))
    }

    async fn shutdown(&mut self) -> Result<(), SensorError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "mock sensor".to_string()
    }
}

/// Controller config with fast polling, suitable for the simulator
pub fn fast_config(dialect: Dialect, axes: &[Axis]) -> ControllerConfig {
    let mut config = ControllerConfig::new(dialect, "sim", axes);
    config.poll_interval_ms = Some(1);
    config.step_time_secs = 1.0;
    config
}

pub fn simulated_controller(dialect: Dialect, speed: f64) -> (MotionController, stagescan::controller::simulator::CommandLog) {
    let sim = SimulatedFirmware::new(dialect, &XYZ).with_speed(speed);
    let log = sim.command_log();
    let controller = MotionController::new(fast_config(dialect, &XYZ), Box::new(sim)).unwrap();
    (controller, log)
}

pub fn scripted_controller(dialect: Dialect, transport: ScriptedTransport) -> MotionController {
    MotionController::new(fast_config(dialect, &XYZ), Box::new(transport)).unwrap()
}

/// Session YAML against the simulator, writing sessions below `root`
pub fn session_yaml(root: &std::path::Path, job_body: &str) -> String {
    format!(
        r#"
controller:
  port: sim
  step_time_secs: 1.0
  poll_interval_ms: 1
  motors: [{{axis: x}}, {{axis: y}}, {{axis: z}}]
sensor:
  width: 8
  height: 4
job:
  path: "{}"
{}
"#,
        root.display(),
        job_body
    )
}

pub fn session_config(root: &std::path::Path, job_body: &str) -> SessionConfig {
    SessionConfig::from_yaml(&session_yaml(root, job_body)).unwrap()
}

/// Job wired to the simulator and the synthetic sensor
pub fn simulated_job(config: SessionConfig) -> Job {
    let sim = SimulatedFirmware::new(config.controller.dialect, &config.controller.axes());
    let controller = MotionController::new(config.controller.clone(), Box::new(sim)).unwrap();
    let sensor = Box::new(SyntheticSensor::new(&config.sensor));
    Job::new(config, controller, sensor, &StepRegistry::with_builtins()).unwrap()
}

pub fn sensor_config() -> SensorConfig {
    SensorConfig::default()
}
