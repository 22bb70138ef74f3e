//! Session configuration from YAML

use crate::controller::dialect::Dialect;
use crate::controller::motor::{Motor, ALLOWED_MICROSTEPS};
use crate::core::axis::Axis;
use crate::core::step::StepRef;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

/// Top-level session configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Motion controller connection and motors
    pub controller: ControllerConfig,

    /// Imaging sensor settings
    #[serde(default)]
    pub sensor: SensorConfig,

    /// What to do once everything is connected
    pub job: JobConfig,
}

/// Motion controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Firmware dialect spoken on the wire
    #[serde(default)]
    pub dialect: Dialect,

    /// Serial device path, e.g. `/dev/ttyUSB0`
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Upper bound for a single line read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Upper bound for the acknowledgement of the initial `G0`
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Estimated seconds per unit of travel
    #[serde(default = "default_step_time_secs")]
    pub step_time_secs: f64,

    /// Safety factor applied to the estimated travel time
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,

    /// Delay between position polls while waiting for a move (defaults to the step time)
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Feed rate used for jog moves
    #[serde(default = "default_jog_feed_rate")]
    pub jog_feed_rate: u32,

    /// Motors in wire order
    pub motors: Vec<MotorConfig>,
}

/// Motor entry as written in YAML
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorConfig {
    pub axis: Axis,

    #[serde(default = "default_microstep")]
    pub microstep: f64,
}

/// Imaging sensor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Whether a sensor is attached at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_frame_width")]
    pub width: u32,

    #[serde(default = "default_frame_height")]
    pub height: u32,

    /// Exposure time in microseconds
    #[serde(default = "default_exposure_us")]
    pub exposure_us: f64,

    /// Analog gain in dB
    #[serde(default)]
    pub gain_db: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: default_frame_width(),
            height: default_frame_height(),
            exposure_us: default_exposure_us(),
            gain_db: 0.0,
        }
    }
}

/// How waypoints are visited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Walk the configured sequence once
    #[default]
    Automatic,
    /// Drive the stage from keyboard events
    Interactive,
}

/// Job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name, used for the session directory and history
    pub name: String,

    /// Directory under which session directories are created
    #[serde(default = "default_session_root")]
    pub path: String,

    #[serde(default)]
    pub mode: JobMode,

    /// Range grammar, e.g. `x(0,10,1)y(0,5,1)`
    #[serde(default)]
    pub sequence: Option<String>,

    /// Path to a CSV file of coordinates
    #[serde(default)]
    pub csv: Option<String>,

    /// Inline coordinate tuples in configured axis order
    #[serde(default)]
    pub coordinates: Option<Vec<Vec<Option<f64>>>>,

    /// Processing steps run after every move
    #[serde(default)]
    pub pipeline: Vec<StepConfig>,

    /// Move every axis back to zero once the sequence is done
    #[serde(default = "default_true")]
    pub return_home: bool,
}

/// Pipeline step as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(alias = "m")]
    pub module: String,

    #[serde(alias = "f")]
    pub function: String,

    /// Prior step output or the live frame
    #[serde(default, alias = "i")]
    pub input: Option<StepRef>,

    /// Explicit keyword arguments, these win over ambient values
    #[serde(default, alias = "kw")]
    pub kwargs: Map<String, Value>,
}

impl StepConfig {
    pub fn name(&self) -> String {
        format!("{}.{}", self.module, self.function)
    }
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_ack_timeout_ms() -> u64 {
    3_000
}

fn default_step_time_secs() -> f64 {
    0.04
}

fn default_timeout_multiplier() -> f64 {
    20.0
}

fn default_jog_feed_rate() -> u32 {
    8_000
}

fn default_microstep() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_frame_width() -> u32 {
    64
}

fn default_frame_height() -> u32 {
    48
}

fn default_exposure_us() -> f64 {
    10_000.0
}

fn default_session_root() -> String {
    "./sessions".to_string()
}

impl ControllerConfig {
    /// Minimal configuration for the given port and axes, every other field at its default
    pub fn new(dialect: Dialect, port: impl Into<String>, axes: &[Axis]) -> Self {
        Self {
            dialect,
            port: port.into(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            step_time_secs: default_step_time_secs(),
            timeout_multiplier: default_timeout_multiplier(),
            poll_interval_ms: None,
            jog_feed_rate: default_jog_feed_rate(),
            motors: axes
                .iter()
                .map(|axis| MotorConfig { axis: *axis, microstep: default_microstep() })
                .collect(),
        }
    }

    /// Configured axes in wire order
    pub fn axes(&self) -> Vec<Axis> {
        self.motors.iter().map(|m| m.axis).collect()
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        match self.poll_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs_f64(self.step_time_secs.max(0.0)),
        }
    }

    /// Validate the motor list and timing constants
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            anyhow::bail!("Controller port must not be empty");
        }
        if self.motors.is_empty() {
            anyhow::bail!("At least one motor must be configured");
        }

        let mut seen = std::collections::HashSet::new();
        for motor in &self.motors {
            if !seen.insert(motor.axis) {
                anyhow::bail!("Motor axis '{}' is configured more than once", motor.axis);
            }
            Motor::new(motor.axis, motor.microstep).map_err(|_| {
                anyhow::anyhow!(
                    "Motor '{}' has microstep {}, expected one of {:?}",
                    motor.axis,
                    motor.microstep,
                    ALLOWED_MICROSTEPS
                )
            })?;
        }

        if !(self.step_time_secs.is_finite() && self.step_time_secs > 0.0) {
            anyhow::bail!("step_time_secs must be positive, got {}", self.step_time_secs);
        }
        if !(self.timeout_multiplier.is_finite() && self.timeout_multiplier > 0.0) {
            anyhow::bail!("timeout_multiplier must be positive, got {}", self.timeout_multiplier);
        }
        if self.read_timeout_ms == 0 {
            anyhow::bail!("read_timeout_ms must be positive");
        }

        Ok(())
    }
}

impl SessionConfig {
    /// Load session configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse session configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SessionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the fully resolved configuration, defaults included
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the session configuration
    pub fn validate(&self) -> Result<()> {
        self.controller.validate()?;

        if self.job.name.trim().is_empty() {
            anyhow::bail!("Job name must not be empty");
        }

        let sources = [
            self.job.sequence.is_some(),
            self.job.csv.is_some(),
            self.job.coordinates.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();

        match self.job.mode {
            JobMode::Automatic if sources == 0 => anyhow::bail!(
                "Automatic job '{}' needs one of 'sequence', 'csv' or 'coordinates'",
                self.job.name
            ),
            _ if sources > 1 => anyhow::bail!(
                "Job '{}' defines more than one of 'sequence', 'csv' and 'coordinates'",
                self.job.name
            ),
            _ => {}
        }

        for (index, step) in self.job.pipeline.iter().enumerate() {
            if let Some(StepRef::PriorOutput(source)) = step.input {
                if source >= index {
                    anyhow::bail!(
                        "Step {} ({}) takes input from step {}, which has not run yet",
                        index,
                        step.name(),
                        source
                    );
                }
            }
            if step.module.is_empty() || step.function.is_empty() {
                anyhow::bail!("Step {} must name both a module and a function", index);
            }
        }

        if self.sensor.width == 0 || self.sensor.height == 0 {
            anyhow::bail!("Sensor frame size must be non-zero");
        }

        Ok(())
    }
}
