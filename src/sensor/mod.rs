//! Imaging sensor abstraction

pub mod synthetic;

pub use synthetic::SyntheticSensor;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Setting key for the exposure time in microseconds
pub const EXPOSURE_SETTING: &str = "ExposureTime";

/// Setting key for the analog gain in dB
pub const GAIN_SETTING: &str = "Gain";

/// Error types for sensor operations
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor is not initialized")]
    NotInitialized,

    #[error("Frame acquisition failed: {0}")]
    Acquisition(String),

    #[error("Unknown sensor setting '{0}'")]
    UnknownSetting(String),

    #[error("Value {value} for '{key}' is outside {min}..={max}")]
    OutOfRange { key: String, value: f64, min: f64, max: f64 },
}

/// One monochrome frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,

    /// Row-major pixel values
    pub pixels: Arc<[u16]>,

    /// Acquisition counter of the sensor that produced it
    pub sequence: u64,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u16>, sequence: u64) -> Self {
        Self {
            width,
            height,
            pixels: pixels.into(),
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Pixels as little-endian bytes
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|p| p.to_le_bytes()).collect()
    }
}

/// An imaging device attached to the stage
#[async_trait]
pub trait Sensor: Send {
    async fn initialize(&mut self) -> Result<(), SensorError>;

    async fn capture_frame(&mut self) -> Result<Frame, SensorError>;

    /// Current settings, keyed by setting name
    fn current_settings(&self) -> BTreeMap<String, Value>;

    /// Change a numeric setting; returns the value actually applied
    async fn set_setting(&mut self, key: &str, value: f64) -> Result<f64, SensorError>;

    /// Release the device. Callers log failures and carry on.
    async fn shutdown(&mut self) -> Result<(), SensorError>;

    fn describe(&self) -> String {
        "sensor".to_string()
    }
}
