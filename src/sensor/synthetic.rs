//! Generated frames for dry runs

use crate::core::config::SensorConfig;
use crate::sensor::{Frame, Sensor, SensorError, EXPOSURE_SETTING, GAIN_SETTING};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

const EXPOSURE_RANGE: (f64, f64) = (10.0, 1_000_000.0);
const GAIN_RANGE: (f64, f64) = (0.0, 48.0);

/// Sensor producing a moving gradient scaled by exposure and gain
#[derive(Debug, Clone)]
pub struct SyntheticSensor {
    width: u32,
    height: u32,
    exposure_us: f64,
    gain_db: f64,
    initialized: bool,
    captured: u64,
}

impl SyntheticSensor {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            exposure_us: config.exposure_us,
            gain_db: config.gain_db,
            initialized: false,
            captured: 0,
        }
    }

    /// Frames captured since creation
    pub fn captured(&self) -> u64 {
        self.captured
    }

    fn brightness(&self) -> f64 {
        let gain = 10f64.powf(self.gain_db / 20.0);
        (self.exposure_us / EXPOSURE_RANGE.1 * gain).min(1.0)
    }
}

#[async_trait]
impl Sensor for SyntheticSensor {
    async fn initialize(&mut self) -> Result<(), SensorError> {
        self.initialized = true;
        debug!("Synthetic sensor {}x{} ready", self.width, self.height);
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Frame, SensorError> {
        if !self.initialized {
            return Err(SensorError::NotInitialized);
        }

        let scale = self.brightness() * u16::MAX as f64;
        let span = (self.width + self.height).max(1) as f64;
        let offset = self.captured;
        let pixels: Vec<u16> = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .map(|(x, y)| {
                let phase = ((x + y) as u64 + offset) as f64 % span / span;
                (phase * scale) as u16
            })
            .collect();

        self.captured += 1;
        Ok(Frame::new(self.width, self.height, pixels, self.captured))
    }

    fn current_settings(&self) -> BTreeMap<String, Value> {
        let mut settings = BTreeMap::new();
        settings.insert(EXPOSURE_SETTING.to_string(), Value::from(self.exposure_us));
        settings.insert(GAIN_SETTING.to_string(), Value::from(self.gain_db));
        settings.insert("Width".to_string(), Value::from(self.width));
        settings.insert("Height".to_string(), Value::from(self.height));
        settings
    }

    async fn set_setting(&mut self, key: &str, value: f64) -> Result<f64, SensorError> {
        let (slot, (min, max)) = match key {
            EXPOSURE_SETTING => (&mut self.exposure_us, EXPOSURE_RANGE),
            GAIN_SETTING => (&mut self.gain_db, GAIN_RANGE),
            other => return Err(SensorError::UnknownSetting(other.to_string())),
        };
        if !(min..=max).contains(&value) {
            return Err(SensorError::OutOfRange {
                key: key.to_string(),
                value,
                min,
                max,
            });
        }
        *slot = value;
        Ok(value)
    }

    async fn shutdown(&mut self) -> Result<(), SensorError> {
        self.initialized = false;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("synthetic sensor {}x{}", self.width, self.height)
    }
}
