//! Motor descriptors

use crate::controller::error::ControllerError;
use crate::core::axis::Axis;

/// Microstep fractions the drivers support
pub const ALLOWED_MICROSTEPS: [f64; 5] = [1.0, 0.5, 0.25, 0.125, 0.0625];

/// A physical axis and its microstep setting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motor {
    axis: Axis,
    microstep: f64,
}

impl Motor {
    pub fn new(axis: Axis, microstep: f64) -> Result<Self, ControllerError> {
        if !ALLOWED_MICROSTEPS.contains(&microstep) {
            return Err(ControllerError::ConfigValidation(format!(
                "{} is not a valid microstep for axis '{}', use one of {:?}",
                microstep, axis, ALLOWED_MICROSTEPS
            )));
        }
        Ok(Self { axis, microstep })
    }

    /// Parse the axis from its configuration symbol
    pub fn parse(axis: &str, microstep: f64) -> Result<Self, ControllerError> {
        let axis = axis
            .parse::<Axis>()
            .map_err(|e| ControllerError::ConfigValidation(e.to_string()))?;
        Self::new(axis, microstep)
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn microstep(&self) -> f64 {
        self.microstep
    }

    /// Firmware steps-per-unit value for this motor
    pub fn steps_per_unit(&self) -> f64 {
        1.0 / self.microstep
    }
}

impl std::fmt::Display for Motor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Motor {} @ 1/{}", self.axis, self.steps_per_unit())
    }
}
