//! Interactive stage control
//!
//! Input is produced elsewhere (a terminal reader task, a test) and arrives as
//! [`InputEvent`]s on a bounded channel. The job's interactive loop is the
//! only consumer and applies each event through [`InteractiveControls`].

use crate::controller::{ControllerError, MotionController};
use crate::core::axis::Axis;
use crate::execution::job::JobError;
use crate::sensor::{Sensor, SensorError, EXPOSURE_SETTING, GAIN_SETTING};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capacity of the input event queue
pub const INPUT_QUEUE_CAPACITY: usize = 16;

/// Key bindings shown by the help command
pub const COMMANDS: [(&str, &str); 14] = [
    ("left/right", "Jog X"),
    ("up/down", "Jog Y"),
    ("page_up/page_down", "Jog Z"),
    ("+/-", "XY step size"),
    ("insert/delete", "Z step size"),
    ("home", "Return motors to zero"),
    ("e/E", "Decrease/increase exposure time"),
    ("g/G", "Decrease/increase gain"),
    ("a/A", "Decrease/increase adjustment factor"),
    ("p", "Report current position"),
    ("t", "Toggle position reporting after moves"),
    ("r", "Reset controller"),
    ("s", "Show sensor settings"),
    ("q", "Quit"),
];

/// Which jog step size a key adjusts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPlane {
    Xy,
    Z,
}

/// One operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Jog { axis: Axis, forward: bool },
    Home,
    StepSize { plane: StepPlane, increase: bool },
    Exposure { increase: bool },
    Gain { increase: bool },
    AdjustmentFactor { increase: bool },
    ShowPosition,
    TogglePositionDisplay,
    ShowSettings,
    Reset,
    Help,
    Quit,
}

impl InputEvent {
    /// Translate a key name into an event
    pub fn from_key(key: &str) -> Option<Self> {
        let event = match key {
            "left" => InputEvent::Jog { axis: Axis::X, forward: false },
            "right" => InputEvent::Jog { axis: Axis::X, forward: true },
            "up" => InputEvent::Jog { axis: Axis::Y, forward: true },
            "down" => InputEvent::Jog { axis: Axis::Y, forward: false },
            "page_up" => InputEvent::Jog { axis: Axis::Z, forward: true },
            "page_down" => InputEvent::Jog { axis: Axis::Z, forward: false },
            "home" => InputEvent::Home,
            "plus" | "+" => InputEvent::StepSize { plane: StepPlane::Xy, increase: true },
            "minus" | "-" => InputEvent::StepSize { plane: StepPlane::Xy, increase: false },
            "insert" => InputEvent::StepSize { plane: StepPlane::Z, increase: true },
            "delete" => InputEvent::StepSize { plane: StepPlane::Z, increase: false },
            "e" => InputEvent::Exposure { increase: false },
            "E" => InputEvent::Exposure { increase: true },
            "g" => InputEvent::Gain { increase: false },
            "G" => InputEvent::Gain { increase: true },
            "a" => InputEvent::AdjustmentFactor { increase: false },
            "A" => InputEvent::AdjustmentFactor { increase: true },
            "p" => InputEvent::ShowPosition,
            "t" => InputEvent::TogglePositionDisplay,
            "s" | "f" => InputEvent::ShowSettings,
            "r" => InputEvent::Reset,
            "h" | "?" => InputEvent::Help,
            "q" => InputEvent::Quit,
            _ => return None,
        };
        Some(event)
    }
}

/// Create the bounded queue feeding the interactive loop
pub fn input_channel() -> (mpsc::Sender<InputEvent>, mpsc::Receiver<InputEvent>) {
    mpsc::channel(INPUT_QUEUE_CAPACITY)
}

/// Whether the loop should keep going after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Quit,
}

/// Runtime state of interactive mode
#[derive(Debug, Clone, PartialEq)]
pub struct InteractiveControls {
    /// Microsteps per X/Y jog
    pub xy_factor: i64,

    /// Microsteps per Z/W jog
    pub z_factor: i64,

    /// Fraction applied when adjusting exposure or gain
    pub adjustment: f64,

    /// Report the position after every move
    pub show_position: bool,
}

impl Default for InteractiveControls {
    fn default() -> Self {
        Self {
            xy_factor: 1,
            z_factor: 1,
            adjustment: 0.05,
            show_position: false,
        }
    }
}

impl InteractiveControls {
    pub fn new() -> Self {
        Self::default()
    }

    fn factor_for(&self, axis: Axis) -> i64 {
        match axis {
            Axis::X | Axis::Y => self.xy_factor,
            Axis::Z | Axis::W => self.z_factor,
        }
    }

    /// Apply one event to the controller or sensor.
    ///
    /// Operator mistakes (jogging an axis that is not configured, a sensor
    /// value out of range) are logged and ignored; wire errors are returned.
    pub async fn apply(
        &mut self,
        event: InputEvent,
        controller: &mut MotionController,
        sensor: &mut dyn Sensor,
    ) -> Result<Outcome, JobError> {
        match event {
            InputEvent::Jog { axis, forward } => {
                let factor = self.factor_for(axis);
                let factor = if forward { factor } else { -factor };
                match controller.jog(axis, factor).await {
                    Ok(_) => self.report_after_move(controller),
                    Err(ControllerError::ConfigValidation(reason)) => warn!("Cannot jog: {}", reason),
                    Err(e) => return Err(e.into()),
                }
            }
            InputEvent::Home => {
                controller.home().await?;
                self.report_after_move(controller);
            }
            InputEvent::StepSize { plane, increase } => {
                let factor = match plane {
                    StepPlane::Xy => &mut self.xy_factor,
                    StepPlane::Z => &mut self.z_factor,
                };
                *factor = if increase { *factor + 1 } else { (*factor - 1).max(1) };
                let factor = *factor;
                let axis = match plane {
                    StepPlane::Xy => Axis::X,
                    StepPlane::Z => Axis::Z,
                };
                match controller.motor(axis) {
                    Some(motor) => info!(
                        "{:?} step size: {}",
                        plane,
                        factor as f64 * motor.microstep()
                    ),
                    None => info!("{:?} step factor: {}", plane, factor),
                }
            }
            InputEvent::Exposure { increase } => self.adjust(sensor, EXPOSURE_SETTING, increase).await?,
            InputEvent::Gain { increase } => self.adjust(sensor, GAIN_SETTING, increase).await?,
            InputEvent::AdjustmentFactor { increase } => {
                let delta = if increase { 0.01 } else { -0.01 };
                self.adjustment = (self.adjustment + delta).clamp(0.01, 1.0);
                info!("Adjustment factor: {:.2}%", self.adjustment * 100.0);
            }
            InputEvent::ShowPosition => {
                let position = controller.update_position().await?;
                info!("Position: {}", position.to_waypoint().to_csv());
            }
            InputEvent::TogglePositionDisplay => {
                self.show_position = !self.show_position;
                info!(
                    "Position display {}",
                    if self.show_position { "enabled" } else { "disabled" }
                );
            }
            InputEvent::ShowSettings => {
                for (key, value) in sensor.current_settings() {
                    info!("{}: {}", key, value);
                }
            }
            InputEvent::Reset => {
                controller.reset().await?;
                let position = controller.update_position().await?;
                info!("Position: {}", position.to_waypoint().to_csv());
            }
            InputEvent::Help => {
                for (keys, description) in COMMANDS {
                    info!("{:>18}  {}", keys, description);
                }
            }
            InputEvent::Quit => return Ok(Outcome::Quit),
        }
        Ok(Outcome::Continue)
    }

    fn report_after_move(&self, controller: &MotionController) {
        if self.show_position {
            info!("Position: {}", controller.position().to_waypoint().to_csv());
        }
    }

    async fn adjust(&self, sensor: &mut dyn Sensor, key: &str, increase: bool) -> Result<(), JobError> {
        let Some(current) = sensor.current_settings().get(key).and_then(Value::as_f64) else {
            warn!("Sensor has no '{}' setting", key);
            return Ok(());
        };
        let scale = if increase { 1.0 + self.adjustment } else { 1.0 - self.adjustment };
        match sensor.set_setting(key, current * scale).await {
            Ok(applied) => info!("{} {}", key, applied),
            Err(e @ (SensorError::OutOfRange { .. } | SensorError::UnknownSetting(_))) => {
                warn!("{}", e)
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
