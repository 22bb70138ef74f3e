//! Motion controller protocol driver
//!
//! [`MotionController`] owns the serial session with Grbl or Marlin firmware.
//! It converts logical moves into wire commands, keeps a cache of the last
//! reported position and decides when a move has converged by polling the
//! firmware against a timeout derived from the travel distance.

pub mod dialect;
pub mod error;
pub mod motor;
pub mod simulator;
pub mod transport;

pub use dialect::Dialect;
pub use error::ControllerError;
pub use motor::Motor;
pub use simulator::SimulatedFirmware;
pub use transport::{SerialTransport, TokioSerialTransport};

use crate::core::axis::{Axis, Position, Waypoint};
use crate::core::config::ControllerConfig;
use dialect::{ACK, SOFT_RESET};
use regex::Regex;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of the serial session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Connecting,
    AwaitingBanner,
    Ready,
    Moving,
    Jogging,
    Resetting,
    /// An unrecoverable protocol error occurred
    Faulted,
    Shutdown,
}

/// Driver for one serial-attached motion controller
pub struct MotionController {
    config: ControllerConfig,
    transport: Box<dyn SerialTransport>,
    motors: Vec<Motor>,
    position: Position,
    position_pattern: Regex,
    state: ControllerState,
}

impl MotionController {
    /// Build a controller from validated configuration.
    ///
    /// # Errors
    /// Returns `ControllerError::ConfigValidation` if a motor has an invalid
    /// microstep or an axis is configured twice.
    pub fn new(config: ControllerConfig, transport: Box<dyn SerialTransport>) -> Result<Self, ControllerError> {
        let mut motors: Vec<Motor> = Vec::with_capacity(config.motors.len());
        for motor in &config.motors {
            if motors.iter().any(|m| m.axis() == motor.axis) {
                return Err(ControllerError::ConfigValidation(format!(
                    "axis '{}' is configured more than once",
                    motor.axis
                )));
            }
            motors.push(Motor::new(motor.axis, motor.microstep)?);
        }
        if motors.is_empty() {
            return Err(ControllerError::ConfigValidation("no motors configured".to_string()));
        }

        let position_pattern = config
            .dialect
            .position_pattern()
            .map_err(|e| ControllerError::ConfigValidation(e.to_string()))?;
        let axes: Vec<Axis> = motors.iter().map(Motor::axis).collect();

        Ok(Self {
            position: Position::zeroed(&axes),
            config,
            transport,
            motors,
            position_pattern,
            state: ControllerState::Disconnected,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub fn motors(&self) -> &[Motor] {
        &self.motors
    }

    /// Configured axes in wire order
    pub fn axes(&self) -> Vec<Axis> {
        self.motors.iter().map(Motor::axis).collect()
    }

    /// Last known position, without querying the firmware
    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn motor(&self, axis: Axis) -> Option<&Motor> {
        self.motors.iter().find(|m| m.axis() == axis)
    }

    /// Open the serial channel
    pub async fn connect(&mut self) -> Result<(), ControllerError> {
        self.state = ControllerState::Connecting;
        let result = self
            .transport
            .open(&self.config.port, self.config.baud_rate, self.config.read_timeout())
            .await;

        match result {
            Ok(()) => {
                info!("Connected to {} at {} baud", self.config.port, self.config.baud_rate);
                Ok(())
            }
            Err(e) => {
                self.state = ControllerState::Disconnected;
                Err(ControllerError::Connection {
                    port: self.config.port.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Bring the firmware into a known state.
    ///
    /// Reads the two greeting lines and checks the banner, sends `G0` and
    /// waits for its acknowledgement, then pushes per-motor calibration.
    /// With `connect` set the channel is opened first.
    pub async fn initialize(&mut self, connect: bool) -> Result<(), ControllerError> {
        if connect {
            self.connect().await?;
        }

        let result = self.handshake().await;
        match &result {
            Ok(()) => {
                self.state = ControllerState::Ready;
                info!("{} initialized", self);
            }
            Err(e) => {
                warn!("Controller initialization failed: {}", e);
                self.state = ControllerState::Faulted;
            }
        }
        result
    }

    async fn handshake(&mut self) -> Result<(), ControllerError> {
        self.state = ControllerState::AwaitingBanner;

        let _greeting = self.receive().await?;
        let banner = self.receive().await?;
        let expected = self.config.dialect.banner();
        if !banner.contains(expected) {
            return Err(ControllerError::Protocol(format!(
                "expected '{}' banner, got '{}'",
                expected, banner
            )));
        }

        self.send("G0", true).await?;
        let ack_timeout = self.config.ack_timeout();
        match timeout(ack_timeout, self.wait_for(ACK)).await {
            Ok(result) => result?,
            Err(_) => return Err(ControllerError::AckTimeout(ack_timeout)),
        }

        for command in self.config.dialect.calibration_commands(&self.motors) {
            self.send(&command, true).await?;
            self.wait_for(ACK).await?;
        }

        Ok(())
    }

    /// Write a message, optionally followed by a line terminator, and flush
    pub async fn send(&mut self, message: &str, terminate: bool) -> Result<(), ControllerError> {
        let send_error = |e: std::io::Error| ControllerError::Send {
            message: message.to_string(),
            reason: e.to_string(),
        };

        if !self.transport.is_open() {
            return Err(ControllerError::NotConnected);
        }

        debug!("Sending {:?}", message);
        self.transport.write_all(message.as_bytes()).await.map_err(send_error)?;
        if terminate {
            self.transport.write_all(b"\n").await.map_err(send_error)?;
        }
        self.transport.flush().await.map_err(send_error)
    }

    /// Read one line with the terminator stripped
    pub async fn receive(&mut self) -> Result<String, ControllerError> {
        if !self.transport.is_open() {
            return Err(ControllerError::NotConnected);
        }

        let raw = self
            .transport
            .read_line()
            .await
            .map_err(|e| ControllerError::Receive(e.to_string()))?
            .ok_or_else(|| {
                ControllerError::Receive(format!(
                    "no complete line within {:?}",
                    self.config.read_timeout()
                ))
            })?;

        let line = String::from_utf8(raw).map_err(|e| ControllerError::Decode {
            reason: e.utf8_error().to_string(),
            raw: e.into_bytes(),
        })?;
        let line = line.trim_end().to_string();
        debug!("Received {:?}", line);
        Ok(line)
    }

    /// Read lines until one equals `expected`
    async fn wait_for(&mut self, expected: &str) -> Result<(), ControllerError> {
        loop {
            let line = self.receive().await?;
            if line == expected {
                return Ok(());
            }
            debug!("Skipping {:?} while waiting for {:?}", line, expected);
        }
    }

    fn check_axes(&self, waypoint: &Waypoint) -> Result<(), ControllerError> {
        for axis in waypoint.axes() {
            if self.motor(axis).is_none() {
                return Err(ControllerError::ConfigValidation(format!(
                    "axis '{}' is not configured",
                    axis
                )));
            }
        }
        Ok(())
    }

    /// Absolute move to a waypoint; returns the distance travelled.
    ///
    /// # Errors
    /// `ConfigValidation` for unconfigured axes, any wire error, or
    /// `WaypointTimeout` when the stage does not arrive in time.
    pub async fn move_to(&mut self, waypoint: &Waypoint) -> Result<f64, ControllerError> {
        self.check_axes(waypoint)?;
        if waypoint.is_empty() {
            debug!("Ignoring move to empty waypoint");
            return Ok(0.0);
        }

        self.state = ControllerState::Moving;
        let command = self.config.dialect.move_command(waypoint);
        let result = self.command_and_converge(&[command], waypoint).await;
        self.settle(&result);
        result
    }

    /// Relative move of one axis by `factor` microsteps; returns the distance.
    pub async fn jog(&mut self, axis: Axis, factor: i64) -> Result<f64, ControllerError> {
        let motor = *self.motor(axis).ok_or_else(|| {
            ControllerError::ConfigValidation(format!("axis '{}' is not configured", axis))
        })?;
        let delta = motor.microstep() * factor as f64;

        self.state = ControllerState::Jogging;
        let result = self.jog_by(axis, delta).await;
        self.settle(&result);
        result
    }

    async fn jog_by(&mut self, axis: Axis, delta: f64) -> Result<f64, ControllerError> {
        let current = self.update_position().await?;
        let mut predicted = current.to_waypoint();
        let start = predicted.get(axis).unwrap_or(0.0);
        predicted.set(axis, start + delta);

        let commands = self
            .config
            .dialect
            .jog_commands(axis, delta, self.config.jog_feed_rate);
        debug!("Jogging {} by {:.4} to {}", axis, delta, predicted);
        self.command_and_converge(&commands, &predicted).await
    }

    async fn command_and_converge(&mut self, commands: &[String], target: &Waypoint) -> Result<f64, ControllerError> {
        for command in commands {
            self.send(command, true).await?;
            self.wait_for(ACK).await?;
        }
        self.wait_for_convergence(target).await
    }

    fn settle<T>(&mut self, result: &Result<T, ControllerError>) {
        self.state = match result {
            Err(e) if e.is_fatal() => ControllerState::Faulted,
            _ => ControllerState::Ready,
        };
    }

    /// Query the firmware and refresh the position cache.
    ///
    /// Axes missing from the report keep their cached value.
    pub async fn update_position(&mut self) -> Result<Position, ControllerError> {
        let query = self.config.dialect.position_query();
        self.send(query.command, query.terminated).await?;
        for _ in 0..query.skip_lines {
            self.receive().await?;
        }

        let report = self.receive().await?;
        let axes = self.axes();
        let values = self
            .config
            .dialect
            .parse_position(&self.position_pattern, &report, &axes)
            .ok_or_else(|| {
                self.state = ControllerState::Faulted;
                ControllerError::Protocol(format!(
                    "unexpected output while determining position: '{}'",
                    report
                ))
            })?;

        for (axis, value) in values {
            self.position.update(axis, value);
        }
        Ok(self.position.clone())
    }

    /// Poll until the cached position matches `target` at 3 decimals.
    ///
    /// The allowed time is the initial distance multiplied by the per-unit
    /// step time and the safety multiplier. Returns the initial distance.
    pub async fn wait_for_convergence(&mut self, target: &Waypoint) -> Result<f64, ControllerError> {
        self.check_axes(target)?;
        let start = Instant::now();
        self.update_position().await?;

        let distance = target
            .iter()
            .map(|(axis, value)| (self.position.value(axis).unwrap_or(0.0) - value).abs())
            .fold(0.0, f64::max);
        let limit = Duration::try_from_secs_f64(
            distance * self.config.step_time_secs * self.config.timeout_multiplier,
        )
        .unwrap_or(Duration::MAX);
        let poll_interval = self.config.poll_interval();

        debug!("Waiting up to {:?} to reach {} ({:.3} away)", limit, target, distance);

        while !self.position.matches(target) {
            if start.elapsed() > limit {
                return Err(ControllerError::WaypointTimeout {
                    timeout: limit,
                    target: target.clone(),
                    last_position: self.position.clone(),
                });
            }
            sleep(poll_interval).await;
            self.update_position().await?;
        }

        Ok(distance)
    }

    /// Move every configured axis to zero, one axis at a time
    pub async fn home(&mut self) -> Result<f64, ControllerError> {
        info!("Homing {}", self);
        let mut distance = 0.0;
        for axis in self.axes() {
            distance += self.move_to(&Waypoint::new().with(axis, 0.0)).await?;
        }
        Ok(distance)
    }

    /// Soft reset, then repeat the handshake on the open channel
    pub async fn reset(&mut self) -> Result<(), ControllerError> {
        info!("Resetting {}", self);
        self.state = ControllerState::Resetting;
        self.send(SOFT_RESET, true).await?;
        self.initialize(false).await?;
        let trailing = self.receive().await?;
        debug!("Discarded {:?} after reset", trailing);
        Ok(())
    }

    /// Close the channel. Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<(), ControllerError> {
        let result = self.transport.close().await;
        self.state = ControllerState::Shutdown;
        result.map_err(|e| ControllerError::Connection {
            port: self.config.port.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for MotionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} controller on {}", self.config.dialect, self.config.port)
    }
}

impl fmt::Debug for MotionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotionController")
            .field("config", &self.config)
            .field("motors", &self.motors)
            .field("position", &self.position)
            .field("state", &self.state)
            .finish()
    }
}
