//! Controller error types

use crate::core::axis::{Position, Waypoint};
use std::time::Duration;
use thiserror::Error;

/// Error types for motion controller operations
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Unable to connect to {port}: {reason}")]
    Connection { port: String, reason: String },

    #[error("Controller is not connected")]
    NotConnected,

    #[error("Failed to send {message:?}: {reason}")]
    Send { message: String, reason: String },

    #[error("Failed to receive from controller: {0}")]
    Receive(String),

    #[error("Failed to decode controller output {raw:?}: {reason}")]
    Decode { raw: Vec<u8>, reason: String },

    #[error("Unexpected controller output: {0}")]
    Protocol(String),

    #[error("No acknowledgement from controller within {0:?}")]
    AckTimeout(Duration),

    #[error("Timed out after {timeout:?} moving to {target}, last position {last_position}")]
    WaypointTimeout {
        timeout: Duration,
        target: Waypoint,
        last_position: Position,
    },

    #[error("Invalid controller configuration: {0}")]
    ConfigValidation(String),
}

impl ControllerError {
    /// Errors after which the wire state can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ControllerError::Protocol(_)
                | ControllerError::WaypointTimeout { .. }
                | ControllerError::Decode { .. }
                | ControllerError::Receive(_)
                | ControllerError::AckTimeout(_)
        )
    }
}
