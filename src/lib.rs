//! stagescan - waypoint-driven stage scanning with a serial motion controller
//! and a configurable processing pipeline

pub mod cli;
pub mod controller;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod sensor;

// Re-export commonly used types
pub use controller::{ControllerError, Dialect, MotionController, SimulatedFirmware};
pub use core::{AmbientContext, Axis, ExecutionStatus, Pipeline, Sequence, StepRef, Waypoint};
pub use execution::{Job, JobError, JobEvent, PipelineEngine, StepRegistry};
pub use sensor::{Sensor, SyntheticSensor};
