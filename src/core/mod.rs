//! Core domain models
//!
//! Axes, waypoints and sequences, the session configuration, and the
//! pipeline step model shared by the controller and the execution layer.

pub mod axis;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod sequence;
pub mod state;
pub mod step;

pub use axis::*;
pub use context::*;
pub use pipeline::*;
pub use sequence::{AxisRange, Sequence, SequenceError};
pub use state::*;
pub use step::*;
