//! Step domain model

use crate::sensor::Frame;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Keyword arguments handed to a step function
pub type Kwargs = Map<String, Value>;

/// Module under which the guard and kill steps are registered
pub const PIPELINE_MODULE: &str = "pipeline";

/// Names accepted for a live frame reference in configuration
const LIVE_FRAME_NAMES: [&str; 3] = ["camera", "frame", "live"];

/// Where a step takes its input from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStepRef", into = "RawStepRef")]
pub enum StepRef {
    /// Output of an earlier step in the same run
    PriorOutput(usize),
    /// A frame acquired from the sensor right before the step runs
    LiveFrame,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawStepRef {
    Index(usize),
    Name(String),
}

impl TryFrom<RawStepRef> for StepRef {
    type Error = String;

    fn try_from(raw: RawStepRef) -> Result<Self, Self::Error> {
        match raw {
            RawStepRef::Index(index) => Ok(StepRef::PriorOutput(index)),
            RawStepRef::Name(name) if LIVE_FRAME_NAMES.contains(&name.as_str()) => Ok(StepRef::LiveFrame),
            RawStepRef::Name(name) => Err(format!(
                "invalid step input '{}', expected a step index or 'camera'",
                name
            )),
        }
    }
}

impl From<StepRef> for RawStepRef {
    fn from(step_ref: StepRef) -> Self {
        match step_ref {
            StepRef::PriorOutput(index) => RawStepRef::Index(index),
            StepRef::LiveFrame => RawStepRef::Name("camera".to_string()),
        }
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepRef::PriorOutput(index) => write!(f, "step {}", index),
            StepRef::LiveFrame => write!(f, "live frame"),
        }
    }
}

/// What the engine does with a step's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepRole {
    /// Ordinary data transformation
    Data,
    /// A true result ends the run early without error
    Guard,
    /// A true result aborts the job
    Kill,
}

impl StepRole {
    pub fn for_step(module: &str, function: &str) -> Self {
        match (module, function) {
            (PIPELINE_MODULE, "noop") | (PIPELINE_MODULE, "guard") => StepRole::Guard,
            (PIPELINE_MODULE, "kill") => StepRole::Kill,
            _ => StepRole::Data,
        }
    }
}

/// Value flowing between steps
#[derive(Debug, Clone, PartialEq)]
pub enum StepValue {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    Frame(Frame),
    Json(Value),
}

impl StepValue {
    /// Truthiness used by guard and kill steps
    pub fn is_truthy(&self) -> bool {
        match self {
            StepValue::Empty => false,
            StepValue::Bool(b) => *b,
            StepValue::Number(n) => *n != 0.0,
            StepValue::Text(s) => !s.is_empty(),
            StepValue::Frame(_) => true,
            StepValue::Json(v) => match v {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
            },
        }
    }

    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            StepValue::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Errors raised by step functions
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step requires an input but none was provided")]
    MissingInput,

    #[error("Expected {expected} input, got {actual}")]
    InputType { expected: &'static str, actual: String },

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// A processing function that can be placed in a pipeline
pub trait StepFunction: Send + Sync {
    /// Whether the engine must supply an input when none is declared
    fn requires_input(&self) -> bool {
        false
    }

    fn call(&self, input: Option<StepValue>, kwargs: &Kwargs) -> Result<StepValue, StepError>;
}

/// One configured pipeline step bound to its function
#[derive(Clone)]
pub struct PipelineStep {
    pub module: String,
    pub function: String,

    /// Declared input, if any
    pub input: Option<StepRef>,

    /// Explicit keyword arguments
    pub kwargs: Kwargs,

    pub role: StepRole,

    /// Wall time of the most recent invocation
    pub last_duration: Option<Duration>,

    handler: Arc<dyn StepFunction>,
}

impl PipelineStep {
    pub fn new(
        module: impl Into<String>,
        function: impl Into<String>,
        input: Option<StepRef>,
        kwargs: Kwargs,
        handler: Arc<dyn StepFunction>,
    ) -> Self {
        let module = module.into();
        let function = function.into();
        let role = StepRole::for_step(&module, &function);
        Self {
            module,
            function,
            input,
            kwargs,
            role,
            last_duration: None,
            handler,
        }
    }

    /// `module.function`
    pub fn name(&self) -> String {
        format!("{}.{}", self.module, self.function)
    }

    pub fn requires_input(&self) -> bool {
        self.handler.requires_input()
    }

    pub fn call(&self, input: Option<StepValue>, kwargs: &Kwargs) -> Result<StepValue, StepError> {
        self.handler.call(input, kwargs)
    }
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("name", &self.name())
            .field("input", &self.input)
            .field("kwargs", &self.kwargs)
            .field("role", &self.role)
            .field("last_duration", &self.last_duration)
            .finish()
    }
}
