//! Pipeline execution and acquisition jobs

pub mod engine;
pub mod interactive;
pub mod job;
pub mod registry;

pub use engine::{PipelineEngine, PipelineEvent, RunReport};
pub use interactive::{input_channel, InputEvent, InteractiveControls, Outcome};
pub use job::{Job, JobError, JobEvent, PARAMETERS_FILE};
pub use registry::StepRegistry;
