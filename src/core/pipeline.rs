//! Pipeline domain model

use crate::core::{
    config::StepConfig,
    step::{PipelineStep, StepError, StepRef},
};
use crate::execution::registry::StepRegistry;
use crate::sensor::SensorError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or running a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step names an unknown function or an input that is not available
    #[error("Step {index} ({name}): {reason}")]
    Reference { index: usize, name: String, reason: String },

    /// A kill step returned true
    #[error("Pipeline killed by step {index} ({name}) at {position}, limits {limits}")]
    Abort {
        index: usize,
        name: String,
        position: String,
        limits: String,
    },

    #[error("Step {index} ({name}) failed: {source}")]
    StepFailed {
        index: usize,
        name: String,
        #[source]
        source: StepError,
    },

    #[error("Frame acquisition failed: {0}")]
    Sensor(#[from] SensorError),
}

/// An ordered chain of processing steps
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
}

impl Pipeline {
    /// Bind every configured step to its registered function.
    ///
    /// Unknown names and forward input references are rejected here so a
    /// misconfigured job fails before any motor moves.
    pub fn from_config(configs: &[StepConfig], registry: &StepRegistry) -> Result<Self, PipelineError> {
        let mut steps = Vec::with_capacity(configs.len());

        for (index, config) in configs.iter().enumerate() {
            let handler = registry.get(&config.module, &config.function).ok_or_else(|| {
                PipelineError::Reference {
                    index,
                    name: config.name(),
                    reason: "no such function is registered".to_string(),
                }
            })?;

            if let Some(StepRef::PriorOutput(source)) = config.input {
                if source >= index {
                    return Err(PipelineError::Reference {
                        index,
                        name: config.name(),
                        reason: format!("input step {} has not run yet", source),
                    });
                }
            }

            steps.push(PipelineStep::new(
                config.module.clone(),
                config.function.clone(),
                config.input,
                config.kwargs.clone(),
                handler,
            ));
        }

        Ok(Self { steps })
    }

    /// Wrap already bound steps without validating their references
    pub fn from_steps(steps: Vec<PipelineStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn steps_mut(&mut self) -> &mut [PipelineStep] {
        &mut self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Durations of the last invocation, in seconds with millisecond precision
    pub fn timings(&self) -> String {
        self.steps
            .iter()
            .map(|step| format!("{:.3}", step.last_duration.unwrap_or(Duration::ZERO).as_secs_f64()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
