//! Pipeline execution engine - runs one chain of steps against the ambient context

use crate::core::{
    AmbientContext, Pipeline, PipelineError, PipelineStep, StepRef, StepRole, StepValue,
};
use crate::sensor::Sensor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted {
        steps: usize,
    },
    StepCompleted {
        index: usize,
        name: String,
        elapsed: Duration,
    },
    GuardStopped {
        index: usize,
        name: String,
    },
    RunCompleted {
        elapsed: Duration,
        timings: String,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Result of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One slot per step, empty for steps that did not run
    pub stack: Vec<Option<StepValue>>,

    /// Index of the guard step that ended the run early
    pub stopped_at: Option<usize>,

    pub elapsed: Duration,
}

impl RunReport {
    pub fn output(&self, index: usize) -> Option<&StepValue> {
        self.stack.get(index).and_then(Option::as_ref)
    }

    pub fn stopped_early(&self) -> bool {
        self.stopped_at.is_some()
    }
}

/// Runs pipelines step by step
#[derive(Default)]
pub struct PipelineEngine {
    event_handlers: Vec<EventHandler>,
    last_timings: String,
}

impl PipelineEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    fn emit_event(&self, event: PipelineEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Step durations of the last run, e.g. `0.001, 0.020`
    pub fn last_timings(&self) -> &str {
        &self.last_timings
    }

    /// Input for step `index`: a prior slot, a fresh frame, or nothing
    async fn resolve_input(
        index: usize,
        step: &PipelineStep,
        stack: &[Option<StepValue>],
        sensor: &mut dyn Sensor,
    ) -> Result<Option<StepValue>, PipelineError> {
        match step.input {
            Some(StepRef::PriorOutput(source)) => stack
                .get(source)
                .filter(|_| source < index)
                .and_then(Option::clone)
                .map(Some)
                .ok_or_else(|| PipelineError::Reference {
                    index,
                    name: step.name(),
                    reason: format!("output of step {} is not available", source),
                }),
            Some(StepRef::LiveFrame) => Ok(Some(StepValue::Frame(sensor.capture_frame().await?))),
            None if step.requires_input() => Ok(Some(StepValue::Frame(sensor.capture_frame().await?))),
            None => Ok(None),
        }
    }

    /// Execute every step in order.
    ///
    /// Each step receives the ambient context overlaid by its own kwargs. A
    /// true guard result ends the run early; a true kill result fails it
    /// with `PipelineError::Abort`.
    pub async fn run(
        &mut self,
        pipeline: &mut Pipeline,
        ambient: &AmbientContext,
        sensor: &mut dyn Sensor,
    ) -> Result<RunReport, PipelineError> {
        let run_start = Instant::now();
        let mut stack: Vec<Option<StepValue>> = vec![None; pipeline.len()];
        let mut stopped_at = None;
        let mut abort = None;

        self.emit_event(PipelineEvent::RunStarted { steps: pipeline.len() });
        for step in pipeline.steps_mut() {
            step.last_duration = None;
        }

        for (index, step) in pipeline.steps_mut().iter_mut().enumerate() {
            let start = Instant::now();

            let input = match Self::resolve_input(index, step, &stack, sensor).await {
                Ok(input) => input,
                Err(error) => {
                    abort = Some(error);
                    break;
                }
            };

            let kwargs = ambient.merged_with(&step.kwargs);
            let output = match step.call(input, &kwargs) {
                Ok(output) => output,
                Err(source) => {
                    step.last_duration = Some(start.elapsed());
                    abort = Some(PipelineError::StepFailed {
                        index,
                        name: step.name(),
                        source,
                    });
                    break;
                }
            };

            let elapsed = start.elapsed();
            step.last_duration = Some(elapsed);
            debug!("Step {} ({}) took {:.3}s", index, step.name(), elapsed.as_secs_f64());
            self.emit_event(PipelineEvent::StepCompleted {
                index,
                name: step.name(),
                elapsed,
            });

            let triggered = output.is_truthy();
            stack[index] = Some(output);

            match step.role {
                StepRole::Guard if triggered => {
                    info!("Step {} ({}) stopped the pipeline", index, step.name());
                    self.emit_event(PipelineEvent::GuardStopped { index, name: step.name() });
                    stopped_at = Some(index);
                    break;
                }
                StepRole::Kill if triggered => {
                    let limits = serde_json::Value::Object(step.kwargs.clone()).to_string();
                    warn!("Step {} ({}) killed the job, limits {}", index, step.name(), limits);
                    abort = Some(PipelineError::Abort {
                        index,
                        name: step.name(),
                        position: ambient.position_summary(),
                        limits,
                    });
                    break;
                }
                _ => {}
            }
        }

        self.last_timings = pipeline.timings();
        if let Some(error) = abort {
            return Err(error);
        }

        let elapsed = run_start.elapsed();
        self.emit_event(PipelineEvent::RunCompleted {
            elapsed,
            timings: self.last_timings.clone(),
        });

        Ok(RunReport {
            stack,
            stopped_at,
            elapsed,
        })
    }
}
