//! Acquisition job - drives the controller, sensor and pipeline through a session

use crate::controller::{ControllerError, MotionController};
use crate::core::{
    config::{JobMode, SessionConfig},
    AmbientContext, ExecutionStatus, Pipeline, PipelineError, Sequence, SequenceError,
    SessionState, Waypoint,
};
use crate::execution::engine::{PipelineEngine, PipelineEvent, RunReport};
use crate::execution::interactive::{InputEvent, InteractiveControls, Outcome};
use crate::execution::registry::StepRegistry;
use crate::persistence::SessionSummary;
use crate::sensor::{Sensor, SensorError};
use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

/// Name of the resolved configuration written into each session directory
pub const PARAMETERS_FILE: &str = "parameters.yaml";

/// Error types for job execution
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    #[error("Either a CSV file, a sequence, coordinates or interactive mode must be provided")]
    MissingSequence,

    #[error("Interactive mode needs an input event channel")]
    MissingInput,

    #[error("Unable to prepare session directory {path}: {source}")]
    SessionDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to write session parameters: {0}")]
    Parameters(String),
}

/// Events emitted while a job runs
#[derive(Debug, Clone)]
pub enum JobEvent {
    SessionStarted {
        name: String,
        session_directory: PathBuf,
        waypoints: usize,
    },
    WaypointReached {
        index: usize,
        total: usize,
        waypoint: Waypoint,
        distance: f64,
        status: String,
    },
    Pipeline(PipelineEvent),
    ReturnedHome,
    SessionFinished {
        status: ExecutionStatus,
    },
}

/// Type for job event handlers
pub type JobEventHandler = Arc<dyn Fn(JobEvent) + Send + Sync>;

/// One acquisition session
pub struct Job {
    config: SessionConfig,
    name: String,
    session_directory: PathBuf,
    controller: MotionController,
    sensor: Box<dyn Sensor>,
    pipeline: Pipeline,
    engine: PipelineEngine,
    sequence: Sequence,
    state: SessionState,
    started: DateTime<Utc>,
    event_handlers: Vec<JobEventHandler>,
}

impl Job {
    /// Assemble a job from its configuration and collaborators.
    ///
    /// The sequence and pipeline are built here so configuration mistakes
    /// surface before anything is connected.
    pub fn new(
        config: SessionConfig,
        controller: MotionController,
        sensor: Box<dyn Sensor>,
        registry: &StepRegistry,
    ) -> Result<Self, JobError> {
        let sequence = Self::build_sequence(&config)?;
        let pipeline = Pipeline::from_config(&config.job.pipeline, registry)?;

        let now = Local::now();
        let name = format!("{}_{}", config.job.name, now.format("%Y-%m-%dT%H%M%S%.6f"));
        let session_directory = Path::new(&config.job.path).join(&name);

        if !sequence.is_empty() {
            info!("Defined {} waypoints", sequence.len());
        }

        Ok(Self {
            config,
            name,
            session_directory,
            controller,
            sensor,
            pipeline,
            engine: PipelineEngine::new(),
            sequence,
            state: SessionState::new(),
            started: now.with_timezone(&Utc),
            event_handlers: Vec::new(),
        })
    }

    /// Resolve the configured waypoint source: CSV, then grammar, then coordinates
    pub fn build_sequence(config: &SessionConfig) -> Result<Sequence, JobError> {
        let job = &config.job;
        let axes = config.controller.axes();
        if let Some(csv) = &job.csv {
            Ok(Sequence::from_csv(csv, &axes)?)
        } else if let Some(grammar) = &job.sequence {
            Ok(Sequence::generate(grammar, &axes)?)
        } else if let Some(coordinates) = &job.coordinates {
            Ok(Sequence::from_coordinates(coordinates, &axes)?)
        } else if job.mode == JobMode::Interactive {
            Ok(Sequence::interactive())
        } else {
            Err(JobError::MissingSequence)
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(JobEvent) + Send + Sync + 'static,
    {
        let handler: JobEventHandler = Arc::new(handler);
        let forward = Arc::clone(&handler);
        self.engine
            .add_event_handler(move |event| forward(JobEvent::Pipeline(event)));
        self.event_handlers.push(handler);
    }

    fn emit_event(&self, event: JobEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// `{name}_{timestamp}`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_directory(&self) -> &Path {
        &self.session_directory
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn controller(&self) -> &MotionController {
        &self.controller
    }

    pub fn is_interactive(&self) -> bool {
        self.config.job.mode == JobMode::Interactive
    }

    /// Progress line, empty for interactive sessions
    pub fn status(&self) -> String {
        self.state.status_line()
    }

    /// Create the session directory, initialize both devices and record the parameters
    pub async fn setup(&mut self) -> Result<(), JobError> {
        std::fs::create_dir_all(&self.session_directory).map_err(|source| JobError::SessionDirectory {
            path: self.session_directory.clone(),
            source,
        })?;

        self.controller.initialize(true).await?;
        info!("{} initialized", self.controller);

        if self.config.sensor.enabled {
            self.sensor.initialize().await?;
            info!("{} initialized", self.sensor.describe());
        }

        self.save_parameters()
    }

    /// Write the resolved configuration into the session directory
    pub fn save_parameters(&self) -> Result<(), JobError> {
        let yaml = self
            .config
            .to_yaml()
            .map_err(|e| JobError::Parameters(e.to_string()))?;
        let path = self.session_directory.join(PARAMETERS_FILE);
        std::fs::write(&path, yaml).map_err(|e| JobError::Parameters(format!("{}: {}", path.display(), e)))?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Run the pipeline once against the current position
    pub async fn run_pipeline(&mut self, waypoint_index: Option<usize>) -> Result<RunReport, JobError> {
        let mut ambient = AmbientContext::from_position(self.controller.position())
            .with_session_directory(&self.session_directory);
        if let Some(index) = waypoint_index {
            ambient = ambient.with_waypoint_index(index);
        }

        let report = self
            .engine
            .run(&mut self.pipeline, &ambient, &mut *self.sensor)
            .await?;
        Ok(report)
    }

    /// Visit every waypoint, running the pipeline after each move
    pub async fn run_automatic(&mut self) -> Result<(), JobError> {
        info!("Automatic mode enabled");
        let total = self.sequence.len();

        for index in 0..total {
            let Some(waypoint) = self.sequence.get(index).cloned() else {
                break;
            };

            let distance = self.controller.move_to(&waypoint).await?;
            self.state.waypoint_done();
            self.run_pipeline(Some(index)).await?;

            let status = self.status();
            info!("{}, {}", status, waypoint.to_csv());
            self.emit_event(JobEvent::WaypointReached {
                index,
                total,
                waypoint,
                distance,
                status,
            });
        }

        if self.config.job.return_home {
            let home: Waypoint = self.controller.axes().into_iter().map(|axis| (axis, 0.0)).collect();
            info!("Returning to home {}", home.to_csv());
            self.controller.move_to(&home).await?;
            self.emit_event(JobEvent::ReturnedHome);
        }

        Ok(())
    }

    /// Consume operator input until `Quit` or the sender goes away.
    ///
    /// Queued events are applied between pipeline runs; with an empty
    /// pipeline the loop simply waits for the next event.
    pub async fn run_interactive(&mut self, mut events: mpsc::Receiver<InputEvent>) -> Result<(), JobError> {
        info!("Interactive mode enabled");
        let mut controls = InteractiveControls::new();

        loop {
            let event = if self.pipeline.is_empty() {
                match events.recv().await {
                    Some(event) => Some(event),
                    None => break,
                }
            } else {
                match events.try_recv() {
                    Ok(event) => Some(event),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            };

            if let Some(event) = event {
                debug!("Input {:?}", event);
                let outcome = controls
                    .apply(event, &mut self.controller, &mut *self.sensor)
                    .await?;
                if outcome == Outcome::Quit {
                    break;
                }
                continue;
            }

            self.run_pipeline(None).await?;
            tokio::task::yield_now().await;
        }

        info!("Leaving interactive mode");
        Ok(())
    }

    /// Run the configured mode; interactive mode needs `events`
    pub async fn run(&mut self, events: Option<mpsc::Receiver<InputEvent>>) -> Result<(), JobError> {
        info!("Saving session to {}", self.session_directory.display());
        self.state.start(self.sequence.len());
        self.emit_event(JobEvent::SessionStarted {
            name: self.name.clone(),
            session_directory: self.session_directory.clone(),
            waypoints: self.sequence.len(),
        });

        match self.config.job.mode {
            JobMode::Automatic => self.run_automatic().await,
            JobMode::Interactive => {
                let events = events.ok_or(JobError::MissingInput)?;
                self.run_interactive(events).await
            }
        }
    }

    /// Setup, run and always shut down, recording the final status
    pub async fn execute(&mut self, events: Option<mpsc::Receiver<InputEvent>>) -> Result<(), JobError> {
        let result = match self.setup().await {
            Ok(()) => self.run(events).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => self.state.complete(),
            Err(e) => {
                error!("Job {} failed: {}", self.name, e);
                self.state.fail();
            }
        }

        self.shutdown().await;
        self.emit_event(JobEvent::SessionFinished { status: self.state.status });
        result
    }

    /// Mark the session as interrupted by the operator
    pub fn cancel(&mut self) {
        warn!("Job {} cancelled", self.name);
        self.state.cancel();
    }

    /// Release the controller and the sensor; failures are logged only
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.controller.shutdown().await {
            warn!("Controller shutdown failed: {}", e);
        }
        if self.config.sensor.enabled {
            if let Err(e) = self.sensor.shutdown().await {
                warn!("Sensor shutdown failed: {}", e);
            }
        }
        info!("Job {} shut down", self.name);
    }

    /// History record for this session
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.state.session_id,
            job_name: self.config.job.name.clone(),
            session_name: self.name.clone(),
            mode: self.config.job.mode,
            status: self.state.status,
            started_at: self.state.started_at.unwrap_or(self.started),
            completed_at: self.state.completed_at,
            progress: self.state.progress(),
            completed_waypoints: self.state.completed_waypoints,
            total_waypoints: self.state.total_waypoints,
            session_directory: self.session_directory.display().to_string(),
        }
    }
}
