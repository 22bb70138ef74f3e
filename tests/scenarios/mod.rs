//! Scenario-based tests for stagescan

mod controller_protocol;
mod job_session;
mod pipeline_engine;
mod sequence_generation;
