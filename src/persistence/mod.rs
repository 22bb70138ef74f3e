//! Persistence layer for acquisition session history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteSessionStore;

pub use crate::core::ExecutionStatus;
use crate::core::config::JobMode;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of one acquisition session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Unique session ID
    pub session_id: Uuid,

    /// Job name from the configuration
    pub job_name: String,

    /// Timestamped session name, also the session directory name
    pub session_name: String,

    pub mode: JobMode,

    /// Final (or current) status
    pub status: ExecutionStatus,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// When the session finished (if finished)
    pub completed_at: Option<DateTime<Utc>>,

    /// Progress (0.0 to 1.0)
    pub progress: f64,

    /// Number of waypoints visited
    pub completed_waypoints: usize,

    /// Number of waypoints in the sequence
    pub total_waypoints: usize,

    /// Where frames and parameters were written
    pub session_directory: String,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save or replace a session summary
    async fn save_session(&self, session: &SessionSummary) -> Result<()>;

    /// Load a session by ID
    async fn load_session(&self, session_id: Uuid) -> Result<Option<SessionSummary>>;

    /// List sessions of a job, newest first
    async fn list_sessions(&self, job_name: &str) -> Result<Vec<SessionSummary>>;

    /// List all job names with recorded sessions
    async fn list_jobs(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    sessions: RwLock<HashMap<Uuid, SessionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_session(&self, session: &SessionSummary) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Option<SessionSummary>> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn list_sessions(&self, job_name: &str) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;
        let mut result: Vec<SessionSummary> = sessions
            .values()
            .filter(|s| s.job_name == job_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_jobs(&self) -> Result<Vec<String>> {
        let sessions = self.sessions.read().await;
        let mut jobs: Vec<String> = sessions.values().map(|s| s.job_name.clone()).collect();
        jobs.sort();
        jobs.dedup();
        Ok(jobs)
    }
}
