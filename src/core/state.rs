//! Session state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Session has not started
    Pending,
    /// Session is moving through waypoints or accepting input
    Running,
    /// Session finished normally
    Completed,
    /// Session stopped on a fatal error
    Failed,
    /// Session was interrupted by the operator
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Progress of one acquisition session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Unique session ID
    pub session_id: Uuid,

    /// Current status
    pub status: ExecutionStatus,

    /// When the first waypoint was started
    pub started_at: Option<DateTime<Utc>>,

    /// When the session completed, failed or was cancelled
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of waypoints in the sequence (0 for interactive sessions)
    pub total_waypoints: usize,

    /// Number of waypoints visited so far
    pub completed_waypoints: usize,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_waypoints: 0,
            completed_waypoints: 0,
        }
    }

    /// Mark session as started
    pub fn start(&mut self, total_waypoints: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_waypoints = total_waypoints;
        self.completed_waypoints = 0;
    }

    pub fn waypoint_done(&mut self) {
        self.completed_waypoints += 1;
    }

    pub fn complete(&mut self) {
        self.finish(ExecutionStatus::Completed);
    }

    pub fn fail(&mut self) {
        self.finish(ExecutionStatus::Failed);
    }

    pub fn cancel(&mut self) {
        self.finish(ExecutionStatus::Cancelled);
    }

    fn finish(&mut self, status: ExecutionStatus) {
        if !self.status.is_terminal() {
            self.status = status;
            self.completed_at = Some(Utc::now());
        }
    }

    /// Calculate progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_waypoints == 0 {
            return 0.0;
        }
        self.completed_waypoints as f64 / self.total_waypoints as f64
    }

    /// Elapsed time since start, zero before the session starts
    pub fn elapsed(&self) -> chrono::Duration {
        match self.started_at {
            Some(started) => self.completed_at.unwrap_or_else(Utc::now) - started,
            None => chrono::Duration::zero(),
        }
    }

    /// `50.00%, Waypoint 5/10, Time 0:00:05/0:00:10`
    pub fn status_line(&self) -> String {
        if self.total_waypoints == 0 {
            return String::new();
        }

        let elapsed = self.elapsed();
        let progress = self.progress();
        let estimated = if progress > 0.0 {
            format_duration(chrono::Duration::milliseconds(
                (elapsed.num_milliseconds() as f64 / progress) as i64,
            ))
        } else {
            "?".to_string()
        };

        format!(
            "{:.2}%, Waypoint {}/{}, Time {}/{}",
            progress * 100.0,
            self.completed_waypoints,
            self.total_waypoints,
            format_duration(elapsed),
            estimated
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// `H:MM:SS`
pub fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds().max(0);
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
