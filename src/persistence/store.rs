//! SQLite-based session history

use crate::core::config::JobMode;
use crate::persistence::{ExecutionStatus, PersistenceBackend, SessionSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, job_name, session_name, mode, status, started_at, completed_at, \
     progress, completed_waypoints, total_waypoints, session_directory";

/// SQLite session store
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (or create) a store at `db_path`; `:memory:` works for tests
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store under the user's local data directory
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("stagescan");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        let db_path = db_dir.join("sessions.db");
        Self::new(&db_path.display().to_string()).await
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                job_name TEXT NOT NULL,
                session_name TEXT NOT NULL,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                progress REAL NOT NULL DEFAULT 0.0,
                completed_waypoints INTEGER NOT NULL DEFAULT 0,
                total_waypoints INTEGER NOT NULL DEFAULT 0,
                session_directory TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_job_name ON sessions(job_name);
            CREATE INDEX IF NOT EXISTS idx_started_at ON sessions(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_status(status: &str) -> ExecutionStatus {
        match status {
            "Running" => ExecutionStatus::Running,
            "Completed" => ExecutionStatus::Completed,
            "Failed" => ExecutionStatus::Failed,
            "Cancelled" => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Pending,
        }
    }

    fn mode_name(mode: JobMode) -> &'static str {
        match mode {
            JobMode::Automatic => "automatic",
            JobMode::Interactive => "interactive",
        }
    }

    fn parse_mode(mode: &str) -> JobMode {
        match mode {
            "interactive" => JobMode::Interactive,
            _ => JobMode::Automatic,
        }
    }

    fn summary_from_row(row: &SqliteRow) -> Result<SessionSummary> {
        Ok(SessionSummary {
            session_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            job_name: row.get("job_name"),
            session_name: row.get("session_name"),
            mode: Self::parse_mode(&row.get::<String, _>("mode")),
            status: Self::parse_status(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            progress: row.get("progress"),
            completed_waypoints: row.get::<i64, _>("completed_waypoints") as usize,
            total_waypoints: row.get::<i64, _>("total_waypoints") as usize,
            session_directory: row.get("session_directory"),
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteSessionStore {
    async fn save_session(&self, session: &SessionSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sessions
            (id, job_name, session_name, mode, status, started_at, completed_at,
             progress, completed_waypoints, total_waypoints, session_directory)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(session.session_id.to_string())
        .bind(&session.job_name)
        .bind(&session.session_name)
        .bind(Self::mode_name(session.mode))
        .bind(format!("{:?}", session.status))
        .bind(Self::to_naive(session.started_at))
        .bind(session.completed_at.map(Self::to_naive))
        .bind(session.progress)
        .bind(session.completed_waypoints as i64)
        .bind(session.total_waypoints as i64)
        .bind(&session.session_directory)
        .execute(&self.pool)
        .await
        .context("Failed to save session")?;

        Ok(())
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Option<SessionSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS))
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load session")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_sessions(&self, job_name: &str) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sessions WHERE job_name = ?1 ORDER BY started_at DESC",
            SESSION_COLUMNS
        ))
        .bind(job_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list sessions")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_jobs(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT job_name FROM sessions ORDER BY job_name ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list jobs")?;

        Ok(rows.iter().map(|row| row.get("job_name")).collect())
    }
}
