//! CLI output formatting

use crate::{
    core::{ExecutionStatus, Waypoint},
    execution::{JobEvent, PipelineEvent},
    persistence::SessionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Create a waypoint progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// One waypoint as `x=1.000, y=2.000`
pub fn format_waypoint(waypoint: &Waypoint) -> String {
    if waypoint.is_empty() {
        return style("(no axes)").dim().to_string();
    }
    waypoint.to_string()
}

/// Format session summary for display
pub fn format_session_summary(summary: &SessionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} ({}/{}) - {}",
        status_icon,
        style(&summary.session_id.to_string()[..8]).dim(),
        style(&summary.session_name).bold(),
        format_status(summary.status),
        summary.completed_waypoints,
        summary.total_waypoints,
        style(format!("{:.0}%", summary.progress * 100.0)).cyan()
    )
}

/// Format a pipeline event; per-step events only show up when `verbose`
pub fn format_pipeline_event(event: &PipelineEvent, verbose: bool) -> Option<String> {
    match event {
        PipelineEvent::RunStarted { steps } if verbose => {
            Some(format!("{} Running {} steps", SPINNER, style(steps).cyan()))
        }
        PipelineEvent::StepCompleted { index, name, elapsed } if verbose => Some(format!(
            "{} [{}] {} {}",
            CHECK,
            index,
            style(name).green(),
            style(format!("{:.3}s", elapsed.as_secs_f64())).dim()
        )),
        PipelineEvent::GuardStopped { index, name } => Some(format!(
            "{} [{}] {} stopped the pipeline",
            WARN,
            index,
            style(name).yellow()
        )),
        PipelineEvent::RunCompleted { timings, .. } if verbose => {
            Some(format!("{} Timings: {}", INFO, style(timings).dim()))
        }
        _ => None,
    }
}

/// Format a job event for display
pub fn format_job_event(event: &JobEvent, verbose: bool) -> Option<String> {
    match event {
        JobEvent::SessionStarted {
            name,
            session_directory,
            waypoints,
        } => Some(format!(
            "{} Starting session {} ({} waypoints) in {}",
            ROCKET,
            style(name).bold(),
            style(waypoints).cyan(),
            style(session_directory.display()).dim()
        )),
        JobEvent::WaypointReached {
            index,
            total,
            waypoint,
            status,
            ..
        } => Some(format!(
            "{} [{}/{}] {} {}",
            CHECK,
            index + 1,
            total,
            style(format_waypoint(waypoint)).cyan(),
            style(status).dim()
        )),
        JobEvent::Pipeline(event) => format_pipeline_event(event, verbose),
        JobEvent::ReturnedHome => Some(format!("{} Returned home", INFO)),
        JobEvent::SessionFinished { status } => {
            Some(format!("{} Session {}", INFO, format_status(*status)))
        }
    }
}
