//! CLI command definitions

use crate::core::Axis;
use clap::Args;

/// Run an acquisition session
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to session YAML file
    #[arg(short, long)]
    pub file: String,

    /// Serial port override
    #[arg(short, long)]
    pub port: Option<String>,

    /// Use the simulated firmware instead of a serial port
    #[arg(long)]
    pub dry_run: bool,

    /// Don't save the session to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a session configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to session YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Expand a sequence into waypoints
#[derive(Debug, Args, Clone)]
pub struct SequenceCommand {
    /// Range grammar, e.g. `x(0,10,1)y(0,5,0.5)`
    #[arg(required_unless_present = "csv", conflicts_with = "csv")]
    pub grammar: Option<String>,

    /// Headerless coordinate CSV file
    #[arg(long)]
    pub csv: Option<String>,

    /// Configured axes, in column order
    #[arg(long, value_delimiter = ',', default_value = "x,y,z")]
    pub axes: Vec<Axis>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List the registered pipeline steps
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show session history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Job name to filter by
    #[arg(short, long)]
    pub job: Option<String>,

    /// Number of recent sessions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific session
    #[arg(long)]
    pub session_id: Option<String>,
}
