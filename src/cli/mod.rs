//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ListCommand, RunCommand, SequenceCommand, ValidateCommand};
use std::ffi::OsString;

/// Motorized stage scanner
#[derive(Debug, Parser, Clone)]
#[command(name = "stagescan")]
#[command(author = "stagescan contributors")]
#[command(version = "0.1.0")]
#[command(about = "Drive a motorized stage through waypoints and process a frame at each stop", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the session history database
    #[arg(long, global = true)]
    pub database: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run an acquisition session
    Run(RunCommand),

    /// Validate a session configuration
    Validate(ValidateCommand),

    /// Expand a sequence grammar or CSV file into waypoints
    Sequence(SequenceCommand),

    /// List the registered pipeline steps
    List(ListCommand),

    /// Show session history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
