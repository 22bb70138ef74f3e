use anyhow::{anyhow, Context, Result};
use stagescan::cli::commands::{HistoryCommand, ListCommand, RunCommand, SequenceCommand, ValidateCommand};
use stagescan::cli::output::*;
use stagescan::cli::{Cli, Command};
use stagescan::controller::{MotionController, SerialTransport, SimulatedFirmware, TokioSerialTransport};
use stagescan::core::config::SessionConfig;
use stagescan::core::{ExecutionStatus, Pipeline, Sequence, StepRole};
use stagescan::execution::{input_channel, InputEvent, Job, JobEvent, StepRegistry};
use stagescan::persistence::{InMemoryPersistence, PersistenceBackend, SessionSummary};
use stagescan::sensor::SyntheticSensor;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_session(cmd, &cli).await?,
        Command::Validate(cmd) => validate_session(cmd)?,
        Command::Sequence(cmd) => show_sequence(cmd)?,
        Command::List(cmd) => list_steps(cmd)?,
        Command::History(cmd) => show_history(cmd, &cli).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history(database: Option<&str>) -> Result<Arc<dyn PersistenceBackend>> {
    let store = match database {
        Some(path) => stagescan::persistence::SqliteSessionStore::new(path).await?,
        None => stagescan::persistence::SqliteSessionStore::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history(_database: Option<&str>) -> Result<Arc<dyn PersistenceBackend>> {
    warn!("Built without sqlite support, session history is not kept");
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_session(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    // Load session config
    let mut config = SessionConfig::from_file(&cmd.file).context("Failed to load session config")?;
    if let Some(port) = &cmd.port {
        config.controller.port = port.clone();
    }

    println!("{} Loaded job: {}", INFO, style(&config.job.name).bold());

    // Set up persistence
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history(cli.database.as_deref()).await?
    };

    let transport: Box<dyn SerialTransport> = if cmd.dry_run {
        println!("{} Dry run, using simulated {} firmware", INFO, config.controller.dialect);
        Box::new(SimulatedFirmware::new(config.controller.dialect, &config.controller.axes()))
    } else {
        Box::new(TokioSerialTransport::new())
    };
    let controller = MotionController::new(config.controller.clone(), transport)
        .context("Invalid controller configuration")?;
    let sensor = Box::new(SyntheticSensor::new(&config.sensor));

    let registry = StepRegistry::with_builtins();
    let mut job = Job::new(config, controller, sensor, &registry).context("Failed to prepare job")?;

    let progress = if job.is_interactive() {
        indicatif::ProgressBar::hidden()
    } else {
        create_progress_bar(job.sequence().len())
    };

    // Set up event handler for console output
    let verbose = cli.verbose;
    let bar = progress.clone();
    job.add_event_handler(move |event| {
        if let JobEvent::WaypointReached { index, .. } = &event {
            bar.set_position(*index as u64 + 1);
        }
        match format_job_event(&event, verbose) {
            Some(line) if bar.is_hidden() => println!("{}", line),
            Some(line) => bar.println(line),
            None => {}
        }
    });

    let events = if job.is_interactive() {
        println!("{} Type a key name and press enter ('h' for help, 'q' to quit)", INFO);
        Some(spawn_stdin_reader())
    } else {
        None
    };

    // Execute session, stopping cleanly on Ctrl-C
    println!();
    let outcome = {
        let execution = job.execute(events);
        tokio::pin!(execution);
        tokio::select! {
            result = &mut execution => Some(result),
            _ = signal::ctrl_c() => None,
        }
    };
    progress.finish_and_clear();

    let result = match outcome {
        Some(result) => result.map_err(anyhow::Error::from),
        None => {
            job.cancel();
            job.shutdown().await;
            Err(anyhow!("Interrupted by operator"))
        }
    };

    // Save to history
    if !cmd.no_history {
        let summary = job.summary();
        store.save_session(&summary).await?;
        println!(
            "\n{} Session saved to history (ID: {})",
            INFO,
            style(&summary.session_id.to_string()[..8]).dim()
        );
    }

    // Print final status
    match result {
        Ok(()) => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(job.name()).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        Err(e) => {
            println!("\n{} {} {}", CROSS, style(job.name()).bold(), style("failed").red());
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Forward stdin lines as key events until `q` or end of input
fn spawn_stdin_reader() -> tokio::sync::mpsc::Receiver<InputEvent> {
    let (sender, receiver) = input_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let key = line.trim();
            if key.is_empty() {
                continue;
            }
            match InputEvent::from_key(key) {
                Some(event) => {
                    if sender.send(event).await.is_err() || event == InputEvent::Quit {
                        break;
                    }
                }
                None => warn!("Unknown key '{}', 'h' lists the commands", key),
            }
        }
    });
    receiver
}

fn validate_session(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating session...", INFO);

    let checked = SessionConfig::from_file(&cmd.file).and_then(|config| {
        let sequence = Job::build_sequence(&config)?;
        let pipeline = Pipeline::from_config(&config.job.pipeline, &StepRegistry::with_builtins())?;
        Ok((config, sequence, pipeline))
    });

    match checked {
        Ok((config, sequence, pipeline)) => {
            println!("{} Session configuration is valid!", CHECK);
            println!("  Job: {}", style(&config.job.name).bold());
            println!("  Controller: {} on {}", config.controller.dialect, style(&config.controller.port).cyan());
            println!("  Mode: {:?}", config.job.mode);
            println!("  Waypoints: {}", style(sequence.len()).cyan());
            println!("  Distance: {}", style(format!("{:.3}", sequence.distance())).cyan());
            println!("  Steps: {}", style(pipeline.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn show_sequence(cmd: &SequenceCommand) -> Result<()> {
    let sequence = match (&cmd.grammar, &cmd.csv) {
        (Some(grammar), _) => Sequence::generate(grammar, &cmd.axes)?,
        (None, Some(csv)) => Sequence::from_csv(csv, &cmd.axes)?,
        (None, None) => return Err(anyhow!("Either a grammar or a CSV file must be provided")),
    };

    if cmd.json {
        let waypoints: Vec<_> = sequence.iter().collect();
        let data = serde_json::json!({
            "waypoints": waypoints,
            "distance": sequence.distance(),
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!(
        "{} {} waypoints, distance {}",
        INFO,
        style(sequence.len()).cyan(),
        style(format!("{:.3}", sequence.distance())).cyan()
    );
    for (index, waypoint) in sequence.iter().enumerate() {
        println!("  {:>5}  {}", style(index).dim(), format_waypoint(waypoint));
    }
    Ok(())
}

fn list_steps(cmd: &ListCommand) -> Result<()> {
    let registry = StepRegistry::with_builtins();
    let names = registry.names();

    if cmd.json {
        let steps: Vec<_> = names
            .iter()
            .filter_map(|name| name.split_once('.'))
            .map(|(module, function)| {
                serde_json::json!({
                    "module": module,
                    "function": function,
                    "role": format!("{:?}", StepRole::for_step(module, function)).to_lowercase(),
                    "requires_input": registry
                        .get(module, function)
                        .map(|f| f.requires_input())
                        .unwrap_or(false),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "steps": steps }))?);
        return Ok(());
    }

    println!("{} Registered pipeline steps:", INFO);
    for name in &names {
        let Some((module, function)) = name.split_once('.') else {
            continue;
        };
        let mut notes = Vec::new();
        match StepRole::for_step(module, function) {
            StepRole::Guard => notes.push("guard"),
            StepRole::Kill => notes.push("kill"),
            StepRole::Data => {}
        }
        if registry.get(module, function).is_some_and(|f| f.requires_input()) {
            notes.push("input");
        }
        if notes.is_empty() {
            println!("  {}", style(name).bold());
        } else {
            println!("  {} {}", style(name).bold(), style(format!("({})", notes.join(", "))).dim());
        }
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli) -> Result<()> {
    let store = open_history(cli.database.as_deref()).await?;

    // If specific session ID is requested
    if let Some(session_id) = &cmd.session_id {
        let session_id = uuid::Uuid::parse_str(session_id).context("Invalid session ID format")?;
        match store.load_session(session_id).await? {
            Some(summary) => print_session_details(&summary, cmd.verbose)?,
            None => println!("{} Session not found", WARN),
        }
        return Ok(());
    }

    // List sessions for one job or all
    let mut sessions = match &cmd.job {
        Some(job) => store.list_sessions(job).await?,
        None => {
            let mut all = Vec::new();
            for job in store.list_jobs().await? {
                all.extend(store.list_sessions(&job).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    sessions.truncate(cmd.limit);

    if sessions.is_empty() {
        println!("{} No sessions found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "sessions": sessions });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Session history (showing latest {}):", INFO, cmd.limit);
        for summary in &sessions {
            println!("  {}", format_session_summary(summary));
        }
    }

    Ok(())
}

fn print_session_details(summary: &SessionSummary, verbose: bool) -> Result<()> {
    println!("{} Session Details", INFO);
    println!("  ID: {}", style(summary.session_id).cyan());
    println!("  Job: {}", style(&summary.job_name).bold());
    println!("  Session: {}", summary.session_name);
    println!("  Mode: {:?}", summary.mode);
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    if summary.status != ExecutionStatus::Running {
        println!(
            "  Progress: {} ({}/{})",
            style(format!("{:.0}%", summary.progress * 100.0)).cyan(),
            summary.completed_waypoints,
            summary.total_waypoints
        );
    }
    println!("  Directory: {}", style(&summary.session_directory).dim());

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
