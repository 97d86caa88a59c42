use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use satellite_config::{init_tracing, SatelliteConfig};
use satellite_debug::{DebugManager, DebugSession, DebugSessionState};
use satellite_larky_debugger::{
    Breakpoint, DebuggedThread, DebuggerEvent, Location, ProcessEvaluator, Stepping,
};
use tokio::sync::broadcast::error::RecvError;

/// Headless driver for Larky debug sessions.
#[derive(Debug, Parser)]
#[command(name = "satellite-debug", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `SATELLITE_CONFIG` is used as a fallback. When neither are
    /// provided the built-in defaults apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one debug session until its script finishes.
    Run(RunArgs),
    /// Print the effective configuration as JSON.
    ShowConfig,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    org_id: String,

    #[arg(long)]
    vault: String,

    /// Pause at `path:line[:column]`; may be repeated.
    #[arg(long = "breakpoint", value_name = "LOCATION")]
    breakpoints: Vec<Location>,

    /// How paused threads are resumed: none, into, over or out.
    #[arg(long, default_value = "none")]
    step: Stepping,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, path) = SatelliteConfig::load(cli.config.as_deref())?;
    config
        .validate()
        .with_context(|| match &path {
            Some(path) => format!("invalid config {}", path.display()),
            None => "invalid default config".to_owned(),
        })?;

    match cli.command {
        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Run(args) => {
            init_tracing(&config.logging);
            if let Some(path) = &path {
                tracing::debug!(target: "satellite.config", path = %path.display(), "loaded config");
            }
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start the tokio runtime")?
                .block_on(run(config, args))
        }
    }
}

async fn run(config: SatelliteConfig, args: RunArgs) -> anyhow::Result<()> {
    let evaluator = ProcessEvaluator::new(config.evaluator.program.clone())
        .with_args(config.evaluator.args.clone());
    let manager = DebugManager::new(&config, Arc::new(evaluator));
    let session = manager.new_session(args.org_id.clone(), args.vault.clone())?;
    print_json(&session.info())?;

    let outcome = tokio::select! {
        outcome = drive(&session, &args) => outcome,
        signal = tokio::signal::ctrl_c() => {
            tracing::info!(target: "satellite.debug", session_id = %session.id(), "interrupted");
            signal.context("failed to listen for ctrl-c")
        }
    };

    manager.stop_all().await;
    let info = session.info();
    print_json(&info)?;

    outcome?;
    if info.state == DebugSessionState::Error {
        bail!(
            "debug session failed: {}",
            info.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Plant breakpoints, then report and resume every paused thread until the
/// script produces its result.
async fn drive(session: &DebugSession, args: &RunArgs) -> anyhow::Result<()> {
    if session.wait_started().await != DebugSessionState::Running {
        return Ok(());
    }

    let mut events = session.subscribe_events()?;
    let breakpoints: Vec<Breakpoint> = args.breakpoints.iter().cloned().map(Breakpoint::at).collect();
    session.set_breakpoints(&breakpoints).await?;

    // Threads paused before we subscribed.
    for thread in session.threads()? {
        resume(session, thread, args.step).await;
    }

    loop {
        tokio::select! {
            _ = session.result().wait() => return Ok(()),
            event = events.recv() => match event {
                Ok(DebuggerEvent::ThreadPaused(thread)) => resume(session, thread, args.step).await,
                Ok(DebuggerEvent::ThreadContinued(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "satellite.debug", skipped, "missed debugger events");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn resume(session: &DebugSession, thread: DebuggedThread, step: Stepping) {
    let thread_id = thread.id;
    let frames = match session.list_frames(thread_id).await {
        Ok(frames) => frames,
        // Already resumed (seen both in the snapshot and as an event).
        Err(err) => {
            tracing::debug!(target: "satellite.debug", thread_id, error = %err, "skipping thread");
            return;
        }
    };
    let report = serde_json::json!({
        "event": "paused",
        "thread": thread,
        "frames": frames,
    });
    if let Err(err) = print_json(&report) {
        tracing::warn!(target: "satellite.debug", error = %err, "failed to print paused thread");
    }

    if let Err(err) = session.continue_execution(thread_id, step).await {
        tracing::warn!(target: "satellite.debug", thread_id, error = %err, "failed to resume thread");
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
