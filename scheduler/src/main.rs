//! Main entry point for the scheduler binary
//!
//! Runs one context against the simulated membership client and prints every
//! scheduler event as a JSON line on stdout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use scheduler::services::{BroadcastEventSink, RealStateStore, SimulatedMembershipClient};
use scheduler::{Scheduler, SchedulerRegistry};
use shared::{context_debug, context_info, logging, ContextId, EventEnvelope, SchedulerConfig};

const COMPONENT: &str = "scheduler";

/// Paced batch membership scheduler
#[derive(Parser)]
#[command(name = "scheduler")]
#[command(about = "Drains queued group additions in paced sub-bursts against a simulated client")]
pub struct Args {
    /// Directory holding per-context backlog and state snapshots
    #[arg(long, default_value = "./state")]
    pub state_dir: PathBuf,

    /// Context id (one per linked account)
    #[arg(long, default_value = "default")]
    pub context: String,

    /// Target group for the identifiers file
    #[arg(long)]
    pub group: Option<String>,

    /// File with one identifier per line (blank lines and `#` comments ignored)
    #[arg(long)]
    pub identifiers: Option<PathBuf>,

    /// JSON configuration file; `SCHEDULER_*` variables and flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// JSON map of group -> existing members for the simulated client
    #[arg(long)]
    pub simulated_members: Option<PathBuf>,

    /// Probability that a simulated add call fails transiently
    #[arg(long, default_value = "0.1")]
    pub failure_rate: f64,

    /// Seed for delay draws and simulated failures
    #[arg(long)]
    pub seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    let args = Args::parse();
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(COMPONENT, "batch membership scheduler (simulated client)");

    let config = load_config(&args)?;
    let context = ContextId::parse(&args.context)?;

    let groups = match &args.simulated_members {
        Some(path) => load_members(path)?,
        None => HashMap::new(),
    };
    let client = Arc::new(SimulatedMembershipClient::new(groups, args.failure_rate, args.seed));
    if let Some(group) = &args.group {
        client.ensure_group(group.trim()).await;
    }

    let store = Arc::new(RealStateStore::with_base_dir(args.state_dir.clone()));
    let events = Arc::new(BroadcastEventSink::new());
    let printer = spawn_printer(events.subscribe());

    let registry = SchedulerRegistry::new(config, store, events.clone());
    let scheduler = registry.create(context.clone(), client).await?;

    if let (Some(group), Some(path)) = (&args.group, &args.identifiers) {
        let identifiers = read_identifiers(path)?;
        let report = scheduler.enqueue(group, &identifiers).await?;
        context_info!(
            context,
            accepted = report.accepted,
            "Queued {} identifiers ({} duplicates, {} invalid)",
            report.accepted,
            report.rejected_duplicates.len(),
            report.rejected_invalid.len()
        );
    }

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => {
                logging::log_shutdown(COMPONENT, "Received Ctrl+C signal, pausing");
                scheduler.pause().await;
            }
            Err(err) => logging::log_error(COMPONENT, "Signal handling", &err),
        },
        _ = wait_until_idle(&scheduler) => {}
    }

    let status = scheduler.status().await;
    registry.shutdown_all().await;

    // Let the printer catch up before exiting
    let _ = tokio::time::timeout(Duration::from_millis(200), printer).await;

    logging::log_success(
        COMPONENT,
        &format!(
            "{} succeeded, {} already present, {} failed, {} pending",
            status.totals.succeeded,
            status.totals.already_present,
            status.totals.failed,
            status.backlog_size + status.in_flight
        ),
    );
    Ok(())
}

/// Defaults, then the config file, then `SCHEDULER_*` variables, then flags
fn load_config(args: &Args) -> anyhow::Result<SchedulerConfig> {
    let mut config = match &args.config {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    };
    config.apply_env()?;
    if let Some(seed) = args.seed {
        config.rng_seed = Some(seed);
    }
    config.validate()?;
    Ok(config)
}

fn read_identifiers(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read identifiers from {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn load_members(path: &Path) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read simulated members from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse simulated members in {}", path.display()))
}

fn spawn_printer(mut receiver: broadcast::Receiver<EventEnvelope>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(envelope) => match serde_json::to_string(&envelope) {
                    Ok(line) => println!("{line}"),
                    Err(e) => logging::log_error(COMPONENT, "Event serialization", &e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn wait_until_idle(scheduler: &Scheduler) {
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = scheduler.status().await;
        if !status.is_processing {
            context_debug!(scheduler.context(), phase = %status.phase, "Scheduler idle");
            return;
        }
    }
}
