mod cli;
mod scenarios;

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info};

use interlock_core::Config;
use interlock_graph::LockManager;

use crate::cli::{CliArgs, Scenario};
use crate::scenarios::Outcome;

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    // Load config
    let config = match args.config.as_deref() {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from '{}'", path))?,
        None => {
            interlock_core::load_dotenv();
            let config = Config::from_env();
            config.validate().context("invalid configuration in environment")?;
            config
        }
    };
    config.log_summary();

    let manager = LockManager::new(config.locks.clone());
    let started = Instant::now();
    let outcome = match &args.scenario {
        Scenario::Rotate { run, locks } => {
            scenarios::rotate(&manager, run.threads, *locks, deadline(run.seconds))?
        }
        Scenario::AbBa { run } => scenarios::ab_ba(&manager, run.threads, deadline(run.seconds))?,
        Scenario::Mixed { run, width } => {
            scenarios::mixed(&manager, run.threads, *width, deadline(run.seconds))?
        }
        Scenario::Jobs { run, jobs } => {
            scenarios::jobs(&config, &manager, *jobs, 5, deadline(run.seconds))?
        }
    };
    info!(elapsed = ?started.elapsed(), "Scenario finished");

    report(&args, &manager, &outcome)?;

    let snapshot = manager.snapshot();
    if !snapshot.is_empty() {
        error!("Lock graph not empty after the run");
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        bail!("{} resources still held after the run", snapshot.resources.len());
    }
    if !outcome.is_clean() {
        for failure in &outcome.failures {
            error!(%failure, "Participant failed");
        }
        bail!(
            "{} of {} participants did not finish cleanly",
            outcome.participants - outcome.finished,
            outcome.participants
        );
    }
    Ok(())
}

fn deadline(seconds: u64) -> Instant {
    Instant::now() + Duration::from_secs(seconds)
}

fn report(args: &CliArgs, manager: &LockManager, outcome: &Outcome) -> Result<()> {
    let metrics = manager.metrics();
    if args.json {
        let doc = serde_json::json!({
            "participants": outcome.participants,
            "finished": outcome.finished,
            "iterations": outcome.iterations,
            "failures": outcome.failures,
            "locks": metrics,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!(
        "participants: {}/{} finished, {} iterations",
        outcome.finished, outcome.participants, outcome.iterations
    );
    println!(
        "acquisitions: {}  contended waits: {}  cancelled waits: {}",
        metrics.acquisitions, metrics.contended_waits, metrics.cancelled_waits
    );
    println!(
        "deadlocks resolved: {}  abandoned resources: {}",
        metrics.cycles_detected, metrics.abandoned_resources
    );
    for resolution in &metrics.recent_resolutions {
        println!(
            "  {} victim={} requester={} cycle={:?} forfeited={}",
            resolution.at.format("%H:%M:%S%.3f"),
            resolution.victim,
            resolution.requester,
            resolution.cycle,
            resolution.forfeited
        );
    }
    Ok(())
}
