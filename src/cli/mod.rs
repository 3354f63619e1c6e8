//! CLI argument parsing and command dispatch

mod batch;
mod factory;
mod observer;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use genai_stress_core::{
    HistoryStore, OrchestratorBuilder, OrchestratorStatus, SessionOrchestrator, StressError,
    Threshold,
};
use genai_stress_storage::{InMemoryHistoryStore, JsonLinesHistoryStore};

pub use batch::BatchFile;
pub use factory::DefaultComponentFactory;
pub use observer::StdoutObserver;

#[derive(Parser)]
#[command(name = "genai-stress")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a batch of load-test sessions
    Run(RunArgs),
    /// Validate a batch file without sending requests
    Validate {
        /// Path to the batch file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the batch file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Append run summaries to this JSON-lines file
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Seed for prompt sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print discrete events only, not the periodic state snapshots
    #[arg(long)]
    pub events_only: bool,

    #[command(flatten)]
    pub thresholds: ThresholdArgs,
}

/// Overload threshold overrides; `off` disables a condition
#[derive(Args, Debug, Clone, Default)]
pub struct ThresholdArgs {
    /// Minimum per-minute success rate in percent
    #[arg(long, env = "DEFAULT_SUCCESS_THRESHOLD", value_parser = parse_threshold::<f64>)]
    pub success_threshold: Option<Threshold<f64>>,

    /// Consecutive failures that end an auto-ramp session
    #[arg(long, env = "DEFAULT_MAX_FAILURES", value_parser = parse_threshold::<u32>)]
    pub max_failures: Option<Threshold<u32>>,

    /// Average latency ceiling in milliseconds, also the request deadline
    #[arg(long, env = "DEFAULT_RESPONSE_TIME_THRESHOLD", value_parser = parse_threshold::<u64>)]
    pub response_time_threshold: Option<Threshold<u64>>,
}

fn parse_threshold<T>(value: &str) -> Result<Threshold<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value.trim().to_ascii_lowercase().as_str() {
        "off" | "disabled" | "none" => Ok(Threshold::Disabled),
        number => number
            .parse()
            .map(Threshold::Enabled)
            .map_err(|e| format!("expected a number or `off`: {e}")),
    }
}

/// Parse and validate a batch file, printing one line per session
pub fn validate(path: &Path) -> Result<()> {
    let batch = BatchFile::load(path)?;
    batch.validate()?;

    for (index, session) in batch.sessions.iter().enumerate() {
        let summary = session.summary(&batch.defaults);
        println!(
            "session {}: {} {} ({}) rate={} rpm={} prompt={}",
            index + 1,
            summary.provider.display_name(),
            summary.model,
            summary.endpoint,
            summary.rate_mode,
            summary.target_rpm,
            summary.prompt_policy,
        );
    }
    println!("{} OK", path.display());
    Ok(())
}

/// Run a batch until it finishes or Ctrl-C stops it
pub async fn run(args: RunArgs) -> Result<()> {
    let mut batch = BatchFile::load(&args.config)?;
    batch.apply_overrides(&args.thresholds);
    batch.validate()?;

    let history: Arc<dyn HistoryStore> = match &args.history {
        Some(path) => Arc::new(
            JsonLinesHistoryStore::open(path)
                .await
                .with_context(|| format!("Failed to open history file: {}", path.display()))?,
        ),
        None => Arc::new(InMemoryHistoryStore::new()),
    };

    let throttle = batch.defaults.broadcast_throttle;
    let orchestrator = OrchestratorBuilder::new()
        .defaults(batch.defaults)
        .factory(Arc::new(DefaultComponentFactory::new().with_seed(args.seed)))
        .history(history)
        .build()
        .context("Failed to build orchestrator")?;
    orchestrator
        .broadcaster()
        .subscribe(Arc::new(StdoutObserver::new().events_only(args.events_only)));

    let status = orchestrator
        .start(batch.sessions)
        .await
        .context("Failed to start batch")?;
    tracing::info!(
        batch_id = ?status.batch_id,
        sessions = status.sessions.len(),
        "Batch running, press Ctrl-C to stop"
    );

    tokio::select! {
        _ = orchestrator.wait_idle() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Interrupted, stopping all sessions");
            stop(&orchestrator).await?;
        }
    }
    orchestrator.wait_idle().await;

    // let the broadcaster flush the final snapshot
    tokio::time::sleep(throttle * 2).await;

    print_summary(&orchestrator.status());
    Ok(())
}

async fn stop(orchestrator: &SessionOrchestrator) -> Result<()> {
    match orchestrator.stop_all().await {
        Ok(_) => Ok(()),
        // the batch finished on its own while the signal was handled
        Err(StressError::Concurrency(_)) => Ok(()),
        Err(e) => Err(e).context("Failed to stop batch"),
    }
}

fn print_summary(status: &OrchestratorStatus) {
    let totals = status.totals();
    eprintln!();
    for session in &status.sessions {
        let stats = &session.stats;
        eprintln!(
            "{} {:<9} total={} ok={} failed={} success={:.1}% avg={:.0}ms p95={:.0}ms peak_rpm={} {}",
            session.id,
            session.state.label(),
            stats.total_requests,
            stats.success_count,
            stats.failure_count,
            stats.success_rate,
            stats.avg_latency_ms,
            stats.latency.p95,
            session.peak_rpm,
            session.state.reason().unwrap_or_default(),
        );
    }
    eprintln!(
        "batch: {} sessions, {} requests, {:.1}% success",
        totals.sessions,
        totals.total_requests,
        totals.success_rate(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold::<f64>("80"), Ok(Threshold::Enabled(80.0)));
        assert_eq!(parse_threshold::<u32>("0"), Ok(Threshold::Enabled(0)));
        assert_eq!(parse_threshold::<u64>("OFF"), Ok(Threshold::Disabled));
        assert!(parse_threshold::<u32>("ten").is_err());
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "genai-stress",
            "run",
            "--config",
            "batch.toml",
            "--max-failures",
            "off",
            "--response-time-threshold",
            "30000",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Run(args)) => {
                assert_eq!(args.config, PathBuf::from("batch.toml"));
                assert_eq!(args.thresholds.max_failures, Some(Threshold::Disabled));
                assert_eq!(
                    args.thresholds.response_time_threshold,
                    Some(Threshold::Enabled(30_000))
                );
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
