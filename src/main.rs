//! genai-stress - rate-controlled load and overload detection for GenAI endpoints

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Run(args)) => cli::run(args).await,
        Some(Commands::Validate { config }) => cli::validate(&config),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

/// `--verbose` wins, then `RUST_LOG`, then `LOG_LEVEL`, then `info`.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = std::env::var("LOG_LEVEL")
                .ok()
                .filter(|level| !level.trim().is_empty())
                .unwrap_or_else(|| "info".to_string());
            EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"))
        })
    };

    // stdout carries the JSON event stream
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
