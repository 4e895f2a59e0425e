//! Notion target
//!
//! Singer target that writes pipeline records to Notion.
//!
//! Reads Singer messages (JSON lines) from stdin or `--input`, writes each
//! record through [`notion_sink::NotionSink`], and emits the final state on
//! stdout. Logs go to stderr.

mod error;
mod reqwest_client;
mod runner;
mod singer;

use crate::error::CliResult;
use crate::reqwest_client::{ReqwestClient, DEFAULT_TIMEOUT};
use crate::runner::Runner;
use clap::Parser;
use notion_sink::{NotionSink, RetryConfig, SinkConfig};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Writes Singer records to Notion.
#[derive(Parser)]
#[command(name = "target-notion")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long)]
    config: PathBuf,

    /// Read messages from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Maximum attempts per record for retriable errors
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "target-notion failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> CliResult<()> {
    let config = SinkConfig::from_file(&cli.config)?;
    let timeout = cli.timeout.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
    let sink = NotionSink::new(&config, ReqwestClient::new(timeout)?)?;
    if let Some(container) = sink.container() {
        info!(container = container.id(), "writing rows");
    }

    let mut runner = Runner::new(sink, RetryConfig::new(cli.max_attempts));
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match &cli.input {
        Some(path) => runner.run(BufReader::new(File::open(path)?), &mut out),
        None => runner.run(io::stdin().lock(), &mut out),
    }
}
