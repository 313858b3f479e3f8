//! NWP ingester.
//!
//! Runs one ingestion cycle for the configured sources and prints the cycle
//! report as JSON on stdout. Scheduling is left to the caller (cron, systemd
//! timers, a workflow engine).
//!
//! Exit codes: 0 success or degraded, 1 total failure, 75 cycle busy.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use ingestion::{CycleReport, PipelineConfig, PipelineOrchestrator, RunRequest, RunStatus};
use nwp_common::SourceId;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// `EX_TEMPFAIL`: another run holds the cycle, try again later.
const EXIT_BUSY: u8 = 75;

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Ingest the latest NWP cycle of each configured source")]
struct Args {
    /// Run date (YYYYMMDD); the latest published cycle when omitted
    #[arg(long, value_parser = parse_date, requires = "hour")]
    date: Option<NaiveDate>,

    /// Run hour (UTC)
    #[arg(long, requires = "date")]
    hour: Option<u8>,

    /// Source to run (repeatable; default: all enabled)
    #[arg(short, long = "source")]
    sources: Vec<SourceId>,

    /// Configuration file path
    #[arg(short, long, default_value = "config/pipeline.yaml", env = "INGESTER_CONFIG")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|e| format!("expected YYYYMMDD: {}", e))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, args.json_logs);

    info!(config = %args.config.display(), "Starting NWP ingester");
    let config = load_config(&args.config)?;
    let orchestrator = PipelineOrchestrator::from_config(config).context("failed to build pipeline")?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, finishing in-flight work");
            signal.cancel();
        }
    });

    let mut request = RunRequest::default().with_sources(args.sources);
    if let (Some(date), Some(hour)) = (args.date, args.hour) {
        request.cycle = Some((date, hour));
    }

    let report = orchestrator.run(&request, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(ExitCode::from(exit_code(&report)))
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    // stdout carries the report
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let mut config = if path.exists() {
        PipelineConfig::load(path)?
    } else {
        warn!(path = %path.display(), "Configuration file not found, using defaults");
        PipelineConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;

    info!(
        sources = ?config.sources.enabled(),
        grid = %config.grid.name,
        store = %config.store.zarr.root.display(),
        "Loaded configuration"
    );
    Ok(config)
}

fn exit_code(report: &CycleReport) -> u8 {
    match report.status {
        RunStatus::Success | RunStatus::Degraded => 0,
        RunStatus::Failed if report.is_busy() => EXIT_BUSY,
        RunStatus::Failed => 1,
    }
}
