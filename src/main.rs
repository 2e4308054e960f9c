//! dnslog - DNS resolver log ingestion
//!
//! Entry point for the CLI application.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dnslog::config::{CliArgs, Command, IngestConfig};
use dnslog::core::clock::{Clock, SystemClock};
use dnslog::logging::init_logging;
use dnslog::persist::{retention, sqlite::SqliteEventSink};
use dnslog::report::{Dashboard, reader::QueryReader};
use dnslog::runtime::{pipeline::Pipeline, shutdown::create_shutdown_token};
use dnslog::tail::{LineSource, LogTailer};
use tracing::{error, info};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    let config = IngestConfig::load(args.config.as_deref())
        .and_then(|cfg| cfg.resolve(&args))
        .context("Invalid configuration")?;

    init_logging(config.logging.level, config.logging.format);

    match args.command.clone().unwrap_or(Command::Run) {
        Command::Run => run_ingest(config),
        Command::Sweep => run_sweep(&config),
        Command::Report { hours, limit } => run_report(&config, hours, limit),
    }
}

fn run_ingest(config: IngestConfig) -> Result<()> {
    info!(
        log = %config.source.log_path.display(),
        db = %config.store.path.display(),
        retention_days = config.store.retention_days,
        cache_kib = config.store.cache_kib,
        "starting dnslog"
    );

    if let Some(parent) = config.store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let sink = SqliteEventSink::open(&config.store.path, config.store_tuning())
        .with_context(|| format!("Failed to open store {}", config.store.path.display()))?;

    let pipeline = Pipeline::initialize(
        Box::new(sink),
        Arc::new(SystemClock),
        config.pipeline_settings(),
        &config.source.log_path,
        |path| LogTailer::open_at_end(path).map(|t| Box::new(t) as Box<dyn LineSource>),
    )
    .context("Make sure the resolver is installed and query logging is enabled")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    let stats = runtime.block_on(async move {
        let token = create_shutdown_token();
        pipeline.run(token).await
    })?;

    info!(
        committed = stats.events_committed,
        flushes = stats.flushes(),
        dropped = stats.dropped_events,
        "shutdown complete"
    );
    Ok(())
}

fn run_sweep(config: &IngestConfig) -> Result<()> {
    let mut sink = SqliteEventSink::open(&config.store.path, config.store_tuning())
        .with_context(|| format!("Failed to open store {}", config.store.path.display()))?;

    let report = retention::sweep(
        &mut sink,
        SystemClock.now().timestamp(),
        config.retention(),
        config.store.reclaim_space,
    )
    .context("Retention sweep failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_report(config: &IngestConfig, hours: u32, limit: usize) -> Result<()> {
    let reader = QueryReader::open(&config.store.path)
        .with_context(|| format!("Failed to open store {}", config.store.path.display()))?;

    let mut dashboard = Dashboard::new(reader, Arc::new(SystemClock))
        .with_window(Duration::from_secs(u64::from(hours) * 3600))
        .with_limit(limit)
        .with_recent_limit(limit);

    let snapshot = dashboard.snapshot().context("Report query failed")?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
