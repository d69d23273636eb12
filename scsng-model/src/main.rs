//! scsng-model - command-line entry point
//!
//! Subcommands run one pipeline stage each against the catalog in the
//! root folder:
//! - `process-traces`: preprocess, align, decon or strip every trace unit
//! - `model-bins`: stack bins and score every candidate model
//! - `rank`: best model family per bin
//! - `define-cq`: CQ calibration scenarios

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scsng_common::config::{resolve_config_path, resolve_root_folder, CONFIG_ENV, ROOT_FOLDER_ENV};
use scsng_common::db::{init_database, Catalog};
use scsng_model::config::PipelineConfig;
use scsng_model::services::HeaderTravelTimes;
use scsng_model::workflow::{Pipeline, TraceSource};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for scsng-model
#[derive(Parser, Debug)]
#[command(name = "scsng-model")]
#[command(about = "ScS waveform modeling pipeline")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "SCSNG_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Root folder holding traces, outputs and the catalog
    #[arg(short, long, env = "SCSNG_ROOT_FOLDER", global = true)]
    root_folder: Option<PathBuf>,

    /// Worker threads (overrides `pool.workers`)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every trace unit and store per-trace rows
    ProcessTraces {
        /// Process candidate-model synthetics instead of data
        #[arg(long)]
        synthetics: bool,
    },
    /// Stack bins and score every candidate model
    ModelBins,
    /// Rank model families per bin
    Rank,
    /// Run the CQ calibration scenarios
    DefineCq,
}

fn init_logging(config: &PipelineConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;
    let (file_layer, stderr_layer) = match &config.logging.file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(file)),
                ),
                None,
            )
        }
        None => (None, Some(tracing_subscriber::fmt::layer())),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config file: CLI → env → platform default; defaults when absent
    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV)
        .context("Failed to locate config file")?;
    let config = match &config_path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    init_logging(&config)?;

    let root = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config.root_folder.as_deref(),
    );
    info!("Starting scsng-model {}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", root.display());
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: defaults"),
    }

    let db_path = root.join(&config.paths.database);
    let pool = init_database(&db_path)
        .await
        .context("Failed to open catalog")?;
    let catalog = Catalog::new(pool);
    scsng_model::db::init_tables(&catalog)
        .await
        .context("Failed to initialize catalog tables")?;

    let mut pipeline = Pipeline::new(config, root, catalog, tokio::runtime::Handle::current());
    if let Some(workers) = args.workers {
        pipeline = pipeline.with_workers(workers);
    }

    // Runners block on worker threads; keep them off the async executor
    let command = args.command;
    tokio::task::spawn_blocking(move || -> Result<()> {
        match command {
            Command::ProcessTraces { synthetics } => {
                let source = if synthetics {
                    TraceSource::Synthetics
                } else {
                    TraceSource::Data
                };
                let summary = pipeline
                    .process_traces(source, Arc::new(HeaderTravelTimes))
                    .context("Trace processing failed")?;
                info!(
                    "Processed {}/{} units ({} rows)",
                    summary.succeeded, summary.units, summary.written
                );
            }
            Command::ModelBins => {
                let summary = pipeline.model_bins().context("Bin modeling failed")?;
                info!(
                    "Compared {}/{} models ({} bin results)",
                    summary.succeeded, summary.units, summary.written
                );
            }
            Command::Rank => {
                let rankings = pipeline.rank().context("Ranking failed")?;
                info!("Ranked {} bins", rankings.len());
            }
            Command::DefineCq => {
                let rows = pipeline.define_cq().context("CQ scenarios failed")?;
                info!("Scored {} scenarios", rows.len());
            }
        }
        Ok(())
    })
    .await
    .context("Pipeline task panicked")??;

    info!("Done");
    Ok(())
}
