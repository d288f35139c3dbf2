//! codecpack - command line entry point
//!
//! Loads the TOML configuration, builds the encoder backend, and runs every
//! configured dataset through the pipeline. Ctrl-C stops the run; a second
//! Ctrl-C exits immediately.

use anyhow::Context;
use clap::Parser;
use codecpack_rs::{
    config::{format_file_size, PipelineConfig, DEFAULT_CONFIG_FILE},
    encoder::build_backend,
    logging,
    orchestrator::{Pipeline, PipelineSummary},
    source::ManifestLoader,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit code used when the run was interrupted
const EXIT_INTERRUPTED: u8 = 130;

/// Encode audio datasets into codec token shards
#[derive(Parser, Debug)]
#[command(name = "codecpack")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, env = "CODECPACK_CONFIG")]
    config: PathBuf,

    /// Override base_settings.out_dir
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    validate_only: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let _log_guard = logging::init(args.log_file.as_deref());

    let mut config = PipelineConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(out_dir) = args.out_dir {
        config.base_settings.out_dir = out_dir;
    }
    tracing::info!(
        "Model {}, {} readers, queue size {}, output {}",
        config.base_settings.model_id,
        config.base_settings.num_readers,
        config.base_settings.qsize,
        config.base_settings.out_dir.display()
    );

    let backend = build_backend(&config.encoder).context("Failed to set up the encoder")?;
    let interrupt = Arc::new(AtomicBool::new(false));
    let pipeline = Pipeline::new(config, Box::new(ManifestLoader::new()), backend)
        .with_interrupt_flag(interrupt.clone());

    if args.validate_only {
        pipeline.validate()?;
        tracing::info!("Configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }

    ctrlc::set_handler(move || {
        if interrupt.swap(true, Ordering::SeqCst) {
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
        tracing::warn!("Interrupted, stopping readers and workers (Ctrl-C again to force)");
    })
    .context("Failed to install the Ctrl-C handler")?;

    match pipeline.run() {
        Ok(summary) => {
            print_summary(&summary);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_interrupted() => {
            tracing::warn!("Run aborted by interrupt");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_summary(summary: &PipelineSummary) {
    for stats in &summary.datasets {
        tracing::info!(
            "  {}: {} encoded, {} failed, {} files, {}",
            stats.dataset,
            stats.items_encoded,
            stats.items_failed,
            stats.files,
            format_file_size(stats.total_bytes)
        );
    }
    tracing::info!(
        "Final dataset: {} rows, columns {:?}",
        summary.merged_rows,
        summary.columns
    );
    if let Some(info) = &summary.local_export {
        tracing::info!("Saved locally ({} rows)", info.num_rows);
    }
    if let Some(remote) = &summary.published_to {
        tracing::info!("Published to {}", remote);
    }
}
