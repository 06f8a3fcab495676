//! Channel-splitting evaluation service.
//!
//! Generates a synthetic two-stain recording, runs tiled inference over the
//! configured splits and reports per-channel PSNR.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use split_common::GridSize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use split_eval::{EvalConfig, EvalPipeline, PredictorKind};

#[derive(Parser, Debug)]
#[command(name = "split-eval")]
#[command(about = "Tiled-inference evaluation for channel splitting")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "SPLIT_EVAL_CONFIG")]
    config: Option<PathBuf>,

    /// Evaluation grid size, e.g. "16" or "16,16"
    #[arg(short, long)]
    grid_size: Option<String>,

    /// Predictor: oracle, mixture or undersized:<margin>
    #[arg(short, long)]
    predictor: Option<String>,

    /// Write the JSON report here
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);
    if args.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    let mut config = EvalConfig::load(args.config.as_deref())?;
    if let Some(grid) = &args.grid_size {
        config.eval_grid_size = Some(GridSize::parse(grid)?);
    }
    if let Some(predictor) = &args.predictor {
        config.predictor = PredictorKind::from_str(predictor)?;
    }
    if let Some(report) = args.report {
        config.report_path = Some(report);
    }

    info!(
        config = ?args.config,
        predictor = %config.predictor,
        patch_size = config.dataset.grid.patch_size,
        grid_size = %config.dataset.grid.grid_size,
        splits = ?config.eval_splits,
        "Starting split evaluation"
    );

    let recording = config.synthetic.generate();
    let pipeline = EvalPipeline::new(config)?;
    let report = pipeline.run(recording.view()).context("Evaluation failed")?;

    for split in &report.splits {
        for score in &split.channels {
            println!(
                "{}\tch{}\tPSNR {}\tRI-PSNR {}",
                split.split, score.channel, score.psnr, score.range_invariant_psnr
            );
        }
    }

    if let Some(path) = &pipeline.config().report_path {
        report.write_json(path)?;
        info!(path = %path.display(), "Wrote evaluation report");
    }

    Ok(())
}
