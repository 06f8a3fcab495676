//! Tiled-inference evaluation.
//!
//! For each evaluated split: cut every patch of the grid, predict it, stitch
//! the predictions back into frames and score them against the clipped
//! ground truth. Normalisation statistics always come from the training
//! split.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ndarray::{Array3, ArrayView4, Axis, Zip};
use patch_dataset::{create_dataset, MeanStd, PatchDataset};
use patch_grid::{GridIndexManager, GridIndexRegistry, SolutionRunningAverageManager, StitchEngine};
use rayon::prelude::*;
use serde::Serialize;
use split_common::{DataSplit, GridSize, SplitError};
use tracing::{debug, info, warn};

use crate::config::{AccumulationConfig, EvalConfig};
use crate::metrics::{channel_scores, ignore_last_pixels, ChannelScore};
use crate::predictor::Predictor;

/// Running-average pass results for one split.
#[derive(Debug, Clone, Serialize)]
pub struct AccumulationReport {
    pub workers: usize,
    /// Fraction of buffer pixels written by at least one prediction.
    pub written_fraction: f64,
    /// Largest absolute difference to the ground truth over written pixels.
    pub max_abs_error: f64,
    pub dumped: Vec<PathBuf>,
}

/// Results for one split.
#[derive(Debug, Clone, Serialize)]
pub struct SplitReport {
    pub split: DataSplit,
    pub frames: usize,
    pub patches: usize,
    pub undersized: usize,
    pub uncovered_pixels: usize,
    pub grid_size: GridSize,
    pub channels: Vec<ChannelScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulation: Option<AccumulationReport>,
}

/// Results for a whole evaluation run.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub predictor: String,
    pub patch_size: usize,
    pub train_grid_size: GridSize,
    pub ignore_last_pixels: usize,
    pub normalization: MeanStd,
    pub splits: Vec<SplitReport>,
}

impl EvalReport {
    pub fn split(&self, split: DataSplit) -> Option<&SplitReport> {
        self.splits.iter().find(|r| r.split == split)
    }

    /// Write the report as pretty-printed JSON. Infinite scores become `null`.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        serde_json::to_writer_pretty(file, self).context("Failed to serialize report")?;
        Ok(())
    }
}

/// Drives an evaluation run against one registry.
pub struct EvalPipeline {
    config: EvalConfig,
    registry: Arc<GridIndexRegistry>,
}

impl EvalPipeline {
    pub fn new(config: EvalConfig) -> Result<Self> {
        Self::with_registry(config, Arc::new(GridIndexRegistry::new()))
    }

    pub fn with_registry(config: EvalConfig, registry: Arc<GridIndexRegistry>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid evaluation config: {}", e))?;
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn registry(&self) -> &GridIndexRegistry {
        &self.registry
    }

    /// Evaluate every configured split of a `(T, H, W, C)` recording.
    pub fn run(&self, recording: ArrayView4<f32>) -> Result<EvalReport> {
        let train = self.build_dataset(recording, DataSplit::Train)?;
        let stats = train
            .compute_mean_std(false)
            .context("Failed to compute training statistics")?;
        info!(mean = ?stats.mean, std = ?stats.std, "Computed training statistics");

        let mut splits = Vec::with_capacity(self.config.eval_splits.len());
        for &split in &self.config.eval_splits {
            let report = self
                .evaluate_split(recording, split, &stats)
                .with_context(|| format!("Evaluation of {} split failed", split))?;
            splits.push(report);
        }

        Ok(EvalReport {
            predictor: self.config.predictor.to_string(),
            patch_size: self.config.dataset.grid.patch_size,
            train_grid_size: self.config.dataset.grid.grid_size,
            ignore_last_pixels: self.config.ignore_last_pixels,
            normalization: stats,
            splits,
        })
    }

    fn build_dataset(&self, recording: ArrayView4<f32>, split: DataSplit) -> Result<PatchDataset> {
        create_dataset(recording, split, self.config.dataset.clone(), &self.registry)
            .with_context(|| format!("Failed to build {} dataset", split))
    }

    fn evaluate_split(
        &self,
        recording: ArrayView4<f32>,
        split: DataSplit,
        stats: &MeanStd,
    ) -> Result<SplitReport> {
        let mut dataset = self.build_dataset(recording, split)?;
        dataset.set_mean_std(stats.clone())?;
        if let Some(grid) = self.config.eval_grid_size {
            dataset.set_img_sz(self.config.dataset.grid.patch_size, grid, &self.registry)?;
        }
        let manager = self.registry.get_instance(split)?;

        let samples = (0..dataset.len())
            .map(|idx| dataset.get(idx).map(|sample| (idx, sample)))
            .collect::<Result<Vec<_>, _>>()?;

        let denormalize = dataset.config().normalized_input.then(|| stats.clone());
        let predictor = self.config.predictor.build(denormalize);
        let predictions = predict_all(predictor.as_ref(), &samples)?;
        debug!(split = %split, patches = predictions.len(), predictor = predictor.name(), "Predicted patches");

        let engine = StitchEngine::new(self.config.stitch.clone());
        let (stitched, stitch_report) = engine.stitch_with_report(
            predictions.iter().map(|(idx, p)| (*idx, p.view())),
            &manager,
        )?;
        if stitch_report.undersized > 0 {
            warn!(
                split = %split,
                undersized = stitch_report.undersized,
                patch_size = manager.patch_size(),
                "Predictions were smaller than the patch; centered in their windows before stitching"
            );
        }

        let truth = dataset.data().permuted_axes([0, 2, 3, 1]);
        let k = self.config.ignore_last_pixels;
        let channels = channel_scores(ignore_last_pixels(truth, k), ignore_last_pixels(stitched.view(), k));

        for score in &channels {
            info!(
                split = %split,
                channel = score.channel,
                psnr = %score.psnr,
                range_invariant_psnr = %score.range_invariant_psnr,
                "Channel score"
            );
        }

        let accumulation = match &self.config.accumulation {
            Some(acc) => Some(accumulate(split, &manager, &predictions, dataset.data(), acc)?),
            None => None,
        };

        Ok(SplitReport {
            split,
            frames: dataset.frames(),
            patches: stitch_report.patches,
            undersized: stitch_report.undersized,
            uncovered_pixels: stitch_report.uncovered_pixels,
            grid_size: manager.grid_size(),
            channels,
            accumulation,
        })
    }
}

fn predict_all(
    predictor: &dyn Predictor,
    samples: &[(usize, patch_dataset::Sample)],
) -> Result<Vec<(usize, Array3<f32>)>> {
    let predictions = samples
        .par_iter()
        .map(|(idx, sample)| predictor.predict(sample).map(|p| (*idx, p)))
        .collect::<Result<Vec<_>, SplitError>>()?;
    Ok(predictions)
}

/// Write predictions into per-worker running-average buffers, merge them,
/// compare against the `(T, C, H, W)` truth and optionally dump one frame.
fn accumulate(
    split: DataSplit,
    manager: &Arc<GridIndexManager>,
    predictions: &[(usize, Array3<f32>)],
    truth: ArrayView4<f32>,
    config: &AccumulationConfig,
) -> Result<AccumulationReport> {
    let patch_size = manager.patch_size();
    let grid = manager.grid_size();
    let chunk = ((predictions.len() + config.workers - 1) / config.workers).max(1);

    let buffers = predictions
        .par_chunks(chunk)
        .map(|part| -> Result<SolutionRunningAverageManager> {
            let mut buffer =
                SolutionRunningAverageManager::with_manager(split, manager.clone(), &config.buffer, patch_size)?;
            // one at a time: undersized predictions are centered by the buffer
            for (idx, prediction) in part {
                buffer.update(prediction.view().insert_axis(Axis(0)), &[*idx], &[grid])?;
            }
            Ok(buffer)
        })
        .collect::<Result<Vec<_>>>()?;

    let workers = buffers.len();
    let mut buffers = buffers.into_iter();
    let mut merged = match buffers.next() {
        Some(first) => first,
        None => SolutionRunningAverageManager::with_manager(split, manager.clone(), &config.buffer, patch_size)?,
    };
    for other in buffers {
        merged.merge(&other)?;
    }

    let mask = merged.buffer().written_mask();
    let written_fraction = if mask.is_empty() {
        0.0
    } else {
        mask.iter().filter(|&&w| w).count() as f64 / mask.len() as f64
    };

    let data = merged.buffer().data();
    if data.dim() != truth.dim() {
        return Err(SplitError::shape_mismatch(truth.dim(), data.dim()).into());
    }
    let mut max_abs_error = 0.0f64;
    for ((frame, truth_frame), frame_mask) in data.outer_iter().zip(truth.outer_iter()).zip(mask.outer_iter()) {
        for (plane, truth_plane) in frame.outer_iter().zip(truth_frame.outer_iter()) {
            Zip::from(&plane)
                .and(&truth_plane)
                .and(&frame_mask)
                .for_each(|&v, &expected, &written| {
                    if written {
                        max_abs_error = max_abs_error.max((v - expected).abs() as f64);
                    }
                });
        }
    }

    let dumped = if config.buffer.dump_img_dir.is_some() {
        // predictions are already in data units
        let identity = MeanStd::identity(merged.buffer().dim().1);
        merged.dump_img(
            &identity.mean,
            &identity.std,
            config.dump_frame,
            config.dump_downscale_factor,
            config.epoch,
        )?
    } else {
        Vec::new()
    };

    info!(
        split = %split,
        workers,
        written_fraction,
        max_abs_error,
        dumped = dumped.len(),
        "Accumulated predictions"
    );
    Ok(AccumulationReport {
        workers,
        written_fraction,
        max_abs_error,
        dumped,
    })
}
