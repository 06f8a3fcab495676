//! Index-addressable (input, target) patch dataset.

use std::sync::Arc;

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};
use patch_grid::{lateral_context_stack, CropMode, GridIndexManager, GridIndexRegistry, PatchCropper};
use rand::rngs::StdRng;
use rand::SeedableRng;
use split_common::{DataShape, DataSplit, GridSize, Location, SplitError, SplitResult};
use tracing::{debug, info};

use crate::augment::Augmentation;
use crate::config::{DatasetConfig, DatasetKind};
use crate::frames::{frame_range, select_frames};
use crate::normalize::{compute_max_val, compute_mean_std, upperclip_data, MeanStd};

/// One dataset item.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// `(L, P, P)` channel mixture; `L` is 1 unless lateral context is on.
    pub input: Array3<f32>,
    /// `(C, P, P)` unmixed channels.
    pub target: Array3<f32>,
    /// Where the patch was cut.
    pub location: Location,
}

/// Patches over the frames of one split.
///
/// The dataset registers its [`GridIndexManager`] under its split on
/// construction and whenever its geometry changes, so stitchers and
/// running-average buffers resolve the same coordinates.
#[derive(Debug)]
pub struct PatchDataset {
    split: DataSplit,
    config: DatasetConfig,
    /// `(T, C, H, W)`
    data: Array4<f32>,
    index: Arc<GridIndexManager>,
    cropper: PatchCropper,
    rng: StdRng,
    mean_std: Option<MeanStd>,
    max_val: Option<f32>,
}

impl PatchDataset {
    /// Build from frames that already belong to `split`.
    ///
    /// `volume` is `(T, H, W, C)` with at least two channels.
    pub fn new(
        mut volume: Array4<f32>,
        split: DataSplit,
        config: DatasetConfig,
        registry: &GridIndexRegistry,
    ) -> SplitResult<Self> {
        config.validate().map_err(SplitError::InvalidConfig)?;

        let (_, _, _, channels) = volume.dim();
        if channels < 2 {
            return Err(SplitError::shape_mismatch("at least 2 channels", format!("{} channels", channels)));
        }

        // random cropping and augmentation only make sense while training
        let training = split == DataSplit::Train;
        let random_crop = config.enable_random_cropping && training;

        let max_val = match config.clip_quantile {
            Some(q) => {
                let max_val = compute_max_val(volume.view(), q)?;
                upperclip_data(&mut volume, max_val);
                Some(max_val)
            }
            None => None,
        };

        let shape = DataShape::from(volume.dim());
        let manager = GridIndexManager::from_config(shape, &config.grid)?;
        let index = registry.register(split, manager);

        let patch_size = config.grid.patch_size;
        let cropper = if random_crop {
            PatchCropper::random(patch_size, config.grid.padding, config.seed)
        } else {
            PatchCropper::new(patch_size, config.grid.padding)
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };

        info!(
            split = %split,
            kind = %config.kind,
            shape = %shape,
            patch_size,
            grid_size = %config.grid.grid_size,
            patches = index.grid_count(),
            normalized_input = config.normalized_input,
            random_crop,
            rotation = config.enable_rotation_aug && training,
            max_val = ?max_val,
            "Created patch dataset"
        );

        Ok(Self {
            split,
            data: volume.permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned(),
            index,
            cropper,
            rng,
            mean_std: None,
            max_val,
            config,
        })
    }

    /// Build the dataset for `split` from a full recording, selecting its
    /// frames by the configured fractions.
    pub fn from_recording(
        recording: ArrayView4<f32>,
        split: DataSplit,
        config: DatasetConfig,
        registry: &GridIndexRegistry,
    ) -> SplitResult<Self> {
        let range = frame_range(
            recording.len_of(Axis(0)),
            split,
            config.val_fraction,
            config.test_fraction,
        )?;
        debug!(split = %split, start = range.start, end = range.end, "Selected frames");
        Self::new(select_frames(recording, range), split, config, registry)
    }

    pub fn len(&self) -> usize {
        self.index.grid_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn split(&self) -> DataSplit {
        self.split
    }

    pub fn kind(&self) -> DatasetKind {
        self.config.kind
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Number of frames.
    pub fn frames(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn channels(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    /// Clipped `(T, C, H, W)` data.
    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn index_manager(&self) -> &Arc<GridIndexManager> {
        &self.index
    }

    /// Grid cells per frame.
    pub fn repeat_factor(&self) -> usize {
        self.index.repeat_factor()
    }

    pub fn max_val(&self) -> Option<f32> {
        self.max_val
    }

    pub fn hwt_from_idx(&self, idx: usize) -> SplitResult<Location> {
        self.index.hwt_from_idx(idx, None)
    }

    pub fn get_mean_std(&self) -> Option<&MeanStd> {
        self.mean_std.as_ref()
    }

    pub fn set_mean_std(&mut self, stats: MeanStd) -> SplitResult<()> {
        if stats.channels() != self.channels() || stats.std.len() != self.channels() {
            return Err(SplitError::shape_mismatch(
                format!("{} channels", self.channels()),
                format!("mean {} / std {}", stats.mean.len(), stats.std.len()),
            ));
        }
        self.mean_std = Some(stats);
        Ok(())
    }

    /// Statistics of this dataset's frames under the configured mode.
    ///
    /// Refused outside the training split unless `allow_for_validation`.
    pub fn compute_mean_std(&self, allow_for_validation: bool) -> SplitResult<MeanStd> {
        if self.split != DataSplit::Train && !allow_for_validation {
            return Err(SplitError::invalid_config(format!(
                "mean/std may only be computed on training data, not {}",
                self.split
            )));
        }
        // statistics are per channel, so the axis order does not matter
        let thwc = self.data.view().permuted_axes([0, 2, 3, 1]);
        Ok(compute_mean_std(thwc, self.config.normalization))
    }

    /// Change patch and grid size, re-registering the split's index manager.
    pub fn set_img_sz(
        &mut self,
        patch_size: usize,
        grid_size: GridSize,
        registry: &GridIndexRegistry,
    ) -> SplitResult<()> {
        let mut config = self.config.clone();
        config.grid.patch_size = patch_size;
        config.grid.grid_size = grid_size;
        config.validate().map_err(SplitError::InvalidConfig)?;

        let manager = GridIndexManager::from_config(self.shape(), &config.grid)?;
        self.index = registry.register(self.split, manager);
        self.cropper = match self.cropper.mode() {
            CropMode::Random => PatchCropper::random(patch_size, config.grid.padding, config.seed),
            CropMode::Deterministic => PatchCropper::new(patch_size, config.grid.padding),
        };
        self.config = config;
        Ok(())
    }

    /// Keep only the frames in `t_list`, in that order.
    pub fn reduce_data(&mut self, t_list: &[usize], registry: &GridIndexRegistry) -> SplitResult<()> {
        if t_list.is_empty() {
            return Err(SplitError::invalid_config("reduce_data needs at least one frame"));
        }
        if let Some(&t) = t_list.iter().find(|&&t| t >= self.frames()) {
            return Err(SplitError::out_of_bounds(
                format!("frame {}", t),
                format!("{} frames", self.frames()),
            ));
        }

        self.data = self.data.select(Axis(0), t_list);
        let manager = GridIndexManager::from_config(self.shape(), &self.config.grid)?;
        self.index = registry.register(self.split, manager);
        info!(split = %self.split, frames = t_list.len(), patches = self.len(), "Reduced dataset");
        Ok(())
    }

    /// `(T, H, W, C)` shape of the held frames.
    pub fn shape(&self) -> DataShape {
        let (t, c, h, w) = self.data.dim();
        DataShape::new(t, h, w, c)
    }

    /// Sample at `idx`.
    pub fn get(&mut self, idx: usize) -> SplitResult<Sample> {
        let (target, location) = self.cropper.crop_index(self.data.view(), &self.index, idx)?;

        let mut input = match self.config.kind {
            DatasetKind::Deterministic => self.mix(target.view())?,
            DatasetKind::LateralContext => self.lateral_context_input(location)?,
        };
        let mut target = target;

        if self.config.enable_rotation_aug && self.split == DataSplit::Train {
            let aug = Augmentation::random(&mut self.rng);
            if !aug.is_identity() {
                input = aug.apply(input.view());
                target = aug.apply(target.view());
            }
        }

        Ok(Sample {
            input,
            target,
            location,
        })
    }

    /// Equal-weight mixture of a `(C, P, P)` stack, normalising each
    /// channel first when configured. Returns `(1, P, P)`.
    fn mix(&self, channels: ArrayView3<f32>) -> SplitResult<Array3<f32>> {
        let stats = self.input_stats()?;
        let weight = 1.0 / channels.len_of(Axis(0)) as f32;
        let (_, h, w) = channels.dim();

        let mut mixed = Array3::zeros((1, h, w));
        for (c, plane) in channels.outer_iter().enumerate() {
            let mut out = mixed.index_axis_mut(Axis(0), 0);
            match stats {
                Some(stats) => out.zip_mut_with(&plane, |o, &v| *o += weight * stats.normalize(c, v)),
                None => out.zip_mut_with(&plane, |o, &v| *o += weight * v),
            }
        }
        Ok(mixed)
    }

    /// `(L, P, P)` mixture pyramid around `location`.
    fn lateral_context_input(&self, location: Location) -> SplitResult<Array3<f32>> {
        let stats = self.input_stats()?;
        let levels = self.config.input_levels();
        let patch_size = self.cropper.patch_size();
        let frame = self.data.index_axis(Axis(0), location.t);
        let weight = 1.0 / self.channels() as f32;

        let mut mixed = Array3::zeros((levels, patch_size, patch_size));
        for (c, plane) in frame.outer_iter().enumerate() {
            let stack = lateral_context_stack(
                plane,
                location,
                patch_size,
                levels,
                self.config.grid.padding,
                self.config.downsample,
            )?;
            match stats {
                Some(stats) => mixed.zip_mut_with(&stack, |o, &v| *o += weight * stats.normalize(c, v)),
                None => mixed.zip_mut_with(&stack, |o, &v| *o += weight * v),
            }
        }
        Ok(mixed)
    }

    fn input_stats(&self) -> SplitResult<Option<&MeanStd>> {
        if !self.config.normalized_input {
            return Ok(None);
        }
        self.mean_std
            .as_ref()
            .map(Some)
            .ok_or_else(|| SplitError::invalid_config("normalized_input requires set_mean_std first"))
    }
}

/// Build the dataset variant named by `config.kind` for `split`.
pub fn create_dataset(
    recording: ArrayView4<f32>,
    split: DataSplit,
    config: DatasetConfig,
    registry: &GridIndexRegistry,
) -> SplitResult<PatchDataset> {
    match config.kind {
        DatasetKind::Deterministic => {
            let config = DatasetConfig {
                multiscale_lowres_count: 1,
                ..config
            };
            PatchDataset::from_recording(recording, split, config, registry)
        }
        DatasetKind::LateralContext => {
            if config.multiscale_lowres_count < 2 {
                debug!(
                    count = config.multiscale_lowres_count,
                    "Lateral-context dataset with a single level"
                );
            }
            PatchDataset::from_recording(recording, split, config, registry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;
    use split_common::{GridAlignment, PaddingMode};

    fn two_channel(frames: usize, size: usize) -> Array4<f32> {
        Array::from_shape_fn((frames, size, size, 2), |(t, r, c, ch)| {
            if ch == 0 {
                (t * 100 + r) as f32
            } else {
                (t * 100 + c) as f32 * 3.0
            }
        })
    }

    fn config(patch: usize, grid: usize) -> DatasetConfig {
        let mut config = DatasetConfig::default();
        config.grid.patch_size = patch;
        config.grid.grid_size = GridSize::square(grid);
        config.normalized_input = false;
        config.clip_quantile = None;
        config
    }

    #[test]
    fn test_len_and_sample_shapes() {
        let registry = GridIndexRegistry::new();
        let mut ds = PatchDataset::new(two_channel(3, 32), DataSplit::Val, config(16, 16), &registry).unwrap();
        assert_eq!(ds.len(), 12);
        assert_eq!(ds.repeat_factor(), 4);

        let sample = ds.get(4).unwrap();
        assert_eq!(sample.input.dim(), (1, 16, 16));
        assert_eq!(sample.target.dim(), (2, 16, 16));
        assert_eq!(sample.location, Location::new(0, 16, 1));
    }

    #[test]
    fn test_input_is_equal_mixture() {
        let registry = GridIndexRegistry::new();
        let mut ds = PatchDataset::new(two_channel(1, 16), DataSplit::Test, config(8, 8), &registry).unwrap();
        let sample = ds.get(3).unwrap();
        for r in 0..8 {
            for c in 0..8 {
                let expected = 0.5 * sample.target[[0, r, c]] + 0.5 * sample.target[[1, r, c]];
                assert!((sample.input[[0, r, c]] - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_registers_manager() {
        let registry = GridIndexRegistry::new();
        let ds = PatchDataset::new(two_channel(2, 32), DataSplit::Train, config(16, 8), &registry).unwrap();
        let registered = registry.get_instance(DataSplit::Train).unwrap();
        assert!(Arc::ptr_eq(&registered, ds.index_manager()));
        assert_eq!(registered.grid_count(), 2 * 16);
    }

    #[test]
    fn test_normalized_input_requires_stats() {
        let registry = GridIndexRegistry::new();
        let mut cfg = config(8, 8);
        cfg.normalized_input = true;
        let mut ds = PatchDataset::new(two_channel(2, 16), DataSplit::Train, cfg, &registry).unwrap();
        assert!(ds.get(0).is_err());

        let stats = ds.compute_mean_std(false).unwrap();
        ds.set_mean_std(stats).unwrap();
        let sample = ds.get(0).unwrap();
        assert!(sample.input.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_mean_std_only_on_train() {
        let registry = GridIndexRegistry::new();
        let ds = PatchDataset::new(two_channel(2, 16), DataSplit::Val, config(8, 8), &registry).unwrap();
        assert!(ds.compute_mean_std(false).is_err());
        assert!(ds.compute_mean_std(true).is_ok());
    }

    #[test]
    fn test_set_img_sz_reregisters() {
        let registry = GridIndexRegistry::new();
        let mut ds = PatchDataset::new(two_channel(1, 32), DataSplit::Val, config(16, 16), &registry).unwrap();
        ds.set_img_sz(16, GridSize::square(8), &registry).unwrap();

        assert_eq!(ds.len(), 16);
        assert_eq!(registry.get_instance(DataSplit::Val).unwrap().grid_size(), GridSize::square(8));
        assert!(ds.set_img_sz(8, GridSize::square(16), &registry).is_err());
    }

    #[test]
    fn test_reduce_data() {
        let registry = GridIndexRegistry::new();
        let mut ds = PatchDataset::new(two_channel(4, 16), DataSplit::Test, config(8, 8), &registry).unwrap();
        ds.reduce_data(&[3, 1], &registry).unwrap();

        assert_eq!(ds.frames(), 2);
        assert_eq!(ds.len(), 8);
        // frame 0 of the reduced data is old frame 3
        assert_eq!(ds.data()[[0, 0, 5, 0]], 305.0);
        assert!(ds.reduce_data(&[2], &registry).is_err());
        assert!(ds.reduce_data(&[], &registry).is_err());
    }

    #[test]
    fn test_quantile_clip() {
        let registry = GridIndexRegistry::new();
        let mut cfg = config(8, 8);
        cfg.clip_quantile = Some(0.5);
        let ds = PatchDataset::new(two_channel(1, 8), DataSplit::Test, cfg, &registry).unwrap();
        let max_val = ds.max_val().unwrap();
        assert!(ds.data().iter().all(|&v| v <= max_val));
    }

    #[test]
    fn test_lateral_context_input() {
        let registry = GridIndexRegistry::new();
        let mut cfg = config(8, 8);
        cfg.kind = DatasetKind::LateralContext;
        cfg.multiscale_lowres_count = 3;
        cfg.grid.padding = PaddingMode::Edge;
        cfg.grid.alignment = GridAlignment::Center;
        let mut ds = PatchDataset::new(two_channel(1, 32), DataSplit::Val, cfg, &registry).unwrap();

        let sample = ds.get(5).unwrap();
        assert_eq!(sample.input.dim(), (3, 8, 8));
        assert_eq!(sample.target.dim(), (2, 8, 8));
        // level 0 equals the plain mixture of the target
        let expected = 0.5 * sample.target[[0, 2, 3]] + 0.5 * sample.target[[1, 2, 3]];
        assert!((sample.input[[0, 2, 3]] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_rotation_keeps_input_and_target_aligned() {
        let registry = GridIndexRegistry::new();
        let mut cfg = config(8, 8);
        cfg.enable_rotation_aug = true;
        cfg.seed = Some(5);
        let mut ds = PatchDataset::new(two_channel(1, 16), DataSplit::Train, cfg, &registry).unwrap();
        for idx in 0..ds.len() {
            let sample = ds.get(idx).unwrap();
            let mixed = (&sample.target.index_axis(Axis(0), 0) + &sample.target.index_axis(Axis(0), 1)) * 0.5;
            for (a, b) in sample.input.index_axis(Axis(0), 0).iter().zip(mixed.iter()) {
                assert!((a - b).abs() < 1e-4);
            }
        }
    }
}
