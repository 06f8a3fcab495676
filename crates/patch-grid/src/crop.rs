//! Fixed-size patch extraction with boundary padding.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};
use num_traits::Float;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use split_common::{Location, PaddingMode, SplitError, SplitResult};
use tracing::trace;

use crate::index::GridIndexManager;

/// Crop a `(C, patch, patch)` window from a `(C, H, W)` array.
///
/// The window starts at `(row, col)` and may extend past any edge; missing
/// pixels are filled according to `padding`. The output shape never depends
/// on how much of the window lies inside the source.
pub fn crop<A: Float>(
    array: ArrayView3<A>,
    row: i64,
    col: i64,
    patch_size: usize,
    padding: PaddingMode,
) -> Array3<A> {
    let (channels, height, width) = array.dim();
    let end_row = row + patch_size as i64;
    let end_col = col + patch_size as i64;

    if row >= 0 && col >= 0 && end_row <= height as i64 && end_col <= width as i64 {
        let (r, c) = (row as usize, col as usize);
        return array
            .slice(s![.., r..r + patch_size, c..c + patch_size])
            .to_owned();
    }

    let fill = match padding {
        PaddingMode::Constant(v) => <A as num_traits::NumCast>::from(v).unwrap_or_else(A::zero),
        _ => A::zero(),
    };
    let rows: Vec<Option<usize>> = (0..patch_size)
        .map(|i| padding.source_index(row + i as i64, height))
        .collect();
    let cols: Vec<Option<usize>> = (0..patch_size)
        .map(|j| padding.source_index(col + j as i64, width))
        .collect();

    let mut out = Array3::from_elem((channels, patch_size, patch_size), fill);
    for ch in 0..channels {
        for (i, src_r) in rows.iter().enumerate() {
            let Some(src_r) = *src_r else { continue };
            for (j, src_c) in cols.iter().enumerate() {
                if let Some(src_c) = *src_c {
                    out[[ch, i, j]] = array[[ch, src_r, src_c]];
                }
            }
        }
    }
    out
}

/// Single-channel variant of [`crop`].
pub fn crop_2d<A: Float>(
    array: ArrayView2<A>,
    row: i64,
    col: i64,
    patch_size: usize,
    padding: PaddingMode,
) -> Array2<A> {
    crop(array.insert_axis(Axis(0)), row, col, patch_size, padding).index_axis_move(Axis(0), 0)
}

/// How crop origins are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropMode {
    /// Origin from the index manager; reproducible.
    #[default]
    Deterministic,
    /// Origin drawn uniformly per call; training augmentation only.
    Random,
}

/// Extracts patches for flat indices.
#[derive(Debug, Clone)]
pub struct PatchCropper {
    patch_size: usize,
    padding: PaddingMode,
    mode: CropMode,
    rng: StdRng,
}

impl PatchCropper {
    /// Deterministic cropper.
    pub fn new(patch_size: usize, padding: PaddingMode) -> Self {
        Self {
            patch_size,
            padding,
            mode: CropMode::Deterministic,
            rng: StdRng::from_entropy(),
        }
    }

    /// Random-origin cropper. A seed makes the sequence of origins repeatable.
    pub fn random(patch_size: usize, padding: PaddingMode, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            patch_size,
            padding,
            mode: CropMode::Random,
            rng,
        }
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn padding(&self) -> PaddingMode {
        self.padding
    }

    pub fn mode(&self) -> CropMode {
        self.mode
    }

    /// Origin for `idx` under this cropper's mode.
    pub fn origin(&mut self, manager: &GridIndexManager, idx: usize) -> SplitResult<Location> {
        match self.mode {
            CropMode::Deterministic => manager.hwt_from_idx(idx, None),
            CropMode::Random => {
                let count = manager.grid_count();
                if idx >= count {
                    return Err(SplitError::IndexOutOfRange { index: idx, count });
                }
                let shape = manager.get_data_shape();
                let max_row = shape.height.saturating_sub(self.patch_size);
                let max_col = shape.width.saturating_sub(self.patch_size);
                Ok(Location::new(
                    self.rng.gen_range(0..=max_row) as i64,
                    self.rng.gen_range(0..=max_col) as i64,
                    manager.frame_of(idx),
                ))
            }
        }
    }

    /// Crop `(C, H, W)` frame data at a known location.
    pub fn crop_at<A: Float>(&self, frame: ArrayView3<A>, location: Location) -> Array3<A> {
        crop(frame, location.row, location.col, self.patch_size, self.padding)
    }

    /// Resolve the origin of `idx` and crop the matching frame of `frames`.
    ///
    /// `frames` is a `(T, C, H, W)` view.
    pub fn crop_index<A: Float>(
        &mut self,
        frames: ndarray::ArrayView4<A>,
        manager: &GridIndexManager,
        idx: usize,
    ) -> SplitResult<(Array3<A>, Location)> {
        let location = self.origin(manager, idx)?;
        if location.t >= frames.len_of(Axis(0)) {
            return Err(SplitError::out_of_bounds(
                format!("frame {}", location.t),
                format!("{} frames", frames.len_of(Axis(0))),
            ));
        }
        trace!(idx, location = %location, mode = ?self.mode, "Cropping patch");
        let patch = self.crop_at(frames.index_axis(Axis(0), location.t), location);
        Ok((patch, location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp(channels: usize, h: usize, w: usize) -> Array3<f32> {
        Array::from_shape_fn((channels, h, w), |(c, r, col)| (c * 1000 + r * 10 + col) as f32)
    }

    #[test]
    fn test_inside_crop_is_a_slice() {
        let data = ramp(2, 8, 8);
        let patch = crop(data.view(), 2, 3, 4, PaddingMode::Constant(0.0));
        assert_eq!(patch.dim(), (2, 4, 4));
        assert_eq!(patch[[0, 0, 0]], 23.0);
        assert_eq!(patch[[1, 3, 3]], 1056.0);
    }

    #[test]
    fn test_constant_padding() {
        let data = ramp(1, 4, 4);
        let patch = crop(data.view(), -1, -1, 3, PaddingMode::Constant(-7.0));
        assert_eq!(patch.dim(), (1, 3, 3));
        assert_eq!(patch[[0, 0, 0]], -7.0);
        assert_eq!(patch[[0, 0, 2]], -7.0);
        assert_eq!(patch[[0, 1, 1]], 0.0);
        assert_eq!(patch[[0, 2, 2]], 11.0);
    }

    #[test]
    fn test_edge_padding() {
        let data = ramp(1, 4, 4);
        let patch = crop(data.view(), 2, 2, 4, PaddingMode::Edge);
        assert_eq!(patch[[0, 0, 0]], 22.0);
        assert_eq!(patch[[0, 3, 3]], 33.0);
        assert_eq!(patch[[0, 0, 3]], 23.0);
    }

    #[test]
    fn test_reflect_padding() {
        let data = ramp(1, 4, 4);
        let patch = crop(data.view(), 0, -2, 4, PaddingMode::Reflect);
        // columns -2,-1 reflect to 2,1
        assert_eq!(patch[[0, 0, 0]], 2.0);
        assert_eq!(patch[[0, 0, 1]], 1.0);
        assert_eq!(patch[[0, 0, 2]], 0.0);
    }

    #[test]
    fn test_patch_larger_than_source() {
        let data = ramp(1, 2, 2);
        let patch = crop_2d(data.index_axis(Axis(0), 0), 0, 0, 5, PaddingMode::Edge);
        assert_eq!(patch.dim(), (5, 5));
        assert_eq!(patch[[4, 4]], 11.0);
    }

    #[test]
    fn test_random_origin_stays_in_range() {
        let manager = GridIndexManager::new(
            (2, 40, 50, 1).into(),
            split_common::GridSize::square(8),
            16,
            split_common::GridAlignment::LeftTop,
            split_common::TilingMode::ShiftBoundary,
        )
        .unwrap();
        let mut cropper = PatchCropper::random(16, PaddingMode::Edge, Some(7));
        for idx in 0..manager.grid_count() {
            let loc = cropper.origin(&manager, idx).unwrap();
            assert!((0..=24).contains(&loc.row));
            assert!((0..=34).contains(&loc.col));
            assert_eq!(loc.t, idx % 2);
        }
        assert!(cropper.origin(&manager, manager.grid_count()).is_err());
    }
}
