//! Reassembly of per-patch predictions into full frames.
//!
//! In [`OverlapMode::OwnedCell`] each patch writes exactly the grid cell it
//! owns (see [`GridIndexManager::write_window`]). Cells partition the frame,
//! so every output pixel has a single writer no matter how patch origins were
//! shifted or clipped at the boundary. [`OverlapMode::Average`] instead adds
//! every in-frame pixel of every patch and divides by the cover count.
//!
//! A prediction smaller than the patch is placed at the center of its patch
//! window. Only the pixels it actually holds are written or averaged.

use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, Axis, Zip};
use split_common::{SplitError, SplitResult};
use tracing::{debug, warn};

use crate::config::{OverlapMode, StitchConfig, UndersizedPolicy};
use crate::index::{GridIndexManager, GroupedGridIndex};

/// Output of a stitch over a possibly grouped index space.
#[derive(Debug, Clone)]
pub enum Stitched {
    /// One `(T, H, W, C)` volume.
    Single(Array4<f32>),
    /// One volume per frame-size group, in group order.
    Grouped(Vec<Array4<f32>>),
}

impl Stitched {
    pub fn is_grouped(&self) -> bool {
        matches!(self, Stitched::Grouped(_))
    }

    /// All volumes, in order.
    pub fn into_volumes(self) -> Vec<Array4<f32>> {
        match self {
            Stitched::Single(volume) => vec![volume],
            Stitched::Grouped(volumes) => volumes,
        }
    }
}

/// Bookkeeping for one stitch call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StitchReport {
    /// Patches consumed.
    pub patches: usize,
    /// Patches that were smaller than the patch size and centered.
    pub undersized: usize,
    /// Output pixels (per channel plane) that no patch wrote.
    pub uncovered_pixels: usize,
}

/// Offset of an `h x w` prediction centered in a `size` square, or `None`
/// when it does not fit.
pub fn center_offset(h: usize, w: usize, size: usize) -> Option<(usize, usize)> {
    (h <= size && w <= size).then(|| ((size - h) / 2, (size - w) / 2))
}

/// Pad a `(C, h, w)` patch to `(C, size, size)`, centered, with zeros.
pub fn center_pad(patch: ArrayView3<f32>, size: usize) -> SplitResult<Array3<f32>> {
    let (channels, h, w) = patch.dim();
    let (top, left) = center_offset(h, w, size)
        .ok_or_else(|| SplitError::shape_mismatch((channels, size, size), (channels, h, w)))?;
    let mut out = Array3::zeros((channels, size, size));
    out.slice_mut(s![.., top..top + h, left..left + w]).assign(&patch);
    Ok(out)
}

#[derive(Debug, Clone, Default)]
pub struct StitchEngine {
    config: StitchConfig,
}

impl StitchEngine {
    pub fn new(config: StitchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    /// Stitch `(index, (C, P, P) patch)` pairs into a `(T, H, W, C)` volume.
    pub fn stitch<'a, I>(&self, patches: I, manager: &GridIndexManager) -> SplitResult<Array4<f32>>
    where
        I: IntoIterator<Item = (usize, ArrayView3<'a, f32>)>,
    {
        let (volume, report) = self.stitch_with_report(patches, manager)?;
        if report.undersized > 0 {
            warn!(
                undersized = report.undersized,
                patches = report.patches,
                patch_size = manager.patch_size(),
                "Centered undersized predictions; pixels outside them are not written"
            );
        }
        Ok(volume)
    }

    /// Stitch a `(N, C, P, P)` batch where row `i` is the prediction for index `i`.
    pub fn stitch_batch(
        &self,
        predictions: ArrayView4<f32>,
        manager: &GridIndexManager,
    ) -> SplitResult<Array4<f32>> {
        self.stitch(predictions.outer_iter().enumerate(), manager)
    }

    /// Like [`stitch`](Self::stitch), also returning a [`StitchReport`].
    pub fn stitch_with_report<'a, I>(
        &self,
        patches: I,
        manager: &GridIndexManager,
    ) -> SplitResult<(Array4<f32>, StitchReport)>
    where
        I: IntoIterator<Item = (usize, ArrayView3<'a, f32>)>,
    {
        let shape = manager.get_data_shape();
        let patch_size = manager.patch_size();
        let mut patches = patches.into_iter().peekable();
        let channels = patches
            .peek()
            .map(|(_, p)| p.len_of(Axis(0)))
            .unwrap_or(shape.channels);

        let mut sum = Array4::<f32>::zeros((shape.frames, shape.height, shape.width, channels));
        let mut cover = Array3::<u32>::zeros((shape.frames, shape.height, shape.width));
        let mut report = StitchReport::default();

        for (idx, patch) in patches {
            let (patch, offset) = self.conform(patch, channels, patch_size, &mut report)?;
            match self.config.overlap {
                OverlapMode::OwnedCell => write_owned_cell(&mut sum, &mut cover, patch, offset, manager, idx)?,
                OverlapMode::Average => add_patch(&mut sum, &mut cover, patch, offset, manager, idx)?,
            }
            report.patches += 1;
        }

        if self.config.overlap == OverlapMode::Average {
            for (mut pixel, &n) in sum
                .lanes_mut(Axis(3))
                .into_iter()
                .zip(cover.iter())
            {
                if n > 1 {
                    pixel.mapv_inplace(|v| v / n as f32);
                }
            }
        }

        report.uncovered_pixels = cover.iter().filter(|&&n| n == 0).count();
        debug!(
            patches = report.patches,
            undersized = report.undersized,
            uncovered = report.uncovered_pixels,
            overlap = ?self.config.overlap,
            "Stitched predictions"
        );
        Ok((sum, report))
    }

    /// Check a prediction against `(channels, P, P)` and return it with its
    /// offset inside the patch window.
    fn conform<'a>(
        &self,
        patch: ArrayView3<'a, f32>,
        channels: usize,
        patch_size: usize,
        report: &mut StitchReport,
    ) -> SplitResult<(ArrayView3<'a, f32>, (usize, usize))> {
        let (c, h, w) = patch.dim();
        let mismatch = || SplitError::shape_mismatch((channels, patch_size, patch_size), (c, h, w));
        if c != channels {
            return Err(mismatch());
        }
        if h == patch_size && w == patch_size {
            return Ok((patch, (0, 0)));
        }
        if self.config.undersized == UndersizedPolicy::Reject {
            return Err(mismatch());
        }
        let offset = center_offset(h, w, patch_size).ok_or_else(mismatch)?;
        report.undersized += 1;
        Ok((patch, offset))
    }

    /// Stitch a grouped index space, one volume per group.
    pub fn stitch_grouped<'a, I>(
        &self,
        patches: I,
        grouped: &GroupedGridIndex,
    ) -> SplitResult<Vec<Array4<f32>>>
    where
        I: IntoIterator<Item = (usize, ArrayView3<'a, f32>)>,
    {
        let mut per_group: Vec<Vec<(usize, ArrayView3<'a, f32>)>> =
            vec![Vec::new(); grouped.groups().len()];
        for (idx, patch) in patches {
            let (group, local) = grouped.locate(idx)?;
            per_group[group].push((local, patch));
        }

        grouped
            .groups()
            .iter()
            .zip(per_group)
            .map(|(manager, group_patches)| self.stitch(group_patches, manager))
            .collect()
    }

    /// Stitch a grouped index space, collapsing to a single volume when there
    /// is only one group.
    pub fn stitch_any<'a, I>(&self, patches: I, grouped: &GroupedGridIndex) -> SplitResult<Stitched>
    where
        I: IntoIterator<Item = (usize, ArrayView3<'a, f32>)>,
    {
        let mut volumes = self.stitch_grouped(patches, grouped)?;
        if volumes.len() == 1 {
            if let Some(volume) = volumes.pop() {
                return Ok(Stitched::Single(volume));
            }
        }
        Ok(Stitched::Grouped(volumes))
    }
}

/// Intersection of `[a, a + a_len)` and `[b, b + b_len)`.
fn overlap(a: i64, a_len: usize, b: i64, b_len: usize) -> Option<(i64, i64)> {
    let lo = a.max(b);
    let hi = (a + a_len as i64).min(b + b_len as i64);
    (lo < hi).then_some((lo, hi))
}

/// Write the part of the owned cell that the prediction at `offset` covers.
fn write_owned_cell(
    out: &mut Array4<f32>,
    cover: &mut Array3<u32>,
    patch: ArrayView3<f32>,
    offset: (usize, usize),
    manager: &GridIndexManager,
    idx: usize,
) -> SplitResult<()> {
    let window = manager.write_window(idx, None)?;
    let (pr, pc) = window.patch_offset();
    let (_, ph, pw) = patch.dim();
    let (top, left) = offset;

    // both ranges in patch-window coordinates
    let Some((r_lo, r_hi)) = overlap(pr as i64, window.height, top as i64, ph) else {
        return Ok(());
    };
    let Some((c_lo, c_hi)) = overlap(pc as i64, window.width, left as i64, pw) else {
        return Ok(());
    };
    let (r_lo, r_hi, c_lo, c_hi) = (r_lo as usize, r_hi as usize, c_lo as usize, c_hi as usize);
    let (r0, c0, t) = (window.cell_row + r_lo - pr, window.cell_col + c_lo - pc, window.location.t);
    let (h, w) = (r_hi - r_lo, c_hi - c_lo);

    let mut written = cover.slice_mut(s![t, r0..r0 + h, c0..c0 + w]);
    debug_assert!(
        written.iter().all(|&n| n == 0),
        "patch {} overwrites pixels already owned by another patch",
        idx
    );
    written.fill(1);

    // (C, h, w) -> (h, w, C) to match the output layout
    let source = patch
        .slice(s![.., r_lo - top..r_hi - top, c_lo - left..c_hi - left])
        .permuted_axes([1, 2, 0]);
    out.slice_mut(s![t, r0..r0 + h, c0..c0 + w, ..]).assign(&source);
    Ok(())
}

/// Add every in-frame pixel of the prediction at `offset` and bump its cover count.
fn add_patch(
    sum: &mut Array4<f32>,
    cover: &mut Array3<u32>,
    patch: ArrayView3<f32>,
    offset: (usize, usize),
    manager: &GridIndexManager,
    idx: usize,
) -> SplitResult<()> {
    let location = manager.hwt_from_idx(idx, None)?;
    let (_, height, width, _) = sum.dim();
    let (_, ph, pw) = patch.dim();
    let row = location.row + offset.0 as i64;
    let col = location.col + offset.1 as i64;

    let Some((r0, r1)) = overlap(row, ph, 0, height) else {
        return Ok(());
    };
    let Some((c0, c1)) = overlap(col, pw, 0, width) else {
        return Ok(());
    };
    let (pr, pc) = ((r0 - row) as usize, (c0 - col) as usize);
    let (r0, c0, r1, c1) = (r0 as usize, c0 as usize, r1 as usize, c1 as usize);

    let source = patch
        .slice(s![.., pr..pr + (r1 - r0), pc..pc + (c1 - c0)])
        .permuted_axes([1, 2, 0]);
    Zip::from(sum.slice_mut(s![location.t, r0..r1, c0..c1, ..]))
        .and(&source)
        .for_each(|acc, &v| *acc += v);
    cover
        .slice_mut(s![location.t, r0..r1, c0..c1])
        .mapv_inplace(|n| n + 1);
    Ok(())
}
