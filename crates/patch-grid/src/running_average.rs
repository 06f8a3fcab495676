//! Location-keyed accumulation of predictions across training steps.
//!
//! The buffer mirrors the split's full `(T, C, H, W)` volume. Each update
//! overwrites the pixels a prediction covers, minus a configurable border,
//! so neighbouring patches can later be read back as context for the next
//! prediction at a given location.

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, Axis, Zip};
use split_common::{DataShape, DataSplit, Direction, GridSize, Location, SplitError, SplitResult};
use tracing::{debug, info};

use crate::config::RunningAverageConfig;
use crate::dump::write_channel_planes;
use crate::index::GridIndexManager;
use crate::registry::GridIndexRegistry;
use crate::stitch::center_offset;

/// Half-open overlap of `[start, start + len)` shrunk by `skip` on both
/// ends with `[0, extent)`, as (destination start, source start, length).
fn clipped_span(start: i64, len: usize, skip: usize, extent: usize) -> Option<(usize, usize, usize)> {
    if len <= 2 * skip {
        return None;
    }
    let src_lo = skip as i64;
    let src_hi = (len - skip) as i64;
    let dst_lo = (start + src_lo).max(0);
    let dst_hi = (start + src_hi).min(extent as i64);
    if dst_lo >= dst_hi {
        return None;
    }
    let src_start = (dst_lo - start) as usize;
    Some((dst_lo as usize, src_start, (dst_hi - dst_lo) as usize))
}

/// Accumulation buffer addressed by absolute [`Location`]s.
#[derive(Debug, Clone)]
pub struct LocationBuffer {
    data: Array4<f32>,
    written: Array3<bool>,
    skip: usize,
    dump_dir: Option<PathBuf>,
}

impl LocationBuffer {
    /// Zero-initialised buffer for a split of the given shape.
    pub fn new(shape: DataShape, skip_boundary_pixelcount: usize, dump_dir: Option<PathBuf>) -> Self {
        Self {
            data: Array4::zeros(shape.tchw()),
            written: Array3::from_elem((shape.frames, shape.height, shape.width), false),
            skip: skip_boundary_pixelcount,
            dump_dir,
        }
    }

    /// `(T, C, H, W)`
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Pixels that have received at least one write since the last reset.
    pub fn written_mask(&self) -> ArrayView3<'_, bool> {
        self.written.view()
    }

    pub fn skip_boundary_pixelcount(&self) -> usize {
        self.skip
    }

    /// Write a `(B, C, P, P)` batch at `locations`, one location per patch.
    ///
    /// `skip_boundary_pixelcount` pixels are left untouched on every side of
    /// each patch. Parts falling outside the frame are dropped.
    pub fn update_at_locations(
        &mut self,
        predictions: ArrayView4<f32>,
        locations: &[Location],
    ) -> SplitResult<()> {
        let (batch, channels, ph, pw) = predictions.dim();
        let (frames, buf_channels, height, width) = self.data.dim();

        if batch != locations.len() {
            return Err(SplitError::shape_mismatch(
                format!("{} locations", batch),
                format!("{} locations", locations.len()),
            ));
        }
        if channels != buf_channels {
            return Err(SplitError::shape_mismatch(
                format!("{} channels", buf_channels),
                format!("{} channels", channels),
            ));
        }

        for (prediction, location) in predictions.outer_iter().zip(locations) {
            if location.t >= frames {
                return Err(SplitError::out_of_bounds(
                    format!("frame {}", location.t),
                    format!("{} frames", frames),
                ));
            }
            let Some((dst_r, src_r, len_r)) = clipped_span(location.row, ph, self.skip, height) else {
                continue;
            };
            let Some((dst_c, src_c, len_c)) = clipped_span(location.col, pw, self.skip, width) else {
                continue;
            };

            self.data
                .slice_mut(s![location.t, .., dst_r..dst_r + len_r, dst_c..dst_c + len_c])
                .assign(&prediction.slice(s![.., src_r..src_r + len_r, src_c..src_c + len_c]));
            self.written
                .slice_mut(s![location.t, dst_r..dst_r + len_r, dst_c..dst_c + len_c])
                .fill(true);
        }
        Ok(())
    }

    /// True when a `patch_size` square at `location` lies fully inside the buffer.
    pub fn is_valid_location(&self, location: Location, patch_size: usize) -> bool {
        let (frames, _, height, width) = self.data.dim();
        location.t < frames && location.fits_within(patch_size, patch_size, height, width)
    }

    /// Read `(N, C, P, P)` patches at `locations`.
    ///
    /// Invalid locations yield all-zero patches.
    pub fn get_from_locations(&self, locations: &[Location], patch_size: usize) -> Array4<f32> {
        let channels = self.data.len_of(Axis(1));
        let mut out = Array4::zeros((locations.len(), channels, patch_size, patch_size));

        for (mut slot, location) in out.outer_iter_mut().zip(locations) {
            if !self.is_valid_location(*location, patch_size) {
                continue;
            }
            let (r, c) = (location.row as usize, location.col as usize);
            slot.assign(&self.data.slice(s![location.t, .., r..r + patch_size, c..c + patch_size]));
        }
        out
    }

    /// Zero the buffer and forget all writes.
    pub fn reset(&mut self) {
        self.data.fill(0.0);
        self.written.fill(false);
    }

    /// Take the accumulated `(T, C, H, W)` volume.
    pub fn finalize(self) -> Array4<f32> {
        self.data
    }

    /// Copy every pixel `other` has written into this buffer.
    pub fn merge(&mut self, other: &LocationBuffer) -> SplitResult<()> {
        if self.data.dim() != other.data.dim() {
            return Err(SplitError::shape_mismatch(self.data.dim(), other.data.dim()));
        }

        for ((mut dst_frame, src_frame), (mut dst_mask, src_mask)) in self
            .data
            .outer_iter_mut()
            .zip(other.data.outer_iter())
            .zip(self.written.outer_iter_mut().zip(other.written.outer_iter()))
        {
            for (mut dst, src) in dst_frame.outer_iter_mut().zip(src_frame.outer_iter()) {
                Zip::from(&mut dst)
                    .and(&src)
                    .and(&src_mask)
                    .for_each(|d, &s, &w| {
                        if w {
                            *d = s;
                        }
                    });
            }
            Zip::from(&mut dst_mask).and(&src_mask).for_each(|d, &w| *d |= w);
        }
        Ok(())
    }

    /// Write frame `t`, subsampled by `downscale_factor`, as one PNG per
    /// channel named `T{t}_Dfac{d}_Epoch{e}_Ch{c}.png`.
    pub fn dump_img(
        &self,
        mean: &[f32],
        std: &[f32],
        t: usize,
        downscale_factor: usize,
        epoch: usize,
    ) -> SplitResult<Vec<PathBuf>> {
        let dir = self
            .dump_dir
            .as_ref()
            .ok_or_else(|| SplitError::invalid_config("dump_img_dir is not configured"))?;
        if downscale_factor == 0 {
            return Err(SplitError::invalid_config("downscale_factor must be >= 1"));
        }
        let frames = self.data.len_of(Axis(0));
        if t >= frames {
            return Err(SplitError::out_of_bounds(format!("frame {}", t), format!("{} frames", frames)));
        }

        let step = downscale_factor as isize;
        let planes = self.data.slice(s![t, .., ..;step, ..;step]);
        let stem = format!("T{}_Dfac{}_Epoch{}", t, downscale_factor, epoch);
        write_channel_planes(planes, mean, std, dir, &stem)
    }
}

/// Running-average buffer for one split, resolving flat patch indices
/// through that split's registered [`GridIndexManager`].
#[derive(Debug, Clone)]
pub struct SolutionRunningAverageManager {
    split: DataSplit,
    index: Arc<GridIndexManager>,
    patch_size: usize,
    buffer: LocationBuffer,
}

impl SolutionRunningAverageManager {
    /// Build a buffer for `split` using the manager currently registered for it.
    pub fn new(
        split: DataSplit,
        registry: &GridIndexRegistry,
        config: &RunningAverageConfig,
        patch_size: usize,
    ) -> SplitResult<Self> {
        let index = registry.get_instance(split)?;
        Self::with_manager(split, index, config, patch_size)
    }

    pub fn with_manager(
        split: DataSplit,
        index: Arc<GridIndexManager>,
        config: &RunningAverageConfig,
        patch_size: usize,
    ) -> SplitResult<Self> {
        config.validate(patch_size).map_err(SplitError::InvalidConfig)?;

        let shape = index.get_data_shape();
        info!(
            split = %split,
            shape = %shape,
            patch_size,
            skip_boundary = config.skip_boundary_pixelcount,
            "Allocated running-average buffer"
        );

        Ok(Self {
            split,
            patch_size,
            buffer: LocationBuffer::new(shape, config.skip_boundary_pixelcount, config.dump_img_dir.clone()),
            index,
        })
    }

    pub fn split(&self) -> DataSplit {
        self.split
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn index(&self) -> &GridIndexManager {
        &self.index
    }

    pub fn buffer(&self) -> &LocationBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut LocationBuffer {
        &mut self.buffer
    }

    /// Resolve each index with the grid size paired with it.
    pub fn get_locations(&self, indices: &[usize], grid_sizes: &[GridSize]) -> SplitResult<Vec<Location>> {
        if indices.len() != grid_sizes.len() {
            return Err(SplitError::shape_mismatch(
                format!("{} grid sizes", indices.len()),
                format!("{} grid sizes", grid_sizes.len()),
            ));
        }
        indices
            .iter()
            .zip(grid_sizes)
            .map(|(&idx, &grid)| self.index.hwt_from_idx(idx, Some(grid)))
            .collect()
    }

    /// Write predictions for the patches at `indices`.
    ///
    /// Predictions smaller than the patch are written at the center of their
    /// patch window; pixels around them are left untouched.
    pub fn update(
        &mut self,
        predictions: ArrayView4<f32>,
        indices: &[usize],
        grid_sizes: &[GridSize],
    ) -> SplitResult<()> {
        let (_, _, ph, pw) = predictions.dim();
        let (top, left) = center_offset(ph, pw, self.patch_size).ok_or_else(|| {
            SplitError::shape_mismatch(
                format!("patches of at most {0}x{0}", self.patch_size),
                format!("{}x{}", ph, pw),
            )
        })?;
        let locations: Vec<Location> = self
            .get_locations(indices, grid_sizes)?
            .into_iter()
            .map(|loc| Location::new(loc.row + top as i64, loc.col + left as i64, loc.t))
            .collect();
        debug!(split = %self.split, batch = locations.len(), "Updating running-average buffer");
        self.buffer.update_at_locations(predictions, &locations)
    }

    /// Patches one patch-width away in `direction`, zero where that leaves the frame.
    pub fn get_neighbor(
        &self,
        direction: Direction,
        indices: &[usize],
        grid_sizes: &[GridSize],
    ) -> SplitResult<Array4<f32>> {
        let locations: Vec<Location> = self
            .get_locations(indices, grid_sizes)?
            .into_iter()
            .map(|loc| loc.shifted(direction, self.patch_size))
            .collect();
        Ok(self.buffer.get_from_locations(&locations, self.patch_size))
    }

    pub fn get_top(&self, indices: &[usize], grid_sizes: &[GridSize]) -> SplitResult<Array4<f32>> {
        self.get_neighbor(Direction::Up, indices, grid_sizes)
    }

    pub fn get_bottom(&self, indices: &[usize], grid_sizes: &[GridSize]) -> SplitResult<Array4<f32>> {
        self.get_neighbor(Direction::Down, indices, grid_sizes)
    }

    pub fn get_left(&self, indices: &[usize], grid_sizes: &[GridSize]) -> SplitResult<Array4<f32>> {
        self.get_neighbor(Direction::Left, indices, grid_sizes)
    }

    pub fn get_right(&self, indices: &[usize], grid_sizes: &[GridSize]) -> SplitResult<Array4<f32>> {
        self.get_neighbor(Direction::Right, indices, grid_sizes)
    }

    /// Patches at the indices' own locations.
    pub fn get_current(&self, indices: &[usize], grid_sizes: &[GridSize]) -> SplitResult<Array4<f32>> {
        let locations = self.get_locations(indices, grid_sizes)?;
        Ok(self.buffer.get_from_locations(&locations, self.patch_size))
    }

    pub fn reset(&mut self) {
        self.buffer.reset();
    }

    /// Fold another buffer for the same split into this one.
    pub fn merge(&mut self, other: &SolutionRunningAverageManager) -> SplitResult<()> {
        if self.split != other.split {
            return Err(SplitError::invalid_config(format!(
                "cannot merge {} buffer into {} buffer",
                other.split, self.split
            )));
        }
        self.buffer.merge(&other.buffer)
    }

    pub fn finalize(self) -> Array4<f32> {
        self.buffer.finalize()
    }

    pub fn dump_img(
        &self,
        mean: &[f32],
        std: &[f32],
        t: usize,
        downscale_factor: usize,
        epoch: usize,
    ) -> SplitResult<Vec<PathBuf>> {
        let paths = self.buffer.dump_img(mean, std, t, downscale_factor, epoch)?;
        info!(split = %self.split, t, epoch, files = paths.len(), "Dumped running-average frame");
        Ok(paths)
    }
}
