//! Flat patch index <-> (time, row, col) conversion.
//!
//! The flat index space is frame-major in the innermost position:
//! `time = idx % T`, `cell = idx / T`, and `cell` enumerates grid cells in
//! row-major order. Training samplers, the stitcher and the running-average
//! buffer all go through [`GridIndexManager`], so a patch fetched with index
//! `i` is written back to exactly the pixels it was cropped from.

use std::sync::Arc;

use split_common::{
    DataShape, GridAlignment, GridSize, Location, SplitError, SplitResult, TilingMode,
};
use tracing::debug;

use crate::config::GridConfig;

/// Tiling geometry along a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisTiling {
    /// Frame extent along this axis.
    pub extent: usize,
    /// Step between cell origins.
    pub grid: usize,
    /// Patch side length.
    pub patch: usize,
    pub alignment: GridAlignment,
    pub tiling: TilingMode,
}

impl AxisTiling {
    /// Number of grid cells along the axis.
    pub fn blocks(&self) -> usize {
        self.extent.div_ceil(self.grid)
    }

    /// Largest origin that keeps the patch inside the frame.
    fn max_origin(&self) -> i64 {
        self.extent as i64 - self.patch as i64
    }

    /// Offset from the cell start back to the patch start.
    fn center_offset(&self) -> i64 {
        match self.alignment {
            GridAlignment::LeftTop => 0,
            GridAlignment::Center => ((self.patch - self.grid) / 2) as i64,
        }
    }

    /// Patch origin for a cell.
    pub fn origin(&self, block: usize) -> i64 {
        let raw = (block * self.grid) as i64 - self.center_offset();
        match self.tiling {
            TilingMode::ShiftBoundary => raw.clamp(0, self.max_origin().max(0)),
            TilingMode::PadBoundary => raw,
        }
    }

    /// Start and length of the cell itself, clipped to the frame.
    pub fn cell(&self, block: usize) -> (usize, usize) {
        let start = block * self.grid;
        (start, self.grid.min(self.extent.saturating_sub(start)))
    }

    /// Smallest cell whose patch origin is `origin`, if any.
    pub fn block_of(&self, origin: i64) -> Option<usize> {
        let offset = self.center_offset();
        let grid = self.grid as i64;
        let mut candidates = Vec::with_capacity(3);

        let unclipped = origin + offset;
        if unclipped >= 0 && unclipped % grid == 0 {
            candidates.push((unclipped / grid) as usize);
        }

        if self.tiling == TilingMode::ShiftBoundary {
            if origin == 0 {
                candidates.push(0);
            }
            let max_origin = self.max_origin();
            if origin == max_origin && max_origin >= 0 {
                // first block whose raw origin reaches the clip point
                let first_clipped = (max_origin + offset + grid - 1) / grid;
                candidates.push(first_clipped as usize);
            }
        }

        candidates
            .into_iter()
            .filter(|&b| b < self.blocks() && self.origin(b) == origin)
            .min()
    }
}

/// The grid cell a patch owns and where it sits inside that patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteWindow {
    /// Patch origin in frame coordinates.
    pub location: Location,
    /// Top-left of the owned cell in frame coordinates.
    pub cell_row: usize,
    pub cell_col: usize,
    /// Cell extent (smaller than the grid size on the last row/column).
    pub height: usize,
    pub width: usize,
}

impl WriteWindow {
    /// Offset of the cell inside the patch.
    pub fn patch_offset(&self) -> (usize, usize) {
        (
            (self.cell_row as i64 - self.location.row) as usize,
            (self.cell_col as i64 - self.location.col) as usize,
        )
    }
}

/// Maps flat patch indices to absolute patch locations for one split.
#[derive(Debug, Clone, PartialEq)]
pub struct GridIndexManager {
    shape: DataShape,
    grid_size: GridSize,
    patch_size: usize,
    alignment: GridAlignment,
    tiling: TilingMode,
}

impl GridIndexManager {
    /// Create a manager, rejecting inconsistent geometry.
    pub fn new(
        shape: DataShape,
        grid_size: GridSize,
        patch_size: usize,
        alignment: GridAlignment,
        tiling: TilingMode,
    ) -> SplitResult<Self> {
        if shape.is_empty() {
            return Err(SplitError::invalid_config(format!(
                "data shape {} has an empty dimension",
                shape
            )));
        }

        let manager = Self {
            shape,
            grid_size,
            patch_size,
            alignment,
            tiling,
        };
        manager.check_grid(grid_size)?;

        if tiling == TilingMode::ShiftBoundary
            && (patch_size > shape.height || patch_size > shape.width)
        {
            return Err(SplitError::invalid_config(format!(
                "patch_size {} exceeds frame {}x{}; shift-boundary tiling cannot fit it",
                patch_size, shape.height, shape.width
            )));
        }

        debug!(
            shape = %shape,
            grid_size = %grid_size,
            patch_size,
            alignment = %alignment,
            tiling = %tiling,
            grid_count = manager.grid_count(),
            "Created grid index manager"
        );

        Ok(manager)
    }

    /// Create a manager from a validated [`GridConfig`].
    pub fn from_config(shape: DataShape, config: &GridConfig) -> SplitResult<Self> {
        config.validate().map_err(SplitError::InvalidConfig)?;
        Self::new(
            shape,
            config.grid_size,
            config.patch_size,
            config.alignment,
            config.tiling_mode,
        )
    }

    fn check_grid(&self, grid: GridSize) -> SplitResult<()> {
        if grid.h == 0 || grid.w == 0 || self.patch_size == 0 {
            return Err(SplitError::invalid_config(format!(
                "grid_size ({}) and patch_size ({}) must be > 0",
                grid, self.patch_size
            )));
        }
        if self.patch_size < grid.h || self.patch_size < grid.w {
            return Err(SplitError::invalid_config(format!(
                "patch_size ({}) must be >= grid_size ({})",
                self.patch_size, grid
            )));
        }
        Ok(())
    }

    fn resolve_grid(&self, grid: Option<GridSize>) -> SplitResult<GridSize> {
        match grid {
            None => Ok(self.grid_size),
            Some(g) => {
                self.check_grid(g)?;
                Ok(g)
            }
        }
    }

    fn axes(&self, grid: GridSize) -> (AxisTiling, AxisTiling) {
        let rows = AxisTiling {
            extent: self.shape.height,
            grid: grid.h,
            patch: self.patch_size,
            alignment: self.alignment,
            tiling: self.tiling,
        };
        let cols = AxisTiling {
            extent: self.shape.width,
            grid: grid.w,
            ..rows
        };
        (rows, cols)
    }

    /// Configured `(T, H, W, C)` shape.
    pub fn get_data_shape(&self) -> DataShape {
        self.shape
    }

    pub fn grid_size(&self) -> GridSize {
        self.grid_size
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn alignment(&self) -> GridAlignment {
        self.alignment
    }

    pub fn tiling_mode(&self) -> TilingMode {
        self.tiling
    }

    /// Grid cells per frame along (rows, cols).
    pub fn grid_dims(&self, grid: Option<GridSize>) -> SplitResult<(usize, usize)> {
        let (rows, cols) = self.axes(self.resolve_grid(grid)?);
        Ok((rows.blocks(), cols.blocks()))
    }

    /// Patches per frame at the configured grid size.
    pub fn repeat_factor(&self) -> usize {
        let (rows, cols) = self.axes(self.grid_size);
        rows.blocks() * cols.blocks()
    }

    /// Total addressable patches at the configured grid size.
    pub fn grid_count(&self) -> usize {
        self.shape.frames * self.repeat_factor()
    }

    /// Total addressable patches at an arbitrary grid size.
    pub fn grid_count_for(&self, grid: Option<GridSize>) -> SplitResult<usize> {
        let (rows, cols) = self.grid_dims(grid)?;
        Ok(self.shape.frames * rows * cols)
    }

    /// Frame an index belongs to.
    pub fn frame_of(&self, idx: usize) -> usize {
        idx % self.shape.frames
    }

    /// Grid cell (within its frame) an index belongs to.
    pub fn cell_of(&self, idx: usize) -> usize {
        idx / self.shape.frames
    }

    fn blocks_of(&self, idx: usize, grid: GridSize) -> SplitResult<(usize, usize, AxisTiling, AxisTiling)> {
        let (rows, cols) = self.axes(grid);
        let count = self.shape.frames * rows.blocks() * cols.blocks();
        if idx >= count {
            return Err(SplitError::IndexOutOfRange { index: idx, count });
        }
        let cell = self.cell_of(idx);
        Ok((cell / cols.blocks(), cell % cols.blocks(), rows, cols))
    }

    /// Patch origin for a flat index.
    pub fn hwt_from_idx(&self, idx: usize, grid: Option<GridSize>) -> SplitResult<Location> {
        let grid = self.resolve_grid(grid)?;
        let (row_block, col_block, rows, cols) = self.blocks_of(idx, grid)?;
        Ok(Location::new(
            rows.origin(row_block),
            cols.origin(col_block),
            self.frame_of(idx),
        ))
    }

    /// Flat index whose patch starts at `(row, col)` in frame `t`.
    pub fn idx_from_hw(
        &self,
        row: i64,
        col: i64,
        t: usize,
        grid: Option<GridSize>,
    ) -> SplitResult<usize> {
        let grid = self.resolve_grid(grid)?;
        let (rows, cols) = self.axes(grid);
        let bounds = format!("{} at grid {}", self.shape, grid);

        if t >= self.shape.frames {
            return Err(SplitError::out_of_bounds(format!("t={}", t), bounds));
        }
        let row_block = rows
            .block_of(row)
            .ok_or_else(|| SplitError::out_of_bounds(format!("row origin {}", row), bounds.clone()))?;
        let col_block = cols
            .block_of(col)
            .ok_or_else(|| SplitError::out_of_bounds(format!("col origin {}", col), bounds))?;

        let cell = row_block * cols.blocks() + col_block;
        Ok(cell * self.shape.frames + t)
    }

    /// The grid cell a patch is responsible for when stitching.
    pub fn write_window(&self, idx: usize, grid: Option<GridSize>) -> SplitResult<WriteWindow> {
        let grid = self.resolve_grid(grid)?;
        let (row_block, col_block, rows, cols) = self.blocks_of(idx, grid)?;
        let (cell_row, height) = rows.cell(row_block);
        let (cell_col, width) = cols.cell(col_block);
        Ok(WriteWindow {
            location: Location::new(
                rows.origin(row_block),
                cols.origin(col_block),
                self.frame_of(idx),
            ),
            cell_row,
            cell_col,
            height,
            width,
        })
    }

    /// Every location in index order.
    pub fn locations(&self) -> impl Iterator<Item = Location> + '_ {
        (0..self.grid_count()).filter_map(move |idx| self.hwt_from_idx(idx, None).ok())
    }
}

/// Several managers sharing one flat index space.
///
/// Used when frames of different sizes are concatenated: group `g` owns
/// indices `[offsets[g], offsets[g] + managers[g].grid_count())`.
#[derive(Debug, Clone)]
pub struct GroupedGridIndex {
    managers: Vec<Arc<GridIndexManager>>,
    offsets: Vec<usize>,
    total: usize,
}

impl GroupedGridIndex {
    pub fn new(managers: Vec<Arc<GridIndexManager>>) -> SplitResult<Self> {
        if managers.is_empty() {
            return Err(SplitError::invalid_config("grouped index needs at least one manager"));
        }
        let patch = managers[0].patch_size();
        if let Some(m) = managers.iter().find(|m| m.patch_size() != patch) {
            return Err(SplitError::invalid_config(format!(
                "all groups must share patch_size {} (found {})",
                patch,
                m.patch_size()
            )));
        }

        let mut offsets = Vec::with_capacity(managers.len());
        let mut total = 0;
        for manager in &managers {
            offsets.push(total);
            total += manager.grid_count();
        }

        Ok(Self {
            managers,
            offsets,
            total,
        })
    }

    pub fn grid_count(&self) -> usize {
        self.total
    }

    pub fn groups(&self) -> &[Arc<GridIndexManager>] {
        &self.managers
    }

    /// `(group, local index)` for a global index.
    pub fn locate(&self, idx: usize) -> SplitResult<(usize, usize)> {
        if idx >= self.total {
            return Err(SplitError::IndexOutOfRange {
                index: idx,
                count: self.total,
            });
        }
        let group = self.offsets.partition_point(|&start| start <= idx) - 1;
        Ok((group, idx - self.offsets[group]))
    }

    /// Global index of a group-local index.
    pub fn global_index(&self, group: usize, local: usize) -> SplitResult<usize> {
        let manager = self.managers.get(group).ok_or_else(|| {
            SplitError::out_of_bounds(format!("group {}", group), format!("{} groups", self.managers.len()))
        })?;
        if local >= manager.grid_count() {
            return Err(SplitError::IndexOutOfRange {
                index: local,
                count: manager.grid_count(),
            });
        }
        Ok(self.offsets[group] + local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(
        shape: (usize, usize, usize, usize),
        grid: usize,
        patch: usize,
        alignment: GridAlignment,
        tiling: TilingMode,
    ) -> GridIndexManager {
        GridIndexManager::new(shape.into(), GridSize::square(grid), patch, alignment, tiling).unwrap()
    }

    #[test]
    fn test_grid_count_left_top() {
        let m = manager((3, 128, 128, 2), 64, 64, GridAlignment::LeftTop, TilingMode::ShiftBoundary);
        assert_eq!(m.grid_count(), 12);
        assert_eq!(m.repeat_factor(), 4);

        let m = manager((2, 100, 70, 1), 32, 32, GridAlignment::LeftTop, TilingMode::ShiftBoundary);
        // ceil(100/32)=4, ceil(70/32)=3
        assert_eq!(m.grid_count(), 2 * 4 * 3);
    }

    #[test]
    fn test_hwt_from_idx_is_frame_major() {
        let m = manager((3, 128, 128, 2), 64, 64, GridAlignment::LeftTop, TilingMode::ShiftBoundary);
        assert_eq!(m.hwt_from_idx(0, None).unwrap(), Location::new(0, 0, 0));
        assert_eq!(m.hwt_from_idx(1, None).unwrap(), Location::new(0, 0, 1));
        assert_eq!(m.hwt_from_idx(3, None).unwrap(), Location::new(0, 64, 0));
        assert_eq!(m.hwt_from_idx(6, None).unwrap(), Location::new(64, 0, 0));
        assert_eq!(m.hwt_from_idx(11, None).unwrap(), Location::new(64, 64, 2));
    }

    #[test]
    fn test_out_of_range_index() {
        let m = manager((3, 128, 128, 2), 64, 64, GridAlignment::LeftTop, TilingMode::ShiftBoundary);
        let err = m.hwt_from_idx(12, None).unwrap_err();
        assert!(matches!(err, SplitError::IndexOutOfRange { index: 12, count: 12 }));
        assert!(err.is_programmer_error());
    }

    #[test]
    fn test_patch_smaller_than_grid_is_rejected() {
        let err = GridIndexManager::new(
            (1, 64, 64, 1).into(),
            GridSize::square(32),
            16,
            GridAlignment::LeftTop,
            TilingMode::ShiftBoundary,
        )
        .unwrap_err();
        assert!(matches!(err, SplitError::InvalidConfig(_)));

        let m = manager((1, 64, 64, 1), 16, 16, GridAlignment::LeftTop, TilingMode::ShiftBoundary);
        assert!(m.hwt_from_idx(0, Some(GridSize::square(32))).is_err());
    }

    #[test]
    fn test_shift_boundary_moves_last_patch_inward() {
        let m = manager((1, 100, 100, 1), 32, 32, GridAlignment::LeftTop, TilingMode::ShiftBoundary);
        // block 3 would start at 96 and overrun; shifted to 100 - 32 = 68
        let loc = m.hwt_from_idx(3, None).unwrap();
        assert_eq!(loc, Location::new(0, 68, 0));

        let pad = manager((1, 100, 100, 1), 32, 32, GridAlignment::LeftTop, TilingMode::PadBoundary);
        assert_eq!(pad.hwt_from_idx(3, None).unwrap(), Location::new(0, 96, 0));
    }

    #[test]
    fn test_center_alignment_clips_into_frame() {
        let m = manager((1, 128, 128, 1), 32, 64, GridAlignment::Center, TilingMode::ShiftBoundary);
        assert_eq!(m.repeat_factor(), 16);
        // offset (64-32)/2 = 16: block 0 -> -16 clipped to 0
        assert_eq!(m.hwt_from_idx(0, None).unwrap().col, 0);
        // block 1 -> 16
        assert_eq!(m.hwt_from_idx(1, None).unwrap().col, 16);
        // block 3 -> 80 clipped to 64
        assert_eq!(m.hwt_from_idx(3, None).unwrap().col, 64);

        let pad = manager((1, 128, 128, 1), 32, 64, GridAlignment::Center, TilingMode::PadBoundary);
        assert_eq!(pad.hwt_from_idx(0, None).unwrap().col, -16);
        assert_eq!(pad.hwt_from_idx(3, None).unwrap().col, 80);
    }

    #[test]
    fn test_grid_override() {
        let m = manager((2, 128, 128, 1), 64, 64, GridAlignment::LeftTop, TilingMode::ShiftBoundary);
        let grid = Some(GridSize::square(32));
        assert_eq!(m.grid_count_for(grid).unwrap(), 2 * 4 * 4);
        assert_eq!(m.hwt_from_idx(2, grid).unwrap(), Location::new(0, 32, 0));
        assert_eq!(m.idx_from_hw(0, 32, 0, grid).unwrap(), 2);
    }

    #[test]
    fn test_idx_from_hw_resolves_shifted_origins() {
        let m = manager((2, 100, 100, 1), 32, 32, GridAlignment::LeftTop, TilingMode::ShiftBoundary);
        let idx = m.idx_from_hw(68, 68, 1, None).unwrap();
        assert_eq!(m.hwt_from_idx(idx, None).unwrap(), Location::new(68, 68, 1));

        assert!(m.idx_from_hw(10, 0, 0, None).is_err());
        assert!(m.idx_from_hw(0, 0, 2, None).is_err());
    }

    #[test]
    fn test_block_of_prefers_smallest_block() {
        // patch 64, grid 32 on 100px: blocks 2 and 3 both clip to 36
        let axis = AxisTiling {
            extent: 100,
            grid: 32,
            patch: 64,
            alignment: GridAlignment::LeftTop,
            tiling: TilingMode::ShiftBoundary,
        };
        assert_eq!(axis.origin(2), 36);
        assert_eq!(axis.origin(3), 36);
        assert_eq!(axis.block_of(36), Some(2));
    }

    #[test]
    fn test_write_window_is_owned_cell() {
        let m = manager((1, 100, 100, 1), 32, 32, GridAlignment::LeftTop, TilingMode::ShiftBoundary);
        let window = m.write_window(3, None).unwrap();
        assert_eq!(window.location.col, 68);
        assert_eq!((window.cell_col, window.width), (96, 4));
        assert_eq!(window.patch_offset(), (0, 28));
    }

    #[test]
    fn test_grouped_index_locate() {
        let a = Arc::new(manager((2, 64, 64, 1), 32, 32, GridAlignment::LeftTop, TilingMode::ShiftBoundary));
        let b = Arc::new(manager((1, 96, 96, 1), 32, 32, GridAlignment::LeftTop, TilingMode::ShiftBoundary));
        let grouped = GroupedGridIndex::new(vec![a, b]).unwrap();

        assert_eq!(grouped.grid_count(), 8 + 9);
        assert_eq!(grouped.locate(0).unwrap(), (0, 0));
        assert_eq!(grouped.locate(7).unwrap(), (0, 7));
        assert_eq!(grouped.locate(8).unwrap(), (1, 0));
        assert_eq!(grouped.locate(16).unwrap(), (1, 8));
        assert!(grouped.locate(17).is_err());
        assert_eq!(grouped.global_index(1, 2).unwrap(), 10);
    }
}
