//! Patch-grid indexing, cropping and stitching for tiled image splitting
//!
//! This crate maps flat patch indices to absolute positions in a
//! `(T, H, W, C)` volume and back. It enables:
//!
//! - **Deterministic tiling**: every index resolves to the same patch origin
//! - **Overlapping context**: patches larger than the grid cell they predict
//! - **Exact reassembly**: each output pixel written by exactly one patch
//!
//! # Architecture
//!
//! ```text
//! flat index
//!      │
//!      ▼
//! GridIndexManager::hwt_from_idx(idx)
//!      │
//!      ├─► time = idx % T, cell = idx / T
//!      │
//!      ├─► origin = block * grid - center offset
//!      │         │
//!      │         ├─► ShiftBoundary: clamp into the frame
//!      │         │
//!      │         └─► PadBoundary: keep, cropper pads
//!      │
//!      ├─► PatchCropper::crop_index ──► (C, P, P) model input
//!      │
//!      └─► StitchEngine::stitch ◄── predictions
//!               │
//!               ▼
//!          (T, H, W, C) volume
//! ```
//!
//! # Example
//!
//! ```ignore
//! use patch_grid::{GridIndexManager, StitchEngine, StitchConfig};
//!
//! let manager = GridIndexManager::new(shape, GridSize::square(32), 64,
//!     GridAlignment::Center, TilingMode::ShiftBoundary)?;
//!
//! let predictions = (0..manager.grid_count()).map(|idx| (idx, predict(idx)));
//! let volume = StitchEngine::new(StitchConfig::default()).stitch(predictions, &manager)?;
//! ```

pub mod config;
pub mod crop;
pub mod dump;
pub mod index;
pub mod multiscale;
pub mod registry;
pub mod running_average;
pub mod stitch;

// Re-export commonly used types at crate root
pub use config::{GridConfig, OverlapMode, RunningAverageConfig, StitchConfig, UndersizedPolicy};
pub use crop::{crop, crop_2d, CropMode, PatchCropper};
pub use dump::{write_channel_planes, DumpDepth};
pub use index::{AxisTiling, GridIndexManager, GroupedGridIndex, WriteWindow};
pub use multiscale::{downsample_2x, lateral_context_stack, DownsampleMethod};
pub use registry::GridIndexRegistry;
pub use running_average::{LocationBuffer, SolutionRunningAverageManager};
pub use stitch::{center_offset, center_pad, StitchEngine, StitchReport, Stitched};

pub use split_common::{
    DataShape, DataSplit, Direction, GridAlignment, GridSize, Location, PaddingMode, SplitError,
    SplitResult, TilingMode,
};
