//! Configuration for the patch grid, stitcher and running-average buffer.

use serde::{Deserialize, Serialize};
use split_common::{GridAlignment, GridSize, PaddingMode, TilingMode};

/// Configuration for a split's patch grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Side length of the square patch handed to the model.
    pub patch_size: usize,

    /// Step between adjacent grid-cell origins.
    pub grid_size: GridSize,

    /// Placement of the patch relative to its cell.
    pub alignment: GridAlignment,

    /// Handling of patches that cross the frame edge.
    pub tiling_mode: TilingMode,

    /// Fill policy for out-of-frame pixels.
    pub padding: PaddingMode,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            patch_size: 64,
            grid_size: GridSize::square(64),
            alignment: GridAlignment::LeftTop,
            tiling_mode: TilingMode::ShiftBoundary,
            padding: PaddingMode::Constant(0.0),
        }
    }
}

impl GridConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.patch_size = size;
            }
        }

        if let Ok(val) = std::env::var("GRID_SIZE") {
            if let Ok(size) = GridSize::parse(&val) {
                config.grid_size = size;
            }
        }

        if let Ok(val) = std::env::var("GRID_ALIGNMENT") {
            if let Ok(alignment) = GridAlignment::from_str(&val) {
                config.alignment = alignment;
            }
        }

        if let Ok(val) = std::env::var("TILING_MODE") {
            if let Ok(mode) = TilingMode::from_str(&val) {
                config.tiling_mode = mode;
            }
        }

        if let Ok(mode) = std::env::var("PADDING_MODE") {
            let value = std::env::var("PADDING_VALUE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok());
            if let Ok(padding) = PaddingMode::from_parts(&mode, value) {
                config.padding = padding;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.patch_size == 0 {
            return Err("patch_size must be > 0".to_string());
        }

        if self.grid_size.h == 0 || self.grid_size.w == 0 {
            return Err("grid_size must be > 0".to_string());
        }

        if self.patch_size < self.grid_size.h || self.patch_size < self.grid_size.w {
            return Err(format!(
                "patch_size ({}) must be >= grid_size ({})",
                self.patch_size, self.grid_size
            ));
        }

        if let PaddingMode::Constant(v) = self.padding {
            if !v.is_finite() {
                return Err("constant padding value must be finite".to_string());
            }
        }

        Ok(())
    }

    /// Whether neighboring patches overlap.
    pub fn is_overlapping(&self) -> bool {
        self.grid_size.h < self.patch_size || self.grid_size.w < self.patch_size
    }
}

/// How pixels covered by more than one patch are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMode {
    /// Each patch writes only the grid cell it owns.
    #[default]
    OwnedCell,
    /// Every covering patch contributes with equal weight.
    Average,
}

impl OverlapMode {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "average" | "avg" | "mean" => Self::Average,
            _ => Self::OwnedCell,
        }
    }
}

/// Treatment of predictions smaller than the configured patch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndersizedPolicy {
    /// Place the prediction in the middle of the expected window.
    #[default]
    CenterPad,
    /// Refuse to stitch.
    Reject,
}

impl UndersizedPolicy {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "reject" | "error" => Self::Reject,
            _ => Self::CenterPad,
        }
    }
}

/// Configuration for stitching predictions back into frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    pub overlap: OverlapMode,
    pub undersized: UndersizedPolicy,
}

impl StitchConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("STITCH_OVERLAP") {
            config.overlap = OverlapMode::from_str(&val);
        }

        if let Ok(val) = std::env::var("STITCH_UNDERSIZED") {
            config.undersized = UndersizedPolicy::from_str(&val);
        }

        config
    }
}

/// Configuration for the running-average accumulation buffer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunningAverageConfig {
    /// Border, in pixels, left unwritten on every side of each update.
    pub skip_boundary_pixelcount: usize,

    /// Directory for `dump_img` output.
    pub dump_img_dir: Option<std::path::PathBuf>,
}

impl RunningAverageConfig {
    /// Validate against the patch size the buffer will receive.
    pub fn validate(&self, patch_size: usize) -> Result<(), String> {
        if 2 * self.skip_boundary_pixelcount >= patch_size {
            return Err(format!(
                "skip_boundary_pixelcount ({}) leaves nothing of a {}px patch",
                self.skip_boundary_pixelcount, patch_size
            ));
        }
        Ok(())
    }
}
