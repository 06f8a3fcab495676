//! Grid geometry shared by the index manager, stitcher and dataset.

use serde::{Deserialize, Serialize};

use crate::error::{SplitError, SplitResult};

/// Shape of an image volume in `(T, H, W, C)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataShape {
    /// Number of frames (time points)
    pub frames: usize,
    /// Rows per frame
    pub height: usize,
    /// Columns per frame
    pub width: usize,
    /// Channels per pixel
    pub channels: usize,
}

impl DataShape {
    pub fn new(frames: usize, height: usize, width: usize, channels: usize) -> Self {
        Self {
            frames,
            height,
            width,
            channels,
        }
    }

    /// `(T, H, W, C)` tuple, the layout of stitched volumes.
    pub fn thwc(&self) -> (usize, usize, usize, usize) {
        (self.frames, self.height, self.width, self.channels)
    }

    /// `(T, C, H, W)` tuple, the layout of accumulation buffers.
    pub fn tchw(&self) -> (usize, usize, usize, usize) {
        (self.frames, self.channels, self.height, self.width)
    }

    pub fn pixels_per_frame(&self) -> usize {
        self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.height == 0 || self.width == 0
    }
}

impl From<(usize, usize, usize, usize)> for DataShape {
    fn from((frames, height, width, channels): (usize, usize, usize, usize)) -> Self {
        Self::new(frames, height, width, channels)
    }
}

impl std::fmt::Display for DataShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(T={}, H={}, W={}, C={})",
            self.frames, self.height, self.width, self.channels
        )
    }
}

/// Step between adjacent grid-cell origins, per axis.
///
/// Deserializes from either a single integer or a `[h, w]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "GridSizeRepr", into = "GridSizeRepr")]
pub struct GridSize {
    pub h: usize,
    pub w: usize,
}

impl GridSize {
    pub fn new(h: usize, w: usize) -> Self {
        Self { h, w }
    }

    pub fn square(size: usize) -> Self {
        Self { h: size, w: size }
    }

    pub fn is_square(&self) -> bool {
        self.h == self.w
    }

    /// Parse `"32"` or `"32,48"`.
    pub fn parse(s: &str) -> SplitResult<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SplitError::invalid_config(format!("grid size '{}': {}", s, e)))?;

        match parts.as_slice() {
            [size] => Ok(Self::square(*size)),
            [h, w] => Ok(Self::new(*h, *w)),
            _ => Err(SplitError::invalid_config(format!(
                "grid size '{}' must have one or two components",
                s
            ))),
        }
    }
}

impl From<usize> for GridSize {
    fn from(size: usize) -> Self {
        Self::square(size)
    }
}

impl From<(usize, usize)> for GridSize {
    fn from((h, w): (usize, usize)) -> Self {
        Self::new(h, w)
    }
}

impl std::fmt::Display for GridSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_square() {
            write!(f, "{}", self.h)
        } else {
            write!(f, "{}x{}", self.h, self.w)
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum GridSizeRepr {
    Square(usize),
    Pair(usize, usize),
}

impl From<GridSizeRepr> for GridSize {
    fn from(repr: GridSizeRepr) -> Self {
        match repr {
            GridSizeRepr::Square(s) => Self::square(s),
            GridSizeRepr::Pair(h, w) => Self::new(h, w),
        }
    }
}

impl From<GridSize> for GridSizeRepr {
    fn from(size: GridSize) -> Self {
        if size.is_square() {
            GridSizeRepr::Square(size.h)
        } else {
            GridSizeRepr::Pair(size.h, size.w)
        }
    }
}

/// Placement of a patch relative to the grid cell it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridAlignment {
    /// Patch origin coincides with the cell origin.
    #[default]
    LeftTop,
    /// The cell sits in the middle of the patch.
    Center,
}

impl GridAlignment {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> SplitResult<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "lefttop" | "topleft" => Ok(Self::LeftTop),
            "center" | "centre" => Ok(Self::Center),
            _ => Err(SplitError::UnknownVariant {
                kind: "grid alignment",
                value: s.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeftTop => "left_top",
            Self::Center => "center",
        }
    }
}

impl std::fmt::Display for GridAlignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to do with patches that would run past the frame edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TilingMode {
    /// Move the origin inward so the patch fits in the frame.
    #[default]
    ShiftBoundary,
    /// Keep the origin; the cropper pads the overhang.
    PadBoundary,
}

impl TilingMode {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> SplitResult<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "shiftboundary" | "shift" => Ok(Self::ShiftBoundary),
            "padboundary" | "pad" => Ok(Self::PadBoundary),
            _ => Err(SplitError::UnknownVariant {
                kind: "tiling mode",
                value: s.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShiftBoundary => "shift_boundary",
            Self::PadBoundary => "pad_boundary",
        }
    }
}

impl std::fmt::Display for TilingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
