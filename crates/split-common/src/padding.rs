//! Padding policies for patches that extend past the source array.

use serde::{Deserialize, Serialize};

use crate::error::{SplitError, SplitResult};

/// How out-of-bounds pixels of a crop are filled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum PaddingMode {
    /// Mirror about the edge pixel, without repeating it.
    Reflect,
    /// Fill with a fixed value.
    Constant(f32),
    /// Replicate the nearest edge pixel.
    Edge,
}

impl Default for PaddingMode {
    fn default() -> Self {
        Self::Constant(0.0)
    }
}

impl PaddingMode {
    /// Build from a mode name plus an optional fill value.
    ///
    /// A constant mode without a value fills with zero. A value supplied for
    /// a non-constant mode is rejected.
    pub fn from_parts(mode: &str, value: Option<f32>) -> SplitResult<Self> {
        let parsed = match mode.to_lowercase().as_str() {
            "reflect" | "mirror" => Self::Reflect,
            "constant" => Self::Constant(value.unwrap_or(0.0)),
            "edge" | "nearest" | "replicate" => Self::Edge,
            _ => {
                return Err(SplitError::UnknownVariant {
                    kind: "padding mode",
                    value: mode.to_string(),
                })
            }
        };

        if let Self::Constant(v) = parsed {
            if !v.is_finite() {
                return Err(SplitError::invalid_config(format!(
                    "constant padding value must be finite, got {}",
                    v
                )));
            }
        } else if value.is_some() {
            return Err(SplitError::invalid_config(format!(
                "padding value only applies to constant mode, not '{}'",
                mode
            )));
        }

        Ok(parsed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Reflect => "reflect",
            Self::Constant(_) => "constant",
            Self::Edge => "edge",
        }
    }

    /// Map a possibly out-of-range coordinate onto `[0, len)`.
    ///
    /// Returns `None` for constant padding, meaning "use the fill value".
    pub fn source_index(&self, idx: i64, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let n = len as i64;
        if (0..n).contains(&idx) {
            return Some(idx as usize);
        }
        match self {
            Self::Constant(_) => None,
            Self::Edge => Some(idx.clamp(0, n - 1) as usize),
            Self::Reflect => {
                if n == 1 {
                    return Some(0);
                }
                let period = 2 * (n - 1);
                let m = idx.rem_euclid(period);
                Some(if m < n { m } else { period - m } as usize)
            }
        }
    }
}

impl std::fmt::Display for PaddingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "constant({})", v),
            other => write!(f, "{}", other.name()),
        }
    }
}
