//! Dataset configuration.

use patch_grid::{DownsampleMethod, GridConfig};
use serde::{Deserialize, Serialize};
use split_common::{SplitError, SplitResult};

/// How normalisation statistics are derived from the training frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    /// One mean/std over every channel, repeated per channel.
    Shared,
    /// Independent mean/std per channel.
    #[default]
    PerChannel,
    /// Mean 0, std 1.
    Identity,
}

impl NormalizationMode {
    pub fn from_str(s: &str) -> SplitResult<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "shared" | "one" | "single" => Ok(Self::Shared),
            "perchannel" | "channel" => Ok(Self::PerChannel),
            "identity" | "none" => Ok(Self::Identity),
            _ => Err(SplitError::UnknownVariant {
                kind: "normalization mode",
                value: s.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::PerChannel => "per_channel",
            Self::Identity => "identity",
        }
    }
}

impl std::fmt::Display for NormalizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shape of the model input a dataset produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// One `(1, P, P)` mixture per sample.
    #[default]
    Deterministic,
    /// `(L, P, P)` mixture pyramid of progressively wider context.
    LateralContext,
}

impl DatasetKind {
    pub fn from_str(s: &str) -> SplitResult<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "deterministic" | "determ" => Ok(Self::Deterministic),
            "lateralcontext" | "lc" | "multiscale" => Ok(Self::LateralContext),
            _ => Err(SplitError::UnknownVariant {
                kind: "dataset kind",
                value: s.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::LateralContext => "lateral_context",
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for a patch dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Patch grid shared with the stitcher.
    pub grid: GridConfig,

    pub kind: DatasetKind,

    /// Pyramid depth for [`DatasetKind::LateralContext`].
    pub multiscale_lowres_count: usize,

    /// Reducer for the context pyramid.
    pub downsample: DownsampleMethod,

    /// Normalise each channel before mixing the input.
    pub normalized_input: bool,

    pub normalization: NormalizationMode,

    /// Draw crop origins uniformly instead of from the grid (training only).
    pub enable_random_cropping: bool,

    /// Random flips and 90 degree rotations (training only).
    pub enable_rotation_aug: bool,

    /// Values above this quantile of the data are clipped at load time.
    pub clip_quantile: Option<f64>,

    /// Fraction of frames, taken from the end, reserved for validation.
    pub val_fraction: f64,

    /// Fraction of frames, taken from the very end, reserved for testing.
    /// Zero makes validation and test share their frames.
    pub test_fraction: f64,

    /// Seed for random cropping and augmentation.
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            kind: DatasetKind::Deterministic,
            multiscale_lowres_count: 1,
            downsample: DownsampleMethod::Mean,
            normalized_input: true,
            normalization: NormalizationMode::PerChannel,
            enable_random_cropping: false,
            enable_rotation_aug: false,
            clip_quantile: Some(0.995),
            val_fraction: 0.1,
            test_fraction: 0.0,
            seed: None,
        }
    }
}

impl DatasetConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            grid: GridConfig::from_env(),
            ..Self::default()
        };

        if let Ok(val) = std::env::var("DATASET_KIND") {
            if let Ok(kind) = DatasetKind::from_str(&val) {
                config.kind = kind;
            }
        }

        if let Ok(val) = std::env::var("MULTISCALE_LOWRES_COUNT") {
            if let Ok(count) = val.parse() {
                config.multiscale_lowres_count = count;
            }
        }

        if let Ok(val) = std::env::var("NORMALIZED_INPUT") {
            config.normalized_input = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("NORMALIZATION_MODE") {
            if let Ok(mode) = NormalizationMode::from_str(&val) {
                config.normalization = mode;
            }
        }

        if let Ok(val) = std::env::var("ENABLE_RANDOM_CROPPING") {
            config.enable_random_cropping = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("ENABLE_ROTATION_AUG") {
            config.enable_rotation_aug = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("CLIP_QUANTILE") {
            config.clip_quantile = match val.to_lowercase().as_str() {
                "none" | "off" => None,
                other => other.parse().ok().or(config.clip_quantile),
            };
        }

        if let Ok(val) = std::env::var("VAL_FRACTION") {
            if let Ok(fraction) = val.parse() {
                config.val_fraction = fraction;
            }
        }

        if let Ok(val) = std::env::var("TEST_FRACTION") {
            if let Ok(fraction) = val.parse() {
                config.test_fraction = fraction;
            }
        }

        if let Ok(val) = std::env::var("DATASET_SEED") {
            config.seed = val.parse().ok();
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.grid.validate()?;

        if self.grid.grid_size.h != self.grid.grid_size.w {
            return Err(format!("dataset grids must be square, got {}", self.grid.grid_size));
        }

        if self.multiscale_lowres_count == 0 {
            return Err("multiscale_lowres_count must be >= 1".to_string());
        }

        if self.kind == DatasetKind::LateralContext
            && self.multiscale_lowres_count > 1
            && self.grid.patch_size % 2 != 0
        {
            return Err(format!(
                "lateral context needs an even patch_size, got {}",
                self.grid.patch_size
            ));
        }

        if let Some(q) = self.clip_quantile {
            if !(0.0..=1.0).contains(&q) {
                return Err(format!("clip_quantile must be within [0, 1], got {}", q));
            }
        }

        if !(0.0..1.0).contains(&self.val_fraction) || !(0.0..1.0).contains(&self.test_fraction) {
            return Err("val_fraction and test_fraction must be within [0, 1)".to_string());
        }

        if self.val_fraction + self.test_fraction >= 1.0 {
            return Err(format!(
                "val_fraction ({}) + test_fraction ({}) leaves no training frames",
                self.val_fraction, self.test_fraction
            ));
        }

        Ok(())
    }

    /// Pyramid depth actually produced for this kind.
    pub fn input_levels(&self) -> usize {
        match self.kind {
            DatasetKind::Deterministic => 1,
            DatasetKind::LateralContext => self.multiscale_lowres_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use split_common::GridSize;

    #[test]
    fn test_default_config() {
        let config = DatasetConfig::default();
        assert_eq!(config.kind, DatasetKind::Deterministic);
        assert_eq!(config.clip_quantile, Some(0.995));
        assert_eq!(config.input_levels(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = DatasetConfig::default();
        config.grid.grid_size = GridSize::new(32, 64);
        assert!(config.validate().is_err());

        config = DatasetConfig::default();
        config.kind = DatasetKind::LateralContext;
        config.multiscale_lowres_count = 3;
        config.grid.patch_size = 63;
        config.grid.grid_size = GridSize::square(63);
        assert!(config.validate().is_err());

        config = DatasetConfig::default();
        config.val_fraction = 0.6;
        config.test_fraction = 0.4;
        assert!(config.validate().is_err());

        config = DatasetConfig::default();
        config.clip_quantile = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(NormalizationMode::from_str("per-channel").unwrap(), NormalizationMode::PerChannel);
        assert_eq!(NormalizationMode::from_str("SHARED").unwrap(), NormalizationMode::Shared);
        assert!(NormalizationMode::from_str("bogus").is_err());

        assert_eq!(DatasetKind::from_str("lateral_context").unwrap(), DatasetKind::LateralContext);
        assert_eq!(DatasetKind::from_str("LC").unwrap(), DatasetKind::LateralContext);
        assert_eq!(DatasetKind::LateralContext.to_string(), "lateral_context");
    }
}
