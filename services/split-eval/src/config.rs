//! Evaluation configuration.
//!
//! Loaded from a YAML file with `${VAR}` / `${VAR:-default}` substitution,
//! then adjusted by environment variables and command-line flags.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use patch_dataset::DatasetConfig;
use patch_grid::{RunningAverageConfig, StitchConfig};
use serde::{Deserialize, Serialize};
use split_common::{DataSplit, GridSize};

use crate::predictor::PredictorKind;
use crate::synthetic::SyntheticConfig;

/// Running-average pass over the predictions of each evaluated split.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulationConfig {
    #[serde(flatten)]
    pub buffer: RunningAverageConfig,

    /// Number of per-worker buffers merged at the end.
    pub workers: usize,

    /// Frame written by `dump_img`.
    pub dump_frame: usize,

    pub dump_downscale_factor: usize,

    /// Epoch number embedded in dump file names.
    pub epoch: usize,
}

impl Default for AccumulationConfig {
    fn default() -> Self {
        Self {
            buffer: RunningAverageConfig::default(),
            workers: 4,
            dump_frame: 0,
            dump_downscale_factor: 1,
            epoch: 0,
        }
    }
}

/// Top-level evaluation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Dataset settings shared by every split.
    pub dataset: DatasetConfig,

    pub stitch: StitchConfig,

    pub synthetic: SyntheticConfig,

    pub predictor: PredictorKind,

    /// Grid used at evaluation time; the training grid when unset.
    pub eval_grid_size: Option<GridSize>,

    pub eval_splits: Vec<DataSplit>,

    /// Rows and columns at the bottom/right edge excluded from metrics.
    pub ignore_last_pixels: usize,

    pub accumulation: Option<AccumulationConfig>,

    /// Where the JSON report is written.
    pub report_path: Option<PathBuf>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig::default(),
            stitch: StitchConfig::default(),
            synthetic: SyntheticConfig::default(),
            predictor: PredictorKind::Oracle,
            eval_grid_size: None,
            eval_splits: vec![DataSplit::Val],
            ignore_last_pixels: 0,
            accumulation: None,
            report_path: None,
        }
    }
}

impl EvalConfig {
    /// Load from `path` when given, otherwise from environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml(path)?,
            None => Self {
                dataset: DatasetConfig::from_env(),
                stitch: StitchConfig::from_env(),
                ..Self::default()
            },
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let content = expand_env_vars(&content)?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Evaluation-level overrides from the environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("EVAL_GRID_SIZE") {
            self.eval_grid_size = Some(GridSize::parse(&val)?);
        }

        if let Ok(val) = std::env::var("EVAL_PREDICTOR") {
            self.predictor = PredictorKind::from_str(&val)?;
        }

        if let Ok(val) = std::env::var("EVAL_SPLITS") {
            self.eval_splits = val
                .split(',')
                .map(|s| DataSplit::from_str(s.trim()))
                .collect::<Result<_, _>>()?;
        }

        if let Ok(val) = std::env::var("IGNORE_LAST_PIXELS") {
            self.ignore_last_pixels = val
                .parse()
                .with_context(|| format!("IGNORE_LAST_PIXELS must be an integer, got '{}'", val))?;
        }

        if let Ok(val) = std::env::var("EVAL_REPORT_PATH") {
            self.report_path = Some(PathBuf::from(val));
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.dataset.validate()?;
        self.synthetic.validate()?;

        if self.eval_splits.is_empty() {
            return Err("eval_splits must name at least one split".to_string());
        }

        let patch_size = self.dataset.grid.patch_size;
        if let Some(grid) = self.eval_grid_size {
            if !grid.is_square() {
                return Err(format!("eval_grid_size must be square, got {}", grid));
            }
            if grid.h == 0 || grid.h > patch_size {
                return Err(format!(
                    "eval_grid_size ({}) must be within 1..={} (patch_size)",
                    grid, patch_size
                ));
            }
        }

        let min_side = self.synthetic.height.min(self.synthetic.width);
        if self.ignore_last_pixels >= min_side {
            return Err(format!(
                "ignore_last_pixels ({}) removes the whole {}px frame",
                self.ignore_last_pixels, min_side
            ));
        }

        if let Some(acc) = &self.accumulation {
            acc.buffer.validate(patch_size)?;
            if acc.workers == 0 {
                return Err("accumulation.workers must be >= 1".to_string());
            }
            if acc.dump_downscale_factor == 0 {
                return Err("accumulation.dump_downscale_factor must be >= 1".to_string());
            }
        }

        Ok(())
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references.
pub fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut var_expr = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => var_expr.push(c),
                    None => anyhow::bail!("Unclosed variable substitution: ${{{}", var_expr),
                }
            }
            result.push_str(&resolve_var_expr(&var_expr)?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patch_grid::OverlapMode;
    use split_common::GridAlignment;

    #[test]
    fn test_default_config_is_valid() {
        let config = EvalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.eval_splits, vec![DataSplit::Val]);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
dataset:
  grid:
    patch_size: 32
    grid_size: 16
    alignment: center
    padding:
      mode: reflect
  normalized_input: false
stitch:
  overlap: average
predictor:
  kind: undersized
  margin: 2
eval_grid_size: [8, 8]
eval_splits: [val, test]
accumulation:
  skip_boundary_pixelcount: 1
  workers: 2
"#;
        let config: EvalConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.dataset.grid.patch_size, 32);
        assert_eq!(config.dataset.grid.grid_size, GridSize::square(16));
        assert_eq!(config.dataset.grid.alignment, GridAlignment::Center);
        assert_eq!(config.stitch.overlap, OverlapMode::Average);
        assert_eq!(config.predictor, PredictorKind::Undersized { margin: 2 });
        assert_eq!(config.eval_grid_size, Some(GridSize::square(8)));
        assert_eq!(config.eval_splits, vec![DataSplit::Val, DataSplit::Test]);
        let acc = config.accumulation.as_ref().unwrap();
        assert_eq!(acc.buffer.skip_boundary_pixelcount, 1);
        assert_eq!(acc.workers, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = EvalConfig::default();
        config.eval_grid_size = Some(GridSize::square(128));
        assert!(config.validate().is_err());

        config = EvalConfig::default();
        config.ignore_last_pixels = 500;
        assert!(config.validate().is_err());

        config = EvalConfig::default();
        config.eval_splits.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("SPLIT_EVAL_TEST_PATCH", "48");
        std::env::remove_var("SPLIT_EVAL_TEST_MISSING");
        assert_eq!(
            expand_env_vars("patch_size: ${SPLIT_EVAL_TEST_PATCH}").unwrap(),
            "patch_size: 48"
        );
        assert_eq!(
            expand_env_vars("grid_size: ${SPLIT_EVAL_TEST_MISSING:-16}").unwrap(),
            "grid_size: 16"
        );
        assert!(expand_env_vars("${SPLIT_EVAL_TEST_MISSING}").is_err());
        assert!(expand_env_vars("${UNCLOSED").is_err());
    }
}
