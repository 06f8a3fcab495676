//! Stand-in predictors.
//!
//! The network is a black box to the evaluation harness; these
//! implementations exercise the same contract: one `(C, p, p)` prediction
//! per sample with `p` at most the patch size.

use ndarray::{s, Array3, Axis};
use patch_dataset::{MeanStd, Sample};
use serde::{Deserialize, Serialize};
use split_common::{SplitError, SplitResult};

/// Produces channel predictions for dataset samples.
pub trait Predictor: Send + Sync {
    fn name(&self) -> &'static str;

    fn predict(&self, sample: &Sample) -> SplitResult<Array3<f32>>;
}

/// Predictor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictorKind {
    /// Returns the target unchanged.
    #[default]
    Oracle,
    /// Returns the target with `margin` pixels cut from every side.
    Undersized { margin: usize },
    /// Assigns the whole input mixture to every channel.
    Mixture,
}

impl PredictorKind {
    /// Parse `oracle`, `mixture` or `undersized:<margin>`.
    pub fn from_str(s: &str) -> SplitResult<Self> {
        let lower = s.to_lowercase();
        let (name, arg) = match lower.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (lower.as_str(), None),
        };
        match (name, arg) {
            ("oracle", None) => Ok(Self::Oracle),
            ("mixture", None) => Ok(Self::Mixture),
            ("undersized", Some(margin)) => margin
                .trim()
                .parse()
                .map(|margin| Self::Undersized { margin })
                .map_err(|_| SplitError::invalid_config(format!("bad undersized margin '{}'", margin))),
            _ => Err(SplitError::UnknownVariant {
                kind: "predictor",
                value: s.to_string(),
            }),
        }
    }

    /// Instantiate. `stats` de-normalises the mixture predictor's output.
    pub fn build(&self, stats: Option<MeanStd>) -> Box<dyn Predictor> {
        match *self {
            Self::Oracle => Box::new(OraclePredictor),
            Self::Undersized { margin } => Box::new(UndersizedOracle { margin }),
            Self::Mixture => Box::new(MixturePredictor { stats }),
        }
    }
}

impl std::fmt::Display for PredictorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oracle => write!(f, "oracle"),
            Self::Undersized { margin } => write!(f, "undersized:{}", margin),
            Self::Mixture => write!(f, "mixture"),
        }
    }
}

pub struct OraclePredictor;

impl Predictor for OraclePredictor {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn predict(&self, sample: &Sample) -> SplitResult<Array3<f32>> {
        Ok(sample.target.clone())
    }
}

pub struct UndersizedOracle {
    pub margin: usize,
}

impl Predictor for UndersizedOracle {
    fn name(&self) -> &'static str {
        "undersized"
    }

    fn predict(&self, sample: &Sample) -> SplitResult<Array3<f32>> {
        let (_, h, w) = sample.target.dim();
        let m = self.margin;
        if 2 * m >= h || 2 * m >= w {
            return Err(SplitError::invalid_config(format!(
                "margin {} leaves nothing of a {}x{} patch",
                m, h, w
            )));
        }
        Ok(sample.target.slice(s![.., m..h - m, m..w - m]).to_owned())
    }
}

pub struct MixturePredictor {
    pub stats: Option<MeanStd>,
}

impl Predictor for MixturePredictor {
    fn name(&self) -> &'static str {
        "mixture"
    }

    fn predict(&self, sample: &Sample) -> SplitResult<Array3<f32>> {
        let channels = sample.target.len_of(Axis(0));
        let mixture = sample.input.index_axis(Axis(0), 0);
        let (h, w) = mixture.dim();

        let mut out = Array3::zeros((channels, h, w));
        for (c, mut plane) in out.outer_iter_mut().enumerate() {
            match &self.stats {
                Some(stats) => plane.zip_mut_with(&mixture, |o, &v| *o = stats.denormalize(c, v)),
                None => plane.assign(&mixture),
            }
        }
        Ok(out)
    }
}
