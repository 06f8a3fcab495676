//! Channel-splitting evaluation service.
//!
//! ```text
//!   recording (T, H, W, C)
//!        │
//!        ▼
//!   PatchDataset ──► Predictor ──► StitchEngine ──► metrics ──► EvalReport
//!        │                               ▲
//!        └──── GridIndexRegistry ────────┘
//!                        │
//!                        ▼
//!          SolutionRunningAverageManager (optional, per worker, merged)
//! ```

pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod predictor;
pub mod synthetic;

pub use config::{expand_env_vars, AccumulationConfig, EvalConfig};
pub use metrics::{channel_scores, mean_stderr, psnr, range_invariant_psnr, ChannelScore, MeanStdErr};
pub use pipeline::{AccumulationReport, EvalPipeline, EvalReport, SplitReport};
pub use predictor::{MixturePredictor, OraclePredictor, Predictor, PredictorKind, UndersizedOracle};
pub use synthetic::SyntheticConfig;
