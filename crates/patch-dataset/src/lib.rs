//! Patch datasets for channel splitting.
//!
//! A dataset holds the frames of one split, cuts `(C, P, P)` targets at the
//! locations its [`patch_grid::GridIndexManager`] assigns, and mixes them
//! into the model input. Indices are the same flat indices the stitcher
//! consumes, so predictions can be reassembled without extra bookkeeping.

pub mod augment;
pub mod config;
pub mod dataset;
pub mod frames;
pub mod normalize;

pub use augment::Augmentation;
pub use config::{DatasetConfig, DatasetKind, NormalizationMode};
pub use dataset::{create_dataset, PatchDataset, Sample};
pub use frames::{frame_range, select_frames};
pub use normalize::{compute_max_val, compute_mean_std, upperclip_data, MeanStd};
