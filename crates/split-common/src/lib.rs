//! Common types shared across the channel-splitting workspace.

pub mod error;
pub mod grid;
pub mod location;
pub mod padding;
pub mod split;

pub use error::{SplitError, SplitResult};
pub use grid::{DataShape, GridAlignment, GridSize, TilingMode};
pub use location::{Direction, Location};
pub use padding::PaddingMode;
pub use split::DataSplit;
