//! Common test fixtures for channel-splitting tests.
//!
//! This module provides pre-defined shapes and tilings that represent
//! common scenarios when splitting frames into patches.

/// Common volume shapes for testing.
pub mod shapes {
    use split_common::DataShape;

    /// Three frames of 128x128 with two channels; splits evenly into 64px quadrants.
    pub const QUADRANTS: DataShape = DataShape {
        frames: 3,
        height: 128,
        width: 128,
        channels: 2,
    };

    /// One 100x100 frame; no grid size that is a power of two divides it.
    pub const NON_DIVISIBLE: DataShape = DataShape {
        frames: 1,
        height: 100,
        width: 100,
        channels: 1,
    };

    /// Rectangular frames exercising different row and column block counts.
    pub const RECTANGULAR: DataShape = DataShape {
        frames: 2,
        height: 40,
        width: 72,
        channels: 2,
    };

    /// Smallest useful volume.
    pub const TINY: DataShape = DataShape {
        frames: 1,
        height: 8,
        width: 8,
        channels: 1,
    };
}

/// Common (grid, patch) tilings for testing.
pub mod tilings {
    /// Patch equals grid cell; no overlap.
    pub const DISJOINT: (usize, usize) = (64, 64);

    /// Patch twice the grid cell; half-patch context on each side.
    pub const DOUBLE_CONTEXT: (usize, usize) = (32, 64);

    /// Small overlap that leaves an odd center offset.
    pub const ODD_OFFSET: (usize, usize) = (16, 22);

    /// All tilings above.
    pub const ALL: [(usize, usize); 3] = [DISJOINT, DOUBLE_CONTEXT, ODD_OFFSET];
}

/// Seeds for reproducible random data.
pub mod seeds {
    pub const DEFAULT: u64 = 42;
    pub const ALTERNATE: u64 = 1234;
}
