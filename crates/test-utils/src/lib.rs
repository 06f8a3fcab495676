//! Shared test utilities for the channel-splitting workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic volume generators with verifiable pixel values
//! - Common data shapes and tiling fixtures
//! - Approximate-equality assertions for floats and arrays
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, index_ramp_volume};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Element-wise approximate equality of two arrays of the same shape.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_arrays_approx_eq;
///
/// assert_arrays_approx_eq!(stitched, expected, 1e-6);
/// ```
#[macro_export]
macro_rules! assert_arrays_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left = &$left;
        let right = &$right;
        assert_eq!(left.shape(), right.shape(), "array shapes differ");
        let epsilon: f64 = $epsilon as f64;
        for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
            let diff = (*l as f64 - *r as f64).abs();
            if diff > epsilon {
                panic!(
                    "assertion failed: arrays differ at flat position {}\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                    i, l, r, diff, epsilon
                );
            }
        }
    }};
}
