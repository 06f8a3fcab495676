//! Assignment of frames to train/val/test splits.

use std::ops::Range;

use ndarray::{Array4, ArrayView4, Axis};
use split_common::{DataSplit, SplitError, SplitResult};

/// Frames of a `total`-frame volume that belong to `split`.
///
/// Training takes `[0, floor((1 - val - test) * total))`, validation the
/// following block up to `floor((1 - test) * total)`, test the rest. With
/// a zero test fraction validation and test share the tail.
pub fn frame_range(
    total: usize,
    split: DataSplit,
    val_fraction: f64,
    test_fraction: f64,
) -> SplitResult<Range<usize>> {
    let boundary = |fraction: f64| ((fraction * total as f64).floor() as usize).min(total);
    let val_start = boundary(1.0 - val_fraction - test_fraction);
    let test_start = if test_fraction > 0.0 {
        boundary(1.0 - test_fraction).max(val_start)
    } else {
        val_start
    };

    let range = match split {
        DataSplit::Train => 0..val_start,
        DataSplit::Val if test_fraction > 0.0 => val_start..test_start,
        DataSplit::Val => val_start..total,
        DataSplit::Test => test_start..total,
    };

    if range.is_empty() {
        return Err(SplitError::invalid_config(format!(
            "{} split of {} frames is empty (val_fraction {}, test_fraction {})",
            split, total, val_fraction, test_fraction
        )));
    }
    Ok(range)
}

/// Copy the frames of `range` out of a `(T, H, W, C)` volume.
pub fn select_frames(volume: ArrayView4<f32>, range: Range<usize>) -> Array4<f32> {
    volume.slice_axis(Axis(0), range.into()).to_owned()
}
