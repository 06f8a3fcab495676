//! Multi-scale ("lateral context") inputs.
//!
//! Level 0 is the patch itself. Level `k` covers a window `2^k` times wider
//! centered on the same pixels, reduced back to the patch size, so the model
//! sees progressively coarser surroundings of the same location.

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use split_common::{Location, PaddingMode, SplitError, SplitResult};

use crate::crop::crop_2d;

/// Method used to reduce a 2x2 block to one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownsampleMethod {
    /// Average of the block
    #[default]
    Mean,
    /// Maximum of the block
    Max,
    /// Top-left value of the block
    Nearest,
}

/// Downsample a 2D array by a factor of 2.
///
/// Odd trailing rows/columns are dropped. NaN inputs are ignored by the
/// mean and max reducers; a block of only NaN stays NaN.
pub fn downsample_2x(data: ArrayView2<f32>, method: DownsampleMethod) -> Array2<f32> {
    let (height, width) = data.dim();
    let (new_height, new_width) = (height / 2, width / 2);

    Array2::from_shape_fn((new_height, new_width), |(out_y, out_x)| {
        let (in_y, in_x) = (out_y * 2, out_x * 2);
        let block = [
            data[[in_y, in_x]],
            data[[in_y, in_x + 1]],
            data[[in_y + 1, in_x]],
            data[[in_y + 1, in_x + 1]],
        ];
        match method {
            DownsampleMethod::Mean => mean_of_block(&block),
            DownsampleMethod::Max => max_of_block(&block),
            DownsampleMethod::Nearest => block[0],
        }
    })
}

#[inline]
fn mean_of_block(values: &[f32; 4]) -> f32 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0f32, 0usize), |(s, n), &v| (s + v, n + 1));
    if count == 0 {
        f32::NAN
    } else {
        sum / count as f32
    }
}

#[inline]
fn max_of_block(values: &[f32; 4]) -> f32 {
    values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(None, |acc: Option<f32>, &v| Some(acc.map_or(v, |m| m.max(v))))
        .unwrap_or(f32::NAN)
}

/// Build a `(levels, patch, patch)` lateral-context stack around `location`.
pub fn lateral_context_stack(
    frame: ArrayView2<f32>,
    location: Location,
    patch_size: usize,
    levels: usize,
    padding: PaddingMode,
    method: DownsampleMethod,
) -> SplitResult<Array3<f32>> {
    if levels == 0 {
        return Err(SplitError::invalid_config("multiscale level count must be >= 1"));
    }
    if levels > 1 && patch_size % 2 != 0 {
        return Err(SplitError::invalid_config(format!(
            "multiscale inputs need an even patch size, got {}",
            patch_size
        )));
    }

    let mut stack = Array3::zeros((levels, patch_size, patch_size));
    for level in 0..levels {
        let scale = 1usize << level;
        let window = patch_size * scale;
        let margin = ((window - patch_size) / 2) as i64;

        let mut view = crop_2d(
            frame,
            location.row - margin,
            location.col - margin,
            window,
            padding,
        );
        for _ in 0..level {
            view = downsample_2x(view.view(), method);
        }
        stack.index_axis_mut(Axis(0), level).assign(&view);
    }
    Ok(stack)
}
