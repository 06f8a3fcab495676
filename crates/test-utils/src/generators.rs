//! Test data generators for synthetic microscopy-like volumes.
//!
//! These generators create predictable, verifiable pixel patterns that can
//! be used across the test suite. Volumes are `(T, H, W, C)` unless noted.

use ndarray::{Array4, ArrayView4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use split_common::DataShape;

/// Creates a volume where every element holds its own flat position.
///
/// The value at `(t, row, col, ch)` is `((t * H + row) * W + col) * C + ch`,
/// so any misplaced pixel after crop/stitch is immediately visible.
///
/// # Example
///
/// ```
/// use test_utils::index_ramp_volume;
///
/// let volume = index_ramp_volume((2, 3, 4, 2).into());
/// assert_eq!(volume[[0, 0, 0, 1]], 1.0);
/// assert_eq!(volume[[0, 0, 1, 0]], 2.0);
/// assert_eq!(volume[[1, 0, 0, 0]], 24.0);
/// ```
pub fn index_ramp_volume(shape: DataShape) -> Array4<f32> {
    let (_, height, width, channels) = shape.thwc();
    Array4::from_shape_fn(shape.thwc(), |(t, row, col, ch)| {
        (((t * height + row) * width + col) * channels + ch) as f32
    })
}

/// Creates a volume with one constant value per channel.
pub fn constant_channel_volume(shape: DataShape, values: &[f32]) -> Array4<f32> {
    Array4::from_shape_fn(shape.thwc(), |(_, _, _, ch)| values[ch % values.len().max(1)])
}

/// Creates two structurally distinct channels resembling fluorescence stains.
///
/// Channel 0 holds horizontal stripes, channel 1 a field of random Gaussian
/// spots. Both are non-negative with values roughly in `0..=1000`.
///
/// # Arguments
///
/// * `frames`, `height`, `width` - Volume extent
/// * `seed` - Seed for the spot positions
pub fn two_stain_volume(frames: usize, height: usize, width: usize, seed: u64) -> Array4<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut volume = Array4::zeros((frames, height, width, 2));

    for t in 0..frames {
        let phase = t as f32 * 0.7;
        for row in 0..height {
            let stripe = 500.0 + 400.0 * ((row as f32 * 0.35) + phase).sin();
            for col in 0..width {
                volume[[t, row, col, 0]] = stripe;
            }
        }

        let spots = ((height * width) / 256).max(1);
        for _ in 0..spots {
            let cy = rng.gen_range(0.0..height as f32);
            let cx = rng.gen_range(0.0..width as f32);
            let amplitude = rng.gen_range(200.0..800.0f32);
            let sigma: f32 = 2.5;
            let reach = (3.0 * sigma).ceil() as i64;

            let (cy_i, cx_i) = (cy as i64, cx as i64);
            for row in (cy_i - reach).max(0)..(cy_i + reach + 1).min(height as i64) {
                for col in (cx_i - reach).max(0)..(cx_i + reach + 1).min(width as i64) {
                    let d2 = (row as f32 - cy).powi(2) + (col as f32 - cx).powi(2);
                    let value = amplitude * (-d2 / (2.0 * sigma * sigma)).exp();
                    let cell = &mut volume[[t, row as usize, col as usize, 1]];
                    *cell = (*cell + value).min(1000.0);
                }
            }
        }
    }
    volume
}

/// Creates a `(N, C, P, P)` batch where patch `i` is filled with `i + offset`.
pub fn numbered_patch_batch(count: usize, channels: usize, patch_size: usize, offset: f32) -> Array4<f32> {
    Array4::from_shape_fn((count, channels, patch_size, patch_size), |(i, _, _, _)| i as f32 + offset)
}

/// Reorders a `(T, H, W, C)` volume to `(T, C, H, W)`.
pub fn to_tchw(volume: ArrayView4<f32>) -> Array4<f32> {
    volume.permuted_axes([0, 3, 1, 2]).as_standard_layout().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_ramp_values_are_unique() {
        let volume = index_ramp_volume((2, 5, 7, 3).into());
        let mut values: Vec<f32> = volume.iter().copied().collect();
        values.dedup();
        assert_eq!(values.len(), 2 * 5 * 7 * 3);
        assert_eq!(volume[[1, 4, 6, 2]], (2 * 5 * 7 * 3 - 1) as f32);
    }

    #[test]
    fn test_constant_channel_volume() {
        let volume = constant_channel_volume((1, 2, 2, 2).into(), &[3.0, 9.0]);
        assert_eq!(volume[[0, 1, 1, 0]], 3.0);
        assert_eq!(volume[[0, 0, 1, 1]], 9.0);
    }

    #[test]
    fn test_two_stain_volume_is_deterministic() {
        let a = two_stain_volume(2, 32, 32, 11);
        let b = two_stain_volume(2, 32, 32, 11);
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| (0.0..=1000.0).contains(&v)));
        assert!(a.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_numbered_patch_batch() {
        let batch = numbered_patch_batch(3, 2, 4, 1.0);
        assert_eq!(batch.dim(), (3, 2, 4, 4));
        assert_eq!(batch[[2, 1, 3, 3]], 3.0);
    }

    #[test]
    fn test_to_tchw() {
        let volume = index_ramp_volume((1, 2, 3, 2).into());
        let tchw = to_tchw(volume.view());
        assert_eq!(tchw.dim(), (1, 2, 2, 3));
        assert_eq!(tchw[[0, 1, 1, 2]], volume[[0, 1, 2, 1]]);
    }
}
