//! Grayscale PNG dumps of accumulation buffers for visual inspection.

use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma};
use ndarray::{ArrayView2, ArrayView3, Axis};
use split_common::{SplitError, SplitResult};
use tracing::debug;

/// Bit depth chosen for a dumped plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpDepth {
    Eight,
    Sixteen,
}

impl DumpDepth {
    /// Smallest depth that holds every value without clipping (negative
    /// values always clip to zero).
    pub fn for_plane(plane: ArrayView2<f32>) -> Self {
        let max = plane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if max > u8::MAX as f32 {
            DumpDepth::Sixteen
        } else {
            DumpDepth::Eight
        }
    }
}

/// Per-channel statistic, broadcasting a single value to every channel.
fn channel_stat(values: &[f32], channel: usize, name: &str) -> SplitResult<f32> {
    match values {
        [v] => Ok(*v),
        _ => values.get(channel).copied().ok_or_else(|| {
            SplitError::shape_mismatch(
                format!("{} with one value or one per channel", name),
                format!("{} values for channel {}", values.len(), channel),
            )
        }),
    }
}

fn save_plane(plane: ArrayView2<f32>, path: &Path) -> SplitResult<()> {
    let (height, width) = plane.dim();
    // row-major iteration regardless of the view's strides
    let pixels = plane.iter().map(|v| v.round());

    match DumpDepth::for_plane(plane) {
        DumpDepth::Eight => {
            let raw: Vec<u8> = pixels.map(|v| v.clamp(0.0, u8::MAX as f32) as u8).collect();
            ImageBuffer::<Luma<u8>, _>::from_raw(width as u32, height as u32, raw)
                .ok_or_else(|| SplitError::Image(format!("bad buffer for {}x{} plane", width, height)))?
                .save(path)?;
        }
        DumpDepth::Sixteen => {
            let raw: Vec<u16> = pixels.map(|v| v.clamp(0.0, u16::MAX as f32) as u16).collect();
            ImageBuffer::<Luma<u16>, _>::from_raw(width as u32, height as u32, raw)
                .ok_or_else(|| SplitError::Image(format!("bad buffer for {}x{} plane", width, height)))?
                .save(path)?;
        }
    }
    Ok(())
}

/// Write each channel of a `(C, H, W)` array as `{stem}_Ch{c}.png`.
///
/// Values are de-normalised with `v * std + mean` before quantisation.
pub fn write_channel_planes(
    planes: ArrayView3<f32>,
    mean: &[f32],
    std: &[f32],
    dir: &Path,
    stem: &str,
) -> SplitResult<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(planes.len_of(Axis(0)));
    for (channel, plane) in planes.outer_iter().enumerate() {
        let mean = channel_stat(mean, channel, "mean")?;
        let std = channel_stat(std, channel, "std")?;
        let restored = plane.mapv(|v| v * std + mean);

        let path = dir.join(format!("{}_Ch{}.png", stem, channel));
        save_plane(restored.view(), &path)?;
        debug!(path = %path.display(), channel, "Dumped buffer plane");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_depth_selection() {
        let low = ndarray::Array2::from_elem((2, 2), 200.0f32);
        assert_eq!(DumpDepth::for_plane(low.view()), DumpDepth::Eight);
        let high = ndarray::Array2::from_elem((2, 2), 1200.0f32);
        assert_eq!(DumpDepth::for_plane(high.view()), DumpDepth::Sixteen);
    }

    #[test]
    fn test_write_channel_planes() {
        let dir = tempfile::tempdir().unwrap();
        let planes = Array3::from_shape_fn((2, 4, 6), |(c, r, col)| (c * 10 + r + col) as f32);

        let paths = write_channel_planes(planes.view(), &[100.0], &[2.0, 30.0], dir.path(), "T0_Dfac1_Epoch3").unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("T0_Dfac1_Epoch3_Ch0.png"));
        assert!(paths[1].ends_with("T0_Dfac1_Epoch3_Ch1.png"));

        let ch0 = image::open(&paths[0]).unwrap();
        assert_eq!((ch0.width(), ch0.height()), (6, 4));
        // channel 1 reaches 100 + 18 * 30 > 255, stored as 16-bit
        let ch1 = image::open(&paths[1]).unwrap();
        assert!(matches!(ch1, image::DynamicImage::ImageLuma16(_)));
    }

    #[test]
    fn test_stat_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let planes = Array3::<f32>::zeros((3, 2, 2));
        let result = write_channel_planes(planes.view(), &[0.0, 0.0], &[1.0], dir.path(), "x");
        assert!(matches!(result, Err(SplitError::ShapeMismatch { .. })));
    }
}
