//! Reconstruction quality metrics over stitched volumes.

use ndarray::{s, ArrayView2, ArrayView4, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Mean and standard error of the mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanStdErr {
    pub mean: f64,
    pub stderr: f64,
}

impl std::fmt::Display for MeanStdErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}+-{:.3}", self.mean, self.stderr)
    }
}

/// Scores for one channel, aggregated over frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelScore {
    pub channel: usize,
    pub psnr: MeanStdErr,
    pub range_invariant_psnr: MeanStdErr,
}

/// `std / sqrt(n)` with the population standard deviation.
pub fn mean_stderr(values: &[f64]) -> MeanStdErr {
    if values.is_empty() {
        return MeanStdErr {
            mean: f64::NAN,
            stderr: f64::NAN,
        };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    MeanStdErr {
        mean,
        stderr: var.sqrt() / n.sqrt(),
    }
}

fn mse(gt: impl Iterator<Item = f64>, pred: impl Iterator<Item = f64>) -> f64 {
    let (n, sum) = gt
        .zip(pred)
        .fold((0usize, 0.0f64), |(n, s), (g, p)| (n + 1, s + (g - p).powi(2)));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn psnr_from_mse(mse: f64, data_range: f64) -> f64 {
    if mse == 0.0 {
        return f64::INFINITY;
    }
    20.0 * data_range.log10() - 10.0 * mse.log10()
}

/// PSNR with the data range taken from the ground truth.
pub fn psnr(gt: ArrayView2<f32>, pred: ArrayView2<f32>) -> f64 {
    let (min, max) = gt
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let data_range = (max - min) as f64;
    let err = mse(gt.iter().map(|&v| v as f64), pred.iter().map(|&v| v as f64));
    psnr_from_mse(err, data_range)
}

/// PSNR after standardising the ground truth and fitting the prediction to
/// it with a least-squares scale, so offsets and gains are not penalised.
pub fn range_invariant_psnr(gt: ArrayView2<f32>, pred: ArrayView2<f32>) -> f64 {
    let n = gt.len() as f64;
    if n == 0.0 {
        return f64::NAN;
    }
    let gt_mean = gt.iter().map(|&v| v as f64).sum::<f64>() / n;
    let gt_std = (gt.iter().map(|&v| (v as f64 - gt_mean).powi(2)).sum::<f64>() / n).sqrt();
    if gt_std == 0.0 {
        return f64::NAN;
    }
    let (min, max) = gt
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let data_range = (max - min) as f64 / gt_std;

    let pred_mean = pred.iter().map(|&v| v as f64).sum::<f64>() / n;
    let gt_n: Vec<f64> = gt.iter().map(|&v| (v as f64 - gt_mean) / gt_std).collect();
    let pred_c: Vec<f64> = pred.iter().map(|&v| v as f64 - pred_mean).collect();

    let num: f64 = gt_n.iter().zip(&pred_c).map(|(g, p)| g * p).sum();
    let den: f64 = pred_c.iter().map(|p| p * p).sum();
    let scale = if den == 0.0 { 0.0 } else { num / den };

    let err = mse(gt_n.iter().copied(), pred_c.iter().map(|p| p * scale));
    psnr_from_mse(err, data_range)
}

/// Drop the last `k` rows and columns of a `(T, H, W, C)` volume.
pub fn ignore_last_pixels(volume: ArrayView4<f32>, k: usize) -> ArrayView4<f32> {
    if k == 0 {
        return volume;
    }
    let (_, h, w, _) = volume.dim();
    volume.slice_move(s![.., ..h.saturating_sub(k), ..w.saturating_sub(k), ..])
}

/// Per-channel PSNR and range-invariant PSNR over frames.
pub fn channel_scores(gt: ArrayView4<f32>, pred: ArrayView4<f32>) -> Vec<ChannelScore> {
    let channels = gt.len_of(Axis(3)).min(pred.len_of(Axis(3)));
    (0..channels)
        .into_par_iter()
        .map(|c| {
            let (plain, invariant): (Vec<f64>, Vec<f64>) = gt
                .outer_iter()
                .zip(pred.outer_iter())
                .map(|(g, p)| {
                    let (g, p) = (g.index_axis_move(Axis(2), c), p.index_axis_move(Axis(2), c));
                    (psnr(g, p), range_invariant_psnr(g, p))
                })
                .unzip();
            ChannelScore {
                channel: c,
                psnr: mean_stderr(&plain),
                range_invariant_psnr: mean_stderr(&invariant),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array4};

    #[test]
    fn test_mean_stderr() {
        let stats = mean_stderr(&[1.0, 3.0]);
        assert_eq!(stats.mean, 2.0);
        assert!((stats.stderr - 1.0 / 2f64.sqrt()).abs() < 1e-12);
        assert!(mean_stderr(&[]).mean.is_nan());
    }

    #[test]
    fn test_psnr_known_value() {
        let gt = Array2::from_shape_vec((1, 2), vec![0.0f32, 10.0]).unwrap();
        let pred = Array2::from_shape_vec((1, 2), vec![1.0f32, 9.0]).unwrap();
        // range 10, mse 1 -> 20 dB
        assert!((psnr(gt.view(), pred.view()) - 20.0).abs() < 1e-9);
        assert!(psnr(gt.view(), gt.view()).is_infinite());
    }

    #[test]
    fn test_range_invariant_ignores_affine_changes() {
        let gt = Array2::from_shape_fn((8, 8), |(r, c)| (r * 8 + c) as f32);
        let pred = gt.mapv(|v| 3.0 * v + 50.0);
        assert!(range_invariant_psnr(gt.view(), pred.view()) > 100.0);
        assert!(psnr(gt.view(), pred.view()) < 10.0);
    }

    #[test]
    fn test_ignore_last_pixels() {
        let volume = Array4::<f32>::zeros((2, 10, 12, 2));
        assert_eq!(ignore_last_pixels(volume.view(), 3).dim(), (2, 7, 9, 2));
        assert_eq!(ignore_last_pixels(volume.view(), 0).dim(), (2, 10, 12, 2));
    }

    #[test]
    fn test_channel_scores() {
        let gt = Array4::from_shape_fn((3, 4, 4, 2), |(t, r, c, ch)| (t + r * 4 + c + ch * 7) as f32);
        let mut pred = gt.clone();
        pred.slice_mut(s![.., .., .., 1]).mapv_inplace(|v| v + 1.0);

        let scores = channel_scores(gt.view(), pred.view());
        assert_eq!(scores.len(), 2);
        assert!(scores[0].psnr.mean.is_infinite());
        assert!(scores[1].psnr.mean.is_finite());
        assert_eq!(scores[1].channel, 1);
    }
}
