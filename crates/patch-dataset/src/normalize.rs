//! Data statistics: quantile clipping and normalisation parameters.

use ndarray::{Array4, ArrayView4, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use split_common::{SplitError, SplitResult};

use crate::config::NormalizationMode;

/// Per-channel normalisation statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanStd {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl MeanStd {
    pub fn identity(channels: usize) -> Self {
        Self {
            mean: vec![0.0; channels],
            std: vec![1.0; channels],
        }
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    /// `(v - mean[c]) / std[c]`; a zero std leaves the value centred only.
    #[inline]
    pub fn normalize(&self, channel: usize, value: f32) -> f32 {
        let std = self.std[channel];
        let centred = value - self.mean[channel];
        if std > 0.0 {
            centred / std
        } else {
            centred
        }
    }

    /// Inverse of [`normalize`](Self::normalize).
    #[inline]
    pub fn denormalize(&self, channel: usize, value: f32) -> f32 {
        let std = self.std[channel];
        if std > 0.0 {
            value * std + self.mean[channel]
        } else {
            value + self.mean[channel]
        }
    }
}

/// Population mean and standard deviation, accumulated in f64.
fn moments<'a>(values: impl Iterator<Item = &'a f32>) -> (f32, f32) {
    let (n, sum, sum_sq) = values.fold((0usize, 0.0f64, 0.0f64), |(n, s, sq), &v| {
        let v = v as f64;
        (n + 1, s + v, sq + v * v)
    });
    if n == 0 {
        return (0.0, 1.0);
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    (mean as f32, var.sqrt() as f32)
}

/// Statistics of a `(T, H, W, C)` volume under `mode`.
pub fn compute_mean_std(data: ArrayView4<f32>, mode: NormalizationMode) -> MeanStd {
    let channels = data.len_of(Axis(3));
    match mode {
        NormalizationMode::Identity => MeanStd::identity(channels),
        NormalizationMode::Shared => {
            let (mean, std) = moments(data.iter());
            MeanStd {
                mean: vec![mean; channels],
                std: vec![std; channels],
            }
        }
        NormalizationMode::PerChannel => {
            let (mean, std) = (0..channels)
                .into_par_iter()
                .map(|c| moments(data.index_axis(Axis(3), c).iter()))
                .unzip();
            MeanStd { mean, std }
        }
    }
}

/// Value at quantile `q` with linear interpolation between order statistics.
pub fn compute_max_val(data: ArrayView4<f32>, q: f64) -> SplitResult<f32> {
    if !(0.0..=1.0).contains(&q) {
        return Err(SplitError::invalid_config(format!("quantile must be within [0, 1], got {}", q)));
    }
    let mut values: Vec<f32> = data.iter().copied().filter(|v| !v.is_nan()).collect();
    if values.is_empty() {
        return Err(SplitError::invalid_config("cannot take a quantile of empty data"));
    }

    let pos = q * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let frac = (pos - lo as f64) as f32;

    let (_, &mut lo_val, upper) = values.select_nth_unstable_by(lo, f32::total_cmp);
    let hi_val = upper.iter().copied().fold(f32::INFINITY, f32::min);
    if frac == 0.0 || upper.is_empty() {
        return Ok(lo_val);
    }
    Ok(lo_val + (hi_val - lo_val) * frac)
}

/// Clamp every value above `max_val` in place.
pub fn upperclip_data(data: &mut Array4<f32>, max_val: f32) {
    data.mapv_inplace(|v| if v > max_val { max_val } else { v });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_per_channel_and_shared() {
        let data = Array::from_shape_fn((2, 2, 2, 2), |(_, _, _, c)| if c == 0 { 1.0 } else { 3.0 });

        let per = compute_mean_std(data.view(), NormalizationMode::PerChannel);
        assert_eq!(per.mean, vec![1.0, 3.0]);
        assert_eq!(per.std, vec![0.0, 0.0]);

        let shared = compute_mean_std(data.view(), NormalizationMode::Shared);
        assert_eq!(shared.mean, vec![2.0, 2.0]);
        assert!((shared.std[0] - 1.0).abs() < 1e-6);

        let identity = compute_mean_std(data.view(), NormalizationMode::Identity);
        assert_eq!(identity, MeanStd::identity(2));
    }

    #[test]
    fn test_normalize_round_trip() {
        let stats = MeanStd {
            mean: vec![10.0],
            std: vec![4.0],
        };
        assert_eq!(stats.normalize(0, 18.0), 2.0);
        assert_eq!(stats.denormalize(0, 2.0), 18.0);
    }

    #[test]
    fn test_quantile_matches_linear_interpolation() {
        // 0..=100, q=0.995 sits between 99 and 100
        let data = Array::from_shape_vec((1, 1, 101, 1), (0..=100).rev().map(|v| v as f32).collect()).unwrap();
        let q = compute_max_val(data.view(), 0.995).unwrap();
        assert!((q - 99.5).abs() < 1e-4);
        assert_eq!(compute_max_val(data.view(), 1.0).unwrap(), 100.0);
        assert_eq!(compute_max_val(data.view(), 0.0).unwrap(), 0.0);
        assert!(compute_max_val(data.view(), 1.5).is_err());
    }

    #[test]
    fn test_upperclip() {
        let mut data = Array::from_shape_vec((1, 1, 4, 1), vec![1.0, 5.0, 9.0, 3.0]).unwrap();
        upperclip_data(&mut data, 4.0);
        assert_eq!(data.iter().copied().collect::<Vec<_>>(), vec![1.0, 4.0, 4.0, 3.0]);
    }
}
