//! Synthetic two-channel recordings.
//!
//! Stands in for a microscopy recording so the evaluation pipeline can run
//! end to end without a file reader.

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub frames: usize,
    pub height: usize,
    pub width: usize,
    /// Spots per 64x64 area in the second channel.
    pub spot_density: f32,
    /// Half-width of uniform noise added to both channels.
    pub noise: f32,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            frames: 10,
            height: 128,
            width: 128,
            spot_density: 6.0,
            noise: 0.0,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.frames == 0 || self.height == 0 || self.width == 0 {
            return Err("synthetic recording must have at least one frame and pixel".to_string());
        }
        if !self.noise.is_finite() || self.noise < 0.0 {
            return Err(format!("noise must be a finite non-negative value, got {}", self.noise));
        }
        Ok(())
    }

    /// `(T, H, W, 2)` recording: channel 0 holds diagonal ridges, channel 1
    /// Gaussian spots. Values are non-negative.
    pub fn generate(&self) -> Array4<f32> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let (frames, height, width) = (self.frames, self.height, self.width);
        let mut volume = Array4::zeros((frames, height, width, 2));

        let spots = ((self.spot_density * (height * width) as f32 / 4096.0).round() as usize).max(1);
        let sigma = 3.0f32;
        let reach = (3.0 * sigma).ceil() as i64;

        for t in 0..frames {
            let phase = t as f32 * 0.4;
            for row in 0..height {
                for col in 0..width {
                    let u = (row + col) as f32 * 0.12 + phase;
                    volume[[t, row, col, 0]] = 300.0 + 250.0 * u.sin();
                }
            }

            for _ in 0..spots {
                let cy = rng.gen_range(0.0..height as f32);
                let cx = rng.gen_range(0.0..width as f32);
                let amplitude = rng.gen_range(300.0..900.0f32);
                let (cy_i, cx_i) = (cy as i64, cx as i64);
                for row in (cy_i - reach).max(0)..(cy_i + reach + 1).min(height as i64) {
                    for col in (cx_i - reach).max(0)..(cx_i + reach + 1).min(width as i64) {
                        let d2 = (row as f32 - cy).powi(2) + (col as f32 - cx).powi(2);
                        volume[[t, row as usize, col as usize, 1]] +=
                            amplitude * (-d2 / (2.0 * sigma * sigma)).exp();
                    }
                }
            }
        }

        if self.noise > 0.0 {
            let noise = self.noise;
            volume.mapv_inplace(|v| (v + rng.gen_range(-noise..=noise)).max(0.0));
        }
        volume
    }
}
