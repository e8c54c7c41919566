//! Seed patterns for the initial simulation state.

use serde::{Deserialize, Serialize};

/// Complete seed specification for simulation initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seed {
    /// Pattern to use for seeding.
    pub pattern: Pattern,
}

impl Default for Seed {
    fn default() -> Self {
        // One blob per channel, offset around the grid center.
        Self {
            pattern: Pattern::MultiBlob {
                blobs: vec![
                    BlobSpec {
                        center: (0.42, 0.46),
                        radius: 0.12,
                        amplitude: 1.0,
                        channel: 0,
                    },
                    BlobSpec {
                        center: (0.58, 0.46),
                        radius: 0.12,
                        amplitude: 1.0,
                        channel: 1,
                    },
                    BlobSpec {
                        center: (0.5, 0.6),
                        radius: 0.12,
                        amplitude: 1.0,
                        channel: 2,
                    },
                ],
            },
        }
    }
}

/// Predefined patterns for initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Pattern {
    /// Single Gaussian blob.
    GaussianBlob {
        /// Center position as fraction of grid size (0.0-1.0).
        center: (f32, f32),
        /// Radius as fraction of grid size.
        radius: f32,
        /// Peak amplitude.
        amplitude: f32,
        /// Target channel.
        channel: usize,
    },
    /// Multiple Gaussian blobs.
    MultiBlob {
        /// List of blob specifications.
        blobs: Vec<BlobSpec>,
    },
    /// Uniform random noise, deterministic in `seed`.
    Noise {
        /// Noise amplitude range [0, amplitude].
        amplitude: f32,
        /// Optional channel (None = all channels).
        channel: Option<usize>,
        /// Random seed.
        seed: u64,
    },
}

/// Specification for a single blob in a MultiBlob pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobSpec {
    pub center: (f32, f32),
    pub radius: f32,
    pub amplitude: f32,
    pub channel: usize,
}

impl Seed {
    /// Generate the initial grid, one flat `width * height` plane per channel.
    pub fn generate(&self, width: usize, height: usize, channels: usize) -> Vec<Vec<f32>> {
        let mut grid = vec![vec![0.0f32; width * height]; channels];

        match &self.pattern {
            Pattern::GaussianBlob {
                center,
                radius,
                amplitude,
                channel,
            } => {
                apply_gaussian(&mut grid, *channel, *center, *radius, *amplitude, width, height);
            }
            Pattern::MultiBlob { blobs } => {
                for blob in blobs {
                    apply_gaussian(
                        &mut grid,
                        blob.channel,
                        blob.center,
                        blob.radius,
                        blob.amplitude,
                        width,
                        height,
                    );
                }
            }
            Pattern::Noise {
                amplitude,
                channel,
                seed,
            } => {
                apply_noise(&mut grid, *channel, *amplitude, *seed, channels);
            }
        }

        grid
    }
}

fn apply_gaussian(
    grid: &mut [Vec<f32>],
    channel: usize,
    center: (f32, f32),
    radius: f32,
    amplitude: f32,
    width: usize,
    height: usize,
) {
    if channel >= grid.len() {
        return;
    }
    let cx = center.0 * width as f32;
    let cy = center.1 * height as f32;
    let r = radius * width.min(height) as f32;
    let sigma_sq = (r / 2.0).powi(2);

    let plane = &mut grid[channel];
    for y in 0..height {
        for x in 0..width {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let dist_sq = dx * dx + dy * dy;
            plane[y * width + x] += amplitude * (-dist_sq / (2.0 * sigma_sq)).exp();
        }
    }
}

fn apply_noise(grid: &mut [Vec<f32>], channel: Option<usize>, amplitude: f32, seed: u64, channels: usize) {
    // Simple LCG PRNG for deterministic noise
    let mut state = seed;
    let mut lcg_next = move || -> f32 {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (state >> 33) as f32 / (1u64 << 31) as f32
    };

    let channel_range = match channel {
        Some(c) => c..c + 1,
        None => 0..channels,
    };

    for c in channel_range {
        if c >= grid.len() {
            continue;
        }
        for cell in grid[c].iter_mut() {
            *cell += amplitude * lcg_next();
        }
    }
}
