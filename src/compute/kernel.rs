//! Kernel bank generation.
//!
//! Kernels are Gaussian rings: the weight peaks at a configurable distance
//! from the center rather than at the center itself.

use crate::schema::SimulationConfig;

/// Precomputed convolution weights for every ordered channel pair.
///
/// Weights are stored as one dense `[target][source][ky][kx]` tensor so the
/// whole bank can be uploaded to the GPU in a single buffer. Built once at
/// construction; immutable afterwards.
#[derive(Debug, Clone)]
pub struct KernelBank {
    weights: Vec<f32>,
    size: usize,
    channels: usize,
}

impl KernelBank {
    /// Build the full channel-pair kernel set from configuration.
    ///
    /// Each configured pair gets a ring profile deterministic in its
    /// `(mu, sigma)` and the kernel radius; unconfigured pairs stay zero.
    /// All kernels feeding one target channel are normalized together so
    /// their total weight sums to 1, keeping the influence of a uniform
    /// unit state equal to 1 regardless of channel count.
    pub fn build(config: &SimulationConfig) -> Self {
        let size = config.kernel_size();
        let channels = config.channels;
        let mut weights = vec![0.0f32; channels * channels * size * size];

        for kernel in &config.kernels {
            let base = (kernel.target_channel * channels + kernel.source_channel) * size * size;
            fill_ring_profile(
                &mut weights[base..base + size * size],
                size,
                kernel.mu,
                kernel.sigma,
            );
        }

        // Normalize per target channel across all of its source kernels.
        for target in 0..channels {
            let start = target * channels * size * size;
            let end = start + channels * size * size;
            let sum: f32 = weights[start..end].iter().sum();
            if sum > 0.0 {
                let inv_sum = 1.0 / sum;
                for w in &mut weights[start..end] {
                    *w *= inv_sum;
                }
            }
        }

        Self {
            weights,
            size,
            channels,
        }
    }

    /// Kernel side length in cells.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of channels the bank was built for.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The dense `[target][source][ky][kx]` weight tensor.
    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Weights for one ordered (source, target) pair, row-major.
    pub fn pair(&self, source: usize, target: usize) -> &[f32] {
        let base = (target * self.channels + source) * self.size * self.size;
        &self.weights[base..base + self.size * self.size]
    }
}

/// Fill `out` (a `size * size` square) with the ring profile
/// `exp(-(d - mu)^2 / (2 * sigma^2))`, where `d` is the distance from the
/// kernel center normalized to the radius. Cells outside the unit disc
/// stay zero.
fn fill_ring_profile(out: &mut [f32], size: usize, mu: f32, sigma: f32) {
    let radius = (size / 2) as f32;
    let sigma_sq_2 = 2.0 * sigma * sigma;

    for y in 0..size {
        for x in 0..size {
            let dx = x as f32 - radius;
            let dy = y as f32 - radius;
            let norm_dist = (dx * dx + dy * dy).sqrt() / radius;
            if norm_dist > 1.0 {
                continue;
            }
            let diff = norm_dist - mu;
            out[y * size + x] = (-diff * diff / sigma_sq_2).exp();
        }
    }
}
