//! Configuration types for the simulation and its kernel bank.

use serde::{Deserialize, Serialize};

/// Top-level simulation configuration.
///
/// Grid dimensions, channel count, and kernel radius are fixed for the
/// lifetime of every object built from this configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Grid width in cells.
    pub width: usize,
    /// Grid height in cells.
    pub height: usize,
    /// Number of state channels.
    pub channels: usize,
    /// Time step size.
    pub dt: f32,
    /// Kernel radius in cells; kernel side length is `2 * kernel_radius + 1`.
    pub kernel_radius: usize,
    /// Growth function parameters, shared by all channels.
    pub growth: GrowthConfig,
    /// Per channel-pair kernel profiles. Pairs not listed here get a zero
    /// kernel (no influence between those channels).
    pub kernels: Vec<KernelConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let channels = 3;
        Self {
            width: 512,
            height: 512,
            channels,
            dt: 0.1,
            kernel_radius: 13,
            growth: GrowthConfig::default(),
            kernels: default_kernel_pairs(channels),
        }
    }
}

/// Ring profile for one ordered (source, target) channel pair.
///
/// The kernel weight at normalized distance `d` from the center is a
/// Gaussian bump `exp(-(d - mu)^2 / (2 * sigma^2))`, peaking on the ring
/// `d == mu` rather than at the center.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Source channel index.
    pub source_channel: usize,
    /// Target channel index.
    pub target_channel: usize,
    /// Ring center as a fraction of the kernel radius (0.0-1.0).
    pub mu: f32,
    /// Ring width.
    pub sigma: f32,
}

/// Growth function parameters: `G(u) = 2 * exp(-(u - mu)^2 / (2*sigma^2)) - 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthConfig {
    /// Optimal neighborhood density.
    pub mu: f32,
    /// Activation width.
    pub sigma: f32,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            mu: 0.15,
            sigma: 0.015,
        }
    }
}

/// Default dense pair set: every ordered (source, target) pair gets a ring
/// profile, varied by the channel offset so the three channels couple
/// asymmetrically.
fn default_kernel_pairs(channels: usize) -> Vec<KernelConfig> {
    let mut pairs = Vec::with_capacity(channels * channels);
    for target in 0..channels {
        for source in 0..channels {
            let (mu, sigma) = match (source + channels - target) % channels {
                0 => (0.50, 0.15),
                1 => (0.35, 0.12),
                _ => (0.65, 0.18),
            };
            pairs.push(KernelConfig {
                source_channel: source,
                target_channel: target,
                mu,
                sigma,
            });
        }
    }
    pairs
}

impl SimulationConfig {
    /// Cells per channel plane.
    #[inline]
    pub fn grid_size(&self) -> usize {
        self.width * self.height
    }

    /// Kernel side length in cells (always odd).
    #[inline]
    pub fn kernel_size(&self) -> usize {
        2 * self.kernel_radius + 1
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.channels == 0 {
            return Err(ConfigError::InvalidChannels);
        }
        if self.dt <= 0.0 {
            return Err(ConfigError::InvalidTimeStep);
        }
        if self.kernel_radius == 0 {
            return Err(ConfigError::InvalidKernelRadius);
        }
        if self.kernel_size() > self.width || self.kernel_size() > self.height {
            return Err(ConfigError::KernelLargerThanGrid {
                kernel_size: self.kernel_size(),
            });
        }
        let mut seen = vec![false; self.channels * self.channels];
        for (i, kernel) in self.kernels.iter().enumerate() {
            if kernel.source_channel >= self.channels {
                return Err(ConfigError::InvalidChannelIndex {
                    kernel: i,
                    channel: kernel.source_channel,
                });
            }
            if kernel.target_channel >= self.channels {
                return Err(ConfigError::InvalidChannelIndex {
                    kernel: i,
                    channel: kernel.target_channel,
                });
            }
            let pair = kernel.target_channel * self.channels + kernel.source_channel;
            if seen[pair] {
                return Err(ConfigError::DuplicatePair {
                    source: kernel.source_channel,
                    target: kernel.target_channel,
                });
            }
            seen[pair] = true;
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid dimensions must be non-zero")]
    InvalidDimensions,
    #[error("Channel count must be non-zero")]
    InvalidChannels,
    #[error("Time step must be positive")]
    InvalidTimeStep,
    #[error("Kernel radius must be non-zero")]
    InvalidKernelRadius,
    #[error("Kernel side ({kernel_size}) exceeds a grid dimension")]
    KernelLargerThanGrid { kernel_size: usize },
    #[error("Kernel {kernel} references invalid channel {channel}")]
    InvalidChannelIndex { kernel: usize, channel: usize },
    #[error("Duplicate kernel for channel pair ({source}, {target})")]
    DuplicatePair { source: usize, target: usize },
}
