//! CPU reference stepper.
//!
//! Mirrors the GPU pipeline's semantics exactly (zero-padded dense
//! convolution, growth update, clamp) at grid sizes where an O(N * K^2)
//! host loop is affordable. The GPU tests compare against this
//! implementation; it is also usable on its own for headless runs.

use crate::schema::{Seed, SimulationConfig};

use super::{KernelBank, growth};

/// Host-side simulation state: one flat `width * height` plane per channel.
pub struct ReferenceState {
    /// Per-channel activation grids `[channel][y * width + x]`.
    pub channels: Vec<Vec<f32>>,
    /// Grid width in cells.
    pub width: usize,
    /// Grid height in cells.
    pub height: usize,
    /// Step count.
    pub step: u64,
}

impl ReferenceState {
    /// Create new state from a seed.
    pub fn from_seed(seed: &Seed, config: &SimulationConfig) -> Self {
        Self {
            channels: seed.generate(config.width, config.height, config.channels),
            width: config.width,
            height: config.height,
            step: 0,
        }
    }

    /// Value at (x, y) in `channel`.
    #[inline]
    pub fn get(&self, x: usize, y: usize, channel: usize) -> f32 {
        self.channels[channel][y * self.width + x]
    }

    /// Total mass across all channels.
    pub fn total_mass(&self) -> f32 {
        self.channels.iter().flatten().sum()
    }
}

/// CPU twin of the GPU simulation pipeline.
pub struct ReferencePipeline {
    config: SimulationConfig,
    bank: KernelBank,
    influence: Vec<Vec<f32>>,
}

impl ReferencePipeline {
    /// Create a reference pipeline; builds its own kernel bank.
    pub fn new(config: SimulationConfig) -> Self {
        let bank = KernelBank::build(&config);
        let influence = vec![vec![0.0f32; config.grid_size()]; config.channels];
        Self {
            config,
            bank,
            influence,
        }
    }

    /// Perform one simulation step with the configured growth bump.
    pub fn step(&mut self, state: &mut ReferenceState) {
        let mu = self.config.growth.mu;
        let sigma = self.config.growth.sigma;
        self.step_with(state, |u| growth(u, mu, sigma));
    }

    /// Perform one step with an arbitrary growth function.
    ///
    /// Lets tests substitute e.g. the identity for `G` to check the update
    /// rule in isolation.
    pub fn step_with(&mut self, state: &mut ReferenceState, growth_fn: impl Fn(f32) -> f32) {
        convolve_into(
            &state.channels,
            &self.bank,
            self.config.width,
            self.config.height,
            &mut self.influence,
        );

        let dt = self.config.dt;
        for (plane, influence) in state.channels.iter_mut().zip(self.influence.iter()) {
            for (s, &u) in plane.iter_mut().zip(influence.iter()) {
                *s = (*s + dt * growth_fn(u)).clamp(0.0, 1.0);
            }
        }

        state.step += 1;
    }

    /// The kernel bank this pipeline convolves with.
    pub fn bank(&self) -> &KernelBank {
        &self.bank
    }
}

/// Dense forward convolution of all channels against the bank, zero-padded
/// so output spatial size equals input size.
///
/// `influence[target]` receives the sum over all source channels of the
/// source plane convolved with that (source, target) kernel.
pub fn convolve_into(
    channels: &[Vec<f32>],
    bank: &KernelBank,
    width: usize,
    height: usize,
    influence: &mut [Vec<f32>],
) {
    let k_size = bank.size();
    let k_half = (k_size / 2) as i32;

    for (target, out_plane) in influence.iter_mut().enumerate() {
        out_plane.fill(0.0);

        for (source, in_plane) in channels.iter().enumerate() {
            let kernel = bank.pair(source, target);

            for y in 0..height {
                for x in 0..width {
                    let mut sum = 0.0f32;
                    for ky in 0..k_size {
                        let sy = y as i32 + ky as i32 - k_half;
                        if sy < 0 || sy >= height as i32 {
                            continue;
                        }
                        for kx in 0..k_size {
                            let sx = x as i32 + kx as i32 - k_half;
                            if sx < 0 || sx >= width as i32 {
                                continue;
                            }
                            let w = kernel[ky * k_size + kx];
                            if w == 0.0 {
                                continue;
                            }
                            sum += w * in_plane[sy as usize * width + sx as usize];
                        }
                    }
                    out_plane[y * width + x] += sum;
                }
            }
        }
    }
}
