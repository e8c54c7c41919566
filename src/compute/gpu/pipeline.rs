//! Simulation pipeline.
//!
//! Owns the device-resident state and runs one full step as a fixed
//! three-stage sequence (convolution, update, colorize) recorded into a
//! single command submission. All pipelines, bind groups, and uniforms
//! are created once at construction; the only thing that varies between
//! steps is which output buffer the colorize stage writes, and the bind
//! groups for all possible destinations are prebuilt too, so a step just
//! selects one.

use crate::compute::KernelBank;
use crate::schema::{Seed, SimulationConfig};

use super::{ConvolutionStage, GpuContext};

const UPDATE_SHADER: &str = include_str!("shaders/update.wgsl");
const COLORIZE_SHADER: &str = include_str!("shaders/colorize.wgsl");

/// Floats per colorize output record: vec2 position + vec3 color.
const VERTEX_FLOATS: usize = 5;

/// Uniform buffer struct for the update shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct UpdateParams {
    width: u32,
    height: u32,
    channels: u32,
    _pad: u32,
    dt: f32,
    growth_mu: f32,
    growth_sigma: f32,
    _pad1: f32,
}

/// Uniform buffer struct for the colorize shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ColorParams {
    width: u32,
    height: u32,
    channels: u32,
    _pad: u32,
}

/// One-step-at-a-time GPU simulation of the multi-channel automaton.
///
/// Steps are single-flight: [`step`](Self::step) takes `&mut self`, so a
/// second call cannot be issued while a prior one is executing on the
/// same instance. Output buffer contents are undefined until the first
/// completed step that targeted them.
pub struct SimulationPipeline {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
    channels: u32,
    workgroups: (u32, u32),

    convolution: ConvolutionStage,
    update_pipeline: wgpu::ComputePipeline,
    update_bind_group: wgpu::BindGroup,
    colorize_pipeline: wgpu::ComputePipeline,
    // One destination bind group per output buffer, prebuilt; stepping
    // only picks one.
    colorize_bind_groups: Vec<wgpu::BindGroup>,

    state_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,

    step_count: u64,
}

impl SimulationPipeline {
    /// Build the full step pipeline writing into one of `targets`.
    ///
    /// Uploads the seeded initial state and the kernel bank, compiles all
    /// three stages, and autotunes the convolution variant. `targets`
    /// must be `STORAGE`-usable buffers of `width * height` vertex
    /// records each.
    pub fn new(
        ctx: &GpuContext,
        config: &SimulationConfig,
        seed: &Seed,
        targets: &[wgpu::Buffer],
    ) -> Self {
        debug_assert!(!targets.is_empty());
        let device = &ctx.device;

        let grid_size = config.grid_size();
        let state_size = (grid_size * config.channels * std::mem::size_of::<f32>()) as u64;
        let vertex_size = (grid_size * VERTEX_FLOATS * std::mem::size_of::<f32>()) as u64;

        let state_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("State Buffer"),
            size: state_size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        // Written by the convolution stage, read by the update stage.
        let influence_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Influence Buffer"),
            size: state_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: state_size.max(vertex_size),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bank = KernelBank::build(config);
        let weights_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Kernel Weights Buffer"),
            size: (bank.weights().len() * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ctx.queue
            .write_buffer(&weights_buffer, 0, bytemuck::cast_slice(bank.weights()));

        let initial: Vec<f32> = seed
            .generate(config.width, config.height, config.channels)
            .into_iter()
            .flatten()
            .collect();
        ctx.queue
            .write_buffer(&state_buffer, 0, bytemuck::cast_slice(&initial));

        let update_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Update Shader"),
            source: wgpu::ShaderSource::Wgsl(UPDATE_SHADER.into()),
        });
        let colorize_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Colorize Shader"),
            source: wgpu::ShaderSource::Wgsl(COLORIZE_SHADER.into()),
        });

        let update_bind_group_layout = create_update_bind_group_layout(device);
        let update_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Update Pipeline Layout"),
                bind_group_layouts: &[&update_bind_group_layout],
                ..Default::default()
            });
        let update_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Update Pipeline"),
            layout: Some(&update_pipeline_layout),
            module: &update_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let colorize_bind_group_layout = create_colorize_bind_group_layout(device);
        let colorize_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Colorize Pipeline Layout"),
                bind_group_layouts: &[&colorize_bind_group_layout],
                ..Default::default()
            });
        let colorize_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Colorize Pipeline"),
            layout: Some(&colorize_pipeline_layout),
            module: &colorize_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let update_params = UpdateParams {
            width: config.width as u32,
            height: config.height as u32,
            channels: config.channels as u32,
            _pad: 0,
            dt: config.dt,
            growth_mu: config.growth.mu,
            growth_sigma: config.growth.sigma,
            _pad1: 0.0,
        };
        let update_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Update Params"),
            size: std::mem::size_of::<UpdateParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ctx.queue
            .write_buffer(&update_params_buffer, 0, bytemuck::bytes_of(&update_params));

        let update_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Update Bind Group"),
            layout: &update_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: update_params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: state_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: influence_buffer.as_entire_binding(),
                },
            ],
        });

        let color_params = ColorParams {
            width: config.width as u32,
            height: config.height as u32,
            channels: config.channels as u32,
            _pad: 0,
        };
        let color_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Color Params"),
            size: std::mem::size_of::<ColorParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ctx.queue
            .write_buffer(&color_params_buffer, 0, bytemuck::bytes_of(&color_params));

        let colorize_bind_groups = targets
            .iter()
            .map(|target| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Colorize Bind Group"),
                    layout: &colorize_bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: color_params_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: state_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: target.as_entire_binding(),
                        },
                    ],
                })
            })
            .collect();

        // Last: the autotune launches read the freshly seeded state.
        let convolution =
            ConvolutionStage::new(ctx, config, &state_buffer, &weights_buffer, &influence_buffer);

        Self {
            device: ctx.device.clone(),
            queue: ctx.queue.clone(),
            width: config.width as u32,
            height: config.height as u32,
            channels: config.channels as u32,
            workgroups: ((config.width as u32 + 15) / 16, (config.height as u32 + 15) / 16),
            convolution,
            update_pipeline,
            update_bind_group,
            colorize_pipeline,
            colorize_bind_groups,
            state_buffer,
            staging_buffer,
            step_count: 0,
        }
    }

    /// Run one simulation step, writing the colorized result into the
    /// output buffer at `target`.
    ///
    /// Encodes all three stages into one command encoder, submits once,
    /// and blocks until the device has finished. Only the targeted
    /// buffer is mutated.
    pub fn step(&mut self, target: usize) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Step Encoder"),
            });

        self.convolution.encode(&mut encoder);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Update Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.update_pipeline);
            pass.set_bind_group(0, &self.update_bind_group, &[]);
            pass.dispatch_workgroups(self.workgroups.0, self.workgroups.1, self.channels);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Colorize Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.colorize_pipeline);
            pass.set_bind_group(0, &self.colorize_bind_groups[target], &[]);
            pass.dispatch_workgroups(self.workgroups.0, self.workgroups.1, 1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        // Synchronous contract: the frame is fully resident on return.
        self.device.poll(wgpu::PollType::wait_indefinitely()).ok();

        self.step_count += 1;
    }

    /// Number of output buffers the colorize stage can target.
    pub fn target_count(&self) -> usize {
        self.colorize_bind_groups.len()
    }

    /// Completed steps so far.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Debug readback of the state grid, one plane per channel.
    pub fn read_state(&self) -> Vec<Vec<f32>> {
        let grid_size = (self.width * self.height) as usize;
        let size = (grid_size * self.channels as usize * std::mem::size_of::<f32>()) as u64;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.state_buffer, 0, &self.staging_buffer, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let flat = self.map_staging(size);
        flat.chunks(grid_size).map(|plane| plane.to_vec()).collect()
    }

    /// Debug readback of one output buffer's vertex records as raw floats.
    pub fn read_vertices(&self, target: &wgpu::Buffer) -> Vec<f32> {
        let size = target.size();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(target, 0, &self.staging_buffer, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        self.map_staging(size)
    }

    fn map_staging(&self, size: u64) -> Vec<f32> {
        let slice = self.staging_buffer.slice(..size);

        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).unwrap();
        });
        self.device.poll(wgpu::PollType::wait_indefinitely()).ok();
        rx.recv().unwrap().unwrap();

        let out = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&data).to_vec()
        };
        self.staging_buffer.unmap();
        out
    }
}

fn create_update_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Update Bind Group Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

fn create_colorize_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Colorize Bind Group Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ReferencePipeline, ReferenceState, growth};
    use crate::schema::{GrowthConfig, KernelConfig, Pattern};

    fn gpu_context() -> Option<GpuContext> {
        match pollster::block_on(GpuContext::new()) {
            Ok(ctx) => Some(ctx),
            Err(super::super::GpuError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
                None
            }
            Err(e) => panic!("GPU context creation failed: {e}"),
        }
    }

    fn noise_seed() -> Seed {
        Seed {
            pattern: Pattern::Noise {
                amplitude: 0.6,
                channel: None,
                seed: 11,
            },
        }
    }

    fn targets(ctx: &GpuContext, config: &SimulationConfig, count: usize) -> Vec<wgpu::Buffer> {
        (0..count)
            .map(|_| {
                ctx.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("test frame buffer"),
                    size: (config.grid_size() * VERTEX_FLOATS * std::mem::size_of::<f32>())
                        as u64,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::VERTEX
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect()
    }

    fn two_channel_config() -> SimulationConfig {
        let pair = |source, target, mu, sigma| KernelConfig {
            source_channel: source,
            target_channel: target,
            mu,
            sigma,
        };
        SimulationConfig {
            width: 32,
            height: 32,
            channels: 2,
            dt: 0.1,
            kernel_radius: 3,
            growth: GrowthConfig::default(),
            kernels: vec![
                pair(0, 0, 0.5, 0.15),
                pair(1, 0, 0.35, 0.12),
                pair(0, 1, 0.65, 0.18),
                pair(1, 1, 0.5, 0.15),
            ],
        }
    }

    fn single_pair_config() -> SimulationConfig {
        SimulationConfig {
            width: 16,
            height: 16,
            channels: 1,
            dt: 0.1,
            kernel_radius: 2,
            growth: GrowthConfig::default(),
            kernels: vec![KernelConfig {
                source_channel: 0,
                target_channel: 0,
                mu: 0.5,
                sigma: 0.15,
            }],
        }
    }

    #[test]
    fn gpu_step_matches_cpu_reference() {
        let Some(ctx) = gpu_context() else { return };
        let config = two_channel_config();
        let seed = noise_seed();
        let targets = targets(&ctx, &config, 2);

        let mut pipeline = SimulationPipeline::new(&ctx, &config, &seed, &targets);
        let mut reference = ReferencePipeline::new(config.clone());
        let mut ref_state = ReferenceState::from_seed(&seed, &config);

        for _ in 0..3 {
            pipeline.step(0);
            reference.step(&mut ref_state);
        }

        let gpu_state = pipeline.read_state();
        for (c, (gpu, cpu)) in gpu_state.iter().zip(ref_state.channels.iter()).enumerate() {
            let max_diff = gpu
                .iter()
                .zip(cpu.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max);
            assert!(max_diff < 1e-3, "channel {}: max diff {}", c, max_diff);
        }
    }

    #[test]
    fn steps_are_deterministic() {
        let Some(ctx) = gpu_context() else { return };
        let config = single_pair_config();
        let seed = noise_seed();

        let targets_a = targets(&ctx, &config, 2);
        let targets_b = targets(&ctx, &config, 2);
        let mut a = SimulationPipeline::new(&ctx, &config, &seed, &targets_a);
        let mut b = SimulationPipeline::new(&ctx, &config, &seed, &targets_b);

        for _ in 0..3 {
            a.step(0);
            b.step(0);
        }

        assert_eq!(a.read_state(), b.read_state());
        assert_eq!(a.read_vertices(&targets_a[0]), b.read_vertices(&targets_b[0]));
    }

    #[test]
    fn identity_kernel_step_follows_update_formula() {
        let Some(ctx) = gpu_context() else { return };
        // All ring weight collapses onto the center cell, so the influence
        // equals the state and the update reduces to the bare formula.
        let config = SimulationConfig {
            width: 4,
            height: 4,
            channels: 1,
            dt: 0.1,
            kernel_radius: 1,
            growth: GrowthConfig::default(),
            kernels: vec![KernelConfig {
                source_channel: 0,
                target_channel: 0,
                mu: 0.0,
                sigma: 1e-3,
            }],
        };
        let seed = noise_seed();
        let before = seed.generate(config.width, config.height, config.channels);

        let targets = targets(&ctx, &config, 1);
        let mut pipeline = SimulationPipeline::new(&ctx, &config, &seed, &targets);
        pipeline.step(0);

        let after = pipeline.read_state();
        for (i, (&b, &a)) in before[0].iter().zip(after[0].iter()).enumerate() {
            let expected =
                (b + config.dt * growth(b, config.growth.mu, config.growth.sigma)).clamp(0.0, 1.0);
            assert!(
                (a - expected).abs() < 1e-5,
                "cell {}: {} -> {}, expected {}",
                i,
                b,
                a,
                expected
            );
        }
    }

    #[test]
    fn colorize_writes_positions_and_colors() {
        let Some(ctx) = gpu_context() else { return };
        let config = single_pair_config();
        let seed = noise_seed();
        let targets = targets(&ctx, &config, 1);

        let mut pipeline = SimulationPipeline::new(&ctx, &config, &seed, &targets);
        pipeline.step(0);

        let state = pipeline.read_state();
        let vertices = pipeline.read_vertices(&targets[0]);
        let (w, h) = (config.width, config.height);

        for y in 0..h {
            for x in 0..w {
                let idx = y * w + x;
                let base = idx * VERTEX_FLOATS;
                let px = (x as f32 + 0.5) / w as f32 * 2.0 - 1.0;
                let py = 1.0 - (y as f32 + 0.5) / h as f32 * 2.0;

                assert!((vertices[base] - px).abs() < 1e-6);
                assert!((vertices[base + 1] - py).abs() < 1e-6);
                // Single channel: red carries the state, the rest stay 0.
                let expected_r = state[0][idx].clamp(0.0, 1.0);
                assert!((vertices[base + 2] - expected_r).abs() < 1e-6);
                assert_eq!(vertices[base + 3], 0.0);
                assert_eq!(vertices[base + 4], 0.0);
            }
        }
    }

    #[test]
    fn step_leaves_other_targets_untouched() {
        let Some(ctx) = gpu_context() else { return };
        let config = single_pair_config();
        let seed = noise_seed();
        let targets = targets(&ctx, &config, 2);

        let sentinel = vec![7.5f32; config.grid_size() * VERTEX_FLOATS];
        ctx.queue
            .write_buffer(&targets[1], 0, bytemuck::cast_slice(&sentinel));

        let mut pipeline = SimulationPipeline::new(&ctx, &config, &seed, &targets);
        pipeline.step(0);

        assert_eq!(pipeline.read_vertices(&targets[1]), sentinel);
        assert_eq!(pipeline.step_count(), 1);
        assert_eq!(pipeline.target_count(), 2);
    }
}
