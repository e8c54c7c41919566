//! Convolution stage.
//!
//! One forward convolution of the state grid against the kernel bank:
//! for every destination channel, the weighted sum over all source
//! channels and the local neighborhood, zero-padded at the borders.
//!
//! Two shader variants exist; the stage times both on the actual grid at
//! construction and keeps the faster one for its lifetime. Grid and
//! kernel shapes never change, so the selection cost is paid once.

use std::time::{Duration, Instant};

use crate::schema::SimulationConfig;

use super::GpuContext;

const CONVOLUTION_FUSED_SHADER: &str = include_str!("shaders/convolution_fused.wgsl");
const CONVOLUTION_PAIR_SHADER: &str = include_str!("shaders/convolution_pair.wgsl");

/// Timed launches per variant during selection.
const TUNE_ROUNDS: usize = 3;

/// Uniform buffer struct for the fused convolution shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ConvParams {
    width: u32,
    height: u32,
    channels: u32,
    kernel_size: u32,
}

/// Uniform buffer struct for the per-pair convolution shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct PairParams {
    width: u32,
    height: u32,
    channels: u32,
    kernel_size: u32,
    source: u32,
    target: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Convolution algorithm variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvAlgorithm {
    /// One dispatch over (width, height, channels); each invocation folds
    /// every source channel into its destination cell.
    Fused,
    /// Clear the influence field, then one dispatch per configured
    /// (source, target) pair accumulating into the destination channel.
    /// Skips pairs with no configured kernel.
    PerPair,
}

/// GPU convolution of the state grid against the kernel bank.
///
/// All operands are bound at construction; [`encode`](Self::encode)
/// appends the chosen variant's passes to a command encoder. Within one
/// submission the influence field is fully written before any later pass
/// reads it.
pub struct ConvolutionStage {
    algorithm: ConvAlgorithm,
    fused_pipeline: wgpu::ComputePipeline,
    fused_bind_group: wgpu::BindGroup,
    pair_pipeline: wgpu::ComputePipeline,
    pair_bind_groups: Vec<wgpu::BindGroup>,
    influence: wgpu::Buffer,
    workgroups: (u32, u32),
    channels: u32,
}

impl ConvolutionStage {
    /// Build both variants against the given buffers and autotune.
    ///
    /// `state` and `weights` are read, `influence` is written; the stage
    /// keeps these bindings for its lifetime.
    pub fn new(
        ctx: &GpuContext,
        config: &SimulationConfig,
        state: &wgpu::Buffer,
        weights: &wgpu::Buffer,
        influence: &wgpu::Buffer,
    ) -> Self {
        let device = &ctx.device;

        let fused_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Fused Convolution Shader"),
            source: wgpu::ShaderSource::Wgsl(CONVOLUTION_FUSED_SHADER.into()),
        });
        let pair_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Per-Pair Convolution Shader"),
            source: wgpu::ShaderSource::Wgsl(CONVOLUTION_PAIR_SHADER.into()),
        });

        // Both variants share the binding set: params, state, weights,
        // influence.
        let bind_group_layout = create_bind_group_layout(device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Convolution Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            ..Default::default()
        });

        let fused_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Fused Convolution Pipeline"),
            layout: Some(&pipeline_layout),
            module: &fused_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        let pair_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Per-Pair Convolution Pipeline"),
            layout: Some(&pipeline_layout),
            module: &pair_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let fused_params = ConvParams {
            width: config.width as u32,
            height: config.height as u32,
            channels: config.channels as u32,
            kernel_size: config.kernel_size() as u32,
        };
        let fused_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Conv Params"),
            size: std::mem::size_of::<ConvParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ctx.queue
            .write_buffer(&fused_params_buffer, 0, bytemuck::bytes_of(&fused_params));

        let fused_bind_group = create_bind_group(
            device,
            &bind_group_layout,
            &fused_params_buffer,
            state,
            weights,
            influence,
        );

        // One prebuilt uniform + bind group per configured pair; the pair
        // list is fixed for the stage's lifetime.
        let pair_bind_groups = config
            .kernels
            .iter()
            .map(|kernel| {
                let params = PairParams {
                    width: config.width as u32,
                    height: config.height as u32,
                    channels: config.channels as u32,
                    kernel_size: config.kernel_size() as u32,
                    source: kernel.source_channel as u32,
                    target: kernel.target_channel as u32,
                    _pad0: 0,
                    _pad1: 0,
                };
                let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Pair Params"),
                    size: std::mem::size_of::<PairParams>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                ctx.queue
                    .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));
                create_bind_group(
                    device,
                    &bind_group_layout,
                    &params_buffer,
                    state,
                    weights,
                    influence,
                )
            })
            .collect();

        let workgroups_x = (config.width as u32 + 15) / 16;
        let workgroups_y = (config.height as u32 + 15) / 16;

        let mut stage = Self {
            algorithm: ConvAlgorithm::Fused,
            fused_pipeline,
            fused_bind_group,
            pair_pipeline,
            pair_bind_groups,
            influence: influence.clone(),
            workgroups: (workgroups_x, workgroups_y),
            channels: config.channels as u32,
        };
        stage.algorithm = stage.select_algorithm(ctx);
        stage
    }

    /// The variant the autotuning step settled on.
    pub fn algorithm(&self) -> ConvAlgorithm {
        self.algorithm
    }

    /// Append the convolution passes to `encoder`.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        self.encode_with(encoder, self.algorithm);
    }

    fn encode_with(&self, encoder: &mut wgpu::CommandEncoder, algorithm: ConvAlgorithm) {
        match algorithm {
            ConvAlgorithm::Fused => {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Convolution Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.fused_pipeline);
                pass.set_bind_group(0, &self.fused_bind_group, &[]);
                pass.dispatch_workgroups(self.workgroups.0, self.workgroups.1, self.channels);
            }
            ConvAlgorithm::PerPair => {
                // Pair passes accumulate; start from zero.
                encoder.clear_buffer(&self.influence, 0, None);
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Convolution Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pair_pipeline);
                for bind_group in &self.pair_bind_groups {
                    pass.set_bind_group(0, bind_group, &[]);
                    pass.dispatch_workgroups(self.workgroups.0, self.workgroups.1, 1);
                }
            }
        }
    }

    /// Wall-clock both variants on the real grid and keep the faster one.
    fn select_algorithm(&self, ctx: &GpuContext) -> ConvAlgorithm {
        let fused = self.time_variant(ctx, ConvAlgorithm::Fused);
        let per_pair = self.time_variant(ctx, ConvAlgorithm::PerPair);
        let chosen = if per_pair < fused {
            ConvAlgorithm::PerPair
        } else {
            ConvAlgorithm::Fused
        };
        log::info!(
            "Convolution autotune: fused {:?}, per-pair {:?} -> {:?}",
            fused,
            per_pair,
            chosen
        );
        chosen
    }

    fn time_variant(&self, ctx: &GpuContext, algorithm: ConvAlgorithm) -> Duration {
        // One warm-up launch so pipeline compilation does not bias the
        // measurement.
        self.launch(ctx, algorithm);

        let start = Instant::now();
        for _ in 0..TUNE_ROUNDS {
            self.launch(ctx, algorithm);
        }
        ctx.wait_idle();
        start.elapsed()
    }

    fn launch(&self, ctx: &GpuContext, algorithm: ConvAlgorithm) {
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Autotune Encoder"),
            });
        self.encode_with(&mut encoder, algorithm);
        ctx.queue.submit(std::iter::once(encoder.finish()));
        ctx.wait_idle();
    }
}

fn create_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Convolution Bind Group Layout"),
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
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 3,
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

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    params: &wgpu::Buffer,
    state: &wgpu::Buffer,
    weights: &wgpu::Buffer,
    influence: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Convolution Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: state.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: weights.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: influence.as_entire_binding(),
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{KernelBank, convolve_into};
    use crate::schema::{GrowthConfig, KernelConfig, Pattern, Seed};

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

    /// 16x16 two-channel grid with one pair left unconfigured, so the
    /// per-pair variant takes its skip path.
    fn test_config() -> SimulationConfig {
        let pair = |source, target, mu, sigma| KernelConfig {
            source_channel: source,
            target_channel: target,
            mu,
            sigma,
        };
        SimulationConfig {
            width: 16,
            height: 16,
            channels: 2,
            dt: 0.1,
            kernel_radius: 2,
            growth: GrowthConfig::default(),
            kernels: vec![
                pair(0, 0, 0.5, 0.15),
                pair(1, 0, 0.35, 0.12),
                pair(1, 1, 0.65, 0.18),
            ],
        }
    }

    struct Fixture {
        ctx: GpuContext,
        stage: ConvolutionStage,
        influence: wgpu::Buffer,
        channels: Vec<Vec<f32>>,
        config: SimulationConfig,
        bank: KernelBank,
    }

    fn fixture(ctx: GpuContext) -> Fixture {
        let config = test_config();
        let bank = KernelBank::build(&config);
        let seed = Seed {
            pattern: Pattern::Noise {
                amplitude: 0.8,
                channel: None,
                seed: 3,
            },
        };
        let channels = seed.generate(config.width, config.height, config.channels);

        let state_size = (config.grid_size() * config.channels * 4) as u64;
        let state = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("test state"),
            size: state_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let flat: Vec<f32> = channels.iter().flatten().copied().collect();
        ctx.queue.write_buffer(&state, 0, bytemuck::cast_slice(&flat));

        let weights = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("test weights"),
            size: (bank.weights().len() * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ctx.queue
            .write_buffer(&weights, 0, bytemuck::cast_slice(bank.weights()));

        let influence = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("test influence"),
            size: state_size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let stage = ConvolutionStage::new(&ctx, &config, &state, &weights, &influence);
        Fixture {
            ctx,
            stage,
            influence,
            channels,
            config,
            bank,
        }
    }

    fn run_variant(fx: &Fixture, algorithm: ConvAlgorithm) -> Vec<f32> {
        let mut encoder = fx
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("test encoder"),
            });
        fx.stage.encode_with(&mut encoder, algorithm);

        let size = fx.influence.size();
        let staging = fx.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("test staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&fx.influence, 0, &staging, 0, size);
        fx.ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).unwrap();
        });
        fx.ctx.wait_idle();
        rx.recv().unwrap().unwrap();

        let out = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&data).to_vec()
        };
        staging.unmap();
        out
    }

    #[test]
    fn variants_produce_matching_influence() {
        let Some(ctx) = gpu_context() else { return };
        let fx = fixture(ctx);

        let fused = run_variant(&fx, ConvAlgorithm::Fused);
        let per_pair = run_variant(&fx, ConvAlgorithm::PerPair);

        let max_diff = fused
            .iter()
            .zip(per_pair.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_diff < 1e-5, "variants disagree by {}", max_diff);
    }

    #[test]
    fn gpu_convolution_matches_cpu() {
        let Some(ctx) = gpu_context() else { return };
        let fx = fixture(ctx);

        let gpu = run_variant(&fx, fx.stage.algorithm());

        let mut expected =
            vec![vec![0.0f32; fx.config.grid_size()]; fx.config.channels];
        convolve_into(
            &fx.channels,
            &fx.bank,
            fx.config.width,
            fx.config.height,
            &mut expected,
        );

        let grid = fx.config.grid_size();
        for (c, plane) in expected.iter().enumerate() {
            let max_diff = plane
                .iter()
                .zip(gpu[c * grid..(c + 1) * grid].iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max);
            assert!(max_diff < 1e-4, "channel {}: max diff {}", c, max_diff);
        }
    }
}
