//! Frame source.
//!
//! Owns the pool of shareable vertex buffers and the simulation pipeline
//! that fills them. The buffers are allocated here on the compute side
//! and exported once via [`FrameSource::bind`]; the render side imports
//! the handles and binds them as vertex buffers, so both sides address
//! the same device memory without a copy.

use crate::compute::gpu::{GpuContext, SimulationPipeline};
use crate::schema::{Seed, SimulationConfig};

/// One grid cell's output record: screen position and display color.
///
/// Matches the packed 20-byte layout the colorize stage writes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameVertex {
    pub position: [f32; 2],
    pub color: [f32; 3],
}

impl FrameVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x3];

    /// Vertex buffer layout for the render pipeline.
    pub const fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<FrameVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Produces frames on demand, each directly into one of N shared buffers.
pub struct FrameSource {
    buffers: Vec<wgpu::Buffer>,
    pipeline: SimulationPipeline,
    vertex_count: u32,
    bound: bool,
}

impl FrameSource {
    /// Allocate `frame_count` output buffers and build the pipeline that
    /// targets them. `frame_count` should match the number of frames the
    /// presentation layer keeps in flight.
    pub fn new(
        ctx: &GpuContext,
        config: &SimulationConfig,
        seed: &Seed,
        frame_count: usize,
    ) -> Self {
        let size = (config.grid_size() * std::mem::size_of::<FrameVertex>()) as u64;
        let buffers: Vec<wgpu::Buffer> = (0..frame_count)
            .map(|_| {
                ctx.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Frame Vertex Buffer"),
                    size,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::VERTEX
                        | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let pipeline = SimulationPipeline::new(ctx, config, seed, &buffers);

        Self {
            buffers,
            pipeline,
            vertex_count: config.grid_size() as u32,
            bound: false,
        }
    }

    /// Export the buffer handles for the render side.
    ///
    /// The sole point where ownership of the shared memory crosses to the
    /// graphics backend; must be called exactly once, before any
    /// stepping. The handles stay valid until both sides have dropped
    /// them at shutdown.
    pub fn bind(&mut self) -> Vec<wgpu::Buffer> {
        assert!(!self.bound, "FrameSource::bind called more than once");
        self.bound = true;
        self.buffers.clone()
    }

    /// Compute the next frame directly into the buffer at `index`.
    ///
    /// Synchronous: returns only after the frame is fully resident. No
    /// buffer other than the targeted one is touched.
    pub fn next_frame(&mut self, index: usize) {
        assert!(self.bound, "FrameSource::bind must precede stepping");
        self.pipeline.step(index);
    }

    /// Number of output buffers in the pool.
    pub fn frame_count(&self) -> usize {
        self.buffers.len()
    }

    /// Vertices per frame (one per grid cell).
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}
