//! GPU compute backend.
//!
//! WebGPU (wgpu) implementation of the simulation step: convolution,
//! update, and colorize stages compiled once and re-launched per step.

mod context;
mod convolution;
mod pipeline;

pub use context::GpuContext;
pub use convolution::{ConvAlgorithm, ConvolutionStage};
pub use pipeline::SimulationPipeline;

/// Error type for GPU setup operations.
///
/// Setup failures are unrecoverable by design: callers log and exit.
/// Errors raised after setup (validation or device loss during a step)
/// surface through wgpu's uncaptured-error handler, which panics.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Failed to create rendering surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("Surface is not supported by the selected adapter")]
    SurfaceConfig,

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),
}
