//! GPU-resident multi-channel Lenia, streamed frame by frame into an
//! on-screen renderer.
//!
//! The simulation runs entirely on the GPU: each step is one pre-built
//! sequence of compute passes (convolution, update, colorize) whose
//! output lands directly in one of a small pool of vertex buffers
//! shared with the render pipeline. A producer thread computes frames,
//! the window thread presents them; the two meet only in
//! [`stream::MultiBufferRing`].
//!
//! # Architecture
//!
//! The crate is split into four modules:
//!
//! - `schema`: configuration types and seed patterns
//! - `compute`: kernel bank, growth rule, CPU reference stepper, and the
//!   wgpu simulation pipeline
//! - `stream`: the shared frame-buffer pool and the producer/consumer ring
//! - `render`: window, render pipeline, and the blocking run loop
//!
//! # Example
//!
//! ```rust,no_run
//! use lenia_stream::{Seed, SimulationConfig, render};
//!
//! let config = SimulationConfig::default();
//! config.validate().expect("invalid configuration");
//!
//! // Blocks until the window is closed.
//! render::run(config, Seed::default()).unwrap();
//! ```

pub mod compute;
pub mod render;
pub mod schema;
pub mod stream;

// Re-export commonly used types
pub use schema::{Pattern, Seed, SimulationConfig};
pub use stream::{FrameSource, MultiBufferRing, RingClosed};
