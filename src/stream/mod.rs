//! Frame streaming.
//!
//! The producer side of the renderer: a pool of GPU-resident vertex
//! buffers filled by the simulation, and the ring that hands buffer
//! slots back and forth between the compute thread and the render
//! thread.

mod ring;
mod source;

pub use ring::{MultiBufferRing, RingClosed};
pub use source::{FrameSource, FrameVertex};
