//! Compute module - kernels, growth rule, and the GPU/CPU steppers.

mod growth;
mod kernel;
mod reference;

pub mod gpu;

pub use growth::*;
pub use kernel::*;
pub use reference::*;
