//! CPU Backend for TileKernel
//!
//! Executes kernels on the host. Work-groups are distributed over a rayon
//! thread pool; launches that need a real group barrier run every
//! work-item of a group on its own thread.
//!
//! Always available and used as the default device.

#![warn(missing_docs)]

mod queue;

pub use queue::CpuQueue;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::CpuQueue;
}
