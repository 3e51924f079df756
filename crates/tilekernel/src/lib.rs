//! # TileKernel
//!
//! Data-parallel kernels over explicit index spaces, executed by an
//! in-order queue.
//!
//! A kernel is a closure run once per work-item. Flat launches cover a
//! [`Range`]; grouped launches cover an [`NdRange`] whose work-groups can
//! share [`LocalMemory`] and synchronize at a group barrier.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tilekernel::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let queue = CpuQueue::new()?;
//!     println!("Running on {}", queue.device().name);
//!
//!     let a: Vec<f32> = (0..1024).map(|i| i as f32).collect();
//!     let mut r = vec![0.0f32; 1024];
//!     vector_add_nd_range(&queue, &a, &a, &mut r, 128)?;
//!
//!     let t = transpose(&queue, TransposeStrategy::Tiled, &a, 32, 8)?;
//!     assert_eq!(t, transpose_reference(&a, 32)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Kernels
//!
//! - [`kernels::vector_add`] - Elementwise sum with flat and grouped launches
//! - [`kernels::transpose`] - Naive and tiled (local memory + barrier)
//!   square matrix transpose
//!
//! ## Binaries
//!
//! - `vector_add` - Runs both vector add launches and checks `r[i] == 2i`
//! - `matrix_transpose` - Benchmarks naive against tiled transpose

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

pub mod bench;
pub mod kernels;

// Re-export core types
pub use tilekernel_core::*;

// Re-export CPU backend (always available)
pub use tilekernel_cpu::CpuQueue;

pub use bench::{benchmark, BenchmarkReport};
pub use kernels::transpose::{
    first_mismatch, submit_transpose, transpose, transpose_naive, transpose_reference,
    transpose_tiled, transpose_tiled_threaded, TransposeConfig, TransposeStrategy,
};
pub use kernels::vector_add::{vector_add_nd_range, vector_add_range, VectorAddConfig};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bench::{benchmark, BenchmarkReport};
    pub use crate::kernels::transpose::{
        first_mismatch, submit_transpose, transpose, transpose_naive, transpose_reference,
        transpose_tiled, transpose_tiled_threaded, TransposeConfig, TransposeStrategy,
    };
    pub use crate::kernels::vector_add::{vector_add_nd_range, vector_add_range, VectorAddConfig};
    pub use tilekernel_core::prelude::*;
    pub use tilekernel_cpu::CpuQueue;
}
