//! # TileKernel Core
//!
//! Core types for launching data-parallel kernels over explicit index
//! spaces.
//!
//! ## Core Abstractions
//!
//! - [`Range`], [`Id`], [`NdRange`] - Index spaces and work-group tiling
//! - [`Buffer`] / [`Accessor`] - Device data with read/write intent
//! - [`LocalMemory`] - Per-group scratch memory with barrier checking
//! - [`NdItem`], [`GroupScope`], [`GroupBarrier`] - Work-item handles and
//!   group synchronization
//! - [`KernelQueue`] - Backend-agnostic in-order queue
//!
//! ## Example
//!
//! ```ignore
//! use tilekernel_core::prelude::*;
//!
//! let range = Range::new([1024])?;
//! let a = Buffer::from_fn(range, |i| i as f32);
//! let r = Buffer::<f32, 1>::new(range);
//! let (a_acc, r_acc) = (a.read_only(), r.write_only());
//!
//! queue.parallel_for("double", range, move |item| {
//!     r_acc.write(item.id(), 2.0 * a_acc.read(item.id()));
//! })?;
//! queue.wait_and_throw()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod memory;
pub mod queue;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::QueueConfig;
    pub use crate::context::{Group, GroupBarrier, GroupScope, Item, NdItem};
    pub use crate::device::{DeviceInfo, DeviceSelector, DeviceType};
    pub use crate::error::{Result, TileKernelError};
    pub use crate::memory::{
        AccessMode, Accessor, Buffer, LocalMemory, ReadOnly, ReadWrite, Readable, Scalar,
        Writable, WriteOnly,
    };
    pub use crate::queue::{Event, EventStatus, KernelQueue, QueueMetrics};
    pub use crate::types::{Id, NdRange, Range};
}

// Re-exports for convenience
pub use config::QueueConfig;
pub use context::{Group, GroupBarrier, GroupScope, Item, NdItem};
pub use device::{DeviceInfo, DeviceSelector, DeviceType};
pub use error::{Result, TileKernelError};
pub use memory::{Accessor, Buffer, LocalMemory, Scalar};
pub use queue::{Event, EventStatus, KernelQueue, QueueMetrics};
pub use types::{Id, NdRange, Range};
