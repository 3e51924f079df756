//! Kernels built on the queue API.
//!
//! Each kernel takes a [`KernelQueue`](tilekernel_core::KernelQueue) so it
//! runs unchanged on any backend.

pub mod transpose;
pub mod vector_add;
