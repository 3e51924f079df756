//! Elementwise vector sum `r[i] = a[i] + b[i]`.
//!
//! Two launches compute the same result: a flat launch over a
//! [`Range`], which accepts any length, and a grouped launch over an
//! [`NdRange`], which needs the length to be a multiple of the group size.

use std::ops::Add;

use tracing::debug;

use tilekernel_core::error::{Result, TileKernelError};
use tilekernel_core::memory::{Buffer, Scalar};
use tilekernel_core::queue::{Event, KernelQueue};
use tilekernel_core::types::{NdRange, Range};

/// Default number of elements.
pub const DEFAULT_SIZE: usize = 1024;

/// Default work-group size for the grouped launch.
pub const DEFAULT_GROUP_SIZE: usize = 128;

/// Vector add parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorAddConfig {
    /// Number of elements.
    pub size: usize,
    /// Work-group size for the grouped launch.
    pub group_size: usize,
}

impl Default for VectorAddConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            group_size: DEFAULT_GROUP_SIZE,
        }
    }
}

impl VectorAddConfig {
    /// Set the number of elements.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the work-group size.
    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(TileKernelError::config("size must be > 0"));
        }
        if self.group_size == 0 {
            return Err(TileKernelError::config("group_size must be > 0"));
        }
        Ok(())
    }
}

fn operand_range<T>(a: &[T], b: &[T], r: &[T]) -> Result<Range<1>> {
    if b.len() != a.len() {
        return Err(TileKernelError::size_mismatch(a.len(), b.len()));
    }
    if r.len() != a.len() {
        return Err(TileKernelError::size_mismatch(a.len(), r.len()));
    }
    Range::new([a.len()])
}

/// Report the outcome of one vector add submission.
///
/// Errors left pending by earlier submissions stay on the queue when this
/// one completed. When it failed, every pending error is drained and
/// returned together.
fn finish<Q: KernelQueue>(queue: &Q, event: Event) -> Result<Event> {
    debug!("{}", event);
    if !event.is_complete() {
        queue.throw_asynchronous()?;
    }
    Ok(event)
}

/// Add `a` and `b` into `r` with one independent work-item per element.
///
/// `r` receives the device result even when the kernel fails, so
/// elements the kernel never wrote read back as `T::default()`. A failed
/// kernel returns all errors pending on the queue, including ones from
/// earlier submissions.
pub fn vector_add_range<T, Q>(queue: &Q, a: &[T], b: &[T], r: &mut [T]) -> Result<Event>
where
    T: Scalar + Add<Output = T>,
    Q: KernelQueue,
{
    let range = operand_range(a, b, r)?;
    let buf_a = Buffer::from_slice(a, range)?;
    let buf_b = Buffer::from_slice(b, range)?;
    let buf_r = Buffer::<T, 1>::new(range);

    let (acc_a, acc_b, acc_r) = (buf_a.read_only(), buf_b.read_only(), buf_r.write_only());
    let event = queue.parallel_for("vector_add_range", range, move |item| {
        let id = item.id();
        acc_r.write(id, acc_a.read(id) + acc_b.read(id));
    })?;

    buf_r.copy_to_host(r)?;
    finish(queue, event)
}

/// Add `a` and `b` into `r` with work-groups of `group_size` items.
///
/// # Errors
///
/// Returns [`TileKernelError::InvalidNdRange`] when the length is not a
/// multiple of `group_size`.
pub fn vector_add_nd_range<T, Q>(
    queue: &Q,
    a: &[T],
    b: &[T],
    r: &mut [T],
    group_size: usize,
) -> Result<Event>
where
    T: Scalar + Add<Output = T>,
    Q: KernelQueue,
{
    let range = operand_range(a, b, r)?;
    let nd_range = NdRange::new(range, Range::new([group_size])?)?;
    let buf_a = Buffer::from_slice(a, range)?;
    let buf_b = Buffer::from_slice(b, range)?;
    let buf_r = Buffer::<T, 1>::new(range);

    let (acc_a, acc_b, acc_r) = (buf_a.read_write(), buf_b.read_write(), buf_r.read_write());
    let event = queue.parallel_for_nd("vector_add_nd_range", nd_range, move |item| {
        let id = item.global_id();
        acc_r.write(id, acc_a.read(id) + acc_b.read(id));
    })?;

    buf_r.copy_to_host(r)?;
    finish(queue, event)
}
