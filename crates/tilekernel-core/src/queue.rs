//! Backend-agnostic kernel queue.

use std::fmt;
use std::time::Duration;

use crate::context::{GroupScope, Item, NdItem};
use crate::device::DeviceInfo;
use crate::error::Result;
use crate::memory::{LocalMemory, Scalar};
use crate::types::{NdRange, Range};

/// Completion state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    /// Every work-item ran to completion.
    Complete,
    /// At least one work-item failed; the error is pending on the queue.
    Failed,
}

/// Record of one kernel submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Kernel name.
    pub kernel: String,
    /// Completion state.
    pub status: EventStatus,
    /// Wall-clock execution time.
    pub duration: Duration,
    /// Work-groups executed (1 per chunk for flat launches).
    pub work_groups: usize,
    /// Work-items in the launch.
    pub work_items: usize,
}

impl Event {
    /// Check if the kernel completed.
    pub fn is_complete(&self) -> bool {
        self.status == EventStatus::Complete
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:?}] {} items / {} groups in {:?}",
            self.kernel, self.status, self.work_items, self.work_groups, self.duration
        )
    }
}

/// Queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    /// Kernels submitted.
    pub submissions: u64,
    /// Kernels that raised an execution error.
    pub failed_submissions: u64,
    /// Work-groups executed across all submissions.
    pub work_groups_executed: u64,
    /// Total kernel execution time.
    pub busy_time: Duration,
    /// Errors waiting to be reported.
    pub pending_errors: usize,
}

/// An in-order queue that executes kernels on one device.
///
/// Submission methods return synchronously detected errors (bad ranges,
/// limits) directly. Errors raised while work-items run are kept by the
/// queue and reported by [`KernelQueue::wait_and_throw`] or
/// [`KernelQueue::throw_asynchronous`].
pub trait KernelQueue: Send + Sync {
    /// The device this queue runs on.
    fn device(&self) -> &DeviceInfo;

    /// Run `kernel` once per id of `range`; work-items are independent.
    fn parallel_for<const D: usize, F>(&self, name: &str, range: Range<D>, kernel: F) -> Result<Event>
    where
        F: Fn(Item<D>) + Sync;

    /// Run `kernel` once per work-item of `nd_range`. Work-items are
    /// grouped but cannot synchronize.
    fn parallel_for_nd<const D: usize, F>(
        &self,
        name: &str,
        nd_range: NdRange<D>,
        kernel: F,
    ) -> Result<Event>
    where
        F: Fn(&NdItem<'_, D>) + Sync;

    /// Run `kernel` once per work-group with `scratch` elements of local
    /// memory. The kernel drives its work-items through the
    /// [`GroupScope`] and separates phases with `GroupScope::barrier`.
    fn parallel_for_work_group<T, const D: usize, F>(
        &self,
        name: &str,
        nd_range: NdRange<D>,
        scratch: Range<D>,
        kernel: F,
    ) -> Result<Event>
    where
        T: Scalar,
        F: Fn(&mut GroupScope<'_, T, D>) + Sync;

    /// Run `kernel` once per work-item with `scratch` elements of local
    /// memory per group. Every work-item of a group runs concurrently so
    /// `NdItem::barrier` is a real rendezvous.
    fn parallel_for_nd_local<T, const D: usize, F>(
        &self,
        name: &str,
        nd_range: NdRange<D>,
        scratch: Range<D>,
        kernel: F,
    ) -> Result<Event>
    where
        T: Scalar,
        F: Fn(&NdItem<'_, D>, &LocalMemory<T, D>) + Sync;

    /// Block until submitted work is done. Pending errors are logged and
    /// discarded.
    fn wait(&self);

    /// Block until submitted work is done and return pending errors.
    fn wait_and_throw(&self) -> Result<()>;

    /// Return pending errors without waiting.
    fn throw_asynchronous(&self) -> Result<()>;

    /// Queue counters.
    fn metrics(&self) -> QueueMetrics;
}
