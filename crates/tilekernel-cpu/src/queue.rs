//! CPU queue implementation.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

use tilekernel_core::config::QueueConfig;
use tilekernel_core::context::{Group, GroupBarrier, GroupScope, Item, NdItem};
use tilekernel_core::device::{select_device, DeviceInfo};
use tilekernel_core::error::{Result, TileKernelError};
use tilekernel_core::memory::{LocalMemory, Scalar};
use tilekernel_core::queue::{Event, EventStatus, KernelQueue, QueueMetrics};
use tilekernel_core::types::{Id, NdRange, Range};

/// Stack size for work-item threads of barrier launches.
const WORK_ITEM_STACK_SIZE: usize = 256 * 1024;

/// In-order kernel queue running on the host CPU.
///
/// Work-groups are the unit of parallelism: they are spread over a rayon
/// pool and the work-items of one group run in order on the worker that
/// picked the group up. Launches whose work-items block on a group barrier
/// (`parallel_for_nd_local`) instead give every work-item of a group its
/// own thread and run one group at a time.
///
/// Kernels execute during the submitting call, so a returned [`Event`] is
/// already complete. Failures are still reported asynchronously: a
/// panicking work-item stops its submission, and the error waits in the
/// queue until [`KernelQueue::wait_and_throw`] or
/// [`KernelQueue::throw_asynchronous`] is called.
pub struct CpuQueue {
    /// Active configuration.
    config: QueueConfig,
    /// Selected device.
    device: DeviceInfo,
    /// Worker pool for group dispatch.
    pool: ThreadPool,
    /// Errors raised by kernels since the last wait.
    pending: Mutex<Vec<TileKernelError>>,
    /// Total kernels submitted.
    submissions: AtomicU64,
    /// Kernels that failed.
    failed: AtomicU64,
    /// Work-groups executed.
    groups_executed: AtomicU64,
    /// Kernel execution time in nanoseconds.
    busy_nanos: AtomicU64,
}

impl CpuQueue {
    /// Create a queue with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(QueueConfig::default())
    }

    /// Create a queue with a specific configuration.
    pub fn with_config(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let device = select_device(&config)?;

        let mut builder =
            ThreadPoolBuilder::new().thread_name(|i| format!("tilekernel-worker-{}", i));
        if config.worker_threads > 0 {
            builder = builder.num_threads(config.worker_threads);
        }
        let pool = builder
            .build()
            .map_err(|e| TileKernelError::ThreadPool(e.to_string()))?;

        info!(
            "Initializing CPU queue on '{}' ({} workers, max work-group {})",
            device.name,
            pool.current_num_threads(),
            device.max_work_group_size
        );

        Ok(Self {
            config,
            device,
            pool,
            pending: Mutex::new(Vec::new()),
            submissions: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            groups_executed: AtomicU64::new(0),
            busy_nanos: AtomicU64::new(0),
        })
    }

    /// Number of worker threads.
    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn check_group_size<const D: usize>(&self, nd_range: &NdRange<D>, limit: usize) -> Result<()> {
        if nd_range.local_size() > limit {
            return Err(TileKernelError::invalid_nd_range(format!(
                "work-group of {} items exceeds the limit of {}",
                nd_range.local_size(),
                limit
            )));
        }
        Ok(())
    }

    fn check_local_memory<T: Scalar, const D: usize>(&self, scratch: Range<D>) -> Result<()> {
        let requested = LocalMemory::<T, D>::bytes_for(scratch);
        if requested > self.device.local_memory_bytes {
            return Err(TileKernelError::OutOfLocalMemory {
                requested,
                available: self.device.local_memory_bytes,
            });
        }
        Ok(())
    }

    /// Run `run(index)` for every index in `0..count` on the pool, stopping
    /// at the first panic.
    fn dispatch<F>(&self, name: &str, count: usize, run: F) -> Result<()>
    where
        F: Fn(usize) + Sync,
    {
        self.pool.install(|| {
            (0..count).into_par_iter().try_for_each(|index| {
                catch_unwind(AssertUnwindSafe(|| run(index)))
                    .map(|()| {
                        self.groups_executed.fetch_add(1, Ordering::Relaxed);
                    })
                    .map_err(|payload| TileKernelError::from_panic(name, payload))
            })
        })
    }

    /// Run one group with a thread per work-item.
    fn run_threaded_group<T, const D: usize, F>(
        &self,
        name: &str,
        nd_range: &NdRange<D>,
        group_id: Id<D>,
        scratch: Range<D>,
        kernel: &F,
    ) -> Result<()>
    where
        T: Scalar,
        F: Fn(&NdItem<'_, D>, &LocalMemory<T, D>) + Sync,
    {
        let local = LocalMemory::<T, D>::new(scratch);
        let barrier = GroupBarrier::new(nd_range.local_size());
        let errors = Mutex::new(Vec::new());

        std::thread::scope(|s| {
            let (local, barrier, errors) = (&local, &barrier, &errors);

            for local_id in nd_range.local_range().iter() {
                let spawned = std::thread::Builder::new()
                    .stack_size(WORK_ITEM_STACK_SIZE)
                    .spawn_scoped(s, move || {
                        let group = Group::new(group_id, nd_range, Some(barrier));
                        let item = NdItem::new(*nd_range, group, local_id);

                        match catch_unwind(AssertUnwindSafe(|| kernel(&item, local))) {
                            Ok(()) => barrier.leave(),
                            Err(payload) => {
                                barrier.poison();
                                errors.lock().push(TileKernelError::from_panic(name, payload));
                            }
                        }
                    });

                if let Err(e) = spawned {
                    barrier.poison();
                    errors.lock().push(TileKernelError::ThreadPool(e.to_string()));
                    break;
                }
            }
        });

        self.groups_executed.fetch_add(1, Ordering::Relaxed);

        // Work-items released from a poisoned barrier report GroupAborted;
        // surface the failure that poisoned it.
        let mut errors = errors.into_inner();
        match errors
            .iter()
            .position(|e| *e != TileKernelError::GroupAborted)
        {
            Some(root) => Err(errors.swap_remove(root)),
            None => errors.into_iter().next().map_or(Ok(()), Err),
        }
    }

    /// Account for a finished submission and build its event.
    fn complete(
        &self,
        name: &str,
        started: Instant,
        work_groups: usize,
        work_items: usize,
        outcome: Result<()>,
    ) -> Event {
        let duration = started.elapsed();
        self.submissions.fetch_add(1, Ordering::Relaxed);
        self.busy_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);

        let status = match outcome {
            Ok(()) => EventStatus::Complete,
            Err(err) => {
                error!("Kernel '{}' failed: {}", name, err);
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.pending.lock().push(err);
                EventStatus::Failed
            }
        };

        debug!(
            "Kernel '{}' finished ({:?}): {} items in {} groups, {:?}",
            name, status, work_items, work_groups, duration
        );

        Event {
            kernel: name.to_string(),
            status,
            duration,
            work_groups,
            work_items,
        }
    }

    fn take_pending(&self) -> Vec<TileKernelError> {
        std::mem::take(&mut *self.pending.lock())
    }
}

impl KernelQueue for CpuQueue {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn parallel_for<const D: usize, F>(&self, name: &str, range: Range<D>, kernel: F) -> Result<Event>
    where
        F: Fn(Item<D>) + Sync,
    {
        let size = range.size();
        let chunk = self.config.flat_chunk_size;
        let chunks = size.div_ceil(chunk);

        debug!(
            "Launching '{}' over {} ({} chunks of {})",
            name, range, chunks, chunk
        );

        let started = Instant::now();
        let outcome = self.dispatch(name, chunks, |c| {
            let start = c * chunk;
            let end = (start + chunk).min(size);
            for linear in start..end {
                kernel(Item::new(range.delinearize(linear), range));
            }
        });

        Ok(self.complete(name, started, chunks, size, outcome))
    }

    fn parallel_for_nd<const D: usize, F>(
        &self,
        name: &str,
        nd_range: NdRange<D>,
        kernel: F,
    ) -> Result<Event>
    where
        F: Fn(&NdItem<'_, D>) + Sync,
    {
        self.check_group_size(&nd_range, self.device.max_work_group_size)?;

        debug!("Launching '{}' over {}", name, nd_range);

        let groups = nd_range.group_range();
        let local_range = nd_range.local_range();
        let started = Instant::now();
        let outcome = self.dispatch(name, nd_range.group_count(), |g| {
            let group = Group::new(groups.delinearize(g), &nd_range, None);
            for local_id in local_range.iter() {
                kernel(&NdItem::new(nd_range, group, local_id));
            }
        });

        Ok(self.complete(
            name,
            started,
            nd_range.group_count(),
            nd_range.global_range().size(),
            outcome,
        ))
    }

    fn parallel_for_work_group<T, const D: usize, F>(
        &self,
        name: &str,
        nd_range: NdRange<D>,
        scratch: Range<D>,
        kernel: F,
    ) -> Result<Event>
    where
        T: Scalar,
        F: Fn(&mut GroupScope<'_, T, D>) + Sync,
    {
        self.check_group_size(&nd_range, self.device.max_work_group_size)?;
        self.check_local_memory::<T, D>(scratch)?;

        debug!(
            "Launching '{}' over {} with local memory {}",
            name, nd_range, scratch
        );

        let groups = nd_range.group_range();
        let started = Instant::now();
        let outcome = self.dispatch(name, nd_range.group_count(), |g| {
            let local = LocalMemory::<T, D>::new(scratch);
            let group = Group::new(groups.delinearize(g), &nd_range, None);
            let mut scope = GroupScope::new(nd_range, group, &local);
            kernel(&mut scope);
        });

        Ok(self.complete(
            name,
            started,
            nd_range.group_count(),
            nd_range.global_range().size(),
            outcome,
        ))
    }

    fn parallel_for_nd_local<T, const D: usize, F>(
        &self,
        name: &str,
        nd_range: NdRange<D>,
        scratch: Range<D>,
        kernel: F,
    ) -> Result<Event>
    where
        T: Scalar,
        F: Fn(&NdItem<'_, D>, &LocalMemory<T, D>) + Sync,
    {
        let limit = self
            .config
            .max_threaded_group_size
            .min(self.device.max_work_group_size);
        self.check_group_size(&nd_range, limit)?;
        self.check_local_memory::<T, D>(scratch)?;

        debug!(
            "Launching '{}' over {} with local memory {} (thread per work-item)",
            name, nd_range, scratch
        );

        let groups = nd_range.group_range();
        let started = Instant::now();
        let outcome = (0..nd_range.group_count()).try_for_each(|g| {
            self.run_threaded_group(name, &nd_range, groups.delinearize(g), scratch, &kernel)
        });

        Ok(self.complete(
            name,
            started,
            nd_range.group_count(),
            nd_range.global_range().size(),
            outcome,
        ))
    }

    fn wait(&self) {
        for err in self.take_pending() {
            warn!("Discarding asynchronous error: {}", err);
        }
    }

    fn wait_and_throw(&self) -> Result<()> {
        self.throw_asynchronous()
    }

    fn throw_asynchronous(&self) -> Result<()> {
        let errors = self.take_pending();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TileKernelError::Async(errors))
        }
    }

    fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            submissions: self.submissions.load(Ordering::Relaxed),
            failed_submissions: self.failed.load(Ordering::Relaxed),
            work_groups_executed: self.groups_executed.load(Ordering::Relaxed),
            busy_time: Duration::from_nanos(self.busy_nanos.load(Ordering::Relaxed)),
            pending_errors: self.pending.lock().len(),
        }
    }
}

impl fmt::Debug for CpuQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuQueue")
            .field("device", &self.device.name)
            .field("worker_threads", &self.worker_threads())
            .field("pending_errors", &self.pending.lock().len())
            .finish()
    }
}

impl Drop for CpuQueue {
    fn drop(&mut self) {
        let pending = self.pending.get_mut();
        if !pending.is_empty() {
            warn!(
                "CPU queue dropped with {} unreported asynchronous error(s)",
                pending.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilekernel_core::device::{DeviceSelector, DeviceType};

    fn queue() -> CpuQueue {
        CpuQueue::with_config(QueueConfig::new().with_worker_threads(2)).unwrap()
    }

    #[test]
    fn test_queue_creation() {
        let queue = queue();
        assert_eq!(queue.device().device_type, DeviceType::Cpu);
        assert_eq!(queue.worker_threads(), 2);
        assert_eq!(queue.metrics(), QueueMetrics::default());
    }

    #[test]
    fn test_debug_output() {
        let queue = queue();
        let debug = format!("{:?}", queue);
        assert!(debug.starts_with("CpuQueue"));
        assert!(debug.contains("worker_threads: 2"));
        assert!(debug.contains("pending_errors: 0"));
    }

    #[test]
    fn test_gpu_selector_unavailable() {
        let result = CpuQueue::with_config(QueueConfig::new().with_selector(DeviceSelector::Gpu));
        assert!(matches!(result, Err(TileKernelError::NoDevice(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = CpuQueue::with_config(QueueConfig::new().with_flat_chunk_size(0));
        assert!(matches!(result, Err(TileKernelError::InvalidConfig(_))));
    }

    #[test]
    fn test_flat_launch_uneven_chunks() {
        let queue = CpuQueue::with_config(
            QueueConfig::new()
                .with_worker_threads(2)
                .with_flat_chunk_size(64),
        )
        .unwrap();
        let range = Range::new([1000]).unwrap();
        let out = tilekernel_core::Buffer::<u32, 1>::new(range);
        let acc = out.write_only();

        let event = queue
            .parallel_for("iota", range, |item| {
                acc.write(item.id(), item.linear_id() as u32)
            })
            .unwrap();
        queue.wait_and_throw().unwrap();

        assert!(event.is_complete());
        assert_eq!(event.work_groups, 16);
        assert_eq!(out.to_vec(), (0..1000).collect::<Vec<u32>>());
    }

    #[test]
    fn test_panic_becomes_async_error() {
        let queue = queue();
        let range = Range::new([8]).unwrap();
        let out = tilekernel_core::Buffer::<f32, 1>::new(range);
        let acc = out.write_only();

        let event = queue
            .parallel_for("out_of_bounds", range, |item| {
                acc.write(Id::new([item.id()[0] + 8]), 1.0)
            })
            .unwrap();

        assert_eq!(event.status, EventStatus::Failed);
        assert_eq!(queue.metrics().pending_errors, 1);

        let err = queue.wait_and_throw().unwrap_err();
        let errors = err.flatten();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            TileKernelError::KernelPanicked { kernel, .. } if kernel == "out_of_bounds"
        ));

        assert!(queue.wait_and_throw().is_ok());
        assert_eq!(queue.metrics().failed_submissions, 1);
    }

    #[test]
    fn test_wait_discards_errors() {
        let queue = queue();
        let range = Range::new([4]).unwrap();
        queue
            .parallel_for("boom", range, |_| panic!("boom"))
            .unwrap();

        queue.wait();
        assert!(queue.throw_asynchronous().is_ok());
    }

    #[test]
    fn test_group_size_limit() {
        let queue = CpuQueue::with_config(QueueConfig::new().with_max_work_group_size(64)).unwrap();
        let nd = NdRange::new(Range::new([256]).unwrap(), Range::new([128]).unwrap()).unwrap();

        let result = queue.parallel_for_nd("too_big", nd, |_| {});
        assert!(matches!(result, Err(TileKernelError::InvalidNdRange(_))));
        assert_eq!(queue.metrics().submissions, 0);
    }

    #[test]
    fn test_local_memory_limit() {
        let queue = CpuQueue::with_config(QueueConfig::new().with_local_memory_bytes(512)).unwrap();
        let nd = NdRange::new(Range::new([32, 32]).unwrap(), Range::new([16, 16]).unwrap()).unwrap();

        let result =
            queue.parallel_for_work_group::<f32, 2, _>("scratch", nd, nd.local_range(), |_| {});
        assert_eq!(
            result.unwrap_err(),
            TileKernelError::OutOfLocalMemory {
                requested: 1024,
                available: 512
            }
        );
    }

    #[test]
    fn test_threaded_barrier_rotation() {
        let queue = queue();
        let nd = NdRange::new(Range::new([16]).unwrap(), Range::new([8]).unwrap()).unwrap();
        let out = tilekernel_core::Buffer::<u32, 1>::new(nd.global_range());
        let acc = out.write_only();

        queue
            .parallel_for_nd_local::<u32, 1, _>("rotate", nd, nd.local_range(), |item, local| {
                local.store(item, item.local_id(), item.global_linear_id() as u32);
                item.barrier();
                let next = Id::new([(item.local_id()[0] + 1) % 8]);
                acc.write(item.global_id(), local.load(item, next));
            })
            .unwrap();
        queue.wait_and_throw().unwrap();

        let expected: Vec<u32> = (0..16u32).map(|i| (i / 8) * 8 + (i % 8 + 1) % 8).collect();
        assert_eq!(out.to_vec(), expected);
        assert_eq!(queue.metrics().work_groups_executed, 2);
    }

    #[test]
    fn test_threaded_failure_reports_root_cause() {
        let queue = queue();
        let nd = NdRange::new(Range::new([4]).unwrap(), Range::new([4]).unwrap()).unwrap();

        queue
            .parallel_for_nd_local::<f32, 1, _>("fail_one", nd, nd.local_range(), |item, _| {
                if item.local_linear_id() == 2 {
                    panic!("work-item 2 failed");
                }
                item.barrier();
            })
            .unwrap();

        let errors = queue.wait_and_throw().unwrap_err().flatten();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            TileKernelError::KernelPanicked { message, .. } if message == "work-item 2 failed"
        ));
    }

    #[test]
    fn test_threaded_divergent_barrier() {
        let queue = queue();
        let nd = NdRange::new(Range::new([4]).unwrap(), Range::new([4]).unwrap()).unwrap();

        queue
            .parallel_for_nd_local::<f32, 1, _>("diverge", nd, nd.local_range(), |item, _| {
                if item.local_linear_id() != 0 {
                    item.barrier();
                }
            })
            .unwrap();

        let errors = queue.wait_and_throw().unwrap_err().flatten();
        assert!(matches!(
            errors[0],
            TileKernelError::BarrierDivergence { parties: 4, .. }
        ));
    }
}
