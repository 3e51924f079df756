//! Queue configuration.

use crate::device::DeviceSelector;
use crate::error::{Result, TileKernelError};

/// Default largest work-group, matching common GPU limits.
pub const DEFAULT_MAX_WORK_GROUP_SIZE: usize = 1024;

/// Default local memory per work-group (64 KiB).
pub const DEFAULT_LOCAL_MEMORY_BYTES: usize = 64 * 1024;

/// Default number of flat work-items handed to a worker at once.
pub const DEFAULT_FLAT_CHUNK_SIZE: usize = 4096;

/// Configuration for a kernel queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Device selector.
    pub selector: DeviceSelector,
    /// Worker threads for group dispatch (0 = one per core).
    pub worker_threads: usize,
    /// Largest accepted work-group.
    pub max_work_group_size: usize,
    /// Largest work-group for launches that give every work-item its own
    /// thread.
    pub max_threaded_group_size: usize,
    /// Local memory available per work-group in bytes.
    pub local_memory_bytes: usize,
    /// Work-items per task in flat launches.
    pub flat_chunk_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            selector: DeviceSelector::Default,
            worker_threads: 0,
            max_work_group_size: DEFAULT_MAX_WORK_GROUP_SIZE,
            max_threaded_group_size: DEFAULT_MAX_WORK_GROUP_SIZE,
            local_memory_bytes: DEFAULT_LOCAL_MEMORY_BYTES,
            flat_chunk_size: DEFAULT_FLAT_CHUNK_SIZE,
        }
    }
}

impl QueueConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device selector.
    pub fn with_selector(mut self, selector: DeviceSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Set the number of worker threads.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the largest accepted work-group.
    pub fn with_max_work_group_size(mut self, size: usize) -> Self {
        self.max_work_group_size = size;
        self
    }

    /// Set the largest work-group for thread-per-item launches.
    pub fn with_max_threaded_group_size(mut self, size: usize) -> Self {
        self.max_threaded_group_size = size;
        self
    }

    /// Set the local memory per work-group.
    pub fn with_local_memory_bytes(mut self, bytes: usize) -> Self {
        self.local_memory_bytes = bytes;
        self
    }

    /// Set the flat launch chunk size.
    pub fn with_flat_chunk_size(mut self, size: usize) -> Self {
        self.flat_chunk_size = size;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_work_group_size == 0 {
            return Err(TileKernelError::config("max_work_group_size must be > 0"));
        }
        if self.max_threaded_group_size == 0 {
            return Err(TileKernelError::config(
                "max_threaded_group_size must be > 0",
            ));
        }
        if self.local_memory_bytes == 0 {
            return Err(TileKernelError::config("local_memory_bytes must be > 0"));
        }
        if self.flat_chunk_size == 0 {
            return Err(TileKernelError::config("flat_chunk_size must be > 0"));
        }
        Ok(())
    }
}
