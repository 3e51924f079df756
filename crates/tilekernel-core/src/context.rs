//! Work-item and work-group handles passed to kernels.
//!
//! A kernel sees its position in the index space through [`Item`] (flat
//! launches) or [`NdItem`] (nd-range launches). Work-items of one group can
//! synchronize through a [`GroupBarrier`]; hierarchical kernels get a
//! [`GroupScope`] instead and mark barriers between their work-item loops.

use std::cell::Cell;
use std::fmt;
use std::panic::panic_any;

use parking_lot::{Condvar, Mutex};

use crate::error::TileKernelError;
use crate::memory::{LocalMemory, Scalar};
use crate::types::{Id, NdRange, Range};

/// A work-item of a flat `parallel_for` launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item<const D: usize> {
    id: Id<D>,
    range: Range<D>,
}

impl<const D: usize> Item<D> {
    /// Create an item.
    pub fn new(id: Id<D>, range: Range<D>) -> Self {
        Self { id, range }
    }

    /// Position in the launch range.
    #[inline]
    pub fn id(&self) -> Id<D> {
        self.id
    }

    /// The launch range.
    #[inline]
    pub fn range(&self) -> Range<D> {
        self.range
    }

    /// Row-major linear id.
    #[inline]
    pub fn linear_id(&self) -> usize {
        self.range.linearize(self.id)
    }
}

/// Rendezvous point for the work-items of one group.
///
/// Unlike `std::sync::Barrier`, this barrier can be poisoned: when one
/// work-item fails, everyone blocked in [`GroupBarrier::wait`] is released
/// with [`TileKernelError::GroupAborted`] instead of waiting forever.
/// Work-items that finish report it through [`GroupBarrier::leave`], so a
/// barrier that can no longer fill up fails with
/// [`TileKernelError::BarrierDivergence`].
pub struct GroupBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

struct BarrierState {
    arrived: usize,
    departed: usize,
    generation: u64,
    poisoned: bool,
    divergent: bool,
}

impl GroupBarrier {
    /// Create a barrier for `parties` work-items.
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                departed: 0,
                generation: 0,
                poisoned: false,
                divergent: false,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Block until every work-item of the group has arrived.
    ///
    /// # Panics
    ///
    /// Panics with [`TileKernelError::GroupAborted`] if the barrier is
    /// poisoned, and with [`TileKernelError::BarrierDivergence`] if some
    /// work-items already finished without arriving.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        if state.poisoned {
            let err = self.abort_error(&state);
            drop(state);
            panic_any(err);
        }

        state.arrived += 1;
        if state.arrived + state.departed == self.parties {
            if state.departed == 0 {
                state.arrived = 0;
                state.generation = state.generation.wrapping_add(1);
                self.cvar.notify_all();
                return;
            }

            state.divergent = true;
            state.poisoned = true;
            self.cvar.notify_all();
            let err = self.abort_error(&state);
            drop(state);
            panic_any(err);
        }

        let generation = state.generation;
        while state.generation == generation && !state.poisoned {
            self.cvar.wait(&mut state);
        }

        if state.generation == generation {
            let err = self.abort_error(&state);
            drop(state);
            panic_any(err);
        }
    }

    /// Record that a work-item finished its kernel body.
    pub fn leave(&self) {
        let mut state = self.state.lock();
        state.departed += 1;
        if state.arrived > 0 && state.arrived + state.departed == self.parties {
            state.divergent = true;
            state.poisoned = true;
            self.cvar.notify_all();
        }
    }

    /// Release all waiters and make future waits fail.
    pub fn poison(&self) {
        let mut state = self.state.lock();
        state.poisoned = true;
        self.cvar.notify_all();
    }

    /// Check if the barrier has been poisoned.
    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned
    }

    fn abort_error(&self, state: &BarrierState) -> TileKernelError {
        if state.divergent {
            TileKernelError::BarrierDivergence {
                arrived: state.arrived,
                parties: self.parties,
            }
        } else {
            TileKernelError::GroupAborted
        }
    }
}

impl fmt::Debug for GroupBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupBarrier")
            .field("parties", &self.parties)
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

/// A work-group within an nd-range launch.
#[derive(Debug, Clone, Copy)]
pub struct Group<'a, const D: usize> {
    id: Id<D>,
    group_range: Range<D>,
    local_range: Range<D>,
    barrier: Option<&'a GroupBarrier>,
}

impl<'a, const D: usize> Group<'a, D> {
    /// Create a group handle for group `id` of `nd_range`.
    pub fn new(id: Id<D>, nd_range: &NdRange<D>, barrier: Option<&'a GroupBarrier>) -> Self {
        Self {
            id,
            group_range: nd_range.group_range(),
            local_range: nd_range.local_range(),
            barrier,
        }
    }

    /// Group id.
    #[inline]
    pub fn id(&self) -> Id<D> {
        self.id
    }

    /// Number of groups in each dimension.
    #[inline]
    pub fn group_range(&self) -> Range<D> {
        self.group_range
    }

    /// Work-items per group in each dimension.
    #[inline]
    pub fn local_range(&self) -> Range<D> {
        self.local_range
    }

    /// Row-major linear group id.
    #[inline]
    pub fn linear_id(&self) -> usize {
        self.group_range.linearize(self.id)
    }

    /// Global id of this group's first work-item.
    #[inline]
    pub fn offset(&self) -> Id<D> {
        self.id * self.local_range
    }

    /// Whether work-items of this group can block on a barrier.
    #[inline]
    pub fn has_barrier(&self) -> bool {
        self.barrier.is_some()
    }
}

/// A work-item of an nd-range launch.
///
/// Carries its barrier epoch: the number of group barriers it has passed.
/// Local memory uses the epoch to detect reads that were not separated
/// from the matching write by a barrier.
#[derive(Debug)]
pub struct NdItem<'a, const D: usize> {
    global_id: Id<D>,
    local_id: Id<D>,
    group: Group<'a, D>,
    nd_range: NdRange<D>,
    epoch: Cell<u32>,
}

impl<'a, const D: usize> NdItem<'a, D> {
    /// Create the work-item at `local_id` inside `group`.
    pub fn new(nd_range: NdRange<D>, group: Group<'a, D>, local_id: Id<D>) -> Self {
        Self {
            global_id: group.offset() + local_id,
            local_id,
            group,
            nd_range,
            epoch: Cell::new(0),
        }
    }

    /// Start the item at a given barrier epoch.
    pub fn with_epoch(self, epoch: u32) -> Self {
        self.epoch.set(epoch);
        self
    }

    /// Position in the global range.
    #[inline]
    pub fn global_id(&self) -> Id<D> {
        self.global_id
    }

    /// Position within the work-group.
    #[inline]
    pub fn local_id(&self) -> Id<D> {
        self.local_id
    }

    /// The enclosing work-group.
    #[inline]
    pub fn group(&self) -> &Group<'a, D> {
        &self.group
    }

    /// Id of the enclosing work-group.
    #[inline]
    pub fn group_id(&self) -> Id<D> {
        self.group.id
    }

    /// The launch nd-range.
    #[inline]
    pub fn nd_range(&self) -> NdRange<D> {
        self.nd_range
    }

    /// Global range of the launch.
    #[inline]
    pub fn global_range(&self) -> Range<D> {
        self.nd_range.global_range()
    }

    /// Work-group range of the launch.
    #[inline]
    pub fn local_range(&self) -> Range<D> {
        self.nd_range.local_range()
    }

    /// Row-major linear global id.
    #[inline]
    pub fn global_linear_id(&self) -> usize {
        self.nd_range.global_range().linearize(self.global_id)
    }

    /// Row-major linear id within the group.
    #[inline]
    pub fn local_linear_id(&self) -> usize {
        self.nd_range.local_range().linearize(self.local_id)
    }

    /// Number of group barriers passed so far.
    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch.get()
    }

    /// Wait until every work-item of the group reaches this point.
    ///
    /// # Panics
    ///
    /// Panics with [`TileKernelError::BarrierUnavailable`] when the launch
    /// runs work-items independently (`parallel_for_nd`), and with
    /// [`TileKernelError::GroupAborted`] when another work-item failed.
    pub fn barrier(&self) {
        match self.group.barrier {
            Some(barrier) => {
                barrier.wait();
                self.epoch.set(self.epoch.get() + 1);
            }
            None => panic_any(TileKernelError::BarrierUnavailable(
                "this launch runs work-items independently; use a local-memory launch".to_string(),
            )),
        }
    }
}

/// Group-level view of a hierarchical launch.
///
/// The kernel runs once per work-group. Each [`GroupScope::for_each_item`]
/// call runs the body for every work-item of the group and returns only
/// after all of them finished; [`GroupScope::barrier`] separates two such
/// loops so the second may read what the first staged in local memory.
pub struct GroupScope<'a, T: Scalar, const D: usize> {
    nd_range: NdRange<D>,
    group: Group<'a, D>,
    local: &'a LocalMemory<T, D>,
    epoch: u32,
}

impl<'a, T: Scalar, const D: usize> GroupScope<'a, T, D> {
    /// Create a scope for one group.
    pub fn new(nd_range: NdRange<D>, group: Group<'a, D>, local: &'a LocalMemory<T, D>) -> Self {
        Self {
            nd_range,
            group,
            local,
            epoch: 0,
        }
    }

    /// The work-group.
    pub fn group(&self) -> &Group<'a, D> {
        &self.group
    }

    /// Barriers passed so far.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Run `body` for every work-item of the group, in row-major order of
    /// local ids.
    pub fn for_each_item<F>(&self, mut body: F)
    where
        F: FnMut(&NdItem<'a, D>, &LocalMemory<T, D>),
    {
        for local_id in self.nd_range.local_range().iter() {
            let item = NdItem::new(self.nd_range, self.group, local_id).with_epoch(self.epoch);
            body(&item, self.local);
        }
    }

    /// Group barrier between two work-item loops.
    pub fn barrier(&mut self) {
        self.epoch += 1;
    }
}
