//! Buffers, accessors and group-local scratch memory.
//!
//! Buffers own their elements as atomic cells, so work-items running on
//! different threads may write distinct elements through a shared
//! accessor without `unsafe`. Relaxed ordering is enough: submissions
//! finish (and join their workers) before the host reads a buffer back,
//! and group barriers order local memory traffic inside a group.

use std::fmt;
use std::marker::PhantomData;
use std::panic::panic_any;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::context::NdItem;
use crate::error::{Result, TileKernelError};
use crate::types::{Id, Range};

/// Element types that can live in a [`Buffer`] or [`LocalMemory`].
pub trait Scalar: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Atomic storage cell for one element.
    type Cell: Send + Sync;

    /// Create a cell holding `value`.
    fn new_cell(value: Self) -> Self::Cell;

    /// Read a cell.
    fn load(cell: &Self::Cell) -> Self;

    /// Write a cell.
    fn store(cell: &Self::Cell, value: Self);
}

macro_rules! impl_scalar_int {
    ($($ty:ty => $atomic:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                type Cell = $atomic;

                #[inline]
                fn new_cell(value: Self) -> $atomic {
                    <$atomic>::new(value)
                }

                #[inline]
                fn load(cell: &$atomic) -> Self {
                    cell.load(Ordering::Relaxed)
                }

                #[inline]
                fn store(cell: &$atomic, value: Self) {
                    cell.store(value, Ordering::Relaxed)
                }
            }
        )*
    };
}

macro_rules! impl_scalar_float {
    ($($ty:ty => $atomic:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                type Cell = $atomic;

                #[inline]
                fn new_cell(value: Self) -> $atomic {
                    <$atomic>::new(value.to_bits())
                }

                #[inline]
                fn load(cell: &$atomic) -> Self {
                    <$ty>::from_bits(cell.load(Ordering::Relaxed))
                }

                #[inline]
                fn store(cell: &$atomic, value: Self) {
                    cell.store(value.to_bits(), Ordering::Relaxed)
                }
            }
        )*
    };
}

impl_scalar_int!(i32 => AtomicI32, u32 => AtomicU32, i64 => AtomicI64, u64 => AtomicU64);
impl_scalar_float!(f32 => AtomicU32, f64 => AtomicU64);

mod sealed {
    pub trait Sealed {}
}

/// Access intent of an [`Accessor`].
pub trait AccessMode: sealed::Sealed + Send + Sync + 'static {
    /// Mode name for logs.
    const NAME: &'static str;
}

/// Modes that allow reading.
pub trait Readable: AccessMode {}

/// Modes that allow writing.
pub trait Writable: AccessMode {}

/// Read-only access.
#[derive(Debug, Clone, Copy)]
pub struct ReadOnly;

/// Write-only access.
#[derive(Debug, Clone, Copy)]
pub struct WriteOnly;

/// Read-write access.
#[derive(Debug, Clone, Copy)]
pub struct ReadWrite;

impl sealed::Sealed for ReadOnly {}
impl sealed::Sealed for WriteOnly {}
impl sealed::Sealed for ReadWrite {}

impl AccessMode for ReadOnly {
    const NAME: &'static str = "read_only";
}

impl AccessMode for WriteOnly {
    const NAME: &'static str = "write_only";
}

impl AccessMode for ReadWrite {
    const NAME: &'static str = "read_write";
}

impl Readable for ReadOnly {}
impl Readable for ReadWrite {}
impl Writable for WriteOnly {}
impl Writable for ReadWrite {}

/// Device buffer of `T` over a `D`-dimensional range.
pub struct Buffer<T: Scalar, const D: usize> {
    range: Range<D>,
    cells: Box<[T::Cell]>,
}

impl<T: Scalar, const D: usize> Buffer<T, D> {
    /// Create a buffer with every element set to `T::default()`.
    pub fn new(range: Range<D>) -> Self {
        Self::from_fn(range, |_| T::default())
    }

    /// Create a buffer initialized from host data.
    pub fn from_slice(data: &[T], range: Range<D>) -> Result<Self> {
        if data.len() != range.size() {
            return Err(TileKernelError::size_mismatch(range.size(), data.len()));
        }

        Ok(Self {
            range,
            cells: data.iter().map(|&v| T::new_cell(v)).collect(),
        })
    }

    /// Create a buffer whose element at each row-major linear index is
    /// `init(index)`.
    pub fn from_fn(range: Range<D>, mut init: impl FnMut(usize) -> T) -> Self {
        Self {
            range,
            cells: (0..range.size()).map(|i| T::new_cell(init(i))).collect(),
        }
    }

    /// Buffer range.
    #[inline]
    pub fn range(&self) -> Range<D> {
        self.range
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always false: ranges have non-zero extents.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Size of the element data in bytes.
    pub fn size_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<T>()
    }

    /// Read-only accessor.
    pub fn read_only(&self) -> Accessor<'_, T, D, ReadOnly> {
        Accessor::new(self)
    }

    /// Write-only accessor keeping the current contents.
    pub fn write_only(&self) -> Accessor<'_, T, D, WriteOnly> {
        Accessor::new(self)
    }

    /// Write-only accessor that discards the current contents.
    ///
    /// Elements the kernel does not write read back as `T::default()`.
    pub fn write_only_no_init(&self) -> Accessor<'_, T, D, WriteOnly> {
        self.fill(T::default());
        Accessor::new(self)
    }

    /// Read-write accessor.
    pub fn read_write(&self) -> Accessor<'_, T, D, ReadWrite> {
        Accessor::new(self)
    }

    /// Set every element to `value`.
    pub fn fill(&self, value: T) {
        for cell in self.cells.iter() {
            T::store(cell, value);
        }
    }

    /// Copy the contents to a new vector.
    pub fn to_vec(&self) -> Vec<T> {
        self.cells.iter().map(T::load).collect()
    }

    /// Copy the contents into host memory of the same length.
    pub fn copy_to_host(&self, out: &mut [T]) -> Result<()> {
        if out.len() != self.len() {
            return Err(TileKernelError::size_mismatch(self.len(), out.len()));
        }
        for (dst, cell) in out.iter_mut().zip(self.cells.iter()) {
            *dst = T::load(cell);
        }
        Ok(())
    }

    #[inline]
    fn checked_linear(&self, id: Id<D>) -> usize {
        if !self.range.contains(id) {
            panic!("buffer index {} out of range {}", id, self.range);
        }
        self.range.linearize(id)
    }

    #[inline]
    fn cell(&self, linear: usize) -> &T::Cell {
        match self.cells.get(linear) {
            Some(cell) => cell,
            None => panic!(
                "buffer linear index {} out of range {}",
                linear,
                self.cells.len()
            ),
        }
    }
}

impl<T: Scalar, const D: usize> fmt::Debug for Buffer<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("type", &std::any::type_name::<T>())
            .field("range", &self.range)
            .finish()
    }
}

/// Typed view of a [`Buffer`] used inside kernels.
///
/// `read` exists only for readable modes and `write` only for writable
/// ones. Out-of-range access panics, which the queue reports as an
/// asynchronous error.
pub struct Accessor<'a, T: Scalar, const D: usize, M: AccessMode> {
    buffer: &'a Buffer<T, D>,
    _mode: PhantomData<M>,
}

impl<'a, T: Scalar, const D: usize, M: AccessMode> Accessor<'a, T, D, M> {
    fn new(buffer: &'a Buffer<T, D>) -> Self {
        Self {
            buffer,
            _mode: PhantomData,
        }
    }

    /// Range of the underlying buffer.
    #[inline]
    pub fn range(&self) -> Range<D> {
        self.buffer.range
    }

    /// Access mode name.
    pub fn mode(&self) -> &'static str {
        M::NAME
    }
}

impl<'a, T: Scalar, const D: usize, M: Readable> Accessor<'a, T, D, M> {
    /// Read the element at `id`.
    #[inline]
    pub fn read(&self, id: Id<D>) -> T {
        T::load(self.buffer.cell(self.buffer.checked_linear(id)))
    }
}

impl<'a, T: Scalar, const D: usize, M: Writable> Accessor<'a, T, D, M> {
    /// Write the element at `id`.
    #[inline]
    pub fn write(&self, id: Id<D>, value: T) {
        T::store(self.buffer.cell(self.buffer.checked_linear(id)), value)
    }
}

impl<T: Scalar, const D: usize, M: AccessMode> Clone for Accessor<'_, T, D, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Scalar, const D: usize, M: AccessMode> Copy for Accessor<'_, T, D, M> {}

impl<T: Scalar, const D: usize, M: AccessMode> fmt::Debug for Accessor<'_, T, D, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("mode", &M::NAME)
            .field("range", &self.buffer.range)
            .finish()
    }
}

const UNWRITTEN: u64 = 0;

#[inline]
fn writer_tag(epoch: u32, writer: usize) -> u64 {
    (u64::from(epoch) << 32) | (writer as u64 + 1)
}

/// Scratch memory shared by the work-items of one group.
///
/// Allocated when a group starts and dropped when it finishes. Every slot
/// remembers which work-item wrote it last and in which barrier epoch.
/// Loading a slot that another work-item wrote in the reader's current
/// epoch, i.e. with no barrier in between, aborts the kernel with
/// [`TileKernelError::BarrierViolation`].
pub struct LocalMemory<T: Scalar, const D: usize> {
    range: Range<D>,
    cells: Box<[T::Cell]>,
    writers: Box<[AtomicU64]>,
}

impl<T: Scalar, const D: usize> LocalMemory<T, D> {
    /// Allocate scratch memory for `range` elements.
    pub fn new(range: Range<D>) -> Self {
        let size = range.size();
        Self {
            range,
            cells: (0..size).map(|_| T::new_cell(T::default())).collect(),
            writers: (0..size).map(|_| AtomicU64::new(UNWRITTEN)).collect(),
        }
    }

    /// Bytes needed for a local allocation of `range`.
    pub fn bytes_for(range: Range<D>) -> usize {
        range.size() * std::mem::size_of::<T>()
    }

    /// Scratch range.
    #[inline]
    pub fn range(&self) -> Range<D> {
        self.range
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> usize {
        Self::bytes_for(self.range)
    }

    /// Store `value` at `id` on behalf of `item`.
    #[inline]
    pub fn store(&self, item: &NdItem<'_, D>, id: Id<D>, value: T) {
        let slot = self.checked_linear(id);
        T::store(&self.cells[slot], value);
        self.writers[slot].store(
            writer_tag(item.epoch(), item.local_linear_id()),
            Ordering::Relaxed,
        );
    }

    /// Load the value at `id` on behalf of `item`.
    ///
    /// # Panics
    ///
    /// Panics with [`TileKernelError::BarrierViolation`] when another
    /// work-item wrote the slot after the last barrier `item` passed.
    #[inline]
    pub fn load(&self, item: &NdItem<'_, D>, id: Id<D>) -> T {
        let slot = self.checked_linear(id);
        let tag = self.writers[slot].load(Ordering::Relaxed);

        if tag != UNWRITTEN {
            let writer = (tag & u64::from(u32::MAX)) as usize - 1;
            let written_epoch = (tag >> 32) as u32;
            let reader = item.local_linear_id();
            if writer != reader && written_epoch >= item.epoch() {
                panic_any(TileKernelError::BarrierViolation {
                    reader,
                    writer,
                    slot,
                });
            }
        }

        T::load(&self.cells[slot])
    }

    #[inline]
    fn checked_linear(&self, id: Id<D>) -> usize {
        if !self.range.contains(id) {
            panic!("local memory index {} out of range {}", id, self.range);
        }
        self.range.linearize(id)
    }
}

impl<T: Scalar, const D: usize> fmt::Debug for LocalMemory<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMemory")
            .field("type", &std::any::type_name::<T>())
            .field("range", &self.range)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Group, GroupScope};
    use crate::types::NdRange;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_buffer_from_slice_size_check() {
        let range = Range::new([4]).unwrap();
        assert!(Buffer::from_slice(&[1.0f32, 2.0, 3.0], range).is_err());

        let buf = Buffer::from_slice(&[1.0f32, 2.0, 3.0, 4.0], range).unwrap();
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.size_bytes(), 16);
        assert_eq!(buf.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_accessor_modes() {
        let buf = Buffer::<i32, 2>::from_fn(Range::new([2, 3]).unwrap(), |i| i as i32);
        let rw = buf.read_write();
        assert_eq!(rw.mode(), "read_write");
        assert_eq!(rw.read(Id::new([1, 2])), 5);

        rw.write(Id::new([0, 1]), -7);
        assert_eq!(buf.read_only().read(Id::new([0, 1])), -7);
    }

    #[test]
    fn test_write_only_no_init_discards() {
        let buf = Buffer::<f64, 1>::from_fn(Range::new([3]).unwrap(), |i| i as f64 + 1.0);
        let out = buf.write_only_no_init();
        out.write(Id::new([2]), 9.5);
        assert_eq!(buf.to_vec(), vec![0.0, 0.0, 9.5]);
    }

    #[test]
    fn test_out_of_range_panics() {
        let buf = Buffer::<u32, 1>::new(Range::new([4]).unwrap());
        let acc = buf.read_only();
        let result = catch_unwind(AssertUnwindSafe(|| acc.read(Id::new([4]))));
        assert!(result.is_err());
    }

    #[test]
    fn test_copy_to_host() {
        let buf = Buffer::<u64, 1>::from_fn(Range::new([3]).unwrap(), |i| (i * 10) as u64);
        let mut out = [0u64; 3];
        buf.copy_to_host(&mut out).unwrap();
        assert_eq!(out, [0, 10, 20]);

        let mut short = [0u64; 2];
        assert!(buf.copy_to_host(&mut short).is_err());
    }

    #[test]
    fn test_local_read_after_barrier() {
        let nd = NdRange::new(Range::new([4]).unwrap(), Range::new([4]).unwrap()).unwrap();
        let local = LocalMemory::<f32, 1>::new(nd.local_range());
        let mut scope = GroupScope::new(nd, Group::new(Id::zero(), &nd, None), &local);

        scope.for_each_item(|item, local| {
            local.store(item, item.local_id(), item.local_linear_id() as f32)
        });
        scope.barrier();

        let mut seen = Vec::new();
        scope.for_each_item(|item, local| {
            seen.push(local.load(item, Id::new([3 - item.local_id()[0]])))
        });
        assert_eq!(seen, vec![3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_local_read_before_barrier_is_violation() {
        let nd = NdRange::new(Range::new([4]).unwrap(), Range::new([4]).unwrap()).unwrap();
        let local = LocalMemory::<f32, 1>::new(nd.local_range());
        let scope = GroupScope::new(nd, Group::new(Id::zero(), &nd, None), &local);

        scope.for_each_item(|item, local| local.store(item, item.local_id(), 1.0));

        let payload = catch_unwind(AssertUnwindSafe(|| {
            scope.for_each_item(|item, local| {
                local.load(item, Id::new([3 - item.local_id()[0]]));
            })
        }))
        .unwrap_err();

        assert_eq!(
            TileKernelError::from_panic("test", payload),
            TileKernelError::BarrierViolation {
                reader: 0,
                writer: 3,
                slot: 3
            }
        );
    }

    #[test]
    fn test_local_own_write_visible_without_barrier() {
        let nd = NdRange::new(Range::new([2]).unwrap(), Range::new([2]).unwrap()).unwrap();
        let local = LocalMemory::<u32, 1>::new(nd.local_range());
        let scope = GroupScope::new(nd, Group::new(Id::zero(), &nd, None), &local);

        scope.for_each_item(|item, local| {
            local.store(item, item.local_id(), 42);
            assert_eq!(local.load(item, item.local_id()), 42);
        });
        assert_eq!(local.size_bytes(), 8);
    }
}
