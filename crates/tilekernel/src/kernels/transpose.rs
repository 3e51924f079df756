//! Square matrix transpose.
//!
//! The naive kernel reads element `(i, j)` and writes it to `(j, i)`, so
//! one side of every access is strided. The tiled kernel stages a tile in
//! local memory first: each work-item copies its element into the tile,
//! the group barrier guarantees the whole tile is staged, and each
//! work-item then writes the transposed tile position to the transposed
//! tile offset. Both sides of the global traffic stay contiguous within a
//! row of the tile.
//!
//! The tiled algorithm runs in two forms that must agree bit for bit:
//! [`transpose_tiled`] drives the group as two item loops separated by an
//! explicit barrier, and [`transpose_tiled_threaded`] gives every
//! work-item its own thread and a real barrier.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use tilekernel_core::error::{Result, TileKernelError};
use tilekernel_core::memory::{Buffer, Scalar};
use tilekernel_core::queue::{Event, KernelQueue};
use tilekernel_core::types::{NdRange, Range};

/// Default matrix dimension.
pub const DEFAULT_SIZE: usize = 8192;

/// Default tile edge.
pub const DEFAULT_TILE: usize = 32;

/// Default benchmark iterations.
pub const DEFAULT_ITERATIONS: usize = 100;

/// Transpose kernel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransposeStrategy {
    /// Direct index swap, one work-item per element.
    Naive,
    /// Tile staged in local memory, hierarchical group execution.
    Tiled,
    /// Tile staged in local memory, one thread per work-item.
    TiledThreaded,
}

impl TransposeStrategy {
    /// All strategies.
    pub const ALL: [TransposeStrategy; 3] = [Self::Naive, Self::Tiled, Self::TiledThreaded];

    /// Kernel name used in events and logs.
    pub fn kernel_name(&self) -> &'static str {
        match self {
            Self::Naive => "transpose_naive",
            Self::Tiled => "transpose_tiled",
            Self::TiledThreaded => "transpose_tiled_threaded",
        }
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Naive => "Naive matrix transpose",
            Self::Tiled => "Tiled local memory matrix transpose",
            Self::TiledThreaded => "Tiled local memory matrix transpose (threaded barrier)",
        }
    }
}

impl fmt::Display for TransposeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Naive => write!(f, "naive"),
            Self::Tiled => write!(f, "tiled"),
            Self::TiledThreaded => write!(f, "tiled-threaded"),
        }
    }
}

impl FromStr for TransposeStrategy {
    type Err = TileKernelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "naive" => Ok(Self::Naive),
            "tiled" => Ok(Self::Tiled),
            "tiled-threaded" | "threaded" => Ok(Self::TiledThreaded),
            other => Err(TileKernelError::config(format!(
                "unknown transpose strategy '{}'",
                other
            ))),
        }
    }
}

/// Transpose parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransposeConfig {
    /// Matrix dimension N of an N x N matrix.
    pub size: usize,
    /// Tile edge; tiles are `tile x tile` work-groups.
    pub tile: usize,
    /// Benchmark iterations per strategy.
    pub iterations: usize,
}

impl Default for TransposeConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            tile: DEFAULT_TILE,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl TransposeConfig {
    /// Set the matrix dimension.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the tile edge.
    pub fn with_tile(mut self, tile: usize) -> Self {
        self.tile = tile;
        self
    }

    /// Set the benchmark iterations.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(TileKernelError::config("iterations must be > 0"));
        }
        nd_range(self.size, self.tile).map(|_| ())
    }

    /// Launch shape for this configuration.
    pub fn nd_range(&self) -> Result<NdRange<2>> {
        nd_range(self.size, self.tile)
    }
}

fn nd_range(n: usize, tile: usize) -> Result<NdRange<2>> {
    NdRange::new(Range::new([n, n])?, Range::new([tile, tile])?)
}

/// Check that `input` is square and `output` has the same shape, and
/// return the launch shape.
fn launch_shape<T: Scalar>(
    input: &Buffer<T, 2>,
    output: &Buffer<T, 2>,
    tile: usize,
) -> Result<NdRange<2>> {
    let range = input.range();
    if range.get(0) != range.get(1) {
        return Err(TileKernelError::config(format!(
            "transpose needs a square matrix, got {}",
            range
        )));
    }
    if output.range() != range {
        return Err(TileKernelError::size_mismatch(range.size(), output.len()));
    }
    nd_range(range.get(0), tile)
}

/// Reference transpose of a row-major `n x n` matrix on the host.
pub fn transpose_reference<T: Copy>(data: &[T], n: usize) -> Result<Vec<T>> {
    if data.len() != n * n {
        return Err(TileKernelError::size_mismatch(n * n, data.len()));
    }
    Ok((0..n * n).map(|k| data[(k % n) * n + k / n]).collect())
}

/// Index of the first element where `actual` differs from `expected`.
///
/// A length difference counts as a mismatch at the end of the shorter
/// slice.
pub fn first_mismatch<T: PartialEq>(actual: &[T], expected: &[T]) -> Option<usize> {
    actual
        .iter()
        .zip(expected)
        .position(|(x, y)| x != y)
        .or_else(|| (actual.len() != expected.len()).then(|| actual.len().min(expected.len())))
}

/// Submit the naive transpose of `input` into `output`.
///
/// `tile` only sets the work-group shape; no local memory is used.
pub fn transpose_naive<T, Q>(
    queue: &Q,
    input: &Buffer<T, 2>,
    output: &Buffer<T, 2>,
    tile: usize,
) -> Result<Event>
where
    T: Scalar,
    Q: KernelQueue,
{
    let nd_range = launch_shape(input, output, tile)?;
    let (src, dst) = (input.read_only(), output.write_only_no_init());

    queue.parallel_for_nd(
        TransposeStrategy::Naive.kernel_name(),
        nd_range,
        move |item| {
            let id = item.global_id();
            dst.write(id.transposed(), src.read(id));
        },
    )
}

/// Submit the tiled transpose of `input` into `output`, running each
/// group as a staging loop and a write-out loop around one barrier.
pub fn transpose_tiled<T, Q>(
    queue: &Q,
    input: &Buffer<T, 2>,
    output: &Buffer<T, 2>,
    tile: usize,
) -> Result<Event>
where
    T: Scalar,
    Q: KernelQueue,
{
    let nd_range = launch_shape(input, output, tile)?;
    let (src, dst) = (input.read_only(), output.write_only_no_init());

    queue.parallel_for_work_group::<T, 2, _>(
        TransposeStrategy::Tiled.kernel_name(),
        nd_range,
        nd_range.local_range(),
        move |scope| {
            scope.for_each_item(|item, local| {
                local.store(item, item.local_id(), src.read(item.global_id()));
            });

            scope.barrier();

            scope.for_each_item(|item, local| {
                let offset = item.group_id().transposed() * item.local_range();
                dst.write(
                    offset + item.local_id(),
                    local.load(item, item.local_id().transposed()),
                );
            });
        },
    )
}

/// Submit the tiled transpose of `input` into `output` with one thread per
/// work-item synchronizing on the group barrier.
///
/// Work-groups of `tile * tile` threads run one at a time, so this form
/// is meant for checking barrier behavior rather than for speed.
pub fn transpose_tiled_threaded<T, Q>(
    queue: &Q,
    input: &Buffer<T, 2>,
    output: &Buffer<T, 2>,
    tile: usize,
) -> Result<Event>
where
    T: Scalar,
    Q: KernelQueue,
{
    let nd_range = launch_shape(input, output, tile)?;
    let (src, dst) = (input.read_only(), output.write_only_no_init());

    queue.parallel_for_nd_local::<T, 2, _>(
        TransposeStrategy::TiledThreaded.kernel_name(),
        nd_range,
        nd_range.local_range(),
        move |item, local| {
            local.store(item, item.local_id(), src.read(item.global_id()));

            item.barrier();

            let offset = item.group_id().transposed() * item.local_range();
            dst.write(
                offset + item.local_id(),
                local.load(item, item.local_id().transposed()),
            );
        },
    )
}

/// Submit the transpose of `input` into `output` with `strategy`.
pub fn submit_transpose<T, Q>(
    queue: &Q,
    strategy: TransposeStrategy,
    input: &Buffer<T, 2>,
    output: &Buffer<T, 2>,
    tile: usize,
) -> Result<Event>
where
    T: Scalar,
    Q: KernelQueue,
{
    match strategy {
        TransposeStrategy::Naive => transpose_naive(queue, input, output, tile),
        TransposeStrategy::Tiled => transpose_tiled(queue, input, output, tile),
        TransposeStrategy::TiledThreaded => transpose_tiled_threaded(queue, input, output, tile),
    }
}

/// Transpose a row-major `n x n` matrix and wait for the result.
pub fn transpose<T, Q>(
    queue: &Q,
    strategy: TransposeStrategy,
    data: &[T],
    n: usize,
    tile: usize,
) -> Result<Vec<T>>
where
    T: Scalar,
    Q: KernelQueue,
{
    let range = Range::new([n, n])?;
    let input = Buffer::from_slice(data, range)?;
    let output = Buffer::<T, 2>::new(range);

    let event = submit_transpose(queue, strategy, &input, &output, tile)?;
    queue.wait_and_throw()?;

    debug!("{}", event);
    Ok(output.to_vec())
}
