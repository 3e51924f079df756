//! Index space types.
//!
//! All index spaces are row-major: the last dimension varies fastest when
//! linearizing, so a `Range<2>` of `[rows, cols]` lays element `(i, j)` at
//! `i * cols + j`.

use std::fmt;
use std::ops::{Add, Index, Mul};

use crate::error::{Result, TileKernelError};

/// Maximum supported dimensionality.
pub const MAX_DIMS: usize = 3;

/// Extent of an index space in one to three dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range<const D: usize>([usize; D]);

impl<const D: usize> Range<D> {
    /// Create a range. Every extent must be non-zero.
    pub fn new(extents: [usize; D]) -> Result<Self> {
        if D == 0 || D > MAX_DIMS {
            return Err(TileKernelError::invalid_range(format!(
                "{} dimensions requested, supported are 1..={}",
                D, MAX_DIMS
            )));
        }
        if let Some(dim) = extents.iter().position(|&e| e == 0) {
            return Err(TileKernelError::invalid_range(format!(
                "extent of dimension {} is zero",
                dim
            )));
        }
        extents
            .iter()
            .try_fold(1usize, |acc, &e| acc.checked_mul(e))
            .ok_or_else(|| TileKernelError::invalid_range("element count overflows usize"))?;

        Ok(Self(extents))
    }

    /// Extent of one dimension.
    #[inline]
    pub fn get(&self, dim: usize) -> usize {
        self.0[dim]
    }

    /// All extents.
    #[inline]
    pub fn extents(&self) -> [usize; D] {
        self.0
    }

    /// Total number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    /// Check whether an id lies inside this range.
    #[inline]
    pub fn contains(&self, id: Id<D>) -> bool {
        id.0.iter().zip(self.0.iter()).all(|(i, e)| i < e)
    }

    /// Row-major linear index of `id`. The id must be inside the range.
    #[inline]
    pub fn linearize(&self, id: Id<D>) -> usize {
        let mut linear = 0;
        for dim in 0..D {
            linear = linear * self.0[dim] + id.0[dim];
        }
        linear
    }

    /// Inverse of [`Range::linearize`].
    #[inline]
    pub fn delinearize(&self, mut linear: usize) -> Id<D> {
        let mut id = [0; D];
        for dim in (0..D).rev() {
            id[dim] = linear % self.0[dim];
            linear /= self.0[dim];
        }
        Id(id)
    }

    /// Iterate every id in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = Id<D>> + '_ {
        (0..self.size()).map(move |linear| self.delinearize(linear))
    }
}

impl Range<2> {
    /// Range with both extents swapped.
    pub fn transposed(self) -> Self {
        Self([self.0[1], self.0[0]])
    }
}

impl<const D: usize> Index<usize> for Range<D> {
    type Output = usize;

    fn index(&self, dim: usize) -> &usize {
        &self.0[dim]
    }
}

impl<const D: usize> fmt::Display for Range<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_tuple(f, &self.0)
    }
}

/// A point in an index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<const D: usize>([usize; D]);

impl<const D: usize> Id<D> {
    /// Create an id.
    #[inline]
    pub const fn new(coords: [usize; D]) -> Self {
        Self(coords)
    }

    /// The origin.
    #[inline]
    pub const fn zero() -> Self {
        Self([0; D])
    }

    /// Coordinate along one dimension.
    #[inline]
    pub fn get(&self, dim: usize) -> usize {
        self.0[dim]
    }
}

impl Id<2> {
    /// Id with both coordinates swapped.
    #[inline]
    pub fn transposed(self) -> Self {
        Self([self.0[1], self.0[0]])
    }
}

impl<const D: usize> Index<usize> for Id<D> {
    type Output = usize;

    fn index(&self, dim: usize) -> &usize {
        &self.0[dim]
    }
}

impl<const D: usize> Add for Id<D> {
    type Output = Id<D>;

    fn add(self, rhs: Id<D>) -> Id<D> {
        let mut out = self.0;
        for (o, r) in out.iter_mut().zip(rhs.0) {
            *o += r;
        }
        Id(out)
    }
}

/// Component-wise scaling, e.g. `group_id * local_range` gives a group's
/// offset in the global range.
impl<const D: usize> Mul<Range<D>> for Id<D> {
    type Output = Id<D>;

    fn mul(self, rhs: Range<D>) -> Id<D> {
        let mut out = self.0;
        for (o, r) in out.iter_mut().zip(rhs.0) {
            *o *= r;
        }
        Id(out)
    }
}

impl<const D: usize> From<[usize; D]> for Id<D> {
    fn from(coords: [usize; D]) -> Self {
        Self(coords)
    }
}

impl<const D: usize> fmt::Display for Id<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_tuple(f, &self.0)
    }
}

fn write_tuple(f: &mut fmt::Formatter<'_>, values: &[usize]) -> fmt::Result {
    write!(f, "(")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", v)?;
    }
    write!(f, ")")
}

/// A global index space partitioned into equally sized work-groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange<const D: usize> {
    global: Range<D>,
    local: Range<D>,
    groups: Range<D>,
}

impl<const D: usize> NdRange<D> {
    /// Create an nd-range.
    ///
    /// Every global extent must be a multiple of the matching local extent.
    pub fn new(global: Range<D>, local: Range<D>) -> Result<Self> {
        let mut groups = [0; D];
        for dim in 0..D {
            if global.0[dim] % local.0[dim] != 0 {
                return Err(TileKernelError::invalid_nd_range(format!(
                    "global range {} is not divisible by local range {} in dimension {}",
                    global, local, dim
                )));
            }
            groups[dim] = global.0[dim] / local.0[dim];
        }

        Ok(Self {
            global,
            local,
            groups: Range(groups),
        })
    }

    /// Global range.
    #[inline]
    pub fn global_range(&self) -> Range<D> {
        self.global
    }

    /// Work-group (local) range.
    #[inline]
    pub fn local_range(&self) -> Range<D> {
        self.local
    }

    /// Number of work-groups in each dimension.
    #[inline]
    pub fn group_range(&self) -> Range<D> {
        self.groups
    }

    /// Total number of work-groups.
    #[inline]
    pub fn group_count(&self) -> usize {
        self.groups.size()
    }

    /// Work-items per work-group.
    #[inline]
    pub fn local_size(&self) -> usize {
        self.local.size()
    }
}

impl<const D: usize> fmt::Display for NdRange<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "global={} local={}", self.global, self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_rejects_zero_extent() {
        assert!(Range::new([0]).is_err());
        assert!(Range::new([4, 0]).is_err());
        assert!(Range::new([4, 4]).is_ok());
    }

    #[test]
    fn test_linearize_row_major() {
        let range = Range::new([3, 5]).unwrap();
        assert_eq!(range.linearize(Id::new([0, 4])), 4);
        assert_eq!(range.linearize(Id::new([2, 1])), 11);
        assert_eq!(range.delinearize(11), Id::new([2, 1]));

        for linear in 0..range.size() {
            assert_eq!(range.linearize(range.delinearize(linear)), linear);
        }
    }

    #[test]
    fn test_iter_visits_all() {
        let range = Range::new([2, 2, 3]).unwrap();
        let ids: Vec<_> = range.iter().collect();
        assert_eq!(ids.len(), 12);
        assert_eq!(ids[0], Id::zero());
        assert_eq!(ids[11], Id::new([1, 1, 2]));
    }

    #[test]
    fn test_group_offset_arithmetic() {
        let local = Range::new([32, 32]).unwrap();
        let group = Id::new([1, 3]);
        let offset = group.transposed() * local + Id::new([2, 5]);
        assert_eq!(offset, Id::new([98, 37]));
    }

    #[test]
    fn test_nd_range_divisibility() {
        let nd = NdRange::new(Range::new([1024]).unwrap(), Range::new([128]).unwrap()).unwrap();
        assert_eq!(nd.group_count(), 8);
        assert_eq!(nd.local_size(), 128);

        let err = NdRange::new(Range::new([1000]).unwrap(), Range::new([128]).unwrap());
        assert!(matches!(err, Err(TileKernelError::InvalidNdRange(_))));
    }

    #[test]
    fn test_nd_range_2d_groups() {
        let nd = NdRange::new(
            Range::new([64, 128]).unwrap(),
            Range::new([32, 32]).unwrap(),
        )
        .unwrap();
        assert_eq!(nd.group_range().extents(), [2, 4]);
        assert_eq!(nd.to_string(), "global=(64, 128) local=(32, 32)");
    }
}
