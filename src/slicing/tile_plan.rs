//! Tile planning for virtual arrays.
//!
//! A virtual array splits its shape into a regular grid of tiles: `vgrid[d]`
//! tiles of `arrays_shape[d]` cells along dimension `d`. Given the canonical
//! bounds of a subset, [`TilePlan`] lazily enumerates every affected tile in
//! dimension-major (row-major) order together with:
//!  - the *inner* bounds: the region of the tile the subset touches, and
//!  - the *outer* bounds: where that region lands in the aggregated subset
//!    buffer.
//!
//! The outer bounds of distinct tiles are disjoint and together partition the
//! subset exactly, so scatter/gather workers never overlap and aggregation
//! needs no ordering.

use std::iter::FusedIterator;
use std::ops::Range;

use super::bounds::{Bounds, IncompatibleDimensionalityError};

/// One tile affected by a subset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileSlot {
    /// The tile's grid position, one index per dimension.
    pub tile: Vec<u64>,
    /// The touched region within the tile.
    pub inner: Bounds,
    /// The placement of the region within the subset buffer.
    pub outer: Bounds,
}

/// Lazy enumeration of the tiles affected by a subset.
///
/// Iterates over the last dimension fastest. For example, a `(100, 200)`
/// virtual array with `vgrid = (50, 20)` queried with bounds
/// `[10..60, 5..25]` is covered by the four tiles `{0,1} × {0,1}`, yielded
/// as `(0,0), (0,1), (1,0), (1,1)`.
#[derive(Clone, Debug)]
pub struct TilePlan {
    bounds: Bounds,
    arrays_shape: Vec<u64>,
    /// Tile index ranges, one per dimension.
    tiles: Vec<Range<u64>>,
}

impl TilePlan {
    /// Plan the tiles affected by `bounds` on a grid of `arrays_shape`-sized
    /// tiles.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if `arrays_shape` does not
    /// match the dimensionality of `bounds`.
    pub fn new(
        bounds: &Bounds,
        arrays_shape: &[u64],
    ) -> Result<Self, IncompatibleDimensionalityError> {
        if arrays_shape.len() != bounds.dimensionality() {
            return Err(IncompatibleDimensionalityError(
                arrays_shape.len(),
                bounds.dimensionality(),
            ));
        }
        let tiles = std::iter::zip(std::iter::zip(bounds.start(), bounds.end_exc()), arrays_shape)
            .map(|((lo, hi), tile_size)| {
                if hi > *lo {
                    (lo / tile_size)..hi.div_ceil(*tile_size)
                } else {
                    0..0
                }
            })
            .collect();
        Ok(Self {
            bounds: bounds.clone(),
            arrays_shape: arrays_shape.to_vec(),
            tiles,
        })
    }

    /// The number of affected tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles
            .iter()
            .map(|range| (range.end - range.start) as usize)
            .product()
    }

    /// Returns true if no tile is affected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.iter().any(|range| range.start == range.end)
    }

    /// The slot of one tile.
    fn slot(&self, tile: Vec<u64>) -> TileSlot {
        let mut inner = Vec::with_capacity(tile.len());
        let mut outer = Vec::with_capacity(tile.len());
        for (axis, index) in tile.iter().enumerate() {
            let tile_size = self.arrays_shape[axis];
            let origin = index * tile_size;
            let lo = self.bounds.start()[axis];
            let hi = lo + self.bounds.shape()[axis];
            let inner_lo = lo.saturating_sub(origin);
            let inner_hi = std::cmp::min(tile_size, hi - origin);
            let outer_lo = origin.saturating_sub(lo);
            inner.push(inner_lo..inner_hi);
            outer.push(outer_lo..outer_lo + (inner_hi - inner_lo));
        }
        TileSlot {
            tile,
            inner: Bounds::from_ranges(&inner),
            outer: Bounds::from_ranges(&outer),
        }
    }

    /// Create a serial iterator over the slots.
    #[must_use]
    pub fn iter(&self) -> TilePlanIterator<'_> {
        <&Self as IntoIterator>::into_iter(self)
    }
}

impl<'a> IntoIterator for &'a TilePlan {
    type Item = TileSlot;
    type IntoIter = TilePlanIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        TilePlanIterator {
            plan: self,
            indices: (!self.is_empty())
                .then(|| self.tiles.iter().map(|range| range.start).collect()),
        }
    }
}

/// Serial iterator over the slots of a [`TilePlan`].
pub struct TilePlanIterator<'a> {
    plan: &'a TilePlan,
    /// Current tile indices; `None` when exhausted.
    indices: Option<Vec<u64>>,
}

impl Iterator for TilePlanIterator<'_> {
    type Item = TileSlot;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.indices.as_mut()?;
        let slot = self.plan.slot(indices.clone());

        // Advance the odometer, last dimension fastest.
        let mut exhausted = true;
        for axis in (0..indices.len()).rev() {
            indices[axis] += 1;
            if indices[axis] < self.plan.tiles[axis].end {
                exhausted = false;
                break;
            }
            indices[axis] = self.plan.tiles[axis].start;
        }
        if exhausted {
            self.indices = None;
        }
        Some(slot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.indices {
            // Exact only at the start; a lower bound of 1 afterwards.
            Some(_) => (1, Some(self.plan.len())),
            None => (0, Some(0)),
        }
    }
}

impl FusedIterator for TilePlanIterator<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_covers_affected_tiles_in_order() {
        // A (100, 200) virtual array with vgrid (50, 20): tiles of (2, 10).
        let bounds = Bounds::from_ranges(&[10..60, 5..25]);
        let plan = TilePlan::new(&bounds, &[2, 10]).unwrap();
        let slots: Vec<_> = plan.iter().collect();
        let tiles: Vec<_> = slots.iter().map(|slot| slot.tile.clone()).collect();
        assert_eq!(tiles.len(), (30 - 5) * 3);
        assert_eq!(tiles[0], vec![5, 0]);
        assert_eq!(tiles[1], vec![5, 1]);
        assert_eq!(tiles.last().unwrap(), &vec![29, 2]);
    }

    #[test]
    fn inner_and_outer_bounds() {
        // One dimension of 24 cells split into 2 tiles of 12; query [10, 14).
        let bounds = Bounds::from_ranges(&[10..14]);
        let plan = TilePlan::new(&bounds, &[12]).unwrap();
        let slots: Vec<_> = plan.iter().collect();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].tile, vec![0]);
        assert_eq!(slots[0].inner, Bounds::from_ranges(&[10..12]));
        assert_eq!(slots[0].outer, Bounds::from_ranges(&[0..2]));
        assert_eq!(slots[1].tile, vec![1]);
        assert_eq!(slots[1].inner, Bounds::from_ranges(&[0..2]));
        assert_eq!(slots[1].outer, Bounds::from_ranges(&[2..4]));
    }

    #[test]
    fn outer_bounds_partition_the_subset() {
        let bounds = Bounds::from_ranges(&[10..60, 5..25]);
        let plan = TilePlan::new(&bounds, &[50, 20]).unwrap();
        let slots: Vec<_> = plan.iter().collect();
        assert_eq!(
            slots.iter().map(|s| s.tile.clone()).collect::<Vec<_>>(),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );

        // Disjoint and covering: the outer element count sums to the subset,
        // and pairwise overlaps are empty.
        let total: u64 = slots.iter().map(|s| s.outer.num_elements()).sum();
        assert_eq!(total, bounds.num_elements());
        for (i, a) in slots.iter().enumerate() {
            for b in &slots[i + 1..] {
                assert!(a.outer.overlap(&b.outer).unwrap().is_empty());
            }
        }

        // Inner bounds mirror the outer extents.
        for slot in &slots {
            assert_eq!(slot.inner.shape(), slot.outer.shape());
        }
    }

    #[test]
    fn empty_bounds_plan_no_tiles() {
        let bounds = Bounds::from_ranges(&[3..3, 0..10]);
        let plan = TilePlan::new(&bounds, &[5, 5]).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.iter().count(), 0);
    }

    #[test]
    fn dimensionality_checked() {
        let bounds = Bounds::from_ranges(&[0..4]);
        assert!(TilePlan::new(&bounds, &[2, 2]).is_err());
    }
}
