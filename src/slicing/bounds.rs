//! N-dimensional bounds.
//!
//! A [`Bounds`] is a half-open N-dimensional region of an array, one
//! `[lo, hi)` range per dimension, stored as a start and a shape. It is the
//! canonical form every fancy indexer normalizes to, the unit the tile
//! planner works in, and the region descriptor the storage adapter reads and
//! writes.

use std::ops::Range;

use derive_more::Display;
use itertools::izip;
use thiserror::Error;

/// N-dimensional bounds: a start and a shape, one entry per dimension.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Display, Default)]
#[display("start {start:?} shape {shape:?}")]
pub struct Bounds {
    /// The first included index per dimension.
    start: Vec<u64>,
    /// The number of included indices per dimension.
    shape: Vec<u64>,
}

/// An incompatible dimensionality error.
#[derive(Copy, Clone, Debug, Error)]
#[error("incompatible dimensionality {0}, expected {1}")]
pub struct IncompatibleDimensionalityError(pub usize, pub usize);

/// Bounds that do not fit inside an array shape.
#[derive(Clone, Debug, Error)]
#[error("bounds {0} do not fit in an array of shape {1:?}")]
pub struct BoundsOutOfShapeError(pub Bounds, pub Vec<u64>);

impl Bounds {
    /// Create bounds from a list of `[lo, hi)` ranges.
    #[must_use]
    pub fn from_ranges(ranges: &[Range<u64>]) -> Self {
        let start = ranges.iter().map(|range| range.start).collect();
        let shape = ranges
            .iter()
            .map(|range| range.end.saturating_sub(range.start))
            .collect();
        Self { start, shape }
    }

    /// Create bounds covering the whole of `shape`.
    #[must_use]
    pub fn whole(shape: &[u64]) -> Self {
        Self {
            start: vec![0; shape.len()],
            shape: shape.to_vec(),
        }
    }

    /// Create bounds from a start and a shape.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the lengths of `start`
    /// and `shape` differ.
    pub fn new(start: Vec<u64>, shape: Vec<u64>) -> Result<Self, IncompatibleDimensionalityError> {
        if start.len() == shape.len() {
            Ok(Self { start, shape })
        } else {
            Err(IncompatibleDimensionalityError(shape.len(), start.len()))
        }
    }

    /// The start per dimension.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// The shape per dimension.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The exclusive end per dimension.
    #[must_use]
    pub fn end_exc(&self) -> Vec<u64> {
        std::iter::zip(&self.start, &self.shape)
            .map(|(start, size)| start + size)
            .collect()
    }

    /// The `[lo, hi)` range of one dimension.
    ///
    /// # Panics
    /// Panics if `dimension` is out of range.
    #[must_use]
    pub fn range(&self, dimension: usize) -> Range<u64> {
        self.start[dimension]..self.start[dimension] + self.shape[dimension]
    }

    /// The number of dimensions.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    /// The number of elements, the product of the shape.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Returns true if any dimension is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|size| *size == 0)
    }

    /// Returns true if the bounds fit inside an array of `array_shape`.
    #[must_use]
    pub fn inbounds(&self, array_shape: &[u64]) -> bool {
        self.dimensionality() == array_shape.len()
            && izip!(&self.start, &self.shape, array_shape)
                .all(|(start, size, dimension)| start + size <= *dimension)
    }

    /// The overlap of two bounds of the same dimensionality.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the dimensionalities
    /// differ.
    pub fn overlap(&self, other: &Self) -> Result<Self, IncompatibleDimensionalityError> {
        if other.dimensionality() != self.dimensionality() {
            return Err(IncompatibleDimensionalityError(
                other.dimensionality(),
                self.dimensionality(),
            ));
        }
        let ranges: Vec<Range<u64>> = izip!(&self.start, &self.shape, &other.start, &other.shape)
            .map(|(start, size, other_start, other_size)| {
                let lo = std::cmp::max(*start, *other_start);
                let hi = std::cmp::min(start + size, other_start + other_size);
                lo..std::cmp::max(lo, hi)
            })
            .collect();
        Ok(Self::from_ranges(&ranges))
    }

    /// These bounds translated so that `origin` becomes zero.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if `origin` has the wrong
    /// length.
    pub fn relative_to(&self, origin: &[u64]) -> Result<Self, IncompatibleDimensionalityError> {
        if origin.len() != self.dimensionality() {
            return Err(IncompatibleDimensionalityError(
                origin.len(),
                self.dimensionality(),
            ));
        }
        Ok(Self {
            start: std::iter::zip(&self.start, origin)
                .map(|(start, origin)| start - origin)
                .collect(),
            shape: self.shape.clone(),
        })
    }

    /// Iterate the linearised contiguous spans of these bounds within an
    /// array of `array_shape`, in row-major order.
    ///
    /// Each span is `(offset, length)` in elements. Trailing dimensions the
    /// bounds cover completely are merged into their parent span.
    ///
    /// # Errors
    /// Returns [`BoundsOutOfShapeError`] if the bounds do not fit in
    /// `array_shape`.
    pub fn contiguous_spans(
        &self,
        array_shape: &[u64],
    ) -> Result<ContiguousSpans, BoundsOutOfShapeError> {
        if !self.inbounds(array_shape) {
            return Err(BoundsOutOfShapeError(self.clone(), array_shape.to_vec()));
        }
        Ok(ContiguousSpans::new(self, array_shape))
    }
}

/// Iterator over the linearised contiguous spans of a [`Bounds`] within an
/// array shape. See [`Bounds::contiguous_spans`].
#[derive(Clone, Debug)]
pub struct ContiguousSpans {
    /// Row-major strides of the enclosing array, one per outer dimension.
    strides: Vec<u64>,
    /// The odometer ranges, one per outer dimension.
    outer: Vec<Range<u64>>,
    /// Constant offset contributed by the start of the span dimension.
    base_offset: u64,
    /// Elements per span.
    span_len: u64,
    /// Current odometer position; `None` when exhausted.
    indices: Option<Vec<u64>>,
}

impl ContiguousSpans {
    fn new(bounds: &Bounds, array_shape: &[u64]) -> Self {
        let n = bounds.dimensionality();
        if n == 0 {
            return Self {
                strides: vec![],
                outer: vec![],
                base_offset: 0,
                span_len: 1,
                indices: Some(vec![]),
            };
        }
        let mut strides = vec![1_u64; n];
        for axis in (0..n.saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * array_shape[axis + 1];
        }

        // The span covers the innermost dimension plus every trailing
        // dimension that the bounds cover completely.
        let mut span_dim = n - 1;
        let mut span_len = bounds.shape()[span_dim];
        while span_dim > 0
            && bounds.start()[span_dim] == 0
            && bounds.shape()[span_dim] == array_shape[span_dim]
        {
            span_dim -= 1;
            span_len *= bounds.shape()[span_dim];
        }

        let outer: Vec<Range<u64>> = (0..span_dim).map(|axis| bounds.range(axis)).collect();
        let indices = if bounds.is_empty() {
            None
        } else {
            Some(outer.iter().map(|range| range.start).collect())
        };
        Self {
            base_offset: bounds.start()[span_dim] * strides[span_dim],
            strides: strides.into_iter().take(span_dim).collect(),
            outer,
            span_len,
            indices,
        }
    }

    /// The number of elements in each span.
    #[must_use]
    pub fn span_len(&self) -> u64 {
        self.span_len
    }
}

impl Iterator for ContiguousSpans {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.indices.as_mut()?;
        let offset: u64 = self.base_offset
            + std::iter::zip(indices.iter(), &self.strides)
                .map(|(index, stride)| index * stride)
                .sum::<u64>();

        // Advance the odometer, innermost outer dimension fastest.
        let mut exhausted = true;
        for axis in (0..self.outer.len()).rev() {
            indices[axis] += 1;
            if indices[axis] < self.outer[axis].end {
                exhausted = false;
                break;
            }
            indices[axis] = self.outer[axis].start;
        }
        if exhausted {
            self.indices = None;
        }
        Some((offset, self.span_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_basics() {
        let bounds = Bounds::from_ranges(&[1..5, 2..6]);
        assert_eq!(bounds.start(), &[1, 2]);
        assert_eq!(bounds.shape(), &[4, 4]);
        assert_eq!(bounds.end_exc(), vec![5, 6]);
        assert_eq!(bounds.num_elements(), 16);
        assert!(!bounds.is_empty());
        assert!(bounds.inbounds(&[10, 10]));
        assert!(!bounds.inbounds(&[4, 4]));
        assert!(!bounds.inbounds(&[10, 10, 10]));
        assert!(Bounds::new(vec![0, 0], vec![10]).is_err());
    }

    #[test]
    fn bounds_overlap_and_relative() {
        let a = Bounds::from_ranges(&[1..5, 2..6]);
        let b = Bounds::from_ranges(&[3..6, 4..7]);
        assert_eq!(a.overlap(&b).unwrap(), Bounds::from_ranges(&[3..5, 4..6]));
        assert_eq!(
            a.relative_to(&[1, 1]).unwrap(),
            Bounds::from_ranges(&[0..4, 1..5])
        );
        assert!(a.relative_to(&[1, 1, 1]).is_err());
        let disjoint = Bounds::from_ranges(&[8..9, 0..1]);
        assert!(a.overlap(&disjoint).unwrap().is_empty());
    }

    #[test]
    fn contiguous_spans_partial() {
        //  0  1  2  3
        //  4  5  6  7
        //  8  9 10 11
        // 12 13 14 15
        let bounds = Bounds::from_ranges(&[1..3, 1..3]);
        let spans = bounds.contiguous_spans(&[4, 4]).unwrap();
        assert_eq!(spans.span_len(), 2);
        assert_eq!(spans.collect::<Vec<_>>(), vec![(5, 2), (9, 2)]);
    }

    #[test]
    fn contiguous_spans_merge_full_rows() {
        let bounds = Bounds::from_ranges(&[1..3, 0..4]);
        let spans = bounds.contiguous_spans(&[4, 4]).unwrap();
        assert_eq!(spans.collect::<Vec<_>>(), vec![(4, 8)]);
    }

    #[test]
    fn contiguous_spans_whole_array() {
        let bounds = Bounds::whole(&[3, 2, 2]);
        let spans = bounds.contiguous_spans(&[3, 2, 2]).unwrap();
        assert_eq!(spans.collect::<Vec<_>>(), vec![(0, 12)]);
    }

    #[test]
    fn contiguous_spans_inner_partial() {
        let bounds = Bounds::from_ranges(&[0..2, 1..2, 0..2]);
        let spans = bounds.contiguous_spans(&[2, 2, 2]).unwrap();
        assert_eq!(spans.collect::<Vec<_>>(), vec![(2, 2), (6, 2)]);
    }

    #[test]
    fn contiguous_spans_out_of_shape() {
        let bounds = Bounds::from_ranges(&[0..5]);
        assert!(bounds.contiguous_spans(&[4]).is_err());
    }
}
