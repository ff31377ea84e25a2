//! Lazy array subsets.

use tracing::{debug, info};

use crate::buffer::TypedBuffer;
use crate::slicing::{Bounds, DimensionSelection, IndexExpr, SubsetSpec};

use super::{Array, ArrayError};

/// A lazy subset of an [`Array`].
///
/// A subset is a pure descriptor: bounds, shape and describe are available
/// without touching storage, and no buffer exists until [`read`](Self::read),
/// [`update`](Self::update) or [`clear`](Self::clear) is invoked. Each of
/// those takes the array's readers-writer lock for its duration.
#[derive(Debug)]
pub struct Subset<'a> {
    array: &'a Array,
    expr: IndexExpr,
    spec: SubsetSpec,
}

impl<'a> Subset<'a> {
    pub(crate) fn new(array: &'a Array, expr: IndexExpr, spec: SubsetSpec) -> Self {
        Self { array, expr, spec }
    }

    /// The subset shape: collapsed dimensions are dropped.
    #[must_use]
    pub fn shape(&self) -> Vec<u64> {
        self.spec.shape()
    }

    /// The canonical per-dimension bounds.
    #[must_use]
    pub fn bounds(&self) -> &Bounds {
        self.spec.bounds()
    }

    /// The canonical slice string of the originating expression.
    #[must_use]
    pub fn slice_string(&self) -> String {
        self.expr.to_string()
    }

    /// The values selected on each dimension.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] if a time reference cannot be resolved.
    pub fn describe(&self) -> Result<Vec<DimensionSelection>, ArrayError> {
        Ok(self.spec.describe(&self.array.dimensions()?))
    }

    /// Read the subset into a dense buffer of the schema element type.
    ///
    /// Unwritten cells read as the fill value.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] on lock timeout or storage failure.
    pub fn read(&self) -> Result<TypedBuffer, ArrayError> {
        debug!(array = %self.array.id(), bounds = %self.expr, "reading subset");
        let _guard = self.array.lock_read()?;
        let data = self.array.read_region_unlocked(self.spec.bounds())?;
        info!(array = %self.array.id(), bounds = %self.expr, "subset read");
        Ok(data)
    }

    /// Write `data` over the subset.
    ///
    /// The buffer must hold exactly the subset's elements in row-major
    /// order; a buffer of a losslessly convertible element type is widened,
    /// anything else is a dtype mismatch.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] on a shape or dtype mismatch, lock timeout
    /// or storage failure.
    pub fn update(&self, data: TypedBuffer) -> Result<(), ArrayError> {
        debug!(array = %self.array.id(), bounds = %self.expr, "updating subset");
        if data.len() as u64 != self.spec.num_elements() {
            return Err(ArrayError::ShapeMismatch {
                expected: self.shape(),
                got: data.len(),
            });
        }
        let data = data.convert_to(self.array.schema().element_type())?;
        let _guard = self.array.lock_write()?;
        self.array
            .write_region_unlocked(self.spec.bounds(), &data)?;
        info!(array = %self.array.id(), bounds = %self.expr, "subset updated");
        Ok(())
    }

    /// Reset the subset to the fill value. Whole-array bounds truncate the
    /// body back to non-existent.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] on lock timeout or storage failure.
    pub fn clear(&self) -> Result<(), ArrayError> {
        debug!(array = %self.array.id(), bounds = %self.expr, "clearing subset");
        let _guard = self.array.lock_write()?;
        self.array.clear_region_unlocked(self.spec.bounds())?;
        info!(array = %self.array.id(), bounds = %self.expr, "subset cleared");
        Ok(())
    }
}
