//! Plain arrays.
//!
//! An [`Array`] is one stored N-dimensional buffer: a metadata record, a
//! primary-attribute symlink, and a body file that materializes on the first
//! non-fill write. Array handles are cheap descriptors; data moves only
//! through [`Subset`] operations, each of which takes the array's
//! readers-writer lock for its duration.

mod subset;

pub use subset::Subset;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::buffer::BufferError;
use crate::collection::CollectionCore;
use crate::locks::{self, LockError, WriteGuard};
use crate::memory::MemoryError;
use crate::schema::{ArraySchema, AttributeError, Dimension, SchemaError};
use crate::slicing::{Bounds, IndexError, IndexExpr};
use crate::storage::{ArrayMeta, Dataset, DatasetLayout, StorageError};
use crate::value::AttrValue;

/// An array operation error.
#[derive(Debug, Error)]
pub enum ArrayError {
    /// An invalid slicing input.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// A storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A lock not acquired in time.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// A refused memory admission.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// A buffer of the wrong element type or length.
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// A buffer that does not match the subset shape.
    #[error("data of {got} elements does not match subset shape {expected:?}")]
    ShapeMismatch {
        /// The subset shape.
        expected: Vec<u64>,
        /// The number of elements supplied.
        got: usize,
    },
    /// An invalid attribute value.
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    /// A schema resolution failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// One stored array.
#[derive(Clone, Debug)]
pub struct Array {
    core: Arc<CollectionCore>,
    meta: ArrayMeta,
}

impl Array {
    pub(crate) fn new(core: Arc<CollectionCore>, meta: ArrayMeta) -> Self {
        Self { core, meta }
    }

    /// The array id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    /// The owning collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.meta.collection
    }

    /// The array schema.
    #[must_use]
    pub fn schema(&self) -> &ArraySchema {
        &self.core.array_schema
    }

    /// The array shape.
    #[must_use]
    pub fn shape(&self) -> Vec<u64> {
        self.schema().shape()
    }

    /// The primary attribute values, in declared order.
    #[must_use]
    pub fn primary_attributes(&self) -> &[(String, AttrValue)] {
        &self.meta.primary_attributes
    }

    /// The custom attribute values, in declared order.
    #[must_use]
    pub fn custom_attributes(&self) -> &[(String, AttrValue)] {
        &self.meta.custom_attributes
    }

    /// The resolved dimensions of this array, with time references bound to
    /// its attribute values.
    ///
    /// # Errors
    /// Returns a [`SchemaError`] if a time reference cannot be resolved.
    pub fn dimensions(&self) -> Result<Vec<Dimension>, ArrayError> {
        Ok(self.schema().resolve_dimensions(&self.meta.all_attributes())?)
    }

    /// Build a lazy [`Subset`] over `expr`.
    ///
    /// No I/O happens and no buffer is allocated; the memory admission check
    /// prices the subset before any allocation.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] for an invalid index or a refused memory
    /// admission.
    pub fn subset(&self, expr: impl Into<IndexExpr>) -> Result<Subset<'_>, ArrayError> {
        let expr = expr.into();
        let spec = expr.normalize(&self.dimensions()?)?;
        crate::memory::check_memory(
            spec.bounds().shape(),
            self.schema().element_type(),
            self.core.memory_limit,
        )?;
        debug!(array = %self.id(), %expr, "subset constructed");
        Ok(Subset::new(self, expr, spec))
    }

    /// Update custom attribute values from a partial map.
    ///
    /// The metadata record is replaced atomically under the array writer
    /// lock. Primary attributes are immutable; a datetime custom attribute
    /// cannot transition to null.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] for undeclared or immutable names, invalid
    /// values, lock timeouts and storage failures.
    pub fn update_custom_attributes(
        &mut self,
        delta: &[(String, AttrValue)],
    ) -> Result<(), ArrayError> {
        for (name, value) in delta {
            let attribute = self
                .schema()
                .attribute(name)
                .ok_or_else(|| AttributeError::Undeclared(name.clone()))?;
            if attribute.primary {
                return Err(AttributeError::Immutable(name.clone()).into());
            }
            attribute.validate_value(value)?;
        }
        let _guard = self.lock_write()?;
        let mut meta = self.meta.clone();
        for (name, value) in delta {
            if let Some(slot) = meta
                .custom_attributes
                .iter_mut()
                .find(|(declared, _)| declared == name)
            {
                slot.1 = value.clone();
            }
        }
        self.core
            .adapter
            .write_meta(&self.meta_path(), &meta)?;
        self.meta = meta;
        info!(array = %self.id(), "custom attributes updated");
        Ok(())
    }

    /// Delete the array: body, metadata record and symlink.
    ///
    /// # Errors
    /// Returns an [`ArrayError`] on lock timeout or storage failure.
    pub fn delete(self) -> Result<(), ArrayError> {
        {
            let _guard = self.lock_write()?;
            self.delete_unlocked()?;
        }
        let _ = std::fs::remove_file(self.lock_path());
        info!(array = %self.meta.id, "array deleted");
        Ok(())
    }

    /// Delete without taking the array lock. The caller holds it.
    pub(crate) fn delete_unlocked(&self) -> Result<(), ArrayError> {
        self.core.adapter.delete(&self.body_path())?;
        self.core.adapter.delete_meta(&self.meta_path())?;
        let symlink = self
            .core
            .paths
            .symlink_path(&self.meta.primary_attributes, &self.meta.id, false);
        let _ = std::fs::remove_file(symlink);
        Ok(())
    }

    /// The datetime value of attribute `name`, if present.
    #[must_use]
    pub fn datetime_attribute(&self, name: &str) -> Option<DateTime<Utc>> {
        self.meta
            .all_attributes()
            .iter()
            .find(|(declared, _)| declared == name)
            .and_then(|(_, value)| match value {
                AttrValue::Datetime(dt) => Some(*dt),
                _ => None,
            })
    }

    pub(crate) fn meta(&self) -> &ArrayMeta {
        &self.meta
    }

    pub(crate) fn meta_path(&self) -> std::path::PathBuf {
        self.core.paths.meta_path(&self.meta.id, false)
    }

    pub(crate) fn body_path(&self) -> std::path::PathBuf {
        self.core
            .paths
            .body_path(&self.meta.id, self.core.adapter.data_extension(), false)
    }

    pub(crate) fn lock_path(&self) -> std::path::PathBuf {
        self.core.paths.lock_path(&self.meta.id, false)
    }

    pub(crate) fn layout(&self) -> DatasetLayout {
        DatasetLayout {
            shape: self.shape(),
            element_type: self.schema().element_type(),
            fill_value: self.schema().fill_value(),
        }
    }

    pub(crate) fn dataset(&self) -> Result<Box<dyn Dataset>, StorageError> {
        self.core
            .adapter
            .open(&self.body_path(), &self.core.options, &self.layout())
    }

    pub(crate) fn lock_write(&self) -> Result<WriteGuard, LockError> {
        locks::acquire_write(&self.lock_path(), &self.core.lock_settings)
    }

    pub(crate) fn lock_read(&self) -> Result<locks::ReadGuard, LockError> {
        locks::acquire_read(&self.lock_path(), &self.core.lock_settings)
    }

    /// Read a region without taking the array lock. The caller holds it.
    pub(crate) fn read_region_unlocked(
        &self,
        region: &Bounds,
    ) -> Result<crate::buffer::TypedBuffer, ArrayError> {
        Ok(self.dataset()?.read(region)?)
    }

    /// Write a region without taking the array lock. The caller holds it.
    pub(crate) fn write_region_unlocked(
        &self,
        region: &Bounds,
        data: &crate::buffer::TypedBuffer,
    ) -> Result<(), ArrayError> {
        Ok(self.dataset()?.write(region, data)?)
    }

    /// Clear a region without taking the array lock. The caller holds it.
    ///
    /// Whole-shape bounds truncate the body back to non-existent; partial
    /// bounds write fill values.
    pub(crate) fn clear_region_unlocked(&self, region: &Bounds) -> Result<(), ArrayError> {
        let mut dataset = self.dataset()?;
        if region == &Bounds::whole(&self.shape()) {
            dataset.truncate()?;
            return Ok(());
        }
        if !dataset.has_body() {
            return Ok(());
        }
        let fill = crate::buffer::TypedBuffer::filled(
            self.schema().fill_value(),
            region.num_elements() as usize,
        );
        dataset.write(region, &fill)?;
        Ok(())
    }
}
