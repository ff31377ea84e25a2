//! Virtual arrays.
//!
//! A [`VArray`] is a logical N-dimensional buffer whose data is physically
//! split into a regular grid of per-tile files. Creating a virtual array
//! writes only its metadata record; tiles come into existence when a write
//! first touches them. Subset operations plan the affected tiles
//! ([`crate::slicing::TilePlan`]) and run them on the client's bounded
//! worker pool through a [`VSubset`].

mod vsubset;

pub use vsubset::VSubset;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::array::{Array, ArrayError};
use crate::collection::CollectionCore;
use crate::locks::{self, LockError};
use crate::memory::MemoryError;
use crate::paths::tile_id;
use crate::schema::{AttributeError, Dimension, SchemaError, VArraySchema};
use crate::slicing::{Bounds, IndexError, IndexExpr, TilePlan};
use crate::storage::{ArrayMeta, StorageError};
use crate::value::{int_tuple, AttrValue};

/// A virtual array operation error.
#[derive(Debug, Error)]
pub enum VArrayError {
    /// An invalid slicing input.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// A refused memory admission.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// A schema resolution failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// An invalid attribute value.
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    /// A lock not acquired in time.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// A storage failure outside any single tile.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A failure on the virtual array's own bounds or buffers.
    #[error(transparent)]
    Array(#[from] ArrayError),
    /// A per-tile failure. Writes already committed to other tiles are not
    /// rolled back: per-tile updates are at-least-once and callers should be
    /// idempotent.
    #[error("tile {tile:?} of virtual array {varray} failed")]
    Tile {
        /// The failing tile's grid position.
        tile: Vec<u64>,
        /// The virtual array id.
        varray: Uuid,
        /// The underlying failure.
        #[source]
        source: Box<ArrayError>,
    },
}

/// One stored virtual array.
#[derive(Clone, Debug)]
pub struct VArray {
    core: Arc<CollectionCore>,
    meta: ArrayMeta,
}

impl VArray {
    pub(crate) fn new(core: Arc<CollectionCore>, meta: ArrayMeta) -> Self {
        Self { core, meta }
    }

    /// The virtual array id. Deterministic for a given collection and
    /// primary attribute tuple, so re-creation after a crash is idempotent.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    /// The owning collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.meta.collection
    }

    /// The virtual array schema.
    ///
    /// # Panics
    /// Never panics: a `VArray` only exists inside a virtual array
    /// collection.
    #[must_use]
    pub fn schema(&self) -> &VArraySchema {
        self.core
            .varray_schema
            .as_ref()
            .expect("virtual arrays exist only in virtual array collections")
    }

    /// The virtual array shape.
    #[must_use]
    pub fn shape(&self) -> Vec<u64> {
        self.schema().shape()
    }

    /// The tile grid divisors.
    #[must_use]
    pub fn vgrid(&self) -> &[u64] {
        self.schema().vgrid()
    }

    /// The tile shape, `shape / vgrid`.
    #[must_use]
    pub fn arrays_shape(&self) -> Vec<u64> {
        self.schema().arrays_shape()
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

    /// The resolved dimensions of this virtual array.
    ///
    /// # Errors
    /// Returns a [`SchemaError`] if a time reference cannot be resolved.
    pub fn dimensions(&self) -> Result<Vec<Dimension>, VArrayError> {
        Ok(self.schema().resolve_dimensions(&self.meta.all_attributes())?)
    }

    /// Build a lazy [`VSubset`] over `expr`.
    ///
    /// # Errors
    /// Returns a [`VArrayError`] for an invalid index or a refused memory
    /// admission.
    pub fn subset(&self, expr: impl Into<IndexExpr>) -> Result<VSubset<'_>, VArrayError> {
        let expr = expr.into();
        let spec = expr.normalize(&self.dimensions()?)?;
        crate::memory::check_memory(
            spec.bounds().shape(),
            self.schema().element_type(),
            self.core.memory_limit,
        )?;
        let plan = TilePlan::new(spec.bounds(), &self.arrays_shape())
            .expect("normalized bounds share the schema dimensionality");
        debug!(varray = %self.id(), %expr, tiles = plan.len(), "virtual subset constructed");
        Ok(VSubset::new(self, expr, spec, plan))
    }

    /// Update custom attribute values from a partial map, atomically, under
    /// the virtual array's writer lock.
    ///
    /// # Errors
    /// Returns a [`VArrayError`] for undeclared or immutable names, invalid
    /// values, lock timeouts and storage failures.
    pub fn update_custom_attributes(
        &mut self,
        delta: &[(String, AttrValue)],
    ) -> Result<(), VArrayError> {
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
        let _guard = locks::acquire_write(&self.lock_path(), &self.core.lock_settings)?;
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
        self.core.adapter.write_meta(&self.meta_path(), &meta)?;
        self.meta = meta;
        info!(varray = %self.id(), "custom attributes updated");
        Ok(())
    }

    /// Delete the virtual array and every tile backing it.
    ///
    /// # Errors
    /// Returns a [`VArrayError`] on lock timeout or storage failure.
    pub fn delete(self) -> Result<(), VArrayError> {
        let whole = Bounds::whole(&self.shape());
        let plan = TilePlan::new(&whole, &self.arrays_shape())
            .expect("the whole shape shares the schema dimensionality");
        for slot in plan.iter() {
            if let Some(tile) = self.tile_array(&slot.tile)? {
                tile.delete()?;
            }
        }
        {
            let _guard = locks::acquire_write(&self.lock_path(), &self.core.lock_settings)?;
            self.core.adapter.delete_meta(&self.meta_path())?;
            let symlink =
                self.core
                    .paths
                    .symlink_path(&self.meta.primary_attributes, &self.meta.id, true);
            let _ = std::fs::remove_file(symlink);
        }
        let _ = std::fs::remove_file(self.lock_path());
        info!(varray = %self.meta.id, "virtual array deleted");
        Ok(())
    }

    pub(crate) fn meta_path(&self) -> std::path::PathBuf {
        self.core.paths.meta_path(&self.meta.id, true)
    }

    pub(crate) fn lock_path(&self) -> std::path::PathBuf {
        self.core.paths.lock_path(&self.meta.id, true)
    }

    pub(crate) fn core(&self) -> &Arc<CollectionCore> {
        &self.core
    }

    /// The lock artifact of one tile.
    pub(crate) fn tile_lock_path(&self, position: &[u64]) -> std::path::PathBuf {
        let id = tile_id(&self.meta.id, position);
        self.core.paths.lock_path(&id, false)
    }

    /// The existing tile at `position`, if any.
    pub(crate) fn tile_array(&self, position: &[u64]) -> Result<Option<Array>, ArrayError> {
        let id = tile_id(&self.meta.id, position);
        let meta_path = self.core.paths.meta_path(&id, false);
        match self
            .core
            .adapter
            .read_meta(&meta_path, self.core.array_schema.attributes())
        {
            Ok(meta) => Ok(Some(Array::new(self.core.clone(), meta))),
            Err(StorageError::MetaNotFound(_)) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// The tile at `position`, created if missing.
    ///
    /// A new tile carries the primary attributes `vid` and `v_position` and,
    /// for every time dimension anchored to an attribute, the derived
    /// `parent.`-prefixed start of its slice of the time axis.
    pub(crate) fn ensure_tile(&self, position: &[u64]) -> Result<Array, ArrayError> {
        if let Some(tile) = self.tile_array(position)? {
            return Ok(tile);
        }
        let primary = vec![
            (
                crate::schema::TILE_VID_ATTRIBUTE.to_string(),
                AttrValue::Str(self.meta.id.to_string()),
            ),
            (
                crate::schema::TILE_POSITION_ATTRIBUTE.to_string(),
                int_tuple(position),
            ),
        ];
        let mut custom = Vec::new();
        let dimensions = self
            .schema()
            .resolve_dimensions(&self.meta.all_attributes())?;
        let arrays_shape = self.arrays_shape();
        for (axis, (schema_dim, dimension)) in
            std::iter::zip(self.schema().dimensions(), &dimensions).enumerate()
        {
            let (Some(reference), Dimension::Time { start, step, .. }) =
                (schema_dim.time_reference(), dimension)
            else {
                continue;
            };
            let steps = (arrays_shape[axis] * position[axis]) as i64;
            let offset = step.num_microseconds().unwrap_or(0).saturating_mul(steps);
            custom.push((
                format!("parent.{reference}"),
                AttrValue::Datetime(*start + chrono::Duration::microseconds(offset)),
            ));
        }
        let (primary, custom) = crate::schema::normalize_attribute_values(
            self.core.array_schema.attributes(),
            &primary,
            &custom,
        )?;
        let id = tile_id(&self.meta.id, position);
        match crate::collection::create_array_record(&self.core, id, &primary, &custom, false) {
            Ok(meta) => {
                debug!(varray = %self.meta.id, tile = ?position, "tile created");
                Ok(Array::new(self.core.clone(), meta))
            }
            // Another writer created the tile first; its record wins.
            Err(crate::collection::CreateError::Duplicate) => {
                let tile = self.tile_array(position)?;
                tile.ok_or_else(|| {
                    StorageError::Integrity(format!(
                        "tile {position:?} of {} vanished during creation",
                        self.meta.id
                    ))
                    .into()
                })
            }
            Err(error) => Err(error.into()),
        }
    }
}
