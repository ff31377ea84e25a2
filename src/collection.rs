//! Collections.
//!
//! A [`Collection`] is a named schema plus a directory tree under the
//! storage root: a manifest, per-array metadata records and bodies, and the
//! primary-attribute symlink trees used for cross-process lookup. A
//! collection holds either plain arrays or virtual arrays, never both, and
//! its schema is immutable once the manifest is written.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::array::Array;
use crate::buffer::Scalar;
use crate::locks::{LockError, LockSettings};
use crate::memory::{MemoryError, MemoryLimit};
use crate::paths::{new_array_id, varray_id, CollectionPaths, META_EXT};
use crate::schema::{
    normalize_attribute_values, ArraySchema, AttributeError, CollectionSchema, DimensionSchema,
    ElementType, SchemaError, VArraySchema,
};
use crate::storage::{
    ArrayMeta, InvalidStorageOptionsError, StorageAdapter, StorageError, StorageOptions,
};
use crate::value::AttrValue;
use crate::varray::VArray;

/// A collection operation error.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// A collection of the same name already exists.
    #[error("collection {0:?} already exists")]
    AlreadyExists(String),
    /// The collection does not exist.
    #[error("collection {0:?} does not exist")]
    NotFound(String),
    /// An array with the same primary attribute tuple already exists.
    #[error("an array with primary attributes [{key}] already exists in collection {collection:?}")]
    DuplicatePrimary {
        /// The collection name.
        collection: String,
        /// The canonical form of the duplicated tuple.
        key: String,
    },
    /// An array operation on a virtual array collection.
    #[error("collection {0:?} holds virtual arrays")]
    NotAnArrayCollection(String),
    /// A virtual array operation on a plain array collection.
    #[error("collection {0:?} holds plain arrays")]
    NotAVarrayCollection(String),
    /// A primary-attribute lookup with an incomplete tuple.
    #[error("primary attribute {0:?} is required for lookup")]
    MissingPrimaryAttribute(String),
    /// A manifest that does not decode.
    #[error("manifest {path} is corrupted: {reason}")]
    CorruptManifest {
        /// The manifest path.
        path: PathBuf,
        /// What failed to decode.
        reason: String,
    },
    /// A schema validation failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// An invalid attribute value.
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    /// A storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A lock not acquired in time.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// A refused memory admission.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// Invalid chunking or compression options.
    #[error(transparent)]
    InvalidOptions(#[from] InvalidStorageOptionsError),
    /// A filesystem failure outside the adapter.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// An array operation inside a collection-wide sweep.
    #[error(transparent)]
    Array(#[from] crate::array::ArrayError),
    /// A virtual array operation inside a collection-wide sweep.
    #[error(transparent)]
    Varray(#[from] crate::varray::VArrayError),
}

/// The shared, immutable state behind every handle of one collection.
#[derive(Debug)]
pub(crate) struct CollectionCore {
    pub(crate) name: String,
    pub(crate) paths: CollectionPaths,
    /// The declared schema.
    pub(crate) kind_schema: CollectionSchema,
    /// The schema of the records under `array_data/`: the declared schema
    /// for array collections, the derived tile schema for virtual ones.
    pub(crate) array_schema: Arc<ArraySchema>,
    pub(crate) varray_schema: Option<Arc<VArraySchema>>,
    pub(crate) options: StorageOptions,
    pub(crate) adapter: Arc<dyn StorageAdapter>,
    pub(crate) lock_settings: LockSettings,
    pub(crate) memory_limit: MemoryLimit,
    pub(crate) pool: Arc<rayon::ThreadPool>,
}

impl CollectionCore {
    pub(crate) fn new(
        paths: CollectionPaths,
        schema: CollectionSchema,
        options: StorageOptions,
        adapter: Arc<dyn StorageAdapter>,
        lock_settings: LockSettings,
        memory_limit: MemoryLimit,
        pool: Arc<rayon::ThreadPool>,
    ) -> Self {
        let (array_schema, varray_schema) = match &schema {
            CollectionSchema::Array(array) => (Arc::new(array.clone()), None),
            CollectionSchema::Varray(varray) => {
                (Arc::new(varray.tile_schema()), Some(Arc::new(varray.clone())))
            }
        };
        Self {
            name: paths.name().to_string(),
            paths,
            kind_schema: schema,
            array_schema,
            varray_schema,
            options,
            adapter,
            lock_settings,
            memory_limit,
            pool,
        }
    }
}

/// A creation failure inside [`create_array_record`].
#[derive(Debug)]
pub(crate) enum CreateError {
    /// The primary attribute tuple is already taken.
    Duplicate,
    /// A storage failure.
    Storage(StorageError),
    /// A filesystem failure.
    Io(std::io::Error),
}

impl From<StorageError> for CreateError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error)
    }
}

impl From<std::io::Error> for CreateError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<CreateError> for crate::array::ArrayError {
    fn from(error: CreateError) -> Self {
        match error {
            CreateError::Duplicate => StorageError::Integrity(
                "record creation lost a race it should have won".to_string(),
            )
            .into(),
            CreateError::Storage(error) => error.into(),
            CreateError::Io(error) => StorageError::Io(error).into(),
        }
    }
}

fn primary_key_string(primary: &[(String, AttrValue)]) -> String {
    primary
        .iter()
        .map(|(name, value)| format!("{name}={}", value.canonical_string()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Write a metadata record and its primary-attribute symlink.
///
/// Creation is metadata-only: no body exists until the first write. The
/// symlink step is the duplicate gate — an occupied key directory (or an
/// existing leaf, for deterministic ids) rejects the creation before the
/// record is touched.
pub(crate) fn create_array_record(
    core: &Arc<CollectionCore>,
    id: Uuid,
    primary: &[(String, AttrValue)],
    custom: &[(String, AttrValue)],
    varray: bool,
) -> Result<ArrayMeta, CreateError> {
    if !primary.is_empty() {
        let dir = core.paths.symlink_dir(primary, varray);
        let occupied = std::fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if occupied {
            return Err(CreateError::Duplicate);
        }
    }
    let meta = ArrayMeta {
        id,
        collection: core.name.clone(),
        primary_attributes: primary.to_vec(),
        custom_attributes: custom.to_vec(),
        schema_version: crate::SCHEMA_VERSION,
    };
    let meta_path = core.paths.meta_path(&id, varray);
    core.adapter.write_meta(&meta_path, &meta)?;

    let dir = core.paths.symlink_dir(primary, varray);
    std::fs::create_dir_all(&dir)?;
    let leaf = core.paths.symlink_path(primary, &id, varray);
    match std::os::unix::fs::symlink(&meta_path, &leaf) {
        Ok(()) => Ok(meta),
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(CreateError::Duplicate)
        }
        Err(error) => Err(error.into()),
    }
}

/// One collection.
#[derive(Clone, Debug)]
pub struct Collection {
    core: Arc<CollectionCore>,
}

impl Collection {
    pub(crate) fn from_core(core: Arc<CollectionCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<CollectionCore> {
        &self.core
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// The declared schema.
    #[must_use]
    pub fn schema(&self) -> &CollectionSchema {
        &self.core.kind_schema
    }

    /// The storage options recorded in the manifest.
    #[must_use]
    pub fn storage_options(&self) -> &StorageOptions {
        &self.core.options
    }

    /// Returns true for a virtual array collection.
    #[must_use]
    pub fn holds_varrays(&self) -> bool {
        self.core.varray_schema.is_some()
    }

    fn require_arrays(&self) -> Result<&ArraySchema, CollectionError> {
        match &self.core.kind_schema {
            CollectionSchema::Array(schema) => Ok(schema),
            CollectionSchema::Varray(_) => {
                Err(CollectionError::NotAnArrayCollection(self.core.name.clone()))
            }
        }
    }

    fn require_varrays(&self) -> Result<&VArraySchema, CollectionError> {
        match &self.core.kind_schema {
            CollectionSchema::Varray(schema) => Ok(schema),
            CollectionSchema::Array(_) => {
                Err(CollectionError::NotAVarrayCollection(self.core.name.clone()))
            }
        }
    }

    /// Create an array from schema-conformant attribute values.
    ///
    /// Creation writes metadata only; the body materializes on the first
    /// non-fill write.
    ///
    /// # Errors
    /// Returns [`CollectionError::DuplicatePrimary`] if the primary tuple is
    /// taken, and validation, lock or storage errors otherwise.
    pub fn create_array(
        &self,
        primary: &[(String, AttrValue)],
        custom: &[(String, AttrValue)],
    ) -> Result<Array, CollectionError> {
        let schema = self.require_arrays()?;
        let (primary, custom) = normalize_attribute_values(schema.attributes(), primary, custom)?;
        let id = new_array_id();
        let meta = create_array_record(&self.core, id, &primary, &custom, false).map_err(
            |error| match error {
                CreateError::Duplicate => CollectionError::DuplicatePrimary {
                    collection: self.core.name.clone(),
                    key: primary_key_string(&primary),
                },
                CreateError::Storage(error) => error.into(),
                CreateError::Io(error) => error.into(),
            },
        )?;
        info!(collection = %self.core.name, array = %id, "array created");
        Ok(Array::new(self.core.clone(), meta))
    }

    /// Create a virtual array from schema-conformant attribute values.
    ///
    /// The id is derived deterministically from the collection name and the
    /// primary attribute tuple, so re-creation after a crash is idempotent
    /// and duplicate keys collide at the symlink gate.
    ///
    /// # Errors
    /// Returns [`CollectionError::DuplicatePrimary`] if the primary tuple is
    /// taken, and validation, lock or storage errors otherwise.
    pub fn create_varray(
        &self,
        primary: &[(String, AttrValue)],
        custom: &[(String, AttrValue)],
    ) -> Result<VArray, CollectionError> {
        let schema = self.require_varrays()?;
        let (primary, custom) = normalize_attribute_values(schema.attributes(), primary, custom)?;
        let id = varray_id(&self.core.name, &primary);
        let meta = create_array_record(&self.core, id, &primary, &custom, true).map_err(
            |error| match error {
                CreateError::Duplicate => CollectionError::DuplicatePrimary {
                    collection: self.core.name.clone(),
                    key: primary_key_string(&primary),
                },
                CreateError::Storage(error) => error.into(),
                CreateError::Io(error) => error.into(),
            },
        )?;
        info!(collection = %self.core.name, varray = %id, "virtual array created");
        Ok(VArray::new(self.core.clone(), meta))
    }

    fn iter_metas(&self, varray: bool) -> Result<Vec<ArrayMeta>, CollectionError> {
        let attributes: Vec<_> = if varray {
            self.core
                .varray_schema
                .as_ref()
                .map(|schema| schema.attributes().to_vec())
                .unwrap_or_default()
        } else {
            self.core.array_schema.attributes().to_vec()
        };
        let dir = self.core.paths.data_dir(varray);
        let mut metas = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(metas),
            Err(error) => return Err(error.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(std::ffi::OsStr::to_str) != Some(META_EXT) {
                continue;
            }
            metas.push(self.core.adapter.read_meta(&path, &attributes)?);
        }
        metas.sort_by_key(|meta| meta.id);
        Ok(metas)
    }

    /// Iterate the arrays of an array collection.
    ///
    /// # Errors
    /// Returns [`CollectionError::NotAnArrayCollection`] for a virtual array
    /// collection, or storage errors.
    pub fn arrays(&self) -> Result<Vec<Array>, CollectionError> {
        self.require_arrays()?;
        Ok(self
            .iter_metas(false)?
            .into_iter()
            .map(|meta| Array::new(self.core.clone(), meta))
            .collect())
    }

    /// Iterate the virtual arrays of a virtual array collection.
    ///
    /// # Errors
    /// Returns [`CollectionError::NotAVarrayCollection`] for a plain array
    /// collection, or storage errors.
    pub fn varrays(&self) -> Result<Vec<VArray>, CollectionError> {
        self.require_varrays()?;
        Ok(self
            .iter_metas(true)?
            .into_iter()
            .map(|meta| VArray::new(self.core.clone(), meta))
            .collect())
    }

    fn meta_by_id(&self, id: &Uuid, varray: bool) -> Result<Option<ArrayMeta>, CollectionError> {
        let attributes: Vec<_> = if varray {
            self.core
                .varray_schema
                .as_ref()
                .map(|schema| schema.attributes().to_vec())
                .unwrap_or_default()
        } else {
            self.core.array_schema.attributes().to_vec()
        };
        let path = self.core.paths.meta_path(id, varray);
        match self.core.adapter.read_meta(&path, &attributes) {
            Ok(meta) => Ok(Some(meta)),
            Err(StorageError::MetaNotFound(_)) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Look up an array by id.
    ///
    /// # Errors
    /// Returns storage errors; an absent id resolves to `None`.
    pub fn array_by_id(&self, id: &Uuid) -> Result<Option<Array>, CollectionError> {
        self.require_arrays()?;
        Ok(self
            .meta_by_id(id, false)?
            .map(|meta| Array::new(self.core.clone(), meta)))
    }

    /// Look up a virtual array by id.
    ///
    /// # Errors
    /// Returns storage errors; an absent id resolves to `None`.
    pub fn varray_by_id(&self, id: &Uuid) -> Result<Option<VArray>, CollectionError> {
        self.require_varrays()?;
        Ok(self
            .meta_by_id(id, true)?
            .map(|meta| VArray::new(self.core.clone(), meta)))
    }

    /// Reorder a user-supplied primary tuple into declared order, requiring
    /// every primary attribute.
    fn full_primary_tuple(
        &self,
        primary: &[(String, AttrValue)],
    ) -> Result<Vec<(String, AttrValue)>, CollectionError> {
        let mut ordered = Vec::new();
        for attribute in self
            .core
            .kind_schema
            .attributes()
            .iter()
            .filter(|a| a.primary)
        {
            let value = primary
                .iter()
                .find(|(name, _)| *name == attribute.name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| CollectionError::MissingPrimaryAttribute(attribute.name.clone()))?;
            attribute.validate_value(&value)?;
            ordered.push((attribute.name.clone(), value));
        }
        Ok(ordered)
    }

    fn id_by_primary(
        &self,
        primary: &[(String, AttrValue)],
        varray: bool,
    ) -> Result<Option<Uuid>, CollectionError> {
        let ordered = self.full_primary_tuple(primary)?;
        let dir = self.core.paths.symlink_dir(&ordered, varray);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        for entry in entries {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(std::ffi::OsStr::to_str) else {
                continue;
            };
            if let Ok(id) = Uuid::parse_str(stem) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Look up an array by its full primary attribute tuple: a direct
    /// filesystem resolution through the symlink tree.
    ///
    /// # Errors
    /// Returns [`CollectionError::MissingPrimaryAttribute`] for an
    /// incomplete tuple, or storage errors.
    pub fn array_by_primary(
        &self,
        primary: &[(String, AttrValue)],
    ) -> Result<Option<Array>, CollectionError> {
        self.require_arrays()?;
        match self.id_by_primary(primary, false)? {
            Some(id) => self.array_by_id(&id),
            None => Ok(None),
        }
    }

    /// Look up a virtual array by its full primary attribute tuple.
    ///
    /// # Errors
    /// Returns [`CollectionError::MissingPrimaryAttribute`] for an
    /// incomplete tuple, or storage errors.
    pub fn varray_by_primary(
        &self,
        primary: &[(String, AttrValue)],
    ) -> Result<Option<VArray>, CollectionError> {
        self.require_varrays()?;
        match self.id_by_primary(primary, true)? {
            Some(id) => self.varray_by_id(&id),
            None => Ok(None),
        }
    }

    /// Delete every array (or virtual array with its tiles) in the
    /// collection, keeping the collection itself.
    ///
    /// # Errors
    /// Returns the first failing deletion.
    pub fn clear(&self) -> Result<(), CollectionError> {
        debug!(collection = %self.core.name, "clearing collection");
        if self.holds_varrays() {
            for varray in self.varrays()? {
                varray.delete()?;
            }
        } else {
            for array in self.arrays()? {
                array.delete()?;
            }
        }
        info!(collection = %self.core.name, "collection cleared");
        Ok(())
    }
}

/// The manifest kind tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ManifestKind {
    Array,
    Varray,
}

/// The collection manifest, the on-disk form of the schema and options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct Manifest {
    pub(crate) name: String,
    #[serde(rename = "type")]
    pub(crate) kind: ManifestKind,
    pub(crate) dtype: ElementType,
    pub(crate) fill_value: serde_json::Value,
    pub(crate) dimensions: Vec<DimensionSchema>,
    pub(crate) attributes: Vec<crate::schema::AttributeSchema>,
    pub(crate) vgrid: Option<Vec<u64>>,
    pub(crate) storage_options: StorageOptions,
    pub(crate) version: u32,
}

impl Manifest {
    pub(crate) fn from_schema(
        name: &str,
        schema: &CollectionSchema,
        storage_options: &StorageOptions,
    ) -> Self {
        let (kind, vgrid) = match schema {
            CollectionSchema::Array(_) => (ManifestKind::Array, None),
            CollectionSchema::Varray(varray) => {
                (ManifestKind::Varray, Some(varray.vgrid().to_vec()))
            }
        };
        Self {
            name: name.to_string(),
            kind,
            dtype: schema.element_type(),
            fill_value: schema.fill_value().to_json(),
            dimensions: schema.dimensions().to_vec(),
            attributes: schema.attributes().to_vec(),
            vgrid,
            storage_options: storage_options.clone(),
            version: crate::SCHEMA_VERSION,
        }
    }

    /// Rebuild and re-validate the schema.
    pub(crate) fn into_schema(self) -> Result<(CollectionSchema, StorageOptions), String> {
        let fill = Scalar::from_json(self.dtype, &self.fill_value)
            .map_err(|error| error.to_string())?;
        let schema = match self.kind {
            ManifestKind::Array => CollectionSchema::Array(
                ArraySchema::new(self.dimensions, self.attributes, self.dtype, Some(fill))
                    .map_err(|error| error.to_string())?,
            ),
            ManifestKind::Varray => CollectionSchema::Varray(
                VArraySchema::new(
                    self.dimensions,
                    self.attributes,
                    self.dtype,
                    Some(fill),
                    self.vgrid,
                    None,
                )
                .map_err(|error| error.to_string())?,
            ),
        };
        Ok((schema, self.storage_options))
    }
}
