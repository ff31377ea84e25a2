//! The storage adapter contract.
//!
//! The engine core drives storage through two small traits:
//! [`StorageAdapter`], which opens datasets and reads/writes metadata
//! records, and [`Dataset`], one open per-array dataset supporting region
//! reads and writes, truncation and deletion. Chunking and compression are
//! opaque to the core: the adapter applies the [`StorageOptions`] stored in
//! the collection manifest.
//!
//! Adapters register in a process-wide [`AdapterRegistry`] keyed by URI
//! scheme; opening a client whose URI has no matching adapter fails with
//! [`AdapterNotFoundError`]. The built-in [`dense::DenseAdapter`] serves
//! `file://` URIs.

pub mod dense;
pub mod meta;
pub mod options;

pub use meta::ArrayMeta;
pub use options::{ChunkSpec, Compression, InvalidStorageOptionsError, StorageOptions};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::buffer::{Scalar, TypedBuffer};
use crate::schema::{AttributeSchema, ElementType};
use crate::slicing::Bounds;

/// A storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error from the adapter or the filesystem.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A missing metadata record.
    #[error("metadata record {0} does not exist")]
    MetaNotFound(PathBuf),
    /// A metadata record that does not decode.
    #[error("metadata record {path} is corrupted: {reason}")]
    CorruptMeta {
        /// The record path.
        path: PathBuf,
        /// What failed to decode.
        reason: String,
    },
    /// Metadata and data disagree on the storage.
    #[error("storage integrity violated: {0}")]
    Integrity(String),
    /// A buffer incompatible with the dataset layout.
    #[error(transparent)]
    IncompatibleBuffer(#[from] crate::buffer::BufferError),
    /// Invalid chunking or compression options.
    #[error(transparent)]
    InvalidOptions(#[from] InvalidStorageOptionsError),
}

/// A URI scheme no registered adapter serves.
#[derive(Clone, Debug, Error)]
#[error("no storage adapter is registered for scheme {0:?}")]
pub struct AdapterNotFoundError(pub String);

/// The fixed layout of a dataset: shape, element type and fill value.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetLayout {
    /// The dataset shape.
    pub shape: Vec<u64>,
    /// The element type.
    pub element_type: ElementType,
    /// The value read from unwritten cells.
    pub fill_value: Scalar,
}

impl DatasetLayout {
    /// The number of elements.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// The body size in bytes when fully materialized.
    #[must_use]
    pub fn num_bytes(&self) -> u64 {
        self.num_elements() * self.element_type.size() as u64
    }
}

/// One open per-array dataset.
pub trait Dataset: Send {
    /// Read a region. When no body exists, a fill-valued buffer is
    /// synthesized.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on I/O failure or an integrity violation.
    fn read(&mut self, region: &Bounds) -> Result<TypedBuffer, StorageError>;

    /// Write a region, materializing the body on first call.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on I/O failure or a buffer that does not
    /// match the layout.
    fn write(&mut self, region: &Bounds, data: &TypedBuffer) -> Result<(), StorageError>;

    /// Delete the body, keeping the metadata record.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on I/O failure.
    fn truncate(&mut self) -> Result<(), StorageError>;

    /// Returns true if the body exists on storage.
    fn has_body(&self) -> bool;
}

/// A pluggable storage backend, selected by URI scheme.
pub trait StorageAdapter: Send + Sync + std::fmt::Debug {
    /// The URI scheme this adapter serves.
    fn scheme(&self) -> &'static str;

    /// The file extension of dataset bodies.
    fn data_extension(&self) -> &'static str;

    /// Open (or lazily create) the dataset at `body_path`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the options are invalid for the layout.
    fn open(
        &self,
        body_path: &Path,
        options: &StorageOptions,
        layout: &DatasetLayout,
    ) -> Result<Box<dyn Dataset>, StorageError>;

    /// Delete a dataset body entirely. Deleting an absent body is not an
    /// error.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on I/O failure.
    fn delete(&self, body_path: &Path) -> Result<(), StorageError>;

    /// Read the metadata record at `meta_path`, decoding attribute values
    /// against `attributes`.
    ///
    /// # Errors
    /// Returns [`StorageError::MetaNotFound`] for an absent record and
    /// [`StorageError::CorruptMeta`] for one that does not decode.
    fn read_meta(
        &self,
        meta_path: &Path,
        attributes: &[AttributeSchema],
    ) -> Result<ArrayMeta, StorageError>;

    /// Write the metadata record at `meta_path` atomically (tmp + rename).
    ///
    /// # Errors
    /// Returns a [`StorageError`] on I/O failure.
    fn write_meta(&self, meta_path: &Path, meta: &ArrayMeta) -> Result<(), StorageError>;

    /// Delete a metadata record. Deleting an absent record is not an error.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on I/O failure.
    fn delete_meta(&self, meta_path: &Path) -> Result<(), StorageError>;
}

/// The process-wide registry of storage adapters, keyed by URI scheme.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    adapters: parking_lot::RwLock<HashMap<&'static str, Arc<dyn StorageAdapter>>>,
}

impl AdapterRegistry {
    /// Register an adapter, replacing any adapter of the same scheme.
    pub fn register(&self, adapter: Arc<dyn StorageAdapter>) {
        self.adapters.write().insert(adapter.scheme(), adapter);
    }

    /// The adapter serving `scheme`.
    ///
    /// # Errors
    /// Returns [`AdapterNotFoundError`] if no adapter serves the scheme.
    pub fn get(&self, scheme: &str) -> Result<Arc<dyn StorageAdapter>, AdapterNotFoundError> {
        self.adapters
            .read()
            .get(scheme)
            .cloned()
            .ok_or_else(|| AdapterNotFoundError(scheme.to_string()))
    }
}

static REGISTRY: OnceLock<AdapterRegistry> = OnceLock::new();

/// The process-wide adapter registry, with the built-in adapters
/// pre-registered.
pub fn registry() -> &'static AdapterRegistry {
    REGISTRY.get_or_init(|| {
        let registry = AdapterRegistry::default();
        registry.register(Arc::new(dense::DenseAdapter::default()));
        registry
    })
}

/// Write a JSON document atomically: a sibling tmp file, then a rename.
///
/// # Errors
/// Returns a [`StorageError`] on I/O failure.
pub fn write_json_atomic(path: &Path, value: &serde_json::Value) -> Result<(), StorageError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("record");
    let tmp = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));
    std::fs::write(&tmp, serde_json::to_vec(value).map_err(std::io::Error::from)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_serves_file_scheme() {
        let adapter = registry().get("file").unwrap();
        assert_eq!(adapter.scheme(), "file");
        assert_eq!(adapter.data_extension(), "dat");
        assert!(registry().get("ftp").is_err());
    }

    #[test]
    fn atomic_json_write() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("record.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"a": 2})).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"a":2}"#);
        // No tmp leftovers.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
