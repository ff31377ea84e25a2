//! The client entry point.
//!
//! A [`Client`] binds a storage URI to a registered adapter, owns the
//! bounded worker pool for virtual array scatter/gather, and manages
//! collections: create, get, iterate and delete.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

pub use crate::config::ClientOptions;

use crate::collection::{Collection, CollectionCore, CollectionError, Manifest};
use crate::locks;
use crate::paths::{CollectionPaths, COLLECTIONS_DIR};
use crate::schema::CollectionSchema;
use crate::storage::{self, AdapterNotFoundError, StorageAdapter, StorageOptions};
use crate::uri::{StorageUri, UriError};

/// A client construction or collection management error.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An unparsable storage URI.
    #[error(transparent)]
    Uri(#[from] UriError),
    /// A URI scheme no registered adapter serves.
    #[error(transparent)]
    AdapterNotFound(#[from] AdapterNotFoundError),
    /// An invalid collection name.
    #[error("invalid collection name {0:?}")]
    InvalidName(String),
    /// A collection error.
    #[error(transparent)]
    Collection(#[from] CollectionError),
    /// A filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A worker pool that could not be built.
    #[error(transparent)]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// A storage engine client.
///
/// Clients are cheap to clone; the lock and adapter registries are
/// process-wide and shared.
#[derive(Clone, Debug)]
pub struct Client {
    root: PathBuf,
    uri: StorageUri,
    adapter: Arc<dyn StorageAdapter>,
    options: ClientOptions,
    pool: Arc<rayon::ThreadPool>,
}

impl Client {
    /// Open a client on `uri`, creating the storage scaffolding if needed.
    ///
    /// # Errors
    /// Returns a [`ClientError`] for an unparsable URI, an unserved scheme,
    /// a worker pool that cannot be built, or filesystem failures.
    pub fn new(uri: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let uri = StorageUri::parse(uri)?;
        let adapter = storage::registry().get(uri.scheme())?;
        let pool = match options.executor() {
            Some(executor) => executor.clone(),
            None => Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(options.workers())
                    .thread_name(|index| format!("gridstore-worker-{index}"))
                    .build()?,
            ),
        };
        let root = uri.path().to_path_buf();
        std::fs::create_dir_all(root.join(COLLECTIONS_DIR))?;
        debug!(
            %uri,
            workers = options.workers(),
            loglevel = ?options.loglevel(),
            "client opened"
        );
        Ok(Self {
            root,
            uri,
            adapter,
            options,
            pool,
        })
    }

    /// The parsed storage URI.
    #[must_use]
    pub fn uri(&self) -> &StorageUri {
        &self.uri
    }

    /// The client options.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn validate_name(name: &str) -> Result<(), ClientError> {
        let valid = !name.is_empty()
            && !name.trim().is_empty()
            && !name.contains(['/', '\\'])
            && name != "."
            && name != "..";
        if valid {
            Ok(())
        } else {
            Err(ClientError::InvalidName(name.to_string()))
        }
    }

    fn core_for(
        &self,
        paths: CollectionPaths,
        schema: CollectionSchema,
        options: StorageOptions,
    ) -> Arc<CollectionCore> {
        Arc::new(CollectionCore::new(
            paths,
            schema,
            options,
            self.adapter.clone(),
            self.options.lock_settings(),
            self.options.memory_limit(),
            self.pool.clone(),
        ))
    }

    /// Create a collection: validate the schema and options, write the
    /// manifest atomically under the collection lock, and scaffold the
    /// directory tree.
    ///
    /// The memory admission check prices the footprint of one full array of
    /// the schema; it is skipped when
    /// [`ClientOptions::with_skip_collection_create_memory_check`] is set.
    ///
    /// # Errors
    /// Returns [`CollectionError::AlreadyExists`] for a taken name, and
    /// validation, admission, lock or storage errors otherwise.
    pub fn create_collection(
        &self,
        name: &str,
        schema: impl Into<CollectionSchema>,
        storage_options: Option<StorageOptions>,
    ) -> Result<Collection, ClientError> {
        Self::validate_name(name)?;
        let schema = schema.into();
        let storage_options = storage_options.unwrap_or_default();
        storage_options
            .validate(&schema.shape())
            .map_err(CollectionError::from)?;
        if !self.options.skip_collection_create_memory_check() {
            crate::memory::check_memory(
                &schema.shape(),
                schema.element_type(),
                self.options.memory_limit(),
            )
            .map_err(CollectionError::from)?;
        }

        let paths = CollectionPaths::new(&self.root, name);
        std::fs::create_dir_all(paths.root())?;
        let _guard = locks::acquire_write(&paths.lock(), &self.options.lock_settings())
            .map_err(CollectionError::from)?;
        if paths.manifest().exists() {
            return Err(CollectionError::AlreadyExists(name.to_string()).into());
        }

        let manifest = Manifest::from_schema(name, &schema, &storage_options);
        let record = serde_json::to_value(&manifest).map_err(std::io::Error::from)?;
        storage::write_json_atomic(&paths.manifest(), &record)
            .map_err(CollectionError::from)?;
        std::fs::create_dir_all(paths.data_dir(false))?;
        std::fs::create_dir_all(paths.symlinks_dir(false))?;
        if matches!(schema, CollectionSchema::Varray(_)) {
            std::fs::create_dir_all(paths.data_dir(true))?;
            std::fs::create_dir_all(paths.symlinks_dir(true))?;
        }
        info!(collection = name, "collection created");
        Ok(Collection::from_core(self.core_for(paths, schema, storage_options)))
    }

    /// Open an existing collection by name, loading and validating its
    /// manifest.
    ///
    /// # Errors
    /// Returns [`CollectionError::NotFound`] for an unknown name and
    /// [`CollectionError::CorruptManifest`] for a manifest that does not
    /// decode or validate.
    pub fn get_collection(&self, name: &str) -> Result<Collection, ClientError> {
        Self::validate_name(name)?;
        let paths = CollectionPaths::new(&self.root, name);
        let raw = match std::fs::read_to_string(paths.manifest()) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(CollectionError::NotFound(name.to_string()).into())
            }
            Err(error) => return Err(error.into()),
        };
        let corrupt = |reason: String| CollectionError::CorruptManifest {
            path: paths.manifest(),
            reason,
        };
        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(|error| corrupt(error.to_string()))?;
        let (schema, storage_options) = manifest.into_schema().map_err(corrupt)?;
        debug!(collection = name, "collection opened");
        Ok(Collection::from_core(self.core_for(paths, schema, storage_options)))
    }

    /// Iterate every collection under the storage root.
    ///
    /// # Errors
    /// Returns the first failing manifest load.
    pub fn collections(&self) -> Result<Vec<Collection>, ClientError> {
        let dir = self.root.join(COLLECTIONS_DIR);
        let mut collections = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(ToString::to_string) else {
                continue;
            };
            collections.push(self.get_collection(&name)?);
        }
        collections.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(collections)
    }

    /// Delete a collection and everything under it, after draining its lock.
    ///
    /// # Errors
    /// Returns [`CollectionError::NotFound`] for an unknown name, and lock
    /// or filesystem errors otherwise.
    pub fn delete_collection(&self, name: &str) -> Result<(), ClientError> {
        Self::validate_name(name)?;
        let paths = CollectionPaths::new(&self.root, name);
        if !paths.manifest().exists() {
            return Err(CollectionError::NotFound(name.to_string()).into());
        }
        let _guard = locks::acquire_write(&paths.lock(), &self.options.lock_settings())
            .map_err(CollectionError::from)?;
        std::fs::remove_dir_all(paths.root())?;
        info!(collection = name, "collection deleted");
        Ok(())
    }
}
