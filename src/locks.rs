//! The locking model.
//!
//! Every protected resource — a collection, an array, a tile — is guarded by
//! two cooperating layers:
//!
//! 1. an in-process [`LockRegistry`]: a process-wide map from the canonical
//!    lock-file path to a readers-writer primitive, serializing the threads
//!    of one process, and
//! 2. an on-disk advisory artifact ([`flock::Flock`]): a lock file taken
//!    with an OS-level exclusive or shared lock, plus an `is_locked` marker
//!    published by writers, coordinating separate processes.
//!
//! A writer acquires the in-process writer half first, then the on-disk
//! exclusive lock, then publishes its marker. Readers share on both layers
//! and hold the shared `flock` for the duration of the read, so a writer in
//! another process waits for them. Both sides poll with a configurable
//! interval up to a configurable timeout; on timeout the operation fails
//! with [`LockError::Timeout`] and is never retried by the engine.
//!
//! Guards release on every exit path, including panics. A crashed writer's
//! `flock` is released by the kernel; its stale marker is reclaimed on the
//! next acquisition after a process liveness probe.

pub mod flock;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

use flock::Flock;

/// A lock acquisition error.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was not acquired within the configured window.
    #[error("{resource:?} is locked, gave up after {timeout:?}")]
    Timeout {
        /// The lock file path.
        resource: PathBuf,
        /// The configured timeout.
        timeout: Duration,
    },
    /// An I/O error on the lock artifact.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The polling policy of lock acquisition.
#[derive(Copy, Clone, Debug)]
pub struct LockSettings {
    /// Give up after this long.
    pub timeout: Duration,
    /// Poll busy locks at this interval.
    pub check_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            check_interval: Duration::from_secs(1),
        }
    }
}

/// The process-wide map from canonical lock path to an in-process
/// readers-writer lock.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl LockRegistry {
    fn slot(&self, path: &Path) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}

static REGISTRY: OnceLock<LockRegistry> = OnceLock::new();

/// The process-wide lock registry.
pub fn registry() -> &'static LockRegistry {
    REGISTRY.get_or_init(LockRegistry::default)
}

fn poll<T>(
    resource: &Path,
    settings: &LockSettings,
    mut attempt: impl FnMut() -> Result<Option<T>, LockError>,
) -> Result<T, LockError> {
    let deadline = Instant::now() + settings.timeout;
    loop {
        if let Some(acquired) = attempt()? {
            return Ok(acquired);
        }
        if Instant::now() >= deadline {
            return Err(LockError::Timeout {
                resource: resource.to_path_buf(),
                timeout: settings.timeout,
            });
        }
        std::thread::sleep(settings.check_interval);
    }
}

/// An exclusive lock on one resource, across threads and processes.
///
/// Dropped guards clear the marker and release both layers.
#[derive(Debug)]
pub struct WriteGuard {
    flock: Flock,
    _process: ArcRwLockWriteGuard<RawRwLock, ()>,
}

impl WriteGuard {
    /// The lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.flock.path()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Err(error) = self.flock.clear_marker() {
            warn!(path = %self.flock.path().display(), %error, "failed to clear lock marker");
        }
        self.flock.unlock();
    }
}

/// A shared lock on one resource, across threads and processes.
#[derive(Debug)]
pub struct ReadGuard {
    flock: Flock,
    _process: ArcRwLockReadGuard<RawRwLock, ()>,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.flock.unlock();
    }
}

/// Acquire the writer lock on the resource behind `path`.
///
/// # Errors
/// Returns [`LockError::Timeout`] if either layer stays busy past the
/// configured timeout, or an I/O error on the lock artifact.
pub fn acquire_write(path: &Path, settings: &LockSettings) -> Result<WriteGuard, LockError> {
    let slot = registry().slot(path);
    let process = poll(path, settings, || Ok(RwLock::try_write_arc(&slot)))?;

    let mut flock = Flock::new(path);
    poll(path, settings, || {
        if flock.try_exclusive()? {
            Ok(Some(()))
        } else {
            Ok(None)
        }
    })?;

    // A leftover marker under a free flock means its owner died mid-write.
    match flock.read_marker() {
        Ok(Some(stale)) if !stale.owner_alive() => {
            warn!(path = %path.display(), owner = stale.pid, "reclaiming stale lock artifact");
        }
        _ => {}
    }
    flock.publish_marker()?;
    debug!(path = %path.display(), "write lock acquired");
    Ok(WriteGuard {
        flock,
        _process: process,
    })
}

/// Acquire the reader lock on the resource behind `path`.
///
/// Readers never block each other; a detected writer makes the reader wait
/// for release up to the configured timeout.
///
/// # Errors
/// Returns [`LockError::Timeout`] if a writer holds the resource past the
/// configured timeout, or an I/O error on the lock artifact.
pub fn acquire_read(path: &Path, settings: &LockSettings) -> Result<ReadGuard, LockError> {
    let slot = registry().slot(path);
    let process = poll(path, settings, || Ok(RwLock::try_read_arc(&slot)))?;

    let mut flock = Flock::new(path);
    poll(path, settings, || {
        if flock.try_shared()? {
            Ok(Some(()))
        } else {
            if let Ok(Some(owner)) = flock.read_marker() {
                debug!(
                    path = %path.display(),
                    owner = owner.pid,
                    "reader waiting for writer"
                );
            }
            Ok(None)
        }
    })?;
    debug!(path = %path.display(), "read lock acquired");
    Ok(ReadGuard {
        flock,
        _process: process,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(200),
            check_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn writer_excludes_writer() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.lock");
        let guard = acquire_write(&path, &fast()).unwrap();
        assert!(matches!(
            acquire_write(&path, &fast()),
            Err(LockError::Timeout { .. })
        ));
        drop(guard);
        assert!(acquire_write(&path, &fast()).is_ok());
    }

    #[test]
    fn readers_share() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("b.lock");
        let first = acquire_read(&path, &fast()).unwrap();
        let second = acquire_read(&path, &fast()).unwrap();
        drop(first);
        drop(second);
    }

    #[test]
    fn reader_waits_for_writer_release() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("c.lock");
        let writer = acquire_write(&path, &fast()).unwrap();
        assert!(matches!(
            acquire_read(&path, &fast()),
            Err(LockError::Timeout { .. })
        ));
        drop(writer);
        assert!(acquire_read(&path, &fast()).is_ok());
    }

    #[test]
    fn guards_release_on_panic() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("d.lock");
        let settings = fast();
        let path_clone = path.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = acquire_write(&path_clone, &fast()).unwrap();
            panic!("unwinding releases the guard");
        });
        assert!(result.is_err());
        assert!(acquire_write(&path, &settings).is_ok());
    }
}
