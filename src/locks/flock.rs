//! OS-level advisory file locks.
//!
//! [`Flock`] wraps a `flock(2)` lock on a per-resource lock file. Locks are
//! advisory and per open file description, so they coordinate processes that
//! follow the same protocol; in-process coordination is layered on top by
//! the [lock registry](super::LockRegistry). A crashed owner's `flock` is
//! released by the kernel, but its `is_locked` marker survives and is
//! reclaimed by the next owner via a process liveness probe.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// The `pid:timestamp` marker a writer publishes while it holds a lock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LockMarker {
    /// The owning process id.
    pub pid: i32,
    /// Seconds since the unix epoch at acquisition.
    pub timestamp: u64,
}

impl LockMarker {
    /// The marker of the current process.
    #[must_use]
    pub fn current() -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Self {
            pid: std::process::id() as i32,
            timestamp,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let (pid, timestamp) = raw.trim().split_once(':')?;
        Some(Self {
            pid: pid.parse().ok()?,
            timestamp: timestamp.parse().ok()?,
        })
    }

    /// Probe whether the owning process is still alive.
    #[must_use]
    pub fn owner_alive(&self) -> bool {
        if self.pid == std::process::id() as i32 {
            return true;
        }
        let result = unsafe { libc::kill(self.pid, 0) };
        result == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }
}

impl core::fmt::Display for LockMarker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.pid, self.timestamp)
    }
}

/// An advisory lock on one lock file.
///
/// The lock is released on drop; the lock file itself is left in place so
/// that concurrent openers never race a recreated inode.
#[derive(Debug)]
pub struct Flock {
    path: PathBuf,
    file: Option<File>,
}

impl Flock {
    /// Create an unlocked handle for `path`.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
        }
    }

    /// The lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> std::io::Result<&File> {
        if self.file.is_none() {
            self.file = Some(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&self.path)?,
            );
        }
        Ok(self.file.as_ref().expect("just opened"))
    }

    fn try_flock(&mut self, operation: libc::c_int) -> std::io::Result<bool> {
        let fd = self.open()?.as_raw_fd();
        let result = unsafe { libc::flock(fd, operation | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let error = std::io::Error::last_os_error();
        if error.kind() == std::io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(error)
        }
    }

    /// Try to take the exclusive lock without blocking.
    ///
    /// # Errors
    /// Returns any I/O error other than the lock being busy.
    pub fn try_exclusive(&mut self) -> std::io::Result<bool> {
        self.try_flock(libc::LOCK_EX)
    }

    /// Try to take the shared lock without blocking.
    ///
    /// # Errors
    /// Returns any I/O error other than the lock being busy.
    pub fn try_shared(&mut self) -> std::io::Result<bool> {
        self.try_flock(libc::LOCK_SH)
    }

    /// Read the current `is_locked` marker, if any.
    ///
    /// # Errors
    /// Returns any I/O error; a missing lock file reads as no marker.
    pub fn read_marker(&mut self) -> std::io::Result<Option<LockMarker>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = self.open()?;
        let mut raw = String::new();
        let mut file = file;
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut raw)?;
        Ok(LockMarker::parse(&raw))
    }

    /// Publish the `is_locked` marker of the current process.
    ///
    /// # Errors
    /// Returns any I/O error.
    pub fn publish_marker(&mut self) -> std::io::Result<()> {
        let marker = LockMarker::current();
        let mut file = self.open()?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(marker.to_string().as_bytes())?;
        file.flush()
    }

    /// Clear the marker without releasing the lock.
    ///
    /// # Errors
    /// Returns any I/O error.
    pub fn clear_marker(&mut self) -> std::io::Result<()> {
        if let Some(file) = self.file.as_ref() {
            file.set_len(0)?;
        }
        Ok(())
    }

    /// Release the lock and close the file.
    pub fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        }
    }
}

impl Drop for Flock {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_excludes_shared_on_other_descriptor() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("resource.lock");
        let mut writer = Flock::new(&path);
        assert!(writer.try_exclusive().unwrap());
        writer.publish_marker().unwrap();

        let mut reader = Flock::new(&path);
        assert!(!reader.try_shared().unwrap());
        let marker = reader.read_marker().unwrap().unwrap();
        assert_eq!(marker.pid, std::process::id() as i32);
        assert!(marker.owner_alive());

        writer.unlock();
        assert!(reader.try_shared().unwrap());
    }

    #[test]
    fn shared_locks_coexist() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("resource.lock");
        let mut a = Flock::new(&path);
        let mut b = Flock::new(&path);
        assert!(a.try_shared().unwrap());
        assert!(b.try_shared().unwrap());
        let mut writer = Flock::new(&path);
        assert!(!writer.try_exclusive().unwrap());
    }

    #[test]
    fn marker_round_trip() {
        let marker = LockMarker::current();
        let parsed = LockMarker::parse(&marker.to_string()).unwrap();
        assert_eq!(parsed, marker);
        assert!(LockMarker::parse("").is_none());
        assert!(LockMarker::parse("junk").is_none());
    }
}
