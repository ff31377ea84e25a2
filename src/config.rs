//! Client configuration options.

use std::sync::Arc;
use std::time::Duration;

use crate::locks::LockSettings;
use crate::memory::MemoryLimit;

/// Configuration of a [`Client`](crate::client::Client).
///
/// All options have defaults; construct with [`ClientOptions::default`] and
/// override with the `with_*` methods.
///
/// ```
/// use gridstore::config::ClientOptions;
///
/// let options = ClientOptions::default()
///     .with_workers(8)
///     .with_write_lock_timeout(30)
///     .with_memory_limit("4G".parse().unwrap());
/// assert_eq!(options.workers(), 8);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    workers: Option<usize>,
    executor: Option<Arc<rayon::ThreadPool>>,
    write_lock_timeout: Option<u64>,
    write_lock_check_interval: Option<u64>,
    memory_limit: MemoryLimit,
    loglevel: Option<tracing::Level>,
    skip_collection_create_memory_check: bool,
}

impl ClientOptions {
    /// Set the number of worker threads for virtual array scatter/gather.
    ///
    /// Defaults to the available parallelism plus four.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Supply an external worker pool instead of building one.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<rayon::ThreadPool>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the writer lock timeout in seconds (default 60).
    #[must_use]
    pub fn with_write_lock_timeout(mut self, seconds: u64) -> Self {
        self.write_lock_timeout = Some(seconds);
        self
    }

    /// Set the lock polling interval in seconds (default 1).
    #[must_use]
    pub fn with_write_lock_check_interval(mut self, seconds: u64) -> Self {
        self.write_lock_check_interval = Some(seconds);
        self
    }

    /// Set the memory limit gating subset materialization and collection
    /// creation (default unlimited).
    #[must_use]
    pub fn with_memory_limit(mut self, limit: MemoryLimit) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Record the desired log level for the embedding application's
    /// `tracing` subscriber. The engine itself only emits events.
    #[must_use]
    pub fn with_loglevel(mut self, level: tracing::Level) -> Self {
        self.loglevel = Some(level);
        self
    }

    /// Skip the memory admission check on collection creation.
    #[must_use]
    pub fn with_skip_collection_create_memory_check(mut self, skip: bool) -> Self {
        self.skip_collection_create_memory_check = skip;
        self
    }

    /// The configured worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
                + 4
        })
    }

    /// The external worker pool, if supplied.
    #[must_use]
    pub fn executor(&self) -> Option<&Arc<rayon::ThreadPool>> {
        self.executor.as_ref()
    }

    /// The lock polling policy.
    #[must_use]
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            timeout: Duration::from_secs(self.write_lock_timeout.unwrap_or(60)),
            check_interval: Duration::from_secs(self.write_lock_check_interval.unwrap_or(1)),
        }
    }

    /// The memory limit.
    #[must_use]
    pub fn memory_limit(&self) -> MemoryLimit {
        self.memory_limit
    }

    /// The recorded log level, if any.
    #[must_use]
    pub fn loglevel(&self) -> Option<tracing::Level> {
        self.loglevel
    }

    /// Whether collection creation skips the memory admission check.
    #[must_use]
    pub fn skip_collection_create_memory_check(&self) -> bool {
        self.skip_collection_create_memory_check
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ClientOptions::default();
        assert!(options.workers() >= 5);
        assert_eq!(options.lock_settings().timeout, Duration::from_secs(60));
        assert_eq!(
            options.lock_settings().check_interval,
            Duration::from_secs(1)
        );
        assert_eq!(options.memory_limit(), MemoryLimit::unlimited());
        assert!(!options.skip_collection_create_memory_check());
    }

    #[test]
    fn overrides() {
        let options = ClientOptions::default()
            .with_workers(2)
            .with_write_lock_timeout(5)
            .with_write_lock_check_interval(2)
            .with_memory_limit("1M".parse().unwrap())
            .with_skip_collection_create_memory_check(true);
        assert_eq!(options.workers(), 2);
        assert_eq!(options.lock_settings().timeout, Duration::from_secs(5));
        assert_eq!(options.memory_limit().as_bytes(), 1 << 20);
        assert!(options.skip_collection_create_memory_check());
    }
}
