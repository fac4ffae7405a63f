//! Key-value store abstraction for the declaration index
//!
//! Every piece of persisted index state lives in a [`KeyValueStore`]: an ordered,
//! byte-oriented map with UTF-8 keys. Ordering is byte-lexicographic, which is
//! what makes prefix scans (declaration names, sub-package enumeration) cheap
//! without any secondary index.
//!
//! ## Usage
//!
//! ```no_run
//! use klsp_index::store::{KeyValueStore, KeyValueStoreExt, SledStore, StoreConfig};
//!
//! # fn main() -> Result<(), klsp_index::store::StoreError> {
//! let store = SledStore::open(StoreConfig::persistent("/tmp/klsp/declarations"))?;
//! store.put("Foo:class", b"...")?;
//! for (key, _value) in store.prefix_scan("Foo") {
//!     println!("{key}");
//! }
//! store.put_encoded("__version", &5u32)?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod lock;
pub mod sled_store;

pub use lock::{open_with_retry, LockRetryPolicy, StoreLock};
pub use sled_store::SledStore;

/// Errors raised by the store layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store at {path:?} is locked by another process or instance")]
    Locked { path: PathBuf },

    #[error("Store operation failed: {message}")]
    Backend { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] Box<bincode::ErrorKind>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this failure means "someone else holds the store lock"
    pub fn is_lock_held(&self) -> bool {
        matches!(self, StoreError::Locked { .. })
    }
}

/// Lazy, ordered sequence of `(key, value)` rows returned by [`KeyValueStore::prefix_scan`]
pub type PrefixScan<'a> = Box<dyn Iterator<Item = (String, Vec<u8>)> + Send + 'a>;

/// Configuration used to open a single store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the store (ignored for temporary stores)
    pub path: PathBuf,
    /// In-memory store with no disk persistence and no lock marker
    pub temporary: bool,
    /// Retry policy applied when the store is locked
    pub lock_retry: LockRetryPolicy,
}

impl StoreConfig {
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
            lock_retry: LockRetryPolicy::default(),
        }
    }

    pub fn temporary() -> Self {
        Self {
            path: PathBuf::new(),
            temporary: true,
            lock_retry: LockRetryPolicy::default(),
        }
    }

    pub fn with_lock_retry(mut self, lock_retry: LockRetryPolicy) -> Self {
        self.lock_retry = lock_retry;
        self
    }
}

/// Ordered, crash-safe key-value store
///
/// Implementations must make `put_batch`/`remove_batch` atomic: either every
/// entry of the batch becomes visible or none does.
pub trait KeyValueStore: Send + Sync {
    /// Name used in log messages
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Atomically write a group of entries
    fn put_batch(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically remove a group of keys
    fn remove_batch(&self, keys: Vec<String>) -> Result<(), StoreError>;

    /// All rows whose key starts with `prefix`, in byte-lexicographic key order.
    ///
    /// The sequence is lazy; rows that fail to read are logged and skipped.
    fn prefix_scan(&self, prefix: &str) -> PrefixScan<'_>;

    /// Number of rows
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every row
    fn clear(&self) -> Result<(), StoreError>;

    /// Flush pending writes to disk (no-op for temporary stores)
    fn flush(&self) -> Result<(), StoreError>;

    /// Graceful close; the store must not be used afterwards
    fn close(&self) -> Result<(), StoreError> {
        self.flush()
    }
}

/// bincode helpers for typed values
pub trait KeyValueStoreExt: KeyValueStore {
    fn get_decoded<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self.get(key)? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn put_encoded<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize,
    {
        let data = bincode::serialize(value)?;
        self.put(key, &data)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

/// Delay before retry `attempt` (1-based) under exponential backoff
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_lock_error_classification() {
        let locked = StoreError::Locked {
            path: PathBuf::from("/tmp/x"),
        };
        assert!(locked.is_lock_held());

        let other = StoreError::Backend {
            message: "boom".to_string(),
        };
        assert!(!other.is_lock_held());
    }
}
