//! Sled store implementation
//!
//! Implements [`KeyValueStore`] on top of sled. Each store is its own sled
//! database in its own directory, guarded by a [`StoreLock`] marker.

use super::lock::{open_with_retry, StoreLock};
use super::{KeyValueStore, PrefixScan, StoreConfig, StoreError};
use sled::{Batch, Config, Db};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Sled-backed [`KeyValueStore`]
pub struct SledStore {
    db: Db,
    name: String,
    temporary: bool,
    lock: Mutex<Option<StoreLock>>,
}

impl SledStore {
    /// Open (or create) the store described by `config`
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let name = config
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "temporary".to_string());

        if config.temporary {
            debug!("Creating temporary store '{}' (in-memory)", name);
            let db = Config::new()
                .temporary(true)
                .open()
                .map_err(|e| from_sled(e, &config))?;
            return Ok(Self {
                db,
                name,
                temporary: true,
                lock: Mutex::new(None),
            });
        }

        let store = open_with_retry(&config.path, &config.lock_retry, || {
            let lock = StoreLock::acquire(&config.path)?;
            let db = Config::new()
                .path(&config.path)
                .open()
                .map_err(|e| from_sled(e, &config))?;
            Ok(Self {
                db,
                name: name.clone(),
                temporary: false,
                lock: Mutex::new(Some(lock)),
            })
        })?;

        info!("Opened store '{}' at {:?}", store.name, config.path);
        Ok(store)
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }
}

/// Map a sled error, classifying "someone else holds the file lock" as [`StoreError::Locked`]
fn from_sled(error: sled::Error, config: &StoreConfig) -> StoreError {
    match error {
        sled::Error::Io(io)
            if io.kind() == std::io::ErrorKind::WouldBlock
                || io.to_string().contains("lock") =>
        {
            StoreError::Locked {
                path: config.path.clone(),
            }
        }
        sled::Error::Io(io) => StoreError::Io(io),
        other => StoreError::Backend {
            message: format!("{other}"),
        },
    }
}

fn backend_error(name: &str, action: &str, error: sled::Error) -> StoreError {
    StoreError::Backend {
        message: format!("Failed to {action} in store '{name}': {error}"),
    }
}

impl KeyValueStore for SledStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.db
            .get(key.as_bytes())
            .map(|value| value.map(|v| v.to_vec()))
            .map_err(|e| backend_error(&self.name, "get key", e))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| backend_error(&self.name, "set key", e))?;
        Ok(())
    }

    fn put_batch(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut batch = Batch::default();
        for (key, value) in entries {
            batch.insert(key.as_bytes(), value);
        }
        self.db
            .apply_batch(batch)
            .map_err(|e| backend_error(&self.name, "apply batch", e))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| backend_error(&self.name, "remove key", e))?;
        Ok(())
    }

    fn remove_batch(&self, keys: Vec<String>) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut batch = Batch::default();
        for key in keys {
            batch.remove(key.as_bytes());
        }
        self.db
            .apply_batch(batch)
            .map_err(|e| backend_error(&self.name, "apply batch", e))
    }

    fn prefix_scan(&self, prefix: &str) -> PrefixScan<'_> {
        let name = self.name.as_str();
        Box::new(
            self.db
                .scan_prefix(prefix.as_bytes())
                .filter_map(move |row| match row {
                    Ok((key, value)) => match String::from_utf8(key.to_vec()) {
                        Ok(key) => Some((key, value.to_vec())),
                        Err(_) => {
                            warn!("Skipping non UTF-8 key in store '{}'", name);
                            None
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read row during prefix scan of '{}': {}", name, e);
                        None
                    }
                }),
        )
    }

    fn len(&self) -> usize {
        self.db.len()
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.db
            .clear()
            .map_err(|e| backend_error(&self.name, "clear", e))
    }

    fn flush(&self) -> Result<(), StoreError> {
        if self.temporary {
            return Ok(());
        }
        self.db
            .flush()
            .map_err(|e| backend_error(&self.name, "flush", e))?;
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.flush()?;
        if let Ok(mut lock) = self.lock.lock() {
            if let Some(mut lock) = lock.take() {
                lock.release();
            }
        }
        debug!("Closed store '{}'", self.name);
        Ok(())
    }
}

impl Drop for SledStore {
    fn drop(&mut self) {
        if !self.temporary {
            if let Err(e) = self.db.flush() {
                warn!("Failed to flush store '{}' on drop: {}", self.name, e);
            }
        }
    }
}
