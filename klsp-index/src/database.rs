//! Owner of every store of one workspace index
//!
//! The [`Database`] opens the version store first and wipes everything when the
//! stamped schema version differs from the one this build writes. Only then are
//! the working stores (`files`, `packages`, `declarations`, `sources`) opened.
//!
//! Write ordering for one file is fixed: declarations, then the [`FileRecord`]
//! pointer, then removal of superseded declaration keys. A reader that finds a
//! file record can therefore rely on every key it lists being present.

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::schema::{Declaration, FileRecord, SCHEMA_VERSION, VERSION_KEY};
use crate::store::{
    KeyValueStore, KeyValueStoreExt, LockRetryPolicy, SledStore, StoreConfig, StoreError,
};
use crate::workspace::{
    ALL_STORES, DECLARATIONS_STORE, FILES_STORE, PACKAGES_STORE, PROJECT_STORE, SOURCES_STORE,
};

/// How to open a [`Database`]
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Workspace cache root holding one directory per store
    pub cache_dir: PathBuf,
    /// Keep everything in memory
    pub temporary: bool,
    pub lock_retry: LockRetryPolicy,
    /// Version this build reads and writes
    pub schema_version: u32,
}

impl DatabaseConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            temporary: false,
            lock_retry: LockRetryPolicy::default(),
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn temporary() -> Self {
        Self {
            temporary: true,
            ..Self::new(PathBuf::new())
        }
    }

    pub fn with_lock_retry(mut self, lock_retry: LockRetryPolicy) -> Self {
        self.lock_retry = lock_retry;
        self
    }

    fn store(&self, name: &str) -> StoreConfig {
        if self.temporary {
            StoreConfig::temporary()
        } else {
            StoreConfig::persistent(self.cache_dir.join(name))
                .with_lock_retry(self.lock_retry.clone())
        }
    }
}

/// Row counts per working store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub files: usize,
    pub packages: usize,
    pub declarations: usize,
    pub sources: usize,
}

pub struct Database {
    config: DatabaseConfig,
    /// Held open for the session so its lock marks the whole cache root as in use
    project: Box<dyn KeyValueStore>,
    files: Box<dyn KeyValueStore>,
    packages: Box<dyn KeyValueStore>,
    declarations: Box<dyn KeyValueStore>,
    sources: Box<dyn KeyValueStore>,
    /// Serializes read-modify-write of the package and source lists
    list_lock: Mutex<()>,
    decode_warned: AtomicBool,
}

impl Database {
    pub fn open(config: DatabaseConfig) -> Result<Self, StoreError> {
        let mut project = SledStore::open(config.store(PROJECT_STORE))?;

        let stamped: Option<u32> = match project.get_decoded(VERSION_KEY) {
            Ok(version) => version,
            Err(e) => {
                warn!("Unreadable schema version marker: {}", e);
                None
            }
        };

        if stamped != Some(config.schema_version) {
            match stamped {
                Some(old) => info!(
                    "Index schema changed ({} -> {}), rebuilding index at {:?}",
                    old, config.schema_version, config.cache_dir
                ),
                None => debug!("No schema version marker at {:?}", config.cache_dir),
            }
            project.close()?;
            drop(project);
            if !config.temporary {
                Self::delete_all(&config.cache_dir)?;
            }
            project = SledStore::open(config.store(PROJECT_STORE))?;
            project.put_encoded(VERSION_KEY, &config.schema_version)?;
            project.flush()?;
        }

        let files = SledStore::open(config.store(FILES_STORE))?;
        let packages = SledStore::open(config.store(PACKAGES_STORE))?;
        let declarations = SledStore::open(config.store(DECLARATIONS_STORE))?;
        let sources = SledStore::open(config.store(SOURCES_STORE))?;

        info!(
            "Opened declaration index at {:?} (schema version {})",
            config.cache_dir, config.schema_version
        );

        Ok(Self {
            config,
            project: Box::new(project),
            files: Box::new(files),
            packages: Box::new(packages),
            declarations: Box::new(declarations),
            sources: Box::new(sources),
            list_lock: Mutex::new(()),
            decode_warned: AtomicBool::new(false),
        })
    }

    /// Remove every store directory under `cache_dir`. Stores must be closed.
    pub fn delete_all(cache_dir: &Path) -> Result<(), StoreError> {
        for name in ALL_STORES {
            let dir = cache_dir.join(name);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!("Deleted store directory {:?}", dir),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    pub fn schema_version(&self) -> Option<u32> {
        self.project.get_decoded(VERSION_KEY).ok().flatten()
    }

    pub fn files(&self) -> &dyn KeyValueStore {
        self.files.as_ref()
    }

    pub fn packages(&self) -> &dyn KeyValueStore {
        self.packages.as_ref()
    }

    pub fn declarations(&self) -> &dyn KeyValueStore {
        self.declarations.as_ref()
    }

    pub fn sources(&self) -> &dyn KeyValueStore {
        self.sources.as_ref()
    }

    /// File record for `url`; unreadable records count as absent
    pub fn file(&self, url: &str) -> Option<FileRecord> {
        match self.files.get(url) {
            Ok(Some(bytes)) => match FileRecord::decode(&bytes) {
                Ok(record) => Some(record),
                Err(e) => {
                    self.decode_failed("file record", url, &e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read file record {}: {}", url, e);
                None
            }
        }
    }

    pub fn declaration(&self, key: &str) -> Option<Declaration> {
        match self.declarations.get(key) {
            Ok(Some(bytes)) => self.decode_declaration(key, &bytes),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read declaration {}: {}", key, e);
                None
            }
        }
    }

    pub(crate) fn decode_declaration(&self, key: &str, bytes: &[u8]) -> Option<Declaration> {
        match Declaration::decode(bytes) {
            Ok(declaration) => Some(declaration),
            Err(e) => {
                self.decode_failed("declaration", key, &e);
                None
            }
        }
    }

    /// Whether every key listed by `record` resolves in the declarations store
    pub fn is_complete(&self, record: &FileRecord) -> bool {
        record
            .declaration_keys
            .iter()
            .all(|key| matches!(self.declarations.get(key), Ok(Some(_))))
    }

    /// Replace the indexed state of one file.
    ///
    /// Declarations land first and the file pointer second, so the pointer never
    /// names a missing key. Keys the previous version of the file produced but
    /// this one does not are removed afterwards.
    pub fn write_file_index(
        &self,
        record: &FileRecord,
        declarations: &[Declaration],
    ) -> Result<(), StoreError> {
        let previous = self.file(&record.path);

        let mut rows = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            rows.push((declaration.id(), declaration.encode()?));
        }
        self.declarations.put_batch(rows)?;
        self.files.put(&record.path, &record.encode()?)?;
        self.add_to_list(self.packages.as_ref(), &record.package_fq_name, &record.path)?;

        if let Some(previous) = previous {
            let current: BTreeSet<&String> = record.declaration_keys.iter().collect();
            let stale: Vec<String> = previous
                .declaration_keys
                .iter()
                .filter(|key| !current.contains(key))
                .cloned()
                .collect();
            if !stale.is_empty() {
                debug!(
                    "Removing {} superseded declarations of {}",
                    stale.len(),
                    record.path
                );
                self.declarations.remove_batch(stale)?;
            }
            if previous.package_fq_name != record.package_fq_name {
                self.remove_from_list(
                    self.packages.as_ref(),
                    &previous.package_fq_name,
                    &record.path,
                )?;
                self.remove_from_list(
                    self.sources.as_ref(),
                    &previous.package_fq_name,
                    &record.path,
                )?;
            }
        }

        Ok(())
    }

    /// Record `url` as a source of `package`. Returns `false` if it was already there.
    pub fn add_source(&self, package: &str, url: &str) -> Result<bool, StoreError> {
        self.add_to_list(self.sources.as_ref(), package, url)
    }

    /// Drop a file from the index: its record, declarations and list entries
    pub fn forget_file(&self, url: &str) -> Result<bool, StoreError> {
        let Some(record) = self.file(url) else {
            // The record may be unreadable; make sure it is gone anyway
            self.files.remove(url)?;
            return Ok(false);
        };

        self.files.remove(url)?;
        self.declarations.remove_batch(record.declaration_keys.clone())?;
        self.remove_from_list(self.packages.as_ref(), &record.package_fq_name, url)?;
        self.remove_from_list(self.sources.as_ref(), &record.package_fq_name, url)?;
        debug!("Forgot file {}", url);
        Ok(true)
    }

    /// Files that declare something in `package`
    pub fn package_files(&self, package: &str) -> Vec<String> {
        self.read_list(self.packages.as_ref(), package)
    }

    /// Source files of `package`
    pub fn package_sources(&self, package: &str) -> Vec<String> {
        self.read_list(self.sources.as_ref(), package)
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            files: self.files.len(),
            packages: self.packages.len(),
            declarations: self.declarations.len(),
            sources: self.sources.len(),
        }
    }

    /// Delete every row of the working stores; the version marker stays
    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock_lists();
        for store in self.working_stores() {
            store.clear()?;
        }
        info!("Cleared declaration index at {:?}", self.config.cache_dir);
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        for store in self.working_stores() {
            store.flush()?;
        }
        self.project.flush()
    }

    /// Flush and release every store. The database must not be used afterwards.
    pub fn close(&self) -> Result<(), StoreError> {
        for store in self.working_stores() {
            store.close()?;
        }
        self.project.close()?;
        info!("Closed declaration index at {:?}", self.config.cache_dir);
        Ok(())
    }

    fn working_stores(&self) -> [&dyn KeyValueStore; 4] {
        [
            self.files.as_ref(),
            self.packages.as_ref(),
            self.declarations.as_ref(),
            self.sources.as_ref(),
        ]
    }

    fn lock_lists(&self) -> std::sync::MutexGuard<'_, ()> {
        // A panic while holding the guard cannot leave a list half-written
        self.list_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_list(&self, store: &dyn KeyValueStore, key: &str) -> Vec<String> {
        match store.get_decoded::<Vec<String>>(key) {
            Ok(list) => list.unwrap_or_default(),
            Err(e) => {
                self.decode_failed(store.name(), key, &e);
                Vec::new()
            }
        }
    }

    fn add_to_list(
        &self,
        store: &dyn KeyValueStore,
        key: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let _guard = self.lock_lists();
        let mut list = self.read_list(store, key);
        if list.iter().any(|existing| existing == value) {
            return Ok(false);
        }
        list.push(value.to_string());
        store.put_encoded(key, &list)?;
        Ok(true)
    }

    fn remove_from_list(
        &self,
        store: &dyn KeyValueStore,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.lock_lists();
        let mut list = self.read_list(store, key);
        let before = list.len();
        list.retain(|existing| existing != value);
        if list.len() == before {
            return Ok(());
        }
        if list.is_empty() {
            store.remove(key)
        } else {
            store.put_encoded(key, &list)
        }
    }

    fn decode_failed(&self, what: &str, key: &str, error: &StoreError) {
        if !self.decode_warned.swap(true, Ordering::Relaxed) {
            warn!(
                "Failed to decode {} '{}', treating it as absent: {}",
                what, key, error
            );
        } else {
            debug!("Failed to decode {} '{}': {}", what, key, error);
        }
    }
}
