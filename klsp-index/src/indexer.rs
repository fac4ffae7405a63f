//! Per-unit indexing steps
//!
//! Everything here is synchronous and touches the filesystem and the stores;
//! the worker pool runs it on the blocking thread pool.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::analyzer::{summarize_class_by_name, Analyzer, FileSummary};
use crate::database::Database;
use crate::error::IndexError;
use crate::modules::{IndexUnit, UnitKind};
use crate::schema::FileRecord;

/// What happened to one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Source file recorded in the source index; `false` if it was already there
    Scanned { added: bool },
    /// Declarations and file record written
    Indexed { declarations: usize },
    /// File record already current
    Skipped,
    /// Unit gone from disk, its records removed
    Removed,
    /// Not a unit this step handles
    Ignored,
}

/// Editor buffers of open files, keyed by normalized URL.
///
/// Shared between the session and the workers: while a file is open its
/// buffer, not the disk, is the text every indexing step reads.
#[derive(Debug, Clone, Default)]
pub struct OpenBuffers {
    buffers: Arc<RwLock<HashMap<String, Arc<str>>>>,
}

impl OpenBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, text: Arc<str>) {
        self.write().insert(url.to_string(), text);
    }

    pub fn remove(&self, url: &str) -> Option<Arc<str>> {
        self.write().remove(url)
    }

    pub fn get(&self, url: &str) -> Option<Arc<str>> {
        self.buffers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
            .cloned()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<str>>> {
        self.buffers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct Indexer {
    database: Arc<Database>,
    analyzer: Arc<dyn Analyzer>,
    open_buffers: OpenBuffers,
}

impl Indexer {
    pub fn new(database: Arc<Database>, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            database,
            analyzer,
            open_buffers: OpenBuffers::new(),
        }
    }

    /// Read open files from `open_buffers` instead of the disk
    pub fn with_open_buffers(mut self, open_buffers: OpenBuffers) -> Self {
        self.open_buffers = open_buffers;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Add a source file to the source index of its package
    pub fn scan_source(&self, unit: &IndexUnit) -> Result<Outcome, IndexError> {
        if !unit.is_source() {
            return Ok(Outcome::Ignored);
        }
        let text = match self.open_buffers.get(unit.url()) {
            Some(buffer) => buffer.to_string(),
            None if !unit.exists() => return Ok(Outcome::Ignored),
            None => read_text(unit)?,
        };
        let package = self.analyzer.package_name(unit, &text);
        let added = self.database.add_source(&package, unit.url())?;
        debug!("Scanned {} (package '{}', new: {})", unit, package, added);
        Ok(Outcome::Scanned { added })
    }

    /// Index a unit from disk, skipping it when its record is current
    pub fn index_file(&self, unit: &IndexUnit) -> Result<Outcome, IndexError> {
        match unit.kind() {
            UnitKind::Class => {
                let last_modified = unit.last_modified().unwrap_or(0);
                if self.is_up_to_date(unit, last_modified) {
                    return Ok(Outcome::Skipped);
                }
                let summary = self
                    .analyzer
                    .summarize_binary(unit)
                    .unwrap_or_else(|| summarize_class_by_name(unit));
                self.persist(unit, last_modified, summary)
            }
            UnitKind::Kotlin | UnitKind::Java if unit.path().is_some() => {
                if let Some(buffer) = self.open_buffers.get(unit.url()) {
                    debug!("{} is open, indexing its buffer", unit);
                    return self.index_modified(unit, Some(&*buffer));
                }
                if !unit.exists() {
                    return self.remove(unit);
                }
                let last_modified = unit.last_modified().unwrap_or(0);
                if self.is_up_to_date(unit, last_modified) {
                    return Ok(Outcome::Skipped);
                }
                let text = read_text(unit)?;
                let summary = self.analyzer.summarize_source(unit, &text)?;
                self.database.add_source(&summary.package, unit.url())?;
                self.persist(unit, last_modified, summary)
            }
            _ => Err(IndexError::InvalidUnit {
                url: unit.url().to_string(),
            }),
        }
    }

    /// Re-index a source file after an edit. `text` is the editor buffer; without
    /// it the file is read from disk.
    pub fn index_modified(
        &self,
        unit: &IndexUnit,
        text: Option<&str>,
    ) -> Result<Outcome, IndexError> {
        if !unit.is_source() {
            return Err(IndexError::InvalidUnit {
                url: unit.url().to_string(),
            });
        }
        let owned;
        let text = match text {
            Some(text) => text,
            None => {
                if !unit.exists() {
                    return self.remove(unit);
                }
                owned = read_text(unit)?;
                &owned
            }
        };
        let summary = self.analyzer.summarize_source(unit, text)?;
        self.database.add_source(&summary.package, unit.url())?;
        // Never equal to the on-disk mtime, so the next full scan re-reads the file
        self.persist(unit, now_millis(), summary)
    }

    /// Drop a unit's records
    pub fn remove(&self, unit: &IndexUnit) -> Result<Outcome, IndexError> {
        self.database.forget_file(unit.url())?;
        Ok(Outcome::Removed)
    }

    fn is_up_to_date(&self, unit: &IndexUnit, last_modified: i64) -> bool {
        match self.database.file(unit.url()) {
            Some(record) => {
                record.indexed
                    && record.last_modified == last_modified
                    && self.database.is_complete(&record)
            }
            None => false,
        }
    }

    fn persist(
        &self,
        unit: &IndexUnit,
        last_modified: i64,
        summary: FileSummary,
    ) -> Result<Outcome, IndexError> {
        let record = FileRecord::new(
            unit.url(),
            &summary.package,
            last_modified,
            &summary.declarations,
        );
        self.database
            .write_file_index(&record, &summary.declarations)?;
        Ok(Outcome::Indexed {
            declarations: record.declaration_keys.len(),
        })
    }
}

fn read_text(unit: &IndexUnit) -> Result<String, IndexError> {
    let path = unit.path().ok_or_else(|| IndexError::InvalidUnit {
        url: unit.url().to_string(),
    })?;
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
