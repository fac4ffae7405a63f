//! Lock-free progress counters shared by the scanner and the workers

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct IndexingProgress {
    /// Units submitted by the scanner in the current cycle
    discovered_files: Arc<AtomicU64>,

    /// Source files recorded in the source index
    scanned_files: Arc<AtomicU64>,

    /// Units whose declarations were (re)written
    indexed_files: Arc<AtomicU64>,

    /// Units left alone because their record was current
    skipped_files: Arc<AtomicU64>,

    /// Units that failed extraction or persistence
    failed_files: Arc<AtomicU64>,

    /// Units dropped because they no longer exist
    removed_files: Arc<AtomicU64>,

    declarations_written: Arc<AtomicU64>,

    active_files: Arc<AtomicU64>,

    active_workers: Arc<AtomicUsize>,

    start_time: Instant,
}

impl IndexingProgress {
    pub fn new() -> Self {
        Self {
            discovered_files: Arc::new(AtomicU64::new(0)),
            scanned_files: Arc::new(AtomicU64::new(0)),
            indexed_files: Arc::new(AtomicU64::new(0)),
            skipped_files: Arc::new(AtomicU64::new(0)),
            failed_files: Arc::new(AtomicU64::new(0)),
            removed_files: Arc::new(AtomicU64::new(0)),
            declarations_written: Arc::new(AtomicU64::new(0)),
            active_files: Arc::new(AtomicU64::new(0)),
            active_workers: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Reset per-cycle counters. Worker count survives.
    pub fn reset(&self) {
        for counter in [
            &self.discovered_files,
            &self.scanned_files,
            &self.indexed_files,
            &self.skipped_files,
            &self.failed_files,
            &self.removed_files,
            &self.declarations_written,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn add_discovered(&self, count: u64) -> u64 {
        let total = self.discovered_files.fetch_add(count, Ordering::Relaxed) + count;
        debug!("Discovered {} units (total: {})", count, total);
        total
    }

    pub fn start_file(&self) -> u64 {
        self.active_files.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn finish_file(&self) {
        // Saturating: a stray finish must not wrap the counter
        let _ = self
            .active_files
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn record_scanned(&self) {
        self.scanned_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_indexed(&self, declarations: u64) {
        self.indexed_files.fetch_add(1, Ordering::Relaxed);
        self.declarations_written
            .fetch_add(declarations, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, error_context: &str) {
        self.failed_files.fetch_add(1, Ordering::Relaxed);
        debug!("Failed to process unit: {}", error_context);
    }

    pub fn record_removed(&self) {
        self.removed_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_worker(&self) -> usize {
        let count = self.active_workers.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Worker started (active: {})", count);
        count
    }

    pub fn remove_worker(&self) -> usize {
        let count = self
            .active_workers
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        debug!("Worker finished (active: {})", count);
        count
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            discovered_files: self.discovered_files.load(Ordering::Relaxed),
            scanned_files: self.scanned_files.load(Ordering::Relaxed),
            indexed_files: self.indexed_files.load(Ordering::Relaxed),
            skipped_files: self.skipped_files.load(Ordering::Relaxed),
            failed_files: self.failed_files.load(Ordering::Relaxed),
            removed_files: self.removed_files.load(Ordering::Relaxed),
            declarations_written: self.declarations_written.load(Ordering::Relaxed),
            active_files: self.active_files.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            elapsed_millis: self.start_time.elapsed().as_millis() as u64,
        }
    }
}

impl Default for IndexingProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub discovered_files: u64,
    pub scanned_files: u64,
    pub indexed_files: u64,
    pub skipped_files: u64,
    pub failed_files: u64,
    pub removed_files: u64,
    pub declarations_written: u64,
    pub active_files: u64,
    pub active_workers: usize,
    pub elapsed_millis: u64,
}

impl ProgressSnapshot {
    /// Units the index phase has finished with, whatever the outcome
    pub fn completed(&self) -> u64 {
        self.indexed_files + self.skipped_files + self.failed_files + self.removed_files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counters() {
        let progress = IndexingProgress::new();
        progress.add_discovered(3);
        progress.start_file();
        progress.record_indexed(5);
        progress.finish_file();
        progress.record_skipped();
        progress.record_failed("broken");

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.discovered_files, 3);
        assert_eq!(snapshot.declarations_written, 5);
        assert_eq!(snapshot.active_files, 0);
        assert_eq!(snapshot.completed(), 3);
    }

    #[test]
    fn test_finish_without_start_does_not_wrap() {
        let progress = IndexingProgress::new();
        progress.finish_file();
        assert_eq!(progress.snapshot().active_files, 0);
    }

    #[test]
    fn test_reset_keeps_workers() {
        let progress = IndexingProgress::new();
        progress.add_worker();
        progress.record_scanned();
        progress.reset();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.scanned_files, 0);
        assert_eq!(snapshot.active_workers, 1);
    }

    #[test]
    fn test_concurrent_updates() {
        let progress = Arc::new(IndexingProgress::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let progress = Arc::clone(&progress);
                thread::spawn(move || {
                    for _ in 0..100 {
                        progress.start_file();
                        progress.record_indexed(2);
                        progress.finish_file();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.indexed_files, 800);
        assert_eq!(snapshot.declarations_written, 1600);
        assert_eq!(snapshot.active_files, 0);
    }
}
