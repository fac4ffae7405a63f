//! Two-phase driver feeding the work queue
//!
//! Phase one submits `ScanSourceFile` for every source file so the source index
//! fills early. Phase two submits `IndexFile` for every unit, source modules
//! first. Each phase hands chunks to at most `concurrency` tasks at once and
//! joins them all before its finish marker goes out.
//!
//! Stopping is cooperative: the flag is read before each chunk is dispatched.
//! A chunk already dispatched always runs to the end.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::modules::{IndexUnit, Module};
use crate::progress::IndexingProgress;
use crate::queue::{Command, WorkQueue};

/// Where the scanner sends commands
pub trait CommandSink: Send + Sync {
    fn submit(&self, command: Command);
}

impl CommandSink for WorkQueue {
    fn submit(&self, command: Command) {
        self.put(command);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Chunks in flight at once
    pub concurrency: usize,
    /// Source files per chunk in the scan phase
    pub scan_chunk_size: usize,
    /// Number of chunks the index phase splits all units into
    pub index_chunk_count: usize,
}

impl From<&IndexConfig> for ScanOptions {
    fn from(config: &IndexConfig) -> Self {
        Self {
            concurrency: config.scan_concurrency,
            scan_chunk_size: config.scan_chunk_size,
            index_chunk_count: config.index_chunk_count,
        }
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

/// What one run dispatched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub source_files: usize,
    pub total_files: usize,
    pub scan_chunks: usize,
    pub index_chunks: usize,
    pub stopped: bool,
}

pub struct Scanner {
    sink: Arc<dyn CommandSink>,
    options: ScanOptions,
    stop: Arc<AtomicBool>,
    progress: IndexingProgress,
}

impl Scanner {
    pub fn new(
        sink: Arc<dyn CommandSink>,
        options: ScanOptions,
        progress: IndexingProgress,
    ) -> Self {
        Self {
            sink,
            options,
            stop: Arc::new(AtomicBool::new(false)),
            progress,
        }
    }

    /// Share an externally owned stop flag
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn signal_to_stop(&self) {
        debug!("Scanner stop requested");
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Run both phases over `modules`
    pub async fn run(&self, modules: Vec<Module>) -> ScanReport {
        let mut report = ScanReport::default();

        let (source_modules, library_modules): (Vec<Module>, Vec<Module>) =
            modules.into_iter().partition(Module::is_source);

        let Some(sources) = self.collect_files(source_modules).await else {
            report.stopped = true;
            return report;
        };
        report.source_files = sources.len();
        info!("Scanning {} source files", sources.len());

        report.scan_chunks = self
            .dispatch(&sources, self.options.scan_chunk_size, Command::ScanSourceFile)
            .await;
        if self.is_stopped() {
            info!("Scan stopped after {} chunks", report.scan_chunks);
            report.stopped = true;
            return report;
        }
        self.sink.submit(Command::SourceScanningFinished);

        let Some(libraries) = self.collect_files(library_modules).await else {
            report.stopped = true;
            return report;
        };
        let mut all_files = sources;
        all_files.extend(libraries);
        report.total_files = all_files.len();
        self.progress.add_discovered(all_files.len() as u64);
        info!("{} files to index, starting indexing...", all_files.len());

        let chunk_size = (all_files.len() / self.options.index_chunk_count.max(1)).max(1);
        report.index_chunks = self
            .dispatch(&all_files, chunk_size, Command::IndexFile)
            .await;
        if self.is_stopped() {
            info!("Indexing stopped after {} chunks", report.index_chunks);
            report.stopped = true;
            return report;
        }
        self.sink.submit(Command::IndexingFinished);

        report
    }

    /// Files of `modules` in order, or `None` when stopped while walking
    async fn collect_files(&self, modules: Vec<Module>) -> Option<Vec<IndexUnit>> {
        let mut files = Vec::new();
        for module in modules {
            if self.is_stopped() {
                return None;
            }
            let id = module.id.clone();
            match tokio::task::spawn_blocking(move || module.compute_files()).await {
                Ok(units) => {
                    debug!("Module '{}': {} files", id, units.len());
                    files.extend(units);
                }
                Err(e) => warn!("Failed to list files of module '{}': {}", id, e),
            }
        }
        if self.is_stopped() {
            return None;
        }
        Some(files)
    }

    /// Hand `units` out in chunks; returns how many chunks were dispatched
    async fn dispatch(
        &self,
        units: &[IndexUnit],
        chunk_size: usize,
        make: fn(IndexUnit) -> Command,
    ) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = Vec::new();

        for chunk in units.chunks(chunk_size.max(1)) {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if self.is_stopped() {
                break;
            }
            let chunk = chunk.to_vec();
            let sink = Arc::clone(&self.sink);
            tasks.push(tokio::spawn(async move {
                for unit in chunk {
                    sink.submit(make(unit));
                }
                drop(permit);
            }));
        }

        let dispatched = tasks.len();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("Scan chunk task failed: {}", e);
            }
        }
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        commands: Mutex<Vec<Command>>,
        stop_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl CommandSink for RecordingSink {
        fn submit(&self, command: Command) {
            let mut commands = self.commands.lock().unwrap();
            commands.push(command);
            if let Some((limit, stop)) = &self.stop_after {
                if commands.len() == *limit {
                    stop.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    impl RecordingSink {
        fn names(&self) -> Vec<&'static str> {
            self.commands.lock().unwrap().iter().map(Command::name).collect()
        }
    }

    fn workspace(sources: usize, classes: usize) -> (TempDir, Vec<Module>) {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let lib = dir.path().join("lib");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&lib).unwrap();
        for i in 0..sources {
            std::fs::write(src.join(format!("S{i}.kt")), "package p\n").unwrap();
        }
        for i in 0..classes {
            std::fs::write(lib.join(format!("L{i}.class")), b"").unwrap();
        }
        let modules = vec![
            Module::library("lib", vec![lib]),
            Module::source("app", vec![src]),
        ];
        (dir, modules)
    }

    fn options(concurrency: usize, scan_chunk_size: usize) -> ScanOptions {
        ScanOptions {
            concurrency,
            scan_chunk_size,
            index_chunk_count: 32,
        }
    }

    #[tokio::test]
    async fn test_two_phases_in_order() {
        let (_dir, modules) = workspace(3, 2);
        let sink = Arc::new(RecordingSink::default());
        let scanner = Scanner::new(sink.clone(), options(2, 2), IndexingProgress::new());

        let report = scanner.run(modules).await;

        assert_eq!(report.source_files, 3);
        assert_eq!(report.total_files, 5);
        assert_eq!(report.scan_chunks, 2);
        assert!(!report.stopped);

        let names = sink.names();
        assert_eq!(names.len(), 3 + 1 + 5 + 1);
        assert!(names[..3].iter().all(|n| *n == "ScanSourceFile"));
        assert_eq!(names[3], "SourceScanningFinished");
        assert!(names[4..9].iter().all(|n| *n == "IndexFile"));
        assert_eq!(names[9], "IndexingFinished");
    }

    #[tokio::test]
    async fn test_sources_are_indexed_first() {
        let (_dir, modules) = workspace(2, 2);
        let sink = Arc::new(RecordingSink::default());
        let scanner = Scanner::new(sink.clone(), options(1, 100), IndexingProgress::new());
        scanner.run(modules).await;

        let commands = sink.commands.lock().unwrap();
        let indexed: Vec<&str> = commands
            .iter()
            .filter(|c| matches!(c, Command::IndexFile(_)))
            .filter_map(|c| c.unit().map(|u| u.url()))
            .collect();
        assert!(indexed[0].ends_with(".kt") && indexed[1].ends_with(".kt"));
        assert!(indexed[2].ends_with(".class") && indexed[3].ends_with(".class"));
    }

    #[tokio::test]
    async fn test_stop_lets_dispatched_chunk_finish() {
        let (_dir, modules) = workspace(10, 0);
        let stop = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(RecordingSink {
            commands: Mutex::new(Vec::new()),
            stop_after: Some((1, Arc::clone(&stop))),
        });
        let scanner = Scanner::new(sink.clone(), options(1, 3), IndexingProgress::new())
            .with_stop_flag(stop);

        let report = scanner.run(modules).await;

        assert!(report.stopped);
        assert_eq!(report.scan_chunks, 1);
        // The whole first chunk went out, nothing after it
        assert_eq!(sink.names(), vec!["ScanSourceFile"; 3]);
    }

    #[tokio::test]
    async fn test_stopped_before_run_submits_nothing() {
        let (_dir, modules) = workspace(2, 1);
        let sink = Arc::new(RecordingSink::default());
        let scanner = Scanner::new(sink.clone(), options(2, 10), IndexingProgress::new());
        scanner.signal_to_stop();

        let report = scanner.run(modules).await;
        assert!(report.stopped);
        assert!(sink.names().is_empty());
    }

    #[tokio::test]
    async fn test_empty_workspace_still_finishes() {
        let sink = Arc::new(RecordingSink::default());
        let scanner = Scanner::new(sink.clone(), options(2, 10), IndexingProgress::new());
        let report = scanner.run(Vec::new()).await;
        assert_eq!(report.total_files, 0);
        assert_eq!(
            sink.names(),
            vec!["SourceScanningFinished", "IndexingFinished"]
        );
    }
}
