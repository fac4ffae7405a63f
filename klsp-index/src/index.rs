//! Session facade over the declaration index
//!
//! One [`Index`] per workspace and process. It owns the database, the work
//! queue, the worker pool and the background scan. Indexing goes through
//! [`Index::submit_command`]; [`Index::remove_file`] is the one direct write.
//! Open editor buffers are shared with the workers, so a background pass over
//! an open file indexes the buffer rather than the disk.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analyzer::Analyzer;
use crate::config::IndexConfig;
use crate::database::{Database, DatabaseConfig, DatabaseStats};
use crate::indexer::{Indexer, OpenBuffers};
use crate::modules::{IndexUnit, Module};
use crate::progress::{IndexingProgress, ProgressSnapshot};
use crate::queries;
use crate::queue::{Command, WorkQueue};
use crate::scanner::{CommandSink, ScanOptions, ScanReport, Scanner};
use crate::schema::{Declaration, FileRecord};
use crate::worker::{IndexNotifier, WorkerContext, WorkerPool};
use crate::workspace::cache_root_for;

const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Index {
    database: Arc<Database>,
    queue: Arc<WorkQueue>,
    config: IndexConfig,
    progress: IndexingProgress,
    scan_stop: Arc<AtomicBool>,
    scan_task: Mutex<Option<JoinHandle<ScanReport>>>,
    workers: Mutex<Option<WorkerPool>>,
    /// Editor buffers of open files, shared with the workers
    open_buffers: OpenBuffers,
}

impl Index {
    /// Open the index of `workspace_root` and start the worker pool
    pub async fn open_workspace(
        workspace_root: &Path,
        config: IndexConfig,
        analyzer: Arc<dyn Analyzer>,
        notifier: Arc<dyn IndexNotifier>,
    ) -> Result<Self> {
        let cache_dir = cache_root_for(workspace_root, config.cache_directory.as_deref());
        let db_config =
            DatabaseConfig::new(&cache_dir).with_lock_retry(config.lock_retry_policy());

        // Lock retries sleep
        let database = tokio::task::spawn_blocking(move || Database::open(db_config))
            .await
            .context("Database open task failed")?
            .with_context(|| format!("Failed to open index at {}", cache_dir.display()))?;

        Ok(Self::start(Arc::new(database), config, analyzer, notifier))
    }

    /// Start a session over an already opened database
    pub fn start(
        database: Arc<Database>,
        config: IndexConfig,
        analyzer: Arc<dyn Analyzer>,
        notifier: Arc<dyn IndexNotifier>,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new());
        let open_buffers = OpenBuffers::new();
        let indexer =
            Indexer::new(Arc::clone(&database), analyzer).with_open_buffers(open_buffers.clone());
        let progress = IndexingProgress::new();

        let context = WorkerContext {
            indexer,
            queue: Arc::clone(&queue),
            analyzer_lock: Arc::new(tokio::sync::RwLock::new(())),
            notifier,
            progress: progress.clone(),
        };
        let workers = WorkerPool::start(context, config.workers);

        Self {
            database,
            queue,
            config,
            progress,
            scan_stop: Arc::new(AtomicBool::new(false)),
            scan_task: Mutex::new(None),
            workers: Mutex::new(Some(workers)),
            open_buffers,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn submit_command(&self, command: Command) {
        self.queue.put(command);
    }

    /// Start a full two-phase scan of `modules`. Returns `false` if one is
    /// already running.
    pub fn sync_in_background(&self, modules: Vec<Module>) -> bool {
        let mut task = lock(&self.scan_task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Background sync already running");
            return false;
        }

        self.scan_stop.store(false, Ordering::SeqCst);
        self.progress.reset();
        let scanner = Scanner::new(
            Arc::clone(&self.queue) as Arc<dyn CommandSink>,
            ScanOptions::from(&self.config),
            self.progress.clone(),
        )
        .with_stop_flag(Arc::clone(&self.scan_stop));

        info!("Syncing index in background ({} modules)", modules.len());
        *task = Some(tokio::spawn(async move { scanner.run(modules).await }));
        true
    }

    /// Wait for the running scan to finish dispatching
    pub async fn wait_for_scan(&self) -> Option<ScanReport> {
        let handle = lock(&self.scan_task).take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Background scan task failed: {}", e);
                None
            }
        }
    }

    /// Stop dispatching scan chunks; dispatched ones still complete
    pub fn signal_to_stop(&self) {
        info!("Stopping background scan");
        self.scan_stop.store(true, Ordering::SeqCst);
    }

    /// Track an opened file and index its buffer
    pub fn open_file(&self, url: &str, text: &str) -> Result<()> {
        self.file_changed(url, text)
    }

    /// Re-index an open file from its new buffer text
    pub fn file_changed(&self, url: &str, text: &str) -> Result<()> {
        let unit = source_unit(url)?;
        let text: Arc<str> = Arc::from(text);
        self.open_buffers.insert(unit.url(), Arc::clone(&text));
        self.submit_command(Command::IndexModifiedFile {
            unit,
            text: Some(text),
        });
        Ok(())
    }

    /// Forget the buffer of `url` and re-index it from disk
    pub fn close_file(&self, url: &str) -> Result<()> {
        let unit = source_unit(url)?;
        self.open_buffers.remove(unit.url());
        self.submit_command(Command::IndexModifiedFile { unit, text: None });
        Ok(())
    }

    /// Buffer text of an open file
    pub fn opened_text(&self, url: &str) -> Option<Arc<str>> {
        self.open_buffers.get(&normalize_url(url))
    }

    /// Remove a file's records right away
    pub fn remove_file(&self, url: &str) -> Result<bool> {
        let url = normalize_url(url);
        self.open_buffers.remove(&url);
        self.database
            .forget_file(&url)
            .with_context(|| format!("Failed to remove {url} from the index"))
    }

    pub fn file(&self, url: &str) -> Option<FileRecord> {
        self.database.file(&normalize_url(url))
    }

    pub fn prefix_search(&self, prefix: &str) -> Vec<(String, Declaration)> {
        queries::declarations_with_prefix(&self.database, prefix).collect()
    }

    pub fn files_for_package(&self, package: &str) -> Vec<String> {
        queries::files_for_package(&self.database, package)
    }

    pub fn sources_for_package(&self, package: &str) -> Vec<String> {
        queries::sources_for_package(&self.database, package)
    }

    pub fn subpackage_names(&self, base: &str) -> Vec<String> {
        queries::subpackage_names(&self.database, base)
    }

    pub fn get_completions(&self, prefix: &str) -> Vec<Declaration> {
        queries::get_completions(&self.database, prefix)
    }

    pub fn declarations_in_package(&self, package: &str) -> Vec<Declaration> {
        queries::declarations_in_package(&self.database, package)
    }

    pub fn files_declaring(&self, name: &str) -> Vec<String> {
        queries::files_declaring(&self.database, name)
    }

    pub fn stats(&self) -> DatabaseStats {
        queries::stats(&self.database)
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Stop the scan, drain the workers and close every store
    pub async fn close(&self) -> Result<()> {
        self.signal_to_stop();
        if let Some(report) = self.wait_for_scan().await {
            debug!("Scan ended: {:?}", report);
        }

        let workers = lock(&self.workers).take();
        if let Some(workers) = workers {
            workers.shutdown(WORKER_SHUTDOWN_GRACE).await;
        }

        self.database
            .close()
            .context("Failed to close the declaration index")?;
        Ok(())
    }
}

/// The form units and stored records use for `url`
fn normalize_url(url: &str) -> String {
    IndexUnit::from_url(url)
        .map(|unit| unit.url().to_string())
        .unwrap_or_else(|| url.to_string())
}

fn source_unit(url: &str) -> Result<IndexUnit> {
    IndexUnit::from_url(url)
        .filter(IndexUnit::is_source)
        .with_context(|| format!("Not a Kotlin or Java source file: {url}"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
