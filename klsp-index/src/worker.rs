//! Pool of command processors draining the [`WorkQueue`]
//!
//! Each worker loops on `take()`. Unit commands run on the blocking pool while
//! holding the analyzer lock: background commands share the read side,
//! edit-triggered ones take the write side, so an edit waits for at most the
//! files currently being indexed. Phase markers wait for their lane to settle
//! before notifying the owner.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::indexer::{Indexer, Outcome};
use crate::progress::IndexingProgress;
use crate::queue::{Command, Lane, WorkQueue};

/// Receives lifecycle notifications from the workers
pub trait IndexNotifier: Send + Sync {
    fn on_source_file_scanning_finished(&self) {}
    fn on_background_index_finished(&self) {}
}

/// Notifier that ignores everything
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl IndexNotifier for NoopNotifier {}

/// Shared state of every worker in a pool
#[derive(Clone)]
pub struct WorkerContext {
    pub indexer: Indexer,
    pub queue: Arc<WorkQueue>,
    pub analyzer_lock: Arc<RwLock<()>>,
    pub notifier: Arc<dyn IndexNotifier>,
    pub progress: IndexingProgress,
}

// Held for the duration of one unit
#[allow(dead_code)]
enum AnalyzerGuard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    queue: Arc<WorkQueue>,
}

impl WorkerPool {
    /// Spawn `workers` processors on the current runtime
    pub fn start(context: WorkerContext, workers: usize) -> Self {
        let queue = Arc::clone(&context.queue);
        let handles: Vec<JoinHandle<()>> = (0..workers.max(1))
            .map(|worker_id| {
                let context = context.clone();
                tokio::spawn(run_worker(worker_id, context))
            })
            .collect();
        info!("Started worker pool with {} workers", handles.len());
        Self { handles, queue }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Send `Stop` and wait for every worker to exit
    pub async fn shutdown(mut self, grace: Duration) {
        self.queue.put(Command::Stop);
        let handles: Vec<JoinHandle<()>> = self.handles.drain(..).collect();
        debug!("Shutting down {} workers...", handles.len());

        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("Worker task ended abnormally: {}", e);
                    }
                }
                debug!("All workers shut down gracefully");
            }
            Err(_) => warn!("Worker shutdown timed out after {:?}", grace),
        }
    }
}

async fn run_worker(worker_id: usize, context: WorkerContext) {
    debug!("Worker {} starting", worker_id);
    context.progress.add_worker();

    loop {
        let command = context.queue.take().await;
        match command {
            Command::Stop => break,
            Command::SourceScanningFinished => {
                context.queue.wait_settled(Lane::Scan).await;
                let snapshot = context.progress.snapshot();
                info!(
                    "Source file scanning finished ({} files scanned)",
                    snapshot.scanned_files
                );
                context.notifier.on_source_file_scanning_finished();
            }
            Command::IndexingFinished => {
                context.queue.wait_settled(Lane::Index).await;
                let snapshot = context.progress.snapshot();
                info!(
                    "Background indexing finished ({} indexed, {} up to date, {} failed, {} declarations)",
                    snapshot.indexed_files,
                    snapshot.skipped_files,
                    snapshot.failed_files,
                    snapshot.declarations_written
                );
                context.notifier.on_background_index_finished();
            }
            command => {
                process(worker_id, &context, &command).await;
                context.queue.complete(&command);
            }
        }
    }

    context.progress.remove_worker();
    debug!("Worker {} shut down", worker_id);
}

async fn process(worker_id: usize, context: &WorkerContext, command: &Command) {
    let Some(unit) = command.unit().cloned() else {
        return;
    };
    debug!("Worker {} processing {} {}", worker_id, command.name(), unit);

    let _guard = match command {
        Command::IndexModifiedFile { .. } => {
            AnalyzerGuard::Write(Arc::clone(&context.analyzer_lock).write_owned().await)
        }
        _ => AnalyzerGuard::Read(Arc::clone(&context.analyzer_lock).read_owned().await),
    };

    context.progress.start_file();
    let indexer = context.indexer.clone();
    let owned = command.clone();
    let result = tokio::task::spawn_blocking(move || match &owned {
        Command::ScanSourceFile(unit) => indexer.scan_source(unit),
        Command::IndexFile(unit) => indexer.index_file(unit),
        Command::IndexModifiedFile { unit, text } => indexer.index_modified(unit, text.as_deref()),
        _ => Ok(Outcome::Ignored),
    })
    .await;
    context.progress.finish_file();

    match result {
        Ok(Ok(outcome)) => {
            debug!("Worker {}: {} -> {:?}", worker_id, unit, outcome);
            match outcome {
                Outcome::Scanned { .. } => context.progress.record_scanned(),
                Outcome::Indexed { declarations } => {
                    context.progress.record_indexed(declarations as u64)
                }
                Outcome::Skipped => context.progress.record_skipped(),
                Outcome::Removed => context.progress.record_removed(),
                Outcome::Ignored => {}
            }
        }
        Ok(Err(e)) => {
            warn!("Worker {}: failed to process {}: {}", worker_id, unit, e);
            context.progress.record_failed(&format!("{unit}: {e}"));
        }
        Err(e) => {
            warn!("Worker {}: task for {} panicked: {}", worker_id, unit, e);
            context.progress.record_failed(&format!("{unit}: {e}"));
        }
    }
}
