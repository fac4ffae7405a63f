//! Multi-lane command queue feeding the indexer workers
//!
//! Three FIFO lanes are drained in strict priority order: edit, then scan, then
//! index. A user edit never waits behind the background backlog. `Stop` bypasses
//! the lanes entirely and is sticky: once submitted, every `take` returns it, so
//! every worker sharing the queue shuts down.
//!
//! The queue also counts unit commands that were taken but not yet reported back
//! through [`WorkQueue::complete`]. Phase markers use [`WorkQueue::wait_settled`]
//! to hold their notification until the work of their lane is persisted.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

use crate::modules::IndexUnit;

/// Priority class of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Lane {
    Edit,
    Scan,
    Index,
}

impl Lane {
    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Edit => "edit",
            Lane::Scan => "scan",
            Lane::Index => "index",
        }
    }

    fn slot(self) -> usize {
        match self {
            Lane::Edit => 0,
            Lane::Scan => 1,
            Lane::Index => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    /// Record a source file in the source index
    ScanSourceFile(IndexUnit),
    /// Index a source or binary unit in the background
    IndexFile(IndexUnit),
    /// Re-index a file after an edit; `text` is the unsaved buffer, if any
    IndexModifiedFile {
        unit: IndexUnit,
        text: Option<Arc<str>>,
    },
    SourceScanningFinished,
    IndexingFinished,
    Stop,
}

impl Command {
    /// Lane the command travels in; `Stop` has none
    pub fn lane(&self) -> Option<Lane> {
        match self {
            Command::IndexModifiedFile { .. } => Some(Lane::Edit),
            Command::ScanSourceFile(_) | Command::SourceScanningFinished => Some(Lane::Scan),
            Command::IndexFile(_) | Command::IndexingFinished => Some(Lane::Index),
            Command::Stop => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::ScanSourceFile(_) => "ScanSourceFile",
            Command::IndexFile(_) => "IndexFile",
            Command::IndexModifiedFile { .. } => "IndexModifiedFile",
            Command::SourceScanningFinished => "SourceScanningFinished",
            Command::IndexingFinished => "IndexingFinished",
            Command::Stop => "Stop",
        }
    }

    pub fn unit(&self) -> Option<&IndexUnit> {
        match self {
            Command::ScanSourceFile(unit)
            | Command::IndexFile(unit)
            | Command::IndexModifiedFile { unit, .. } => Some(unit),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Lanes {
    edit: VecDeque<Command>,
    scan: VecDeque<Command>,
    index: VecDeque<Command>,
    /// Taken but unfinished unit commands, per lane
    in_flight: [usize; 3],
}

impl Lanes {
    fn lane_mut(&mut self, lane: Lane) -> &mut VecDeque<Command> {
        match lane {
            Lane::Edit => &mut self.edit,
            Lane::Scan => &mut self.scan,
            Lane::Index => &mut self.index,
        }
    }

    fn pop(&mut self) -> Option<Command> {
        let command = self
            .edit
            .pop_front()
            .or_else(|| self.scan.pop_front())
            .or_else(|| self.index.pop_front())?;
        if let (Some(lane), Some(_)) = (command.lane(), command.unit()) {
            self.in_flight[lane.slot()] += 1;
        }
        Some(command)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    pub edit_items: usize,
    pub scan_items: usize,
    pub index_items: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub in_flight: usize,
    pub stopped: bool,
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    lanes: Mutex<Lanes>,
    available: Notify,
    settled: Notify,
    stopped: AtomicBool,
    total_enqueued: AtomicU64,
    total_dequeued: AtomicU64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, command: Command) {
        let Some(lane) = command.lane() else {
            self.stopped.store(true, Ordering::SeqCst);
            debug!("Stop submitted, waking all workers");
            self.available.notify_waiters();
            // Permit for a worker that is between `enable` and `await`
            self.available.notify_one();
            return;
        };

        debug!("Enqueued {} in {} lane", command.name(), lane.as_str());
        self.lanes().lane_mut(lane).push_back(command);
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    /// Next command without waiting
    pub fn try_take(&self) -> Option<Command> {
        if self.is_stopped() {
            return Some(Command::Stop);
        }
        let command = self.lanes().pop()?;
        self.total_dequeued.fetch_add(1, Ordering::Relaxed);
        Some(command)
    }

    /// Wait for the next command
    pub async fn take(&self) -> Command {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(command) = self.try_take() {
                if matches!(command, Command::Stop) {
                    // Keep the chain going for the next sleeping worker
                    self.available.notify_one();
                }
                return command;
            }

            notified.await;
        }
    }

    /// Report that a command returned by `take` has been processed
    pub fn complete(&self, command: &Command) {
        let (Some(lane), Some(_)) = (command.lane(), command.unit()) else {
            return;
        };
        {
            let mut lanes = self.lanes();
            let slot = &mut lanes.in_flight[lane.slot()];
            *slot = slot.saturating_sub(1);
        }
        self.settled.notify_waiters();
    }

    /// Unit commands of `lane` taken but not completed
    pub fn in_flight(&self, lane: Lane) -> usize {
        self.lanes().in_flight[lane.slot()]
    }

    /// Wait until no unit command of `lane` is in flight
    pub async fn wait_settled(&self, lane: Lane) {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            if self.in_flight(lane) == 0 {
                return;
            }
            settled.await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes();
        lanes.edit.len() + lanes.scan.len() + lanes.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_for_lane(&self, lane: Lane) -> usize {
        self.lanes().lane_mut(lane).len()
    }

    pub fn metrics(&self) -> QueueMetrics {
        let lanes = self.lanes();
        QueueMetrics {
            edit_items: lanes.edit.len(),
            scan_items: lanes.scan.len(),
            index_items: lanes.index.len(),
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_dequeued: self.total_dequeued.load(Ordering::Relaxed),
            in_flight: lanes.in_flight.iter().sum(),
            stopped: self.is_stopped(),
        }
    }

    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn unit(name: &str) -> IndexUnit {
        IndexUnit::from_url(&format!("file:///src/{name}.kt")).unwrap()
    }

    fn url_of(command: &Command) -> String {
        command.unit().map(|u| u.url().to_string()).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_edit_lane_preempts_background_work() {
        let queue = WorkQueue::new();
        queue.put(Command::IndexFile(unit("A")));
        queue.put(Command::IndexFile(unit("B")));
        queue.put(Command::IndexModifiedFile {
            unit: unit("C"),
            text: None,
        });

        assert!(url_of(&queue.take().await).ends_with("C.kt"));
        assert!(url_of(&queue.take().await).ends_with("A.kt"));
        assert!(url_of(&queue.take().await).ends_with("B.kt"));
    }

    #[tokio::test]
    async fn test_scan_lane_before_index_lane() {
        let queue = WorkQueue::new();
        queue.put(Command::IndexFile(unit("A")));
        queue.put(Command::IndexingFinished);
        queue.put(Command::ScanSourceFile(unit("S")));
        queue.put(Command::SourceScanningFinished);

        let order: Vec<&str> = [
            queue.take().await,
            queue.take().await,
            queue.take().await,
            queue.take().await,
        ]
        .iter()
        .map(Command::name)
        .collect();

        assert_eq!(
            order,
            vec![
                "ScanSourceFile",
                "SourceScanningFinished",
                "IndexFile",
                "IndexingFinished"
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_is_immediate_and_sticky() {
        let queue = WorkQueue::new();
        queue.put(Command::IndexModifiedFile {
            unit: unit("A"),
            text: None,
        });
        queue.put(Command::Stop);

        assert!(matches!(queue.take().await, Command::Stop));
        assert!(matches!(queue.take().await, Command::Stop));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_take_waits_for_put() {
        let queue = Arc::new(WorkQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.take().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.put(Command::IndexFile(unit("A")));
        let command = timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(url_of(&command).ends_with("A.kt"));
    }

    #[tokio::test]
    async fn test_stop_wakes_every_waiter() {
        let queue = Arc::new(WorkQueue::new());
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            waiters.push(tokio::spawn(async move { queue.take().await }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.put(Command::Stop);

        for waiter in waiters {
            let command = timeout(Duration::from_secs(5), waiter)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(command, Command::Stop));
        }
    }

    #[test]
    fn test_metrics() {
        let queue = WorkQueue::new();
        queue.put(Command::IndexFile(unit("A")));
        queue.put(Command::ScanSourceFile(unit("A")));
        let _ = queue.try_take();

        let metrics = queue.metrics();
        assert_eq!(metrics.index_items, 1);
        assert_eq!(metrics.scan_items, 0);
        assert_eq!(metrics.total_enqueued, 2);
        assert_eq!(metrics.total_dequeued, 1);
        assert_eq!(metrics.in_flight, 1);
        assert!(!metrics.stopped);
    }

    #[tokio::test]
    async fn test_wait_settled_blocks_until_complete() {
        let queue = Arc::new(WorkQueue::new());
        queue.put(Command::ScanSourceFile(unit("A")));
        queue.put(Command::SourceScanningFinished);

        let scan = queue.take().await;
        assert_eq!(queue.in_flight(Lane::Scan), 1);
        assert!(matches!(queue.take().await, Command::SourceScanningFinished));
        assert_eq!(queue.in_flight(Lane::Scan), 1);

        let barrier = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.wait_settled(Lane::Scan).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!barrier.is_finished());

        queue.complete(&scan);
        timeout(Duration::from_secs(5), barrier)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.in_flight(Lane::Scan), 0);
        // Index lane was never involved
        timeout(Duration::from_secs(5), queue.wait_settled(Lane::Index))
            .await
            .unwrap();
    }
}
