// Declaration index for Kotlin/Java code intelligence
// Persistent store, background scan pipeline and read-side queries

pub mod analyzer;
pub mod config;
pub mod database;
pub mod error;
pub mod index;
pub mod indexer;
pub mod modules;
pub mod progress;
pub mod queries;
pub mod queue;
pub mod scanner;
pub mod schema;
pub mod store;
pub mod worker;
pub mod workspace;

// Re-export commonly used types
pub use analyzer::{Analyzer, FileSummary, StructuralAnalyzer};
pub use config::IndexConfig;
pub use database::{Database, DatabaseConfig, DatabaseStats};
pub use error::IndexError;
pub use index::Index;
pub use indexer::{Indexer, OpenBuffers, Outcome};
pub use modules::{IndexUnit, Module, ModuleKind, UnitKind};
pub use progress::{IndexingProgress, ProgressSnapshot};
pub use queue::{Command, Lane, QueueMetrics, WorkQueue};
pub use scanner::{CommandSink, ScanOptions, ScanReport, Scanner};
pub use schema::{ClassKind, Declaration, FileRecord, Parameter, SCHEMA_VERSION};
pub use store::{KeyValueStore, KeyValueStoreExt, LockRetryPolicy, StoreError};
pub use worker::{IndexNotifier, NoopNotifier, WorkerPool};
