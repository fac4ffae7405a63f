//! Index sessions across process restarts

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use klsp_index::{Index, IndexConfig, IndexNotifier, Module, StructuralAnalyzer};
use tempfile::TempDir;
use tokio::sync::Notify;

#[derive(Default)]
struct Lifecycle {
    scans: AtomicUsize,
    indexes: AtomicUsize,
    indexed: Notify,
}

impl IndexNotifier for Lifecycle {
    fn on_source_file_scanning_finished(&self) {
        self.scans.fetch_add(1, Ordering::SeqCst);
    }

    fn on_background_index_finished(&self) {
        self.indexes.fetch_add(1, Ordering::SeqCst);
        self.indexed.notify_one();
    }
}

fn populate(root: &Path, files: usize) {
    let dir = root.join("src/org/demo");
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..files {
        std::fs::write(
            dir.join(format!("Model{i}.kt")),
            format!("package org.demo\n\nclass Model{i}(val id: Int)\n\nfun model{i}() = Model{i}({i})\n"),
        )
        .unwrap();
    }
}

async fn session(workspace: &Path, cache: &Path) -> (Index, Arc<Lifecycle>) {
    let lifecycle = Arc::new(Lifecycle::default());
    let config = IndexConfig {
        cache_directory: Some(cache.to_path_buf()),
        workers: 2,
        ..IndexConfig::default()
    };
    let index = Index::open_workspace(
        workspace,
        config,
        Arc::new(StructuralAnalyzer::new()),
        lifecycle.clone(),
    )
    .await
    .unwrap();
    (index, lifecycle)
}

async fn full_sync(index: &Index, lifecycle: &Lifecycle, workspace: &Path) {
    assert!(index.sync_in_background(vec![Module::source(
        "main",
        vec![workspace.join("src")]
    )]));
    tokio::time::timeout(Duration::from_secs(20), lifecycle.indexed.notified())
        .await
        .expect("indexing did not finish");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_keeps_index_and_skips_unchanged_files() {
    let workspace = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    populate(workspace.path(), 12);

    let (index, lifecycle) = session(workspace.path(), cache.path()).await;
    full_sync(&index, &lifecycle, workspace.path()).await;
    let progress = index.progress();
    assert_eq!(progress.indexed_files, 12);
    assert_eq!(lifecycle.scans.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.indexes.load(Ordering::SeqCst), 1);
    let stats = index.stats();
    index.close().await.unwrap();
    drop(index);

    let (index, lifecycle) = session(workspace.path(), cache.path()).await;
    assert_eq!(index.stats(), stats);
    full_sync(&index, &lifecycle, workspace.path()).await;

    let progress = index.progress();
    assert_eq!(progress.indexed_files, 0);
    assert_eq!(progress.skipped_files, 12);
    assert_eq!(index.stats(), stats);
    assert_eq!(index.get_completions("Model1").len(), 3);
    index.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deleted_file_is_pruned_on_next_sync() {
    let workspace = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    populate(workspace.path(), 3);

    let (index, lifecycle) = session(workspace.path(), cache.path()).await;
    full_sync(&index, &lifecycle, workspace.path()).await;
    assert_eq!(index.files_for_package("org.demo").len(), 3);

    let gone = workspace.path().join("src/org/demo/Model0.kt");
    std::fs::remove_file(&gone).unwrap();
    let url = klsp_index::IndexUnit::from_path(&gone)
        .unwrap()
        .url()
        .to_string();

    // The background walk no longer sees the file; the editor reports the deletion
    index.close_file(&url).unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while index.file(&url).is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(index.files_for_package("org.demo").len(), 2);
    assert!(!index.sources_for_package("org.demo").contains(&url));
    assert!(index.get_completions("Model0").is_empty());
    index.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_package_move_updates_lists() {
    let workspace = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    populate(workspace.path(), 1);

    let (index, lifecycle) = session(workspace.path(), cache.path()).await;
    full_sync(&index, &lifecycle, workspace.path()).await;

    let path = workspace.path().join("src/org/demo/Model0.kt");
    let url = klsp_index::IndexUnit::from_path(&path)
        .unwrap()
        .url()
        .to_string();
    index
        .file_changed(&url, "package org.moved\n\nclass Model0\n")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while !index.sources_for_package("org.demo").is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(index.files_for_package("org.demo").is_empty());
    assert!(index.sources_for_package("org.demo").is_empty());
    assert_eq!(index.sources_for_package("org.moved"), vec![url]);
    assert_eq!(index.subpackage_names("org"), vec!["moved"]);
    index.close().await.unwrap();
}
