//! Command handlers for the `klsp` binary
//!
//! Each handler produces a serializable result; [`print`] renders it as JSON
//! or as colored text.

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, info};

use klsp_index::{
    Database, DatabaseConfig, DatabaseStats, Declaration, Index, IndexConfig, IndexNotifier,
    Module, ProgressSnapshot, StructuralAnalyzer,
};

use crate::cli::Commands;

/// Options shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub json: bool,
    pub cache_dir: Option<PathBuf>,
}

/// Wakes the foreground `index` command when the last index chunk settles
#[derive(Default)]
struct ForegroundNotifier {
    finished: Notify,
}

impl IndexNotifier for ForegroundNotifier {
    fn on_source_file_scanning_finished(&self) {
        info!("Source scan finished, indexing declarations");
    }

    fn on_background_index_finished(&self) {
        self.finished.notify_one();
    }
}

#[derive(Debug, Serialize)]
pub struct IndexSummary {
    pub workspace: PathBuf,
    pub cache_dir: PathBuf,
    pub progress: ProgressSnapshot,
    pub stats: DatabaseStats,
    pub elapsed_millis: u128,
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub key: String,
    pub details: String,
    pub declaration: Declaration,
}

pub async fn run(command: Commands, options: &GlobalOptions) -> Result<()> {
    match command {
        Commands::Index {
            workspace,
            sources,
            libraries,
            workers,
        } => {
            let summary = index_workspace(&workspace, sources, libraries, workers, options).await?;
            print(options, &summary, print_summary)
        }
        Commands::Search { workspace, prefix } => {
            let hits = with_database(&workspace, options, move |db| {
                klsp_index::queries::declarations_with_prefix(db, &prefix)
                    .map(|(key, declaration)| SearchHit {
                        key,
                        details: declaration.details(),
                        declaration,
                    })
                    .collect::<Vec<_>>()
            })
            .await?;
            print(options, &hits[..], print_hits)
        }
        Commands::Complete { workspace, prefix } => {
            let candidates = with_database(&workspace, options, move |db| {
                klsp_index::queries::get_completions(db, &prefix)
            })
            .await?;
            print(options, &candidates[..], print_declarations)
        }
        Commands::Packages { workspace, base } => {
            let names = with_database(&workspace, options, move |db| {
                klsp_index::queries::subpackage_names(db, &base)
            })
            .await?;
            print(options, &names[..], print_lines)
        }
        Commands::Files { workspace, package } => {
            let files = with_database(&workspace, options, move |db| {
                klsp_index::queries::files_for_package(db, &package)
            })
            .await?;
            print(options, &files[..], print_lines)
        }
        Commands::Sources { workspace, package } => {
            let files = with_database(&workspace, options, move |db| {
                klsp_index::queries::sources_for_package(db, &package)
            })
            .await?;
            print(options, &files[..], print_lines)
        }
        Commands::Stats { workspace } => {
            let stats = with_database(&workspace, options, klsp_index::queries::stats).await?;
            print(options, &stats, print_stats)
        }
        Commands::Clear { workspace } => {
            let cache_dir = clear_workspace(&workspace, options).await?;
            if options.json {
                println!("{}", serde_json::json!({ "cleared": cache_dir }));
            } else {
                println!("{} {}", "Cleared".bold().green(), cache_dir.display());
            }
            Ok(())
        }
    }
}

/// Run a full scan of `workspace` and wait until every index chunk is done
pub async fn index_workspace(
    workspace: &Path,
    sources: Vec<PathBuf>,
    libraries: Vec<PathBuf>,
    workers: Option<usize>,
    options: &GlobalOptions,
) -> Result<IndexSummary> {
    let workspace = canonical_workspace(workspace)?;
    let mut config = load_config(&workspace, options)?;
    if let Some(workers) = workers {
        config.workers = workers;
        config.validate()?;
    }

    let modules = if sources.is_empty() && libraries.is_empty() {
        config.modules_or_default(&workspace)
    } else {
        let mut modules = Vec::new();
        if !sources.is_empty() {
            modules.push(Module::source("sources", absolute_all(sources)?));
        }
        if !libraries.is_empty() {
            modules.push(Module::library("libraries", absolute_all(libraries)?));
        }
        modules
    };

    let start = Instant::now();
    let notifier = Arc::new(ForegroundNotifier::default());
    let index = Index::open_workspace(
        &workspace,
        config,
        Arc::new(StructuralAnalyzer::new()),
        notifier.clone(),
    )
    .await?;

    info!("Indexing {} ({} modules)", workspace.display(), modules.len());
    index.sync_in_background(modules);
    notifier.finished.notified().await;

    let summary = IndexSummary {
        workspace,
        cache_dir: index.database().cache_dir().to_path_buf(),
        progress: index.progress(),
        stats: index.stats(),
        elapsed_millis: start.elapsed().as_millis(),
    };
    index.close().await?;
    Ok(summary)
}

/// Open the index of `workspace`, run `query` against it and close it again
pub async fn with_database<T, F>(workspace: &Path, options: &GlobalOptions, query: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> T + Send + 'static,
{
    let workspace = canonical_workspace(workspace)?;
    let config = load_config(&workspace, options)?;
    let cache_dir =
        klsp_index::workspace::cache_root_for(&workspace, config.cache_directory.as_deref());
    let db_config = DatabaseConfig::new(&cache_dir).with_lock_retry(config.lock_retry_policy());

    tokio::task::spawn_blocking(move || -> Result<T> {
        debug!("Opening index at {}", cache_dir.display());
        let database = Database::open(db_config)
            .with_context(|| format!("Failed to open index at {}", cache_dir.display()))?;
        let result = query(&database);
        database.close()?;
        Ok(result)
    })
    .await
    .context("Index query task failed")?
}

/// Empty every store of the workspace index; returns its cache directory
pub async fn clear_workspace(workspace: &Path, options: &GlobalOptions) -> Result<PathBuf> {
    with_database(workspace, options, |db| -> Result<PathBuf> {
        db.clear()?;
        Ok(db.cache_dir().to_path_buf())
    })
    .await?
}

fn load_config(workspace: &Path, options: &GlobalOptions) -> Result<IndexConfig> {
    let mut config = IndexConfig::load(workspace)?;
    if let Some(cache_dir) = &options.cache_dir {
        config.cache_directory = Some(cache_dir.clone());
    }
    Ok(config)
}

fn canonical_workspace(workspace: &Path) -> Result<PathBuf> {
    workspace
        .canonicalize()
        .with_context(|| format!("Workspace {} does not exist", workspace.display()))
}

fn absolute_all(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    paths
        .into_iter()
        .map(|path| {
            path.canonicalize()
                .with_context(|| format!("Root {} does not exist", path.display()))
        })
        .collect()
}

fn print<T: Serialize + ?Sized>(options: &GlobalOptions, value: &T, human: fn(&T)) -> Result<()> {
    if options.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn print_summary(summary: &IndexSummary) {
    let progress = &summary.progress;
    println!("{} {}", "Workspace:".bold().green(), summary.workspace.display());
    println!("{} {}", "Cache:".bold().green(), summary.cache_dir.display());
    println!(
        "{} {} discovered, {} scanned, {} indexed, {} up to date, {} removed",
        "Files:".bold().green(),
        progress.discovered_files,
        progress.scanned_files,
        progress.indexed_files,
        progress.skipped_files,
        progress.removed_files
    );
    if progress.failed_files > 0 {
        println!(
            "{} {}",
            "Failed:".bold().yellow(),
            progress.failed_files.to_string().yellow()
        );
    }
    print_stats(&summary.stats);
    println!("Indexing completed in {}ms", summary.elapsed_millis);
}

fn print_stats(stats: &DatabaseStats) {
    println!(
        "{} {} files, {} packages, {} declarations, {} sources",
        "Index:".bold().green(),
        stats.files,
        stats.packages,
        stats.declarations,
        stats.sources
    );
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("{}", "No results found.".yellow().bold());
        return;
    }
    for hit in hits {
        println!(
            "{}  {}  {}",
            hit.declaration.name().bold(),
            hit.details,
            hit.declaration.file().dimmed()
        );
    }
}

fn print_declarations(declarations: &[Declaration]) {
    if declarations.is_empty() {
        println!("{}", "No results found.".yellow().bold());
        return;
    }
    for declaration in declarations {
        println!("{}  {}", declaration.name().bold(), declaration.details());
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src/com/acme");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join("Widget.kt"),
            "package com.acme\n\nclass Widget\n\nfun widgetOf(name: String): Widget = Widget()\n",
        )
        .unwrap();
        std::fs::write(
            src.join("Gadget.java"),
            "package com.acme;\n\npublic class Gadget {\n    public int size;\n}\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_index_then_query() {
        let workspace = workspace();
        let cache = TempDir::new().unwrap();
        let options = GlobalOptions {
            json: false,
            cache_dir: Some(cache.path().to_path_buf()),
        };

        let summary = index_workspace(workspace.path(), Vec::new(), Vec::new(), Some(2), &options)
            .await
            .unwrap();
        assert_eq!(summary.progress.indexed_files, 2);
        assert_eq!(summary.stats.files, 2);
        assert!(summary.cache_dir.starts_with(cache.path()));

        let names = with_database(workspace.path(), &options, |db| {
            klsp_index::queries::get_completions(db, "W")
                .iter()
                .map(|d| d.name().to_string())
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();
        assert_eq!(names, vec!["Widget"]);

        let packages = with_database(workspace.path(), &options, |db| {
            klsp_index::queries::subpackage_names(db, "com")
        })
        .await
        .unwrap();
        assert_eq!(packages, vec!["acme"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clear_empties_the_index() {
        let workspace = workspace();
        let cache = TempDir::new().unwrap();
        let options = GlobalOptions {
            json: true,
            cache_dir: Some(cache.path().to_path_buf()),
        };

        index_workspace(workspace.path(), Vec::new(), Vec::new(), None, &options)
            .await
            .unwrap();
        clear_workspace(workspace.path(), &options).await.unwrap();

        let stats = with_database(workspace.path(), &options, klsp_index::queries::stats)
            .await
            .unwrap();
        assert_eq!(stats, DatabaseStats::default());
    }

    #[tokio::test]
    async fn test_missing_workspace_is_an_error() {
        let options = GlobalOptions::default();
        let result = with_database(Path::new("/definitely/not/here"), &options, |db| {
            db.stats()
        })
        .await;
        assert!(result.is_err());
    }
}
