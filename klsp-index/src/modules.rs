//! Project model handed to the index and the units it enumerates
//!
//! Module discovery (invoking a build tool) happens elsewhere; here a module is
//! plain data: an id, whether it holds sources or compiled classes, the roots to
//! walk and the ids it depends on.

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Kotlin/Java sources owned by the workspace
    Source,
    /// Compiled `.class` units (exploded class directories)
    Library,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub kind: ModuleKind,
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Module {
    pub fn source(id: impl Into<String>, roots: Vec<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind: ModuleKind::Source,
            roots,
            dependencies: Vec::new(),
        }
    }

    pub fn library(id: impl Into<String>, roots: Vec<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind: ModuleKind::Library,
            roots,
            dependencies: Vec::new(),
        }
    }

    pub fn is_source(&self) -> bool {
        self.kind == ModuleKind::Source
    }

    /// Every unit under the module roots, sorted by URL.
    ///
    /// Source modules yield `.kt`/`.java` files and honor `.gitignore`; library
    /// modules yield `.class` files and walk everything, since class output
    /// directories are usually ignored.
    pub fn compute_files(&self) -> Vec<IndexUnit> {
        let mut units = Vec::new();

        for root in &self.roots {
            if root.is_file() {
                match IndexUnit::from_path(root) {
                    Some(unit) if self.accepts(&unit) => units.push(unit),
                    _ => {}
                }
                continue;
            }
            if !root.exists() {
                warn!("Module '{}' root {:?} does not exist", self.id, root);
                continue;
            }

            let mut builder = WalkBuilder::new(root);
            builder.follow_links(false).hidden(true);
            if self.is_source() {
                builder.git_ignore(true).git_global(true).git_exclude(true);
            } else {
                builder
                    .git_ignore(false)
                    .git_global(false)
                    .git_exclude(false)
                    .ignore(false);
            }

            for entry in builder.build() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!("Skipping unreadable entry in {:?}: {}", root, e);
                        continue;
                    }
                };
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                if let Some(unit) = IndexUnit::from_path(entry.path()) {
                    if self.accepts(&unit) {
                        units.push(unit);
                    }
                }
            }
        }

        units.sort_by(|a, b| a.url.cmp(&b.url));
        units.dedup_by(|a, b| a.url == b.url);
        debug!("Module '{}' has {} units", self.id, units.len());
        units
    }

    fn accepts(&self, unit: &IndexUnit) -> bool {
        match self.kind {
            ModuleKind::Source => unit.is_source(),
            ModuleKind::Library => unit.is_binary(),
        }
    }
}

/// What a unit contains, judged from its URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Kotlin,
    Java,
    Class,
    Other,
}

/// One file handed to the pipeline, identified by URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexUnit {
    url: String,
    path: Option<PathBuf>,
}

impl IndexUnit {
    /// Unit for a file on disk; `None` for paths that cannot become a `file://` URL
    pub fn from_path(path: &Path) -> Option<Self> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().ok()?.join(path)
        };
        let url = Url::from_file_path(&absolute).ok()?;
        Some(Self {
            url: url.to_string(),
            path: Some(absolute),
        })
    }

    /// Unit for a URL. `file://` URLs map back to a path; archive members
    /// (`jar:...!/...`) have none.
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("jar:") || url.contains("!/") {
            return Some(Self {
                url: url.to_string(),
                path: None,
            });
        }
        let parsed = Url::parse(url).ok()?;
        if parsed.scheme() != "file" {
            return None;
        }
        let path = parsed.to_file_path().ok()?;
        Some(Self {
            url: parsed.to_string(),
            path: Some(path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn kind(&self) -> UnitKind {
        let name = self.url.rsplit('/').next().unwrap_or_default();
        match name.rsplit_once('.').map(|(_, ext)| ext) {
            Some("kt") => UnitKind::Kotlin,
            Some("java") => UnitKind::Java,
            Some("class") => UnitKind::Class,
            _ => UnitKind::Other,
        }
    }

    /// Kotlin or Java file on the local filesystem
    pub fn is_source(&self) -> bool {
        self.path.is_some() && matches!(self.kind(), UnitKind::Kotlin | UnitKind::Java)
    }

    /// Compiled unit, loose or inside an archive
    pub fn is_binary(&self) -> bool {
        self.kind() == UnitKind::Class
    }

    /// Modification time in milliseconds since the epoch; `0` for archive members
    pub fn last_modified(&self) -> Option<i64> {
        let Some(path) = &self.path else {
            return Some(0);
        };
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        let millis = modified.duration_since(UNIX_EPOCH).ok()?.as_millis();
        Some(millis as i64)
    }

    pub fn exists(&self) -> bool {
        self.path.as_ref().map_or(true, |p| p.exists())
    }
}

impl std::fmt::Display for IndexUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}
