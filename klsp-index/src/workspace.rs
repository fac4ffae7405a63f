//! Per-workspace cache directory layout
//!
//! Every workspace root gets its own directory under the cache base, named
//! `{8-char-hash}_{folder-name}`. The hash is taken over the canonical root path,
//! so the same workspace maps to the same directory across restarts while two
//! workspaces with the same folder name never collide.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sub-store holding the schema version marker
pub const PROJECT_STORE: &str = "project";
pub const FILES_STORE: &str = "files";
pub const PACKAGES_STORE: &str = "packages";
pub const DECLARATIONS_STORE: &str = "declarations";
pub const SOURCES_STORE: &str = "sources";

/// Every sub-store directory, version store first
pub const ALL_STORES: [&str; 5] = [
    PROJECT_STORE,
    FILES_STORE,
    PACKAGES_STORE,
    DECLARATIONS_STORE,
    SOURCES_STORE,
];

/// Base directory for workspace caches.
///
/// `~/.cache/klsp/index` on Linux, `~/Library/Caches/klsp/index` on macOS,
/// `%LOCALAPPDATA%\klsp\index` on Windows. Resolved lazily; never call this from
/// a static initializer.
pub fn default_cache_base() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("klsp")
        .join("index")
}

/// Stable identifier for a workspace root: `{8-char-hash}_{folder-name}`
pub fn workspace_id(workspace_root: &Path) -> String {
    let canonical = workspace_root
        .canonicalize()
        .unwrap_or_else(|_| workspace_root.to_path_buf());

    let root = if canonical.is_file() {
        warn!(
            "workspace_id() received file path {:?}, using its parent directory",
            canonical
        );
        canonical.parent().unwrap_or(&canonical).to_path_buf()
    } else {
        canonical
    };

    let hash = path_hash(&normalize_for_hashing(&root));
    let folder = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");

    let id = format!("{hash}_{folder}");
    debug!("Workspace ID '{}' for {:?}", id, root);
    id
}

/// Cache directory for `workspace_root` under `base` (or the default base)
pub fn cache_root_for(workspace_root: &Path, base: Option<&Path>) -> PathBuf {
    let base = base
        .map(Path::to_path_buf)
        .unwrap_or_else(default_cache_base);
    base.join(workspace_id(workspace_root))
}

fn normalize_for_hashing(path: &Path) -> String {
    let path = path.to_string_lossy();

    #[cfg(windows)]
    {
        path.to_lowercase()
    }

    #[cfg(not(windows))]
    {
        path.to_string()
    }
}

fn path_hash(normalized: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"workspace_id:");
    hasher.update(normalized.as_bytes());
    hasher.finalize().to_hex()[..8].to_string()
}
