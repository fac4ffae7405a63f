//! Configuration for the declaration index
//!
//! Loaded with priority defaults -> TOML file -> `KLSP_INDEX_*` environment
//! variables, then validated.
//!
//! ```toml
//! workers = 4
//! scan_concurrency = 4
//!
//! [[modules]]
//! id = "app"
//! kind = "source"
//! roots = ["src/main/kotlin"]
//!
//! [[modules]]
//! id = "kotlin-stdlib"
//! kind = "library"
//! roots = ["/opt/kotlin/classes"]
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::modules::Module;
use crate::store::LockRetryPolicy;

/// Workspace-relative location of the config file
pub const WORKSPACE_CONFIG_FILE: &str = ".klsp/index.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Base directory for workspace caches (default: platform cache dir)
    pub cache_directory: Option<PathBuf>,

    /// Number of command processors draining the work queue
    pub workers: usize,

    /// Chunks the scanner dispatches at once
    pub scan_concurrency: usize,

    /// Files per chunk in the scan phase
    pub scan_chunk_size: usize,

    /// Number of chunks the index phase is split into
    pub index_chunk_count: usize,

    /// Lock-contention retries before stale-lock cleanup
    pub lock_retry_attempts: u32,

    /// Backoff base for lock retries
    pub lock_retry_base_delay_ms: u64,

    /// Project model; empty means one source module rooted at the workspace
    pub modules: Vec<Module>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_directory: None,
            workers: 4,
            scan_concurrency: default_scan_concurrency(),
            scan_chunk_size: 100,
            index_chunk_count: 32,
            lock_retry_attempts: 3,
            lock_retry_base_delay_ms: 1000,
            modules: Vec::new(),
        }
    }
}

/// Two thirds of the available cores, at least 1 and at most 8
pub fn default_scan_concurrency() -> usize {
    (num_cpus::get() * 2 / 3).clamp(1, 8)
}

impl IndexConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Self =
            toml::from_str(&content).context("Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Load the configuration for `workspace_root`.
    ///
    /// `KLSP_INDEX_CONFIG` names the file explicitly; otherwise
    /// `<workspace>/.klsp/index.toml` is used when present.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let config_paths = [
            std::env::var("KLSP_INDEX_CONFIG").ok().map(PathBuf::from),
            Some(workspace_root.join(WORKSPACE_CONFIG_FILE)),
        ];

        for config_path in config_paths.into_iter().flatten() {
            if config_path.exists() {
                info!("Loading index configuration from {:?}", config_path);
                config = Self::from_file(&config_path)
                    .with_context(|| format!("Failed to load config from {config_path:?}"))?;
                config.resolve_roots(workspace_root);
                break;
            }
        }

        EnvOverrides::from_env()?.apply(&mut config);

        config.validate()?;
        debug!("Effective index configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("workers must be greater than 0"));
        }

        if self.workers > 64 {
            return Err(anyhow!("workers should not exceed 64"));
        }

        if self.scan_concurrency == 0 {
            return Err(anyhow!("scan_concurrency must be greater than 0"));
        }

        if self.scan_chunk_size == 0 || self.index_chunk_count == 0 {
            return Err(anyhow!(
                "scan_chunk_size and index_chunk_count must be greater than 0"
            ));
        }

        if self.lock_retry_base_delay_ms > 60_000 {
            warn!(
                "lock_retry_base_delay_ms is very high ({}ms), startup may stall",
                self.lock_retry_base_delay_ms
            );
        }

        let mut seen = std::collections::HashSet::new();
        for module in &self.modules {
            if !seen.insert(module.id.as_str()) {
                return Err(anyhow!("duplicate module id '{}'", module.id));
            }
        }

        Ok(())
    }

    pub fn lock_retry_policy(&self) -> LockRetryPolicy {
        LockRetryPolicy {
            max_attempts: self.lock_retry_attempts,
            base_delay: Duration::from_millis(self.lock_retry_base_delay_ms),
        }
    }

    /// Configured modules, or a single source module rooted at the workspace
    pub fn modules_or_default(&self, workspace_root: &Path) -> Vec<Module> {
        if self.modules.is_empty() {
            vec![Module::source("main", vec![workspace_root.to_path_buf()])]
        } else {
            self.modules.clone()
        }
    }

    /// Make relative module roots relative to the workspace
    fn resolve_roots(&mut self, workspace_root: &Path) {
        for module in &mut self.modules {
            for root in &mut module.roots {
                if root.is_relative() {
                    *root = workspace_root.join(&*root);
                }
            }
        }
    }
}

/// Values set through `KLSP_INDEX_*` environment variables.
///
/// Only variables that are present override the file configuration, even when
/// they repeat a default value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    pub cache_directory: Option<PathBuf>,
    pub workers: Option<usize>,
    pub scan_concurrency: Option<usize>,
    pub lock_retry_attempts: Option<u32>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(value: Option<String>, name: &str) -> Result<Option<T>>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            value
                .map(|v| v.trim().parse::<T>())
                .transpose()
                .with_context(|| format!("Invalid value for {name}"))
        }

        Ok(Self {
            cache_directory: lookup("KLSP_INDEX_CACHE_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            workers: parse(lookup("KLSP_INDEX_WORKERS"), "KLSP_INDEX_WORKERS")?,
            scan_concurrency: parse(
                lookup("KLSP_INDEX_SCAN_CONCURRENCY"),
                "KLSP_INDEX_SCAN_CONCURRENCY",
            )?,
            lock_retry_attempts: parse(
                lookup("KLSP_INDEX_LOCK_RETRIES"),
                "KLSP_INDEX_LOCK_RETRIES",
            )?,
        })
    }

    pub fn apply(self, config: &mut IndexConfig) {
        if let Some(cache_directory) = self.cache_directory {
            config.cache_directory = Some(cache_directory);
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(scan_concurrency) = self.scan_concurrency {
            config.scan_concurrency = scan_concurrency;
        }
        if let Some(lock_retry_attempts) = self.lock_retry_attempts {
            config.lock_retry_attempts = lock_retry_attempts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleKind;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.scan_chunk_size, 100);
        assert_eq!(config.index_chunk_count, 32);
        assert!((1..=8).contains(&config.scan_concurrency));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = IndexConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.workers = 65;
        assert!(config.validate().is_err());

        config.workers = 2;
        config.scan_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_module_ids_rejected() {
        let config = IndexConfig {
            modules: vec![
                Module::source("app", vec![]),
                Module::library("app", vec![]),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_resolves_modules() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".klsp");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("index.toml"),
            r#"
workers = 2

[[modules]]
id = "app"
kind = "source"
roots = ["src"]
"#,
        )
        .unwrap();

        let mut config = IndexConfig::from_file(dir.path().join(WORKSPACE_CONFIG_FILE)).unwrap();
        config.resolve_roots(dir.path());

        assert_eq!(config.workers, 2);
        assert_eq!(config.modules[0].kind, ModuleKind::Source);
        assert_eq!(config.modules[0].roots[0], dir.path().join("src"));
    }

    #[test]
    fn test_env_override_equal_to_default_still_applies() {
        let mut config = IndexConfig {
            workers: 8,
            scan_chunk_size: 10,
            ..Default::default()
        };
        let vars: HashMap<&str, &str> =
            HashMap::from([("KLSP_INDEX_WORKERS", "4"), ("KLSP_INDEX_LOCK_RETRIES", "0")]);
        let overrides =
            EnvOverrides::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        overrides.apply(&mut config);

        assert_eq!(config.workers, 4);
        assert_eq!(config.lock_retry_attempts, 0);
        assert_eq!(config.scan_chunk_size, 10);
        assert_eq!(config.cache_directory, None);
    }

    #[test]
    fn test_invalid_env_override_is_an_error() {
        let result = EnvOverrides::from_lookup(|name| {
            (name == "KLSP_INDEX_WORKERS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_default_module_is_workspace_root() {
        let config = IndexConfig::default();
        let modules = config.modules_or_default(Path::new("/work"));
        assert_eq!(modules.len(), 1);
        assert!(modules[0].is_source());
        assert_eq!(modules[0].roots, vec![PathBuf::from("/work")]);
    }
}
