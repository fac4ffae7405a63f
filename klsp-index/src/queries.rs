//! Read side of the index
//!
//! Every query reads the stores directly and may interleave with writers.
//! Results can be stale or miss a file that is being re-indexed, but each row
//! is decoded whole; rows that fail to decode are skipped.

use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use tracing::debug;

use crate::database::{Database, DatabaseStats};
use crate::schema::Declaration;
use crate::store::KeyValueStore;

/// Rows of `store` whose key starts with `prefix`, in key order
pub fn prefix_search<'a, T: DeserializeOwned>(
    store: &'a dyn KeyValueStore,
    prefix: &str,
) -> impl Iterator<Item = (String, T)> + 'a {
    let name = store.name().to_string();
    store
        .prefix_scan(prefix)
        .filter_map(move |(key, bytes)| match bincode::deserialize::<T>(&bytes) {
            Ok(value) => Some((key, value)),
            Err(e) => {
                debug!("Skipping undecodable row '{}' in {}: {}", key, name, e);
                None
            }
        })
}

/// Declarations whose name starts with `prefix`, in key order
pub fn declarations_with_prefix<'a>(
    db: &'a Database,
    prefix: &str,
) -> impl Iterator<Item = (String, Declaration)> + 'a {
    db.declarations()
        .prefix_scan(prefix)
        .filter_map(move |(key, bytes)| {
            let declaration = db.decode_declaration(&key, &bytes)?;
            Some((key, declaration))
        })
}

pub fn files_for_package(db: &Database, package: &str) -> Vec<String> {
    db.package_files(package)
}

pub fn sources_for_package(db: &Database, package: &str) -> Vec<String> {
    db.package_sources(package)
}

/// Distinct next segments of the packages below `base`, sorted.
///
/// With packages `a.b.c` and `a.d`, the subpackages of `a` are `b` and `d`;
/// an empty `base` yields the root segments.
pub fn subpackage_names(db: &Database, base: &str) -> Vec<String> {
    let base = base.trim_end_matches('.');
    let prefix = if base.is_empty() {
        String::new()
    } else {
        format!("{base}.")
    };

    let segments: BTreeSet<String> = db
        .packages()
        .prefix_scan(&prefix)
        .filter_map(|(key, _)| {
            let rest = &key[prefix.len()..];
            let segment = rest.split('.').next().unwrap_or_default();
            (!segment.is_empty()).then(|| segment.to_string())
        })
        .collect();
    segments.into_iter().collect()
}

/// Completion candidates for a name prefix: top-level, visible declarations
pub fn get_completions(db: &Database, prefix: &str) -> Vec<Declaration> {
    declarations_with_prefix(db, prefix)
        .map(|(_, declaration)| declaration)
        .filter(Declaration::is_completion_candidate)
        .collect()
}

/// Top-level declarations of one package, one per name
pub fn declarations_in_package(db: &Database, package: &str) -> Vec<Declaration> {
    let mut seen = BTreeSet::new();
    let mut result = Vec::new();

    for path in db.package_files(package) {
        let Some(record) = db.file(&path) else {
            continue;
        };
        for key in &record.declaration_keys {
            let Some(declaration) = db.declaration(key) else {
                continue;
            };
            let visible = match &declaration {
                Declaration::EnumEntry { .. } => true,
                other => other.is_top_level(),
            };
            if visible && seen.insert(declaration.name().to_string()) {
                result.push(declaration);
            }
        }
    }
    result
}

/// Distinct files declaring something whose name starts with `name`
pub fn files_declaring(db: &Database, name: &str) -> Vec<String> {
    let files: BTreeSet<String> = declarations_with_prefix(db, name)
        .map(|(_, declaration)| declaration.file().to_string())
        .collect();
    files.into_iter().collect()
}

pub fn stats(db: &Database) -> DatabaseStats {
    db.stats()
}
