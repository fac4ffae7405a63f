//! Structural view of source and binary units
//!
//! Full symbol resolution lives outside this crate. The index only needs a
//! lightweight structural summary per unit: its package and the declarations
//! it contributes. [`Analyzer`] is the seam for that; [`StructuralAnalyzer`] is
//! the built-in implementation that reads Kotlin/Java headers and class-file
//! metadata without type information.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::IndexError;
use crate::modules::{IndexUnit, UnitKind};
use crate::schema::Declaration;

pub mod class_file;
mod java;
mod kotlin;
mod syntax;

/// Declarations a unit contributes, plus its package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSummary {
    pub package: String,
    pub declarations: Vec<Declaration>,
}

/// Source of structural information about units
pub trait Analyzer: Send + Sync {
    /// Package declared by a source file
    fn package_name(&self, unit: &IndexUnit, text: &str) -> String;

    /// Declarations of a source file, given its current text
    fn summarize_source(&self, unit: &IndexUnit, text: &str) -> Result<FileSummary, IndexError>;

    /// Declarations from compiled metadata, or `None` when none can be read
    fn summarize_binary(&self, unit: &IndexUnit) -> Option<FileSummary>;
}

static PACKAGE_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*package\s+([\p{L}\p{N}_$]+(?:\s*\.\s*[\p{L}\p{N}_$]+)*)")
        .expect("valid package regex")
});

/// Built-in [`Analyzer`] for Kotlin, Java and loose `.class` files
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralAnalyzer;

impl StructuralAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for StructuralAnalyzer {
    fn package_name(&self, unit: &IndexUnit, text: &str) -> String {
        let masked = syntax::mask(text, unit.kind() == UnitKind::Kotlin);
        PACKAGE_DIRECTIVE
            .captures(&masked)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().split_whitespace().collect::<String>())
            .unwrap_or_default()
    }

    fn summarize_source(&self, unit: &IndexUnit, text: &str) -> Result<FileSummary, IndexError> {
        if text.contains('\0') {
            return Err(IndexError::analysis(unit.url(), "file contains NUL bytes"));
        }

        let mut summary = match unit.kind() {
            UnitKind::Kotlin => {
                let file = kotlin::parse(text, unit.url());
                FileSummary {
                    package: file.package,
                    declarations: file.declarations,
                }
            }
            UnitKind::Java => {
                let file = java::parse(text, unit.url());
                FileSummary {
                    package: file.package,
                    declarations: file.declarations,
                }
            }
            _ => {
                return Err(IndexError::InvalidUnit {
                    url: unit.url().to_string(),
                })
            }
        };

        if !text.is_ascii() {
            let offsets = syntax::Utf16Offsets::new(text);
            for declaration in &mut summary.declarations {
                let (start, end) = declaration.offsets();
                declaration.set_offsets(
                    offsets.convert(start as usize) as i64,
                    offsets.convert(end as usize) as i64,
                );
            }
        }

        debug!(
            "Summarized {} ({} declarations in '{}')",
            unit,
            summary.declarations.len(),
            summary.package
        );
        Ok(summary)
    }

    fn summarize_binary(&self, unit: &IndexUnit) -> Option<FileSummary> {
        let path = unit.path()?;
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Cannot read class file {:?}: {}", path, e);
                return None;
            }
        };
        let header = match class_file::ClassHeader::parse(&bytes) {
            Ok(header) => header,
            Err(e) => {
                debug!("Cannot parse class file {:?}: {}", path, e);
                return None;
            }
        };

        let (fq_name, package) = class_file::fq_name_of(&header.internal_name);
        let declarations = if header.is_synthetic() {
            Vec::new()
        } else {
            class_file::class_declaration(
                &fq_name,
                unit.url(),
                header.class_kind(),
                !header.is_public(),
            )
            .into_iter()
            .collect()
        };

        Some(FileSummary {
            package,
            declarations,
        })
    }
}

/// Summary for a class unit whose metadata could not be read: the name comes from the URL
pub fn summarize_class_by_name(unit: &IndexUnit) -> FileSummary {
    let (fq_name, package) = class_file::fq_name_of(&class_file::internal_name_from_url(unit.url()));
    let declarations = class_file::class_declaration(
        &fq_name,
        unit.url(),
        crate::schema::ClassKind::Class,
        true,
    )
    .into_iter()
    .collect();
    FileSummary {
        package,
        declarations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_package_name() {
        let analyzer = StructuralAnalyzer::new();
        let unit = IndexUnit::from_url("file:///src/Foo.kt").unwrap();
        let text = "// package fake\n/* package other */\npackage com.example .app\n\nclass Foo";
        assert_eq!(analyzer.package_name(&unit, text), "com.example.app");
        assert_eq!(analyzer.package_name(&unit, "class Foo"), "");
    }

    #[test]
    fn test_summarize_source_dispatches_on_kind() {
        let analyzer = StructuralAnalyzer::new();

        let kt = IndexUnit::from_url("file:///src/Foo.kt").unwrap();
        let summary = analyzer
            .summarize_source(&kt, "package a\nclass Foo")
            .unwrap();
        assert_eq!(summary.package, "a");
        assert_eq!(summary.declarations.len(), 1);

        let java = IndexUnit::from_url("file:///src/Bar.java").unwrap();
        let summary = analyzer
            .summarize_source(&java, "package b;\nclass Bar {}")
            .unwrap();
        assert_eq!(summary.declarations[0].fq_name(), "b.Bar");

        let other = IndexUnit::from_url("file:///src/notes.txt").unwrap();
        assert!(matches!(
            analyzer.summarize_source(&other, "text"),
            Err(IndexError::InvalidUnit { .. })
        ));
    }

    #[test]
    fn test_offsets_count_utf16_units() {
        let analyzer = StructuralAnalyzer::new();
        let unit = IndexUnit::from_url("file:///src/Größe.kt").unwrap();
        let text = "package a\n// Größe 😀\nclass Größe\n";
        let summary = analyzer.summarize_source(&unit, text).unwrap();

        let (start, end) = summary.declarations[0].offsets();
        let units: Vec<u16> = text.encode_utf16().collect();
        assert_eq!(
            String::from_utf16(&units[start as usize..end as usize]).unwrap(),
            "Größe"
        );
    }

    #[test]
    fn test_summarize_binary_reads_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Util.class");
        let name = b"org/lib/Util";
        let mut bytes = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52, 0, 3];
        bytes.push(1);
        bytes.extend_from_slice(&(name.len() as u16).to_be_bytes());
        bytes.extend_from_slice(name);
        bytes.extend_from_slice(&[7, 0, 1]);
        bytes.extend_from_slice(&[0x00, 0x01, 0, 2]);
        std::fs::write(&path, bytes).unwrap();

        let unit = IndexUnit::from_path(&path).unwrap();
        let summary = StructuralAnalyzer::new().summarize_binary(&unit).unwrap();
        assert_eq!(summary.package, "org.lib");
        assert_eq!(summary.declarations[0].fq_name(), "org.lib.Util");
        assert!(summary.declarations[0].is_completion_candidate());
    }

    #[test]
    fn test_archive_members_fall_back_to_name() {
        let unit = IndexUnit::from_url("jar:file:///libs/a.jar!/org/lib/Util.class").unwrap();
        assert!(StructuralAnalyzer::new().summarize_binary(&unit).is_none());

        let summary = summarize_class_by_name(&unit);
        assert_eq!(summary.package, "org.lib");
        assert_eq!(summary.declarations[0].name(), "Util");

        let facade = IndexUnit::from_url("jar:file:///libs/a.jar!/org/lib/UtilKt.class").unwrap();
        assert!(summarize_class_by_name(&facade).declarations.is_empty());
    }
}
