//! Records stored in the declaration index
//!
//! [`Declaration`] rows live in the `declarations` store under [`Declaration::id`];
//! [`FileRecord`] rows live in the `files` store keyed by file URL and own the list
//! of declaration keys the file produced. Both are encoded with bincode, which
//! embeds the enum variant index so one store can hold every declaration kind.
//!
//! Encodings are only ever read back under the schema version that wrote them;
//! bump [`SCHEMA_VERSION`] whenever any type in this module changes shape.

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Version stamped into the project store; a mismatch wipes the index
pub const SCHEMA_VERSION: u32 = 6;

/// Key of the version marker in the project store
pub const VERSION_KEY: &str = "__version";

/// Key of a declaration row
pub type DeclarationKey = String;

/// Flavor of a class-like declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassKind {
    Class,
    Interface,
    EnumClass,
    AnnotationClass,
    AbstractClass,
}

impl ClassKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassKind::Class => "class",
            ClassKind::Interface => "interface",
            ClassKind::EnumClass => "enum class",
            ClassKind::AnnotationClass => "annotation class",
            ClassKind::AbstractClass => "abstract class",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// One named program entity, independent of full type information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Declaration {
    Class {
        name: String,
        fq_name: String,
        is_top_level: bool,
        is_private: bool,
        class_kind: ClassKind,
        file: String,
        start_offset: i64,
        end_offset: i64,
    },
    Function {
        name: String,
        fq_name: String,
        is_extension: bool,
        is_top_level: bool,
        is_private: bool,
        file: String,
        start_offset: i64,
        end_offset: i64,
        parameters: Vec<Parameter>,
        return_type: String,
        receiver_type: String,
    },
    Field {
        name: String,
        fq_name: String,
        is_extension: bool,
        is_top_level: bool,
        file: String,
        start_offset: i64,
        end_offset: i64,
        #[serde(rename = "type")]
        type_name: String,
        containing_class_fq_name: String,
    },
    EnumEntry {
        name: String,
        fq_name: String,
        file: String,
        start_offset: i64,
        end_offset: i64,
        containing_class_fq_name: String,
    },
}

impl Declaration {
    pub fn name(&self) -> &str {
        match self {
            Declaration::Class { name, .. }
            | Declaration::Function { name, .. }
            | Declaration::Field { name, .. }
            | Declaration::EnumEntry { name, .. } => name,
        }
    }

    pub fn fq_name(&self) -> &str {
        match self {
            Declaration::Class { fq_name, .. }
            | Declaration::Function { fq_name, .. }
            | Declaration::Field { fq_name, .. }
            | Declaration::EnumEntry { fq_name, .. } => fq_name,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            Declaration::Class { file, .. }
            | Declaration::Function { file, .. }
            | Declaration::Field { file, .. }
            | Declaration::EnumEntry { file, .. } => file,
        }
    }

    pub fn offsets(&self) -> (i64, i64) {
        match self {
            Declaration::Class {
                start_offset,
                end_offset,
                ..
            }
            | Declaration::Function {
                start_offset,
                end_offset,
                ..
            }
            | Declaration::Field {
                start_offset,
                end_offset,
                ..
            }
            | Declaration::EnumEntry {
                start_offset,
                end_offset,
                ..
            } => (*start_offset, *end_offset),
        }
    }

    pub fn set_offsets(&mut self, start: i64, end: i64) {
        match self {
            Declaration::Class {
                start_offset,
                end_offset,
                ..
            }
            | Declaration::Function {
                start_offset,
                end_offset,
                ..
            }
            | Declaration::Field {
                start_offset,
                end_offset,
                ..
            }
            | Declaration::EnumEntry {
                start_offset,
                end_offset,
                ..
            } => {
                *start_offset = start;
                *end_offset = end;
            }
        }
    }

    /// Short discriminator used in keys
    pub fn discriminator(&self) -> &'static str {
        match self {
            Declaration::Class { .. } => "class",
            Declaration::Function { .. } => "fun",
            Declaration::Field { .. } => "field",
            Declaration::EnumEntry { .. } => "entry",
        }
    }

    pub fn is_top_level(&self) -> bool {
        match self {
            Declaration::Class { is_top_level, .. }
            | Declaration::Function { is_top_level, .. }
            | Declaration::Field { is_top_level, .. } => *is_top_level,
            Declaration::EnumEntry { .. } => false,
        }
    }

    /// Whether completion may offer this declaration outside its file
    pub fn is_completion_candidate(&self) -> bool {
        match self {
            Declaration::Class {
                is_top_level,
                is_private,
                ..
            } => *is_top_level && !*is_private,
            Declaration::Function {
                is_top_level,
                is_private,
                is_extension,
                ..
            } => *is_top_level && !*is_extension && !*is_private,
            Declaration::Field { is_top_level, .. } => *is_top_level,
            Declaration::EnumEntry { .. } => true,
        }
    }

    /// Stable store key.
    ///
    /// Starts with the simple name so that a prefix scan of the declarations store
    /// is a "name starts with" search. Overloads are told apart by their
    /// parameter types.
    pub fn id(&self) -> DeclarationKey {
        match self {
            Declaration::Function {
                name,
                fq_name,
                file,
                parameters,
                receiver_type,
                ..
            } => {
                let params = parameters
                    .iter()
                    .map(|p| p.type_name.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{name}:fun:{fq_name}:{receiver_type}({params}):{file}")
            }
            other => format!(
                "{}:{}:{}:{}",
                other.name(),
                other.discriminator(),
                other.fq_name(),
                other.file()
            ),
        }
    }

    /// One-line description for completion details and CLI output
    pub fn details(&self) -> String {
        match self {
            Declaration::Class { class_kind, fq_name, .. } => {
                format!("{} {}", class_kind.as_str(), fq_name)
            }
            Declaration::Function {
                name,
                parameters,
                return_type,
                receiver_type,
                ..
            } => {
                let params = parameters
                    .iter()
                    .map(|p| format!("{}: {}", p.name, p.type_name))
                    .collect::<Vec<_>>()
                    .join(", ");
                let receiver = if receiver_type.is_empty() {
                    String::new()
                } else {
                    format!("{receiver_type}.")
                };
                if return_type.is_empty() {
                    format!("fun {receiver}{name}({params})")
                } else {
                    format!("fun {receiver}{name}({params}): {return_type}")
                }
            }
            Declaration::Field {
                name, type_name, ..
            } => {
                if type_name.is_empty() {
                    name.clone()
                } else {
                    format!("{name}: {type_name}")
                }
            }
            Declaration::EnumEntry {
                name,
                containing_class_fq_name,
                ..
            } => format!("{containing_class_fq_name}.{name}"),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Bookkeeping entry linking a file to the declaration keys it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File URL (`file://...` or `jar:...!/...`)
    pub path: String,
    pub package_fq_name: String,
    /// Milliseconds since the Unix epoch
    pub last_modified: i64,
    pub indexed: bool,
    pub declaration_keys: Vec<DeclarationKey>,
}

impl FileRecord {
    pub fn new(
        path: impl Into<String>,
        package_fq_name: impl Into<String>,
        last_modified: i64,
        declarations: &[Declaration],
    ) -> Self {
        let mut declaration_keys: Vec<DeclarationKey> =
            declarations.iter().map(Declaration::id).collect();
        declaration_keys.sort();
        declaration_keys.dedup();
        Self {
            path: path.into(),
            package_fq_name: package_fq_name.into(),
            last_modified,
            indexed: true,
            declaration_keys,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str, fq_name: &str, file: &str) -> Declaration {
        Declaration::Class {
            name: name.to_string(),
            fq_name: fq_name.to_string(),
            is_top_level: true,
            is_private: false,
            class_kind: ClassKind::Class,
            file: file.to_string(),
            start_offset: 0,
            end_offset: name.len() as i64,
        }
    }

    fn function(name: &str, param_types: &[&str]) -> Declaration {
        Declaration::Function {
            name: name.to_string(),
            fq_name: format!("com.example.{name}"),
            is_extension: false,
            is_top_level: true,
            is_private: false,
            file: "file:///src/Util.kt".to_string(),
            start_offset: 10,
            end_offset: 13,
            parameters: param_types
                .iter()
                .enumerate()
                .map(|(i, t)| Parameter {
                    name: format!("p{i}"),
                    type_name: t.to_string(),
                })
                .collect(),
            return_type: "Unit".to_string(),
            receiver_type: String::new(),
        }
    }

    #[test]
    fn test_id_is_deterministic_and_name_prefixed() {
        let a = class("Foo", "com.example.Foo", "file:///src/Foo.kt");
        let b = class("Foo", "com.example.Foo", "file:///src/Foo.kt");
        assert_eq!(a.id(), b.id());
        assert!(a.id().starts_with("Foo:"));
    }

    #[test]
    fn test_id_distinguishes_kind_and_file() {
        let a = class("Foo", "com.example.Foo", "file:///src/Foo.kt");
        let b = class("Foo", "com.example.Foo", "file:///src/Other.kt");
        assert_ne!(a.id(), b.id());

        let entry = Declaration::EnumEntry {
            name: "Foo".to_string(),
            fq_name: "com.example.Foo".to_string(),
            file: "file:///src/Foo.kt".to_string(),
            start_offset: 0,
            end_offset: 3,
            containing_class_fq_name: "com.example".to_string(),
        };
        assert_ne!(a.id(), entry.id());
    }

    #[test]
    fn test_overloads_get_distinct_keys() {
        assert_ne!(function("max", &["Int", "Int"]).id(), function("max", &["Long"]).id());
    }

    #[test]
    fn test_decode_keeps_variant() {
        let decl = function("sum", &["List<Int>"]);
        let decoded = Declaration::decode(&decl.encode().unwrap()).unwrap();
        assert_eq!(decoded, decl);
        assert_eq!(decoded.discriminator(), "fun");
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Declaration::decode(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }

    #[test]
    fn test_file_record_keys_are_sorted_and_unique() {
        let foo = class("Foo", "com.example.Foo", "file:///src/Foo.kt");
        let bar = class("Bar", "com.example.Bar", "file:///src/Foo.kt");
        let record = FileRecord::new(
            "file:///src/Foo.kt",
            "com.example",
            1,
            &[foo.clone(), bar.clone(), foo.clone()],
        );
        assert_eq!(record.declaration_keys, vec![bar.id(), foo.id()]);
        assert!(record.indexed);
    }

    #[test]
    fn test_completion_visibility() {
        let mut private_class = class("Hidden", "com.example.Hidden", "file:///a.kt");
        if let Declaration::Class { is_private, .. } = &mut private_class {
            *is_private = true;
        }
        assert!(!private_class.is_completion_candidate());
        assert!(class("Shown", "com.example.Shown", "file:///a.kt").is_completion_candidate());

        let mut extension = function("ext", &[]);
        if let Declaration::Function { is_extension, .. } = &mut extension {
            *is_extension = true;
        }
        assert!(!extension.is_completion_candidate());
    }

    #[test]
    fn test_function_details() {
        let decl = function("sum", &["Int", "Int"]);
        assert_eq!(decl.details(), "fun sum(p0: Int, p1: Int): Unit");
    }
}
