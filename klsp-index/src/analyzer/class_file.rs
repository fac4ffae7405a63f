//! Compiled class units
//!
//! Reads the fixed part of a JVM class file (constant pool, access flags,
//! `this_class`) and applies the naming filters that keep synthetic, obfuscated
//! and facade classes out of the index.

use crate::schema::{ClassKind, Declaration};

const MAGIC: u32 = 0xCAFE_BABE;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_INTERFACE: u16 = 0x0200;
const ACC_ABSTRACT: u16 = 0x0400;
const ACC_SYNTHETIC: u16 = 0x1000;
const ACC_ANNOTATION: u16 = 0x2000;
const ACC_ENUM: u16 = 0x4000;
const ACC_MODULE: u16 = 0x8000;

/// Packages full of generated or unit-marker classes nobody completes against
const NOISY_PACKAGES: &[&str] = &[
    "it.unimi.dsi.fastutil",
    "org.checkerframework.checker.units.qual",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("not a class file")]
    BadMagic,
    #[error("truncated class file")]
    Truncated,
    #[error("invalid constant pool tag {tag} at index {index}")]
    BadConstant { index: u16, tag: u8 },
    #[error("this_class does not name a class constant")]
    BadThisClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    /// JVM internal name, e.g. `com/example/Foo`
    pub internal_name: String,
    pub access_flags: u16,
}

enum Constant {
    Utf8(String),
    Class(u16),
    Other,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ClassFileError> {
        let end = self.pos.checked_add(n).ok_or(ClassFileError::Truncated)?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ClassFileError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFileError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ClassFileError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl ClassHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = Reader { bytes, pos: 0 };
        if reader.u32()? != MAGIC {
            return Err(ClassFileError::BadMagic);
        }
        reader.take(4)?; // minor, major

        let count = reader.u16()?;
        let mut pool: Vec<Constant> = Vec::with_capacity(count as usize);
        pool.push(Constant::Other);
        let mut index = 1u16;
        while index < count {
            let tag = reader.u8()?;
            let constant = match tag {
                1 => {
                    let len = reader.u16()? as usize;
                    Constant::Utf8(String::from_utf8_lossy(reader.take(len)?).into_owned())
                }
                7 => Constant::Class(reader.u16()?),
                8 | 16 | 19 | 20 => {
                    reader.take(2)?;
                    Constant::Other
                }
                15 => {
                    reader.take(3)?;
                    Constant::Other
                }
                3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                    reader.take(4)?;
                    Constant::Other
                }
                5 | 6 => {
                    reader.take(8)?;
                    // Longs and doubles occupy two slots
                    pool.push(Constant::Other);
                    index += 1;
                    Constant::Other
                }
                tag => return Err(ClassFileError::BadConstant { index, tag }),
            };
            pool.push(constant);
            index += 1;
        }

        let access_flags = reader.u16()?;
        let this_class = reader.u16()?;
        let internal_name = match pool.get(this_class as usize) {
            Some(Constant::Class(name_index)) => match pool.get(*name_index as usize) {
                Some(Constant::Utf8(name)) => name.clone(),
                _ => return Err(ClassFileError::BadThisClass),
            },
            _ => return Err(ClassFileError::BadThisClass),
        };

        Ok(Self {
            internal_name,
            access_flags,
        })
    }

    pub fn is_public(&self) -> bool {
        self.access_flags & ACC_PUBLIC != 0
    }

    /// Compiler-generated or module descriptor
    pub fn is_synthetic(&self) -> bool {
        self.access_flags & (ACC_SYNTHETIC | ACC_MODULE) != 0
    }

    pub fn class_kind(&self) -> ClassKind {
        let flags = self.access_flags;
        if flags & ACC_ANNOTATION != 0 {
            ClassKind::AnnotationClass
        } else if flags & ACC_INTERFACE != 0 {
            ClassKind::Interface
        } else if flags & ACC_ENUM != 0 {
            ClassKind::EnumClass
        } else if flags & ACC_ABSTRACT != 0 {
            ClassKind::AbstractClass
        } else {
            ClassKind::Class
        }
    }
}

/// Internal name derived from a unit URL: `jar:file:///a.jar!/org/x/Foo.class` -> `org/x/Foo`
pub fn internal_name_from_url(url: &str) -> String {
    let inner = url.split_once("!/").map_or(url, |(_, inner)| inner);
    let inner = inner.strip_prefix("file://").unwrap_or(inner);
    let inner = inner.strip_suffix(".class").unwrap_or(inner);
    inner.trim_start_matches('/').to_string()
}

/// Dotted name and package of an internal name
pub fn fq_name_of(internal_name: &str) -> (String, String) {
    let fq_name = internal_name.replace('/', ".").replace('\\', ".");
    let package = fq_name
        .rsplit_once('.')
        .map(|(package, _)| package.to_string())
        .unwrap_or_default();
    (fq_name, package)
}

/// Whether a class with this dotted name belongs in completion results.
///
/// Rejects nested and anonymous classes (`$`), file facades (`FooKt`),
/// `package-info`/`module-info`, obfuscated or lower-case names, single-letter
/// names and classes in [`NOISY_PACKAGES`].
pub fn looks_like_api_class(fq_name: &str) -> bool {
    if fq_name.is_empty() || fq_name.contains('$') {
        return false;
    }
    let simple = fq_name.rsplit('.').next().unwrap_or(fq_name);
    let starts_upper = simple.chars().next().is_some_and(char::is_uppercase);
    starts_upper
        && simple.chars().count() > 1
        && !simple.ends_with("Kt")
        && simple != "package-info"
        && simple != "module-info"
        && !NOISY_PACKAGES.iter().any(|p| fq_name.starts_with(p))
}

/// The single top-level class declaration a class unit contributes, if any
pub fn class_declaration(
    fq_name: &str,
    url: &str,
    class_kind: ClassKind,
    is_private: bool,
) -> Option<Declaration> {
    if !looks_like_api_class(fq_name) {
        return None;
    }
    let name = fq_name.rsplit('.').next().unwrap_or(fq_name);
    Some(Declaration::Class {
        name: name.to_string(),
        fq_name: fq_name.to_string(),
        is_top_level: true,
        is_private,
        class_kind,
        file: url.to_string(),
        start_offset: -1,
        end_offset: -1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal class file: constant pool with a long, a Utf8 name and a Class entry
    fn class_bytes(internal_name: &str, access_flags: u16) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 52]);
        // count = 5: #1-#2 long, #3 utf8, #4 class
        bytes.extend_from_slice(&5u16.to_be_bytes());
        bytes.push(5);
        bytes.extend_from_slice(&42u64.to_be_bytes());
        bytes.push(1);
        bytes.extend_from_slice(&(internal_name.len() as u16).to_be_bytes());
        bytes.extend_from_slice(internal_name.as_bytes());
        bytes.push(7);
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.extend_from_slice(&access_flags.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        bytes
    }

    #[test]
    fn test_parse_header() {
        let header =
            ClassHeader::parse(&class_bytes("com/example/Foo", ACC_PUBLIC | ACC_INTERFACE)).unwrap();
        assert_eq!(header.internal_name, "com/example/Foo");
        assert!(header.is_public());
        assert_eq!(header.class_kind(), ClassKind::Interface);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ClassHeader::parse(b"nope"), Err(ClassFileError::BadMagic));
        let truncated = &class_bytes("a/B", ACC_PUBLIC)[..12];
        assert_eq!(ClassHeader::parse(truncated), Err(ClassFileError::Truncated));
    }

    #[test]
    fn test_internal_name_from_url() {
        assert_eq!(
            internal_name_from_url("jar:file:///libs/a.jar!/org/lib/Util.class"),
            "org/lib/Util"
        );
        assert_eq!(
            internal_name_from_url("file:///org/lib/Util.class"),
            "org/lib/Util"
        );
    }

    #[test]
    fn test_api_class_filter() {
        assert!(looks_like_api_class("org.lib.Util"));
        assert!(!looks_like_api_class("org.lib.Util$Inner"));
        assert!(!looks_like_api_class("org.lib.UtilsKt"));
        assert!(!looks_like_api_class("org.lib.a"));
        assert!(!looks_like_api_class("org.lib.X"));
        assert!(!looks_like_api_class("org.lib.package-info"));
        assert!(!looks_like_api_class("it.unimi.dsi.fastutil.ints.IntList"));
    }

    #[test]
    fn test_class_declaration() {
        let (fq_name, package) = fq_name_of("org/lib/Util");
        assert_eq!(package, "org.lib");
        let decl = class_declaration(&fq_name, "jar:x!/org/lib/Util.class", ClassKind::Class, true)
            .unwrap();
        assert_eq!(decl.name(), "Util");
        assert_eq!(decl.offsets(), (-1, -1));
        assert!(!decl.is_completion_candidate());
    }
}
