//! Structural reader for Kotlin sources
//!
//! Only declaration headers are read. Function bodies, initializers and
//! `init` blocks are skipped as balanced groups, which is also what keeps local
//! declarations out of the index.

use super::syntax::{mask, parse_enum_entries, Cursor, Scope, Token, TokenKind};
use crate::schema::{ClassKind, Declaration, Parameter};

const MODIFIERS: &[&str] = &[
    "public",
    "private",
    "protected",
    "internal",
    "abstract",
    "open",
    "final",
    "sealed",
    "data",
    "inner",
    "enum",
    "annotation",
    "override",
    "lateinit",
    "const",
    "inline",
    "value",
    "companion",
    "suspend",
    "tailrec",
    "operator",
    "infix",
    "external",
    "expect",
    "actual",
];

const PARAMETER_MODIFIERS: &[&str] = &[
    "vararg",
    "noinline",
    "crossinline",
    "val",
    "var",
    "private",
    "protected",
    "internal",
    "public",
    "override",
    "open",
    "final",
];

const KEYWORDS: &[&str] = &[
    "class",
    "interface",
    "object",
    "fun",
    "val",
    "var",
    "typealias",
    "constructor",
    "init",
    "import",
    "package",
];

pub(crate) struct KotlinFile {
    pub package: String,
    pub declarations: Vec<Declaration>,
}

pub(crate) fn parse(source: &str, file: &str) -> KotlinFile {
    let masked = mask(source, true);
    let mut parser = Parser {
        cursor: Cursor::new(&masked),
        file,
        modifiers: Vec::new(),
        out: Vec::new(),
    };

    while parser.cursor.at("@") {
        parser.cursor.skip_annotation();
    }
    let package = if parser.cursor.eat("package") {
        let name = parser.cursor.qualified_name();
        parser.cursor.eat(";");
        name
    } else {
        String::new()
    };

    parser.parse_members(&Scope::file(&package));

    KotlinFile {
        package,
        declarations: parser.out,
    }
}

struct Parser<'a> {
    cursor: Cursor<'a>,
    file: &'a str,
    modifiers: Vec<&'a str>,
    out: Vec<Declaration>,
}

struct ParsedParameter<'a> {
    name: Token<'a>,
    type_name: String,
    is_property: bool,
}

impl<'a> Parser<'a> {
    /// Read members until the `}` closing `scope` (or end of file at top level)
    fn parse_members(&mut self, scope: &Scope) {
        self.modifiers.clear();

        while let Some(token) = self.cursor.peek() {
            match token.text {
                "}" => {
                    self.cursor.next();
                    if !scope.is_top_level() {
                        return;
                    }
                }
                "@" => self.cursor.skip_annotation(),
                ";" => {
                    self.cursor.next();
                    self.modifiers.clear();
                }
                "import" | "package" => {
                    self.cursor.next();
                    self.cursor.qualified_name();
                    if self.cursor.eat(".") {
                        self.cursor.eat("*");
                    }
                    if self.cursor.eat("as") {
                        self.cursor.next();
                    }
                }
                "fun" if self.next_is("interface") => {
                    self.modifiers.push("fun");
                    self.cursor.next();
                }
                "class" | "interface" | "object" => self.parse_class(scope),
                "fun" => self.parse_function(scope),
                "val" | "var" => self.parse_property(scope),
                "typealias" => {
                    self.cursor.next();
                    self.cursor.next();
                    self.cursor.skip_type_parameters();
                    if self.cursor.eat("=") {
                        self.cursor.read_type(&[], true);
                    }
                    self.modifiers.clear();
                }
                "init" if self.next_is("{") => {
                    self.cursor.next();
                    self.cursor.skip_group("{", "}");
                    self.modifiers.clear();
                }
                "constructor" => {
                    self.cursor.next();
                    self.parse_parameters();
                    if self.cursor.eat(":") {
                        self.cursor.next();
                        self.cursor.skip_group("(", ")");
                    }
                    if self.cursor.at("{") {
                        self.cursor.skip_group("{", "}");
                    }
                    self.modifiers.clear();
                }
                "{" => {
                    self.cursor.skip_group("{", "}");
                    self.modifiers.clear();
                }
                text if token.kind == TokenKind::Ident
                    && MODIFIERS.contains(&text)
                    && self.next_starts_name() =>
                {
                    self.modifiers.push(text);
                    self.cursor.next();
                }
                _ => {
                    self.cursor.next();
                    self.modifiers.clear();
                }
            }
        }
    }

    fn parse_class(&mut self, scope: &Scope) {
        let modifiers = std::mem::take(&mut self.modifiers);
        let has = |m: &str| modifiers.contains(&m);
        let Some(keyword) = self.cursor.next() else {
            return;
        };

        let name_token = match self.cursor.peek() {
            Some(t) if t.kind == TokenKind::Ident && !KEYWORDS.contains(&t.text) => {
                self.cursor.next();
                Some(t)
            }
            _ => None,
        };

        let (name, start, end) = match name_token {
            Some(t) => (t.text.to_string(), t.start, t.end),
            None if keyword.text == "object" && has("companion") => {
                ("Companion".to_string(), keyword.start, keyword.end)
            }
            None => {
                // Object expression: nothing to record
                if self.cursor.eat(":") {
                    self.skip_expression(true);
                }
                if self.cursor.at("{") {
                    self.cursor.skip_group("{", "}");
                }
                return;
            }
        };

        let class_kind = if keyword.text == "interface" {
            ClassKind::Interface
        } else if has("enum") {
            ClassKind::EnumClass
        } else if has("annotation") {
            ClassKind::AnnotationClass
        } else if has("abstract") || has("sealed") {
            ClassKind::AbstractClass
        } else {
            ClassKind::Class
        };

        let fq_name = scope.member_fq(&name);
        self.out.push(Declaration::Class {
            name,
            fq_name: fq_name.clone(),
            is_top_level: scope.is_top_level(),
            is_private: has("private") || has("protected"),
            class_kind,
            file: self.file.to_string(),
            start_offset: start as i64,
            end_offset: end as i64,
        });

        self.cursor.skip_type_parameters();

        // Primary constructor, possibly `private constructor` or `@Inject constructor`
        while let Some(t) = self.cursor.peek() {
            if t.newline_before {
                break;
            }
            if t.text == "@" {
                self.cursor.skip_annotation();
            } else if matches!(t.text, "private" | "protected" | "internal" | "public") {
                self.cursor.next();
            } else {
                break;
            }
        }
        self.cursor.eat("constructor");
        if self.cursor.at("(") {
            for parameter in self.parse_parameters() {
                if !parameter.is_property {
                    continue;
                }
                self.out.push(Declaration::Field {
                    name: parameter.name.text.to_string(),
                    fq_name: format!("{}.{}", fq_name, parameter.name.text),
                    is_extension: false,
                    is_top_level: false,
                    file: self.file.to_string(),
                    start_offset: parameter.name.start as i64,
                    end_offset: parameter.name.end as i64,
                    type_name: parameter.type_name,
                    containing_class_fq_name: fq_name.clone(),
                });
            }
        }

        if self.cursor.eat(":") {
            self.skip_expression(true);
        }
        if self.cursor.eat("where") {
            self.skip_expression(true);
        }

        if self.cursor.eat("{") {
            let inner = Scope::class(&fq_name);
            if class_kind == ClassKind::EnumClass {
                parse_enum_entries(
                    &mut self.cursor,
                    &fq_name,
                    self.file,
                    |text| KEYWORDS.contains(&text) || MODIFIERS.contains(&text),
                    &mut self.out,
                );
            }
            self.parse_members(&inner);
        }
        self.modifiers.clear();
    }

    fn parse_function(&mut self, scope: &Scope) {
        let modifiers = std::mem::take(&mut self.modifiers);
        self.cursor.next();
        self.cursor.skip_type_parameters();

        let Some(header) = self.read_receiver_and_name(&["("]) else {
            return;
        };
        if !self.cursor.at("(") {
            return;
        }

        let parameters = self
            .parse_parameters()
            .into_iter()
            .map(|p| Parameter {
                name: p.name.text.to_string(),
                type_name: p.type_name,
            })
            .collect();

        let mut return_type = if self.cursor.eat(":") {
            self.cursor.read_type(&["=", "{", "where"], true)
        } else {
            String::new()
        };
        if self.cursor.eat("where") {
            while let Some(t) = self.cursor.peek() {
                if matches!(t.text, "{" | "=" | "}") || (t.newline_before && self.starts_declaration(0))
                {
                    break;
                }
                self.cursor.next();
            }
        }

        if self.cursor.at("{") {
            self.cursor.skip_group("{", "}");
            if return_type.is_empty() {
                return_type = "Unit".to_string();
            }
        } else if self.cursor.eat("=") {
            self.skip_expression(false);
        }

        let name = header.name.text.to_string();
        self.out.push(Declaration::Function {
            fq_name: scope.member_fq(&name),
            name,
            is_extension: !header.receiver.is_empty(),
            is_top_level: scope.is_top_level(),
            is_private: modifiers.contains(&"private") || modifiers.contains(&"protected"),
            file: self.file.to_string(),
            start_offset: header.name.start as i64,
            end_offset: header.name.end as i64,
            parameters,
            return_type,
            receiver_type: header.receiver,
        });
    }

    fn parse_property(&mut self, scope: &Scope) {
        self.modifiers.clear();
        self.cursor.next();
        self.cursor.skip_type_parameters();

        if self.cursor.at("(") {
            // Destructuring declaration
            self.cursor.skip_group("(", ")");
            if self.cursor.eat("=") {
                self.skip_expression(false);
            }
            return;
        }

        let Some(header) = self.read_receiver_and_name(&[":", "=", ";", "{", "}", "by"]) else {
            return;
        };

        let type_name = if self.cursor.eat(":") {
            self.cursor.read_type(&["=", "by", "get", "set"], true)
        } else {
            String::new()
        };
        if self.cursor.eat("=") || self.cursor.eat("by") {
            self.skip_expression(false);
        }

        let name = header.name.text.to_string();
        self.out.push(Declaration::Field {
            fq_name: scope.member_fq(&name),
            name,
            is_extension: !header.receiver.is_empty(),
            is_top_level: scope.is_top_level(),
            file: self.file.to_string(),
            start_offset: header.name.start as i64,
            end_offset: header.name.end as i64,
            type_name,
            containing_class_fq_name: scope.class_fq().to_string(),
        });
    }

    /// Read `Receiver.name` or `name` up to a depth-0 token in `stops`
    fn read_receiver_and_name(&mut self, stops: &[&str]) -> Option<Header<'a>> {
        let mut consumed: Vec<Token<'a>> = Vec::new();
        let mut depth = 0i32;

        while let Some(t) = self.cursor.peek() {
            if depth == 0 {
                let named = consumed.last().is_some_and(|l| l.kind == TokenKind::Ident);
                if stops.contains(&t.text) && (named || t.text != "(") {
                    break;
                }
                if !consumed.is_empty() && t.newline_before {
                    break;
                }
                if matches!(t.text, "{" | "}" | "=" | ";") {
                    break;
                }
            }
            match t.text {
                "<" | "(" => depth += 1,
                ">" | ")" => depth -= 1,
                _ => {}
            }
            consumed.push(t);
            self.cursor.next();
        }

        let name = *consumed.last().filter(|t| t.kind == TokenKind::Ident)?;
        let receiver = match consumed.len() {
            n if n >= 3 && matches!(consumed[n - 2].text, "." | "?.") => {
                let separator = consumed[n - 2];
                let mut receiver = self.cursor.text(consumed[0].start, separator.start);
                if separator.text == "?." {
                    receiver.push('?');
                }
                receiver
            }
            _ => String::new(),
        };

        Some(Header { name, receiver })
    }

    fn parse_parameters(&mut self) -> Vec<ParsedParameter<'a>> {
        let mut parameters = Vec::new();
        if !self.cursor.eat("(") {
            return parameters;
        }

        loop {
            let mut is_property = false;
            loop {
                if self.cursor.at("@") {
                    self.cursor.skip_annotation();
                    continue;
                }
                match (self.cursor.peek(), self.cursor.peek_at(1)) {
                    (Some(t), Some(n))
                        if PARAMETER_MODIFIERS.contains(&t.text)
                            && n.kind == TokenKind::Ident =>
                    {
                        is_property |= matches!(t.text, "val" | "var");
                        self.cursor.next();
                    }
                    _ => break,
                }
            }

            let Some(token) = self.cursor.peek() else {
                break;
            };
            match token.text {
                ")" => {
                    self.cursor.next();
                    break;
                }
                "," => {
                    self.cursor.next();
                }
                _ if token.kind == TokenKind::Ident && self.next_is(":") => {
                    self.cursor.next();
                    self.cursor.next();
                    let type_name = self.cursor.read_type(&[",", "=", ")"], false);
                    parameters.push(ParsedParameter {
                        name: token,
                        type_name,
                        is_property,
                    });
                    if self.cursor.eat("=") {
                        self.skip_default_value();
                    }
                }
                "(" => self.cursor.skip_group("(", ")"),
                "{" => self.cursor.skip_group("{", "}"),
                _ => {
                    self.cursor.next();
                }
            }
        }

        parameters
    }

    fn skip_default_value(&mut self) {
        while let Some(t) = self.cursor.peek() {
            match t.text {
                "," | ")" => return,
                "(" => self.cursor.skip_group("(", ")"),
                "[" => self.cursor.skip_group("[", "]"),
                "{" => self.cursor.skip_group("{", "}"),
                _ => {
                    self.cursor.next();
                }
            }
        }
    }

    /// Skip an expression or supertype list up to the next member
    fn skip_expression(&mut self, stop_at_brace: bool) {
        let mut first = true;
        while let Some(t) = self.cursor.peek() {
            match t.text {
                "}" | ";" | ")" | "]" => return,
                "{" if stop_at_brace => return,
                _ => {}
            }
            if !first && t.newline_before && self.starts_declaration(0) {
                return;
            }
            match t.text {
                "(" => self.cursor.skip_group("(", ")"),
                "[" => self.cursor.skip_group("[", "]"),
                "{" => self.cursor.skip_group("{", "}"),
                _ => {
                    self.cursor.next();
                }
            }
            first = false;
        }
    }

    fn starts_declaration(&self, offset: usize) -> bool {
        let Some(t) = self.cursor.peek_at(offset) else {
            return false;
        };
        match t.text {
            "@" => true,
            "init" => self.cursor.peek_at(offset + 1).is_some_and(|n| n.text == "{"),
            text if KEYWORDS.contains(&text) => true,
            text if MODIFIERS.contains(&text) => self
                .cursor
                .peek_at(offset + 1)
                .is_some_and(|n| n.kind == TokenKind::Ident || n.text == "@"),
            _ => false,
        }
    }

    fn next_is(&self, text: &str) -> bool {
        self.cursor.peek_at(1).is_some_and(|t| t.text == text)
    }

    fn next_starts_name(&self) -> bool {
        self.cursor
            .peek_at(1)
            .is_some_and(|t| t.kind == TokenKind::Ident || t.text == "@")
    }
}

struct Header<'a> {
    name: Token<'a>,
    receiver: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(file: &KotlinFile) -> Vec<(&str, &str)> {
        file.declarations
            .iter()
            .map(|d| (d.discriminator(), d.fq_name()))
            .collect()
    }

    #[test]
    fn test_package_and_top_level_declarations() {
        let source = r#"
@file:JvmName("Utils")
package com.example.app

import kotlin.math.max
import com.example.other.*

/** Docs mentioning class Fake */
class Foo(val id: Int, name: String) {
    val size: Int = 0
    fun bar(x: Int, y: String = "a, b"): Boolean {
        val local = 1
        fun localFun() {}
        return true
    }
}

private fun helper() = 42

val String.shout: String
    get() = uppercase()

fun List<Int>.total(): Int = sum()
"#;
        let file = parse(source, "file:///Foo.kt");
        assert_eq!(file.package, "com.example.app");
        assert_eq!(
            names(&file),
            vec![
                ("class", "com.example.app.Foo"),
                ("field", "com.example.app.Foo.id"),
                ("field", "com.example.app.Foo.size"),
                ("fun", "com.example.app.Foo.bar"),
                ("fun", "com.example.app.helper"),
                ("field", "com.example.app.shout"),
                ("fun", "com.example.app.total"),
            ]
        );

        match &file.declarations[3] {
            Declaration::Function {
                parameters,
                return_type,
                is_top_level,
                ..
            } => {
                assert_eq!(parameters.len(), 2);
                assert_eq!(parameters[1].type_name, "String");
                assert_eq!(return_type, "Boolean");
                assert!(!is_top_level);
            }
            other => panic!("unexpected {other:?}"),
        }

        match &file.declarations[4] {
            Declaration::Function { is_private, .. } => assert!(is_private),
            other => panic!("unexpected {other:?}"),
        }

        match &file.declarations[6] {
            Declaration::Function {
                is_extension,
                receiver_type,
                ..
            } => {
                assert!(is_extension);
                assert_eq!(receiver_type, "List<Int>");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_offsets_point_at_names() {
        let source = "package p\n\nclass Foo\n";
        let file = parse(source, "file:///Foo.kt");
        let (start, end) = file.declarations[0].offsets();
        assert_eq!(&source[start as usize..end as usize], "Foo");
    }

    #[test]
    fn test_class_kinds_and_enum_entries() {
        let source = r#"
package p

enum class Color(val rgb: Int) {
    RED(0xff0000), GREEN(0x00ff00) {
        override fun toString() = "g"
    },
    BLUE(0x0000ff);

    fun hex(): String = rgb.toString(16)
}

sealed interface Shape
abstract class Base
annotation class Marker
data class Point(val x: Int, val y: Int)
object Registry {
    const val MAX = 10
}
"#;
        let file = parse(source, "file:///Color.kt");
        let kinds: Vec<(String, Option<ClassKind>)> = file
            .declarations
            .iter()
            .map(|d| match d {
                Declaration::Class { class_kind, .. } => (d.name().to_string(), Some(*class_kind)),
                _ => (d.name().to_string(), None),
            })
            .collect();

        assert_eq!(
            kinds,
            vec![
                ("Color".to_string(), Some(ClassKind::EnumClass)),
                ("rgb".to_string(), None),
                ("RED".to_string(), None),
                ("GREEN".to_string(), None),
                ("BLUE".to_string(), None),
                ("hex".to_string(), None),
                ("Shape".to_string(), Some(ClassKind::Interface)),
                ("Base".to_string(), Some(ClassKind::AbstractClass)),
                ("Marker".to_string(), Some(ClassKind::AnnotationClass)),
                ("Point".to_string(), Some(ClassKind::Class)),
                ("x".to_string(), None),
                ("y".to_string(), None),
                ("Registry".to_string(), Some(ClassKind::Class)),
                ("MAX".to_string(), None),
            ]
        );

        match &file.declarations[2] {
            Declaration::EnumEntry {
                fq_name,
                containing_class_fq_name,
                ..
            } => {
                assert_eq!(fq_name, "p.Color.RED");
                assert_eq!(containing_class_fq_name, "p.Color");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_companion_and_nested() {
        let source = r#"
package p

class Outer {
    companion object {
        fun create(): Outer = Outer()
    }

    inner class Inner : Base(), Runnable {
        override fun run() {}
    }

    private val listener = object : Runnable {
        override fun run() {}
    }
}
"#;
        let file = parse(source, "file:///Outer.kt");
        assert_eq!(
            names(&file),
            vec![
                ("class", "p.Outer"),
                ("class", "p.Outer.Companion"),
                ("fun", "p.Outer.Companion.create"),
                ("class", "p.Outer.Inner"),
                ("fun", "p.Outer.Inner.run"),
                ("field", "p.Outer.listener"),
            ]
        );
    }

    #[test]
    fn test_no_package() {
        let file = parse("fun main() {\n    println(\"class X\")\n}\n", "file:///main.kt");
        assert_eq!(file.package, "");
        assert_eq!(names(&file), vec![("fun", "main")]);
    }
}
