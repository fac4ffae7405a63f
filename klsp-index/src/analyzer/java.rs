//! Structural reader for Java sources

use super::syntax::{mask, parse_enum_entries, Cursor, Scope, Token, TokenKind};
use crate::schema::{ClassKind, Declaration, Parameter};

const MODIFIERS: &[&str] = &[
    "public",
    "private",
    "protected",
    "static",
    "final",
    "abstract",
    "default",
    "synchronized",
    "native",
    "transient",
    "volatile",
    "strictfp",
    "sealed",
];

const TYPE_KEYWORDS: &[&str] = &["class", "interface", "enum", "record"];

pub(crate) struct JavaFile {
    pub package: String,
    pub declarations: Vec<Declaration>,
}

pub(crate) fn parse(source: &str, file: &str) -> JavaFile {
    let masked = mask(source, false);
    let mut parser = Parser {
        cursor: Cursor::new(&masked),
        file,
        modifiers: Vec::new(),
        out: Vec::new(),
    };

    while parser.cursor.at("@") && !parser.next_is("interface") {
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

    JavaFile {
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

impl<'a> Parser<'a> {
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
                ";" => {
                    self.cursor.next();
                    self.modifiers.clear();
                }
                "import" => {
                    while let Some(t) = self.cursor.next() {
                        if t.text == ";" {
                            break;
                        }
                    }
                }
                "@" if self.next_is("interface") => {
                    self.cursor.next();
                    self.parse_type(scope, "@interface");
                }
                "@" => self.cursor.skip_annotation(),
                "record" if !self.is_record_declaration() => self.parse_member(scope),
                text if TYPE_KEYWORDS.contains(&text) => self.parse_type(scope, text),
                "{" => {
                    // Instance or static initializer
                    self.cursor.skip_group("{", "}");
                    self.modifiers.clear();
                }
                "<" => self.cursor.skip_type_parameters(),
                "non" if self.next_is("-") => {
                    self.cursor.next();
                    self.cursor.next();
                    self.cursor.next();
                }
                text if MODIFIERS.contains(&text) => {
                    self.modifiers.push(text);
                    self.cursor.next();
                }
                _ if token.kind == TokenKind::Ident => self.parse_member(scope),
                _ => {
                    self.cursor.next();
                    self.modifiers.clear();
                }
            }
        }
    }

    fn parse_type(&mut self, scope: &Scope, keyword: &str) {
        let modifiers = std::mem::take(&mut self.modifiers);
        let has = |m: &str| modifiers.contains(&m);
        self.cursor.next();

        let Some(name) = self.cursor.peek().filter(|t| t.kind == TokenKind::Ident) else {
            return;
        };
        self.cursor.next();

        let class_kind = match keyword {
            "interface" => ClassKind::Interface,
            "@interface" => ClassKind::AnnotationClass,
            "enum" => ClassKind::EnumClass,
            _ if has("abstract") => ClassKind::AbstractClass,
            _ => ClassKind::Class,
        };

        let fq_name = scope.member_fq(name.text);
        self.out.push(Declaration::Class {
            name: name.text.to_string(),
            fq_name: fq_name.clone(),
            is_top_level: scope.is_top_level(),
            is_private: has("private") || has("protected"),
            class_kind,
            file: self.file.to_string(),
            start_offset: name.start as i64,
            end_offset: name.end as i64,
        });

        self.cursor.skip_type_parameters();
        if keyword == "record" && self.cursor.at("(") {
            for (component, type_name) in self.parse_parameters() {
                self.out.push(Declaration::Field {
                    name: component.text.to_string(),
                    fq_name: format!("{}.{}", fq_name, component.text),
                    is_extension: false,
                    is_top_level: false,
                    file: self.file.to_string(),
                    start_offset: component.start as i64,
                    end_offset: component.end as i64,
                    type_name,
                    containing_class_fq_name: fq_name.clone(),
                });
            }
        }

        // extends / implements / permits
        while let Some(t) = self.cursor.peek() {
            match t.text {
                "{" | ";" | "}" => break,
                "<" => self.cursor.skip_type_parameters(),
                _ => {
                    self.cursor.next();
                }
            }
        }

        if self.cursor.eat("{") {
            if class_kind == ClassKind::EnumClass {
                parse_enum_entries(
                    &mut self.cursor,
                    &fq_name,
                    self.file,
                    |text| MODIFIERS.contains(&text) || TYPE_KEYWORDS.contains(&text),
                    &mut self.out,
                );
            }
            self.parse_members(&Scope::class(&fq_name));
        }
        self.modifiers.clear();
    }

    /// Field, method or constructor
    fn parse_member(&mut self, scope: &Scope) {
        let modifiers = std::mem::take(&mut self.modifiers);
        let mut consumed: Vec<Token<'a>> = Vec::new();
        let mut depth = 0i32;

        while let Some(t) = self.cursor.peek() {
            if depth == 0 {
                match t.text {
                    "(" | "=" | ";" | "," => break,
                    "{" | "}" => return,
                    _ => {}
                }
            }
            match t.text {
                "<" => depth += 1,
                ">" => depth -= 1,
                "@" => {
                    self.cursor.skip_annotation();
                    continue;
                }
                _ => {}
            }
            consumed.push(t);
            self.cursor.next();
        }

        let Some(name_index) = consumed.iter().rposition(|t| t.kind == TokenKind::Ident) else {
            self.cursor.next();
            return;
        };
        let name = consumed[name_index];
        let type_name = if name_index == 0 {
            String::new()
        } else {
            self.cursor
                .text(consumed[0].start, consumed[name_index - 1].end)
        };

        if self.cursor.at("(") {
            let parameters = self.parse_parameters();
            // throws clause, annotation default value, then body or `;`
            while let Some(t) = self.cursor.peek() {
                match t.text {
                    "{" => {
                        self.cursor.skip_group("{", "}");
                        break;
                    }
                    ";" => {
                        self.cursor.next();
                        break;
                    }
                    "}" => break,
                    "(" => self.cursor.skip_group("(", ")"),
                    _ => {
                        self.cursor.next();
                    }
                }
            }
            if type_name.is_empty() {
                // Constructor
                return;
            }
            self.out.push(Declaration::Function {
                name: name.text.to_string(),
                fq_name: scope.member_fq(name.text),
                is_extension: false,
                is_top_level: false,
                is_private: modifiers.contains(&"private") || modifiers.contains(&"protected"),
                file: self.file.to_string(),
                start_offset: name.start as i64,
                end_offset: name.end as i64,
                parameters: parameters
                    .into_iter()
                    .map(|(name, type_name)| Parameter {
                        name: name.text.to_string(),
                        type_name,
                    })
                    .collect(),
                return_type: type_name,
                receiver_type: String::new(),
            });
            return;
        }

        let mut declarator = name;
        loop {
            self.out.push(Declaration::Field {
                name: declarator.text.to_string(),
                fq_name: scope.member_fq(declarator.text),
                is_extension: false,
                is_top_level: false,
                file: self.file.to_string(),
                start_offset: declarator.start as i64,
                end_offset: declarator.end as i64,
                type_name: type_name.clone(),
                containing_class_fq_name: scope.class_fq().to_string(),
            });

            if self.cursor.eat("=") {
                self.skip_initializer();
            }
            if !self.cursor.eat(",") {
                break;
            }
            let next_is_declarator = matches!(
                (self.cursor.peek(), self.cursor.peek_at(1)),
                (Some(n), Some(f)) if n.kind == TokenKind::Ident && matches!(f.text, "=" | "," | ";" | "[")
            );
            match self.cursor.peek() {
                Some(next) if next_is_declarator => {
                    self.cursor.next();
                    declarator = next;
                }
                _ => {
                    // Generic arguments of an initializer, not another declarator
                    self.skip_initializer();
                    if !self.cursor.at(",") {
                        break;
                    }
                }
            }
        }
        self.cursor.eat(";");
    }

    /// `(Type name, final Type... rest)` as `(name, type)` pairs
    fn parse_parameters(&mut self) -> Vec<(Token<'a>, String)> {
        let mut parameters = Vec::new();
        if !self.cursor.eat("(") {
            return parameters;
        }

        let mut current: Vec<Token<'a>> = Vec::new();
        let mut depth = 0i32;
        while let Some(t) = self.cursor.peek() {
            if depth == 0 && matches!(t.text, "," | ")") {
                self.cursor.next();
                if let Some(parameter) = self.parameter(&current) {
                    parameters.push(parameter);
                }
                current.clear();
                if t.text == ")" {
                    break;
                }
                continue;
            }
            match t.text {
                "@" => {
                    self.cursor.skip_annotation();
                    continue;
                }
                "final" if depth == 0 => {
                    self.cursor.next();
                    continue;
                }
                "<" => depth += 1,
                ">" => depth -= 1,
                _ => {}
            }
            current.push(t);
            self.cursor.next();
        }

        parameters
    }

    fn parameter(&self, tokens: &[Token<'a>]) -> Option<(Token<'a>, String)> {
        let (name, rest) = tokens.split_last()?;
        if name.kind != TokenKind::Ident {
            return None;
        }
        let (first, last) = (rest.first()?, rest.last()?);
        Some((*name, self.cursor.text(first.start, last.end)))
    }

    fn skip_initializer(&mut self) {
        while let Some(t) = self.cursor.peek() {
            match t.text {
                "," | ";" | "}" => return,
                "(" => self.cursor.skip_group("(", ")"),
                "[" => self.cursor.skip_group("[", "]"),
                "{" => self.cursor.skip_group("{", "}"),
                _ => {
                    self.cursor.next();
                }
            }
        }
    }

    fn is_record_declaration(&self) -> bool {
        self.cursor.peek_at(1).is_some_and(|t| t.kind == TokenKind::Ident)
            && self
                .cursor
                .peek_at(2)
                .is_some_and(|t| matches!(t.text, "(" | "<"))
    }

    fn next_is(&self, text: &str) -> bool {
        self.cursor.peek_at(1).is_some_and(|t| t.text == text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(file: &JavaFile) -> Vec<(&str, &str)> {
        file.declarations
            .iter()
            .map(|d| (d.discriminator(), d.fq_name()))
            .collect()
    }

    #[test]
    fn test_class_members() {
        let source = r#"
package com.example;

import java.util.List;
import java.util.Map;

/* class Commented */
public class Service extends Base implements Runnable {
    private static final int LIMIT = 10, OTHER = 20;
    private Map<String, Integer> counts = new HashMap<String, Integer>();

    static {
        init();
    }

    public Service(int limit) {
        this.limit = limit;
    }

    @Override
    public void run() {
        int local = 0;
    }

    protected <T> List<T> collect(final List<? extends T> items, String... names) throws Exception {
        return null;
    }

    private static class Helper {}
}
"#;
        let file = parse(source, "file:///Service.java");
        assert_eq!(file.package, "com.example");
        assert_eq!(
            names(&file),
            vec![
                ("class", "com.example.Service"),
                ("field", "com.example.Service.LIMIT"),
                ("field", "com.example.Service.OTHER"),
                ("field", "com.example.Service.counts"),
                ("fun", "com.example.Service.run"),
                ("fun", "com.example.Service.collect"),
                ("class", "com.example.Service.Helper"),
            ]
        );

        match &file.declarations[3] {
            Declaration::Field { type_name, .. } => assert_eq!(type_name, "Map<String, Integer>"),
            other => panic!("unexpected {other:?}"),
        }

        match &file.declarations[5] {
            Declaration::Function {
                parameters,
                return_type,
                is_private,
                ..
            } => {
                assert_eq!(return_type, "List<T>");
                assert!(is_private);
                assert_eq!(parameters.len(), 2);
                assert_eq!(parameters[0].name, "items");
                assert_eq!(parameters[0].type_name, "List<? extends T>");
                assert_eq!(parameters[1].name, "names");
            }
            other => panic!("unexpected {other:?}"),
        }

        match &file.declarations[6] {
            Declaration::Class {
                is_top_level,
                is_private,
                ..
            } => {
                assert!(!is_top_level);
                assert!(is_private);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_enum_interface_annotation_record() {
        let source = r#"
package p;

public enum Level {
    LOW, MEDIUM("m") {
        @Override String label() { return "M"; }
    }, HIGH;

    Level() {}
    Level(String s) {}
    String label() { return name(); }
}

interface Named { String name(); }

@interface Marker { int value() default 1; }

record Point(int x, int y) {}
"#;
        let file = parse(source, "file:///Level.java");
        assert_eq!(
            names(&file),
            vec![
                ("class", "p.Level"),
                ("entry", "p.Level.LOW"),
                ("entry", "p.Level.MEDIUM"),
                ("entry", "p.Level.HIGH"),
                ("fun", "p.Level.label"),
                ("class", "p.Named"),
                ("fun", "p.Named.name"),
                ("class", "p.Marker"),
                ("fun", "p.Marker.value"),
                ("class", "p.Point"),
                ("field", "p.Point.x"),
                ("field", "p.Point.y"),
            ]
        );

        let kinds: Vec<ClassKind> = file
            .declarations
            .iter()
            .filter_map(|d| match d {
                Declaration::Class { class_kind, .. } => Some(*class_kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ClassKind::EnumClass,
                ClassKind::Interface,
                ClassKind::AnnotationClass,
                ClassKind::Class
            ]
        );
    }
}
