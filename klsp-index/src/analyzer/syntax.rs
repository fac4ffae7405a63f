//! Comment/string masking, a small token cursor and the scope bookkeeping
//! shared by the Kotlin and Java structural parsers.

use crate::schema::Declaration;

/// Replace comments and string/char literals with spaces.
///
/// The result has the same byte length as `source` and keeps every newline,
/// so offsets into it are offsets into the original text.
pub(crate) fn mask(source: &str, nested_comments: bool) -> String {
    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;

    let blank = |out: &mut Vec<u8>, from: usize, to: usize| {
        for b in &mut out[from..to] {
            if *b != b'\n' {
                *b = b' ';
            }
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let end = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p);
                blank(&mut out, i, end);
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = block_comment_end(bytes, i, nested_comments);
                blank(&mut out, i, end);
                i = end;
            }
            b'"' if bytes[i..].starts_with(b"\"\"\"") => {
                let end = raw_string_end(bytes, i + 3);
                blank(&mut out, i, end);
                i = end;
            }
            b'"' => {
                let end = string_end(bytes, i + 1);
                blank(&mut out, i, end);
                i = end;
            }
            b'\'' => match char_literal_end(bytes, i + 1) {
                Some(end) => {
                    blank(&mut out, i, end);
                    i = end;
                }
                None => i += 1,
            },
            _ => i += 1,
        }
    }

    // Only whole runs between ASCII delimiters were replaced, so this is lossless
    String::from_utf8_lossy(&out).into_owned()
}

fn block_comment_end(bytes: &[u8], start: usize, nested: bool) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        if bytes[i] == b'/' && bytes[i + 1] == b'*' {
            if depth == 0 || nested {
                depth += 1;
            }
            i += 2;
        } else if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

fn raw_string_end(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        if bytes[i..].starts_with(b"\"\"\"") {
            i += 3;
            // """"" closes on the last three quotes
            while bytes.get(i) == Some(&b'"') {
                i += 1;
            }
            return i;
        }
        i += 1;
    }
    bytes.len()
}

fn string_end(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            // Unterminated literal: stop at the line end
            b'\n' => return i,
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                let mut depth = 0usize;
                while i < bytes.len() {
                    match bytes[i] {
                        b'{' => depth += 1,
                        b'}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn char_literal_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < bytes.len() && i < start + 10 {
        match bytes[i] {
            b'\\' => i += 2,
            b'\'' => return Some(i + 1),
            b'\n' => return None,
            _ => i += 1,
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident,
    Number,
    Punct,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
    /// A line break separates this token from the previous one
    pub newline_before: bool,
}

const TWO_CHAR_PUNCT: [&str; 14] = [
    "->", "::", "?.", "?:", "..", "==", "!=", "<=", ">=", "&&", "||", "!!", "+=", "-=",
];

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric()
}

pub(crate) fn tokenize(masked: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut chars = masked.char_indices().peekable();
    let mut newline = false;

    while let Some((start, c)) = chars.next() {
        if c == '\n' {
            newline = true;
            continue;
        }
        if c.is_whitespace() {
            continue;
        }

        let (kind, start, end) = if c == '`' {
            let mut end = start + 1;
            for (i, c) in chars.by_ref() {
                if c == '`' || c == '\n' {
                    end = i;
                    break;
                }
                end = i + c.len_utf8();
            }
            (TokenKind::Ident, start + 1, end)
        } else if is_ident_start(c) {
            let mut end = start + c.len_utf8();
            while let Some(&(i, c)) = chars.peek() {
                if !is_ident_part(c) {
                    break;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            (TokenKind::Ident, start, end)
        } else if c.is_ascii_digit() {
            let mut end = start + 1;
            while let Some(&(i, c)) = chars.peek() {
                let fraction = c == '.'
                    && masked[i + 1..]
                        .chars()
                        .next()
                        .is_some_and(|n| n.is_ascii_digit());
                if !(c.is_ascii_alphanumeric() || c == '_' || fraction) {
                    break;
                }
                end = i + 1;
                chars.next();
            }
            (TokenKind::Number, start, end)
        } else {
            let pair = masked.get(start..start + 2);
            if pair.is_some_and(|p| TWO_CHAR_PUNCT.contains(&p)) {
                chars.next();
                (TokenKind::Punct, start, start + 2)
            } else {
                (TokenKind::Punct, start, start + c.len_utf8())
            }
        };

        if start < end {
            tokens.push(Token {
                kind,
                text: &masked[start..end],
                start,
                end,
                newline_before: newline,
            });
        }
        newline = false;
    }

    tokens
}

/// Forward-only view over a token list
pub(crate) struct Cursor<'a> {
    source: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(masked: &'a str) -> Self {
        Self {
            source: masked,
            tokens: tokenize(masked),
            pos: 0,
        }
    }

    pub fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    pub fn peek_at(&self, offset: usize) -> Option<Token<'a>> {
        self.tokens.get(self.pos + offset).copied()
    }

    pub fn next(&mut self) -> Option<Token<'a>> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }

    pub fn at(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.text == text)
    }

    pub fn eat(&mut self, text: &str) -> bool {
        if self.at(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Source text between two byte offsets with whitespace collapsed
    pub fn text(&self, start: usize, end: usize) -> String {
        self.source
            .get(start..end)
            .unwrap_or_default()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Consume a bracketed group starting at the current `open` token
    pub fn skip_group(&mut self, open: &str, close: &str) {
        if !self.eat(open) {
            return;
        }
        let mut depth = 1usize;
        while let Some(token) = self.next() {
            if token.text == open {
                depth += 1;
            } else if token.text == close {
                depth -= 1;
                if depth == 0 {
                    return;
                }
            }
        }
    }

    /// Consume `<...>` type parameters, if present
    pub fn skip_type_parameters(&mut self) {
        if self.at("<") {
            self.skip_group("<", ">");
        }
    }

    /// Consume an annotation such as `@Foo`, `@get:Foo`, `@a.b.Foo(1)` or `@[A B]`
    pub fn skip_annotation(&mut self) {
        if !self.eat("@") {
            return;
        }
        if self.at("[") {
            self.skip_group("[", "]");
            return;
        }
        if self.peek_at(1).is_some_and(|t| t.text == ":") {
            self.pos += 2;
        }
        while self.peek().is_some_and(|t| t.kind == TokenKind::Ident) {
            self.pos += 1;
            if !self.eat(".") {
                break;
            }
        }
        self.skip_type_parameters();
        if self.at("(") && !self.peek().is_some_and(|t| t.newline_before) {
            self.skip_group("(", ")");
        }
    }

    /// Read a dotted name like `com.example.app`
    pub fn qualified_name(&mut self) -> String {
        let mut parts = Vec::new();
        while let Some(token) = self.peek() {
            if token.kind != TokenKind::Ident {
                break;
            }
            parts.push(token.text);
            self.pos += 1;
            if !(self.at(".") && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Ident)) {
                break;
            }
            self.pos += 1;
        }
        parts.join(".")
    }

    /// Read a type reference up to a depth-0 token in `stops`.
    ///
    /// Ends early at a line break when `stop_at_newline` is set.
    pub fn read_type(&mut self, stops: &[&str], stop_at_newline: bool) -> String {
        let mut depth = 0i32;
        let mut first: Option<Token<'a>> = None;
        let mut last: Option<Token<'a>> = None;

        while let Some(token) = self.peek() {
            if depth == 0 {
                if stops.contains(&token.text) {
                    break;
                }
                if stop_at_newline && first.is_some() && token.newline_before {
                    // A type can continue on the next line only after `.`, `,`, `->` or an open bracket
                    let continues = last.is_some_and(|l| {
                        matches!(l.text, "." | "," | "->" | "<" | "(")
                    }) || matches!(token.text, "." | "?." | "->");
                    if !continues {
                        break;
                    }
                }
            }
            match token.text {
                "<" | "(" | "[" => depth += 1,
                ">" | ")" | "]" => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                "{" | "}" | ";" => break,
                _ => {}
            }
            first.get_or_insert(token);
            last = Some(token);
            self.pos += 1;
        }

        match (first, last) {
            (Some(first), Some(last)) => self.text(first.start, last.end),
            _ => String::new(),
        }
    }
}

/// Naming context of the declarations being read
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    prefix: String,
    class_fq: Option<String>,
    top_level: bool,
}

impl Scope {
    pub fn file(package: &str) -> Self {
        Self {
            prefix: package.to_string(),
            class_fq: None,
            top_level: true,
        }
    }

    pub fn class(fq_name: &str) -> Self {
        Self {
            prefix: fq_name.to_string(),
            class_fq: Some(fq_name.to_string()),
            top_level: false,
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.top_level
    }

    /// Enclosing class, empty at file level
    pub fn class_fq(&self) -> &str {
        self.class_fq.as_deref().unwrap_or_default()
    }

    pub fn member_fq(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }
}

/// Read the entry list at the start of an enum body.
///
/// Stops after the `;` that ends the list, or before the first token that does
/// not look like an entry.
pub(crate) fn parse_enum_entries(
    cursor: &mut Cursor<'_>,
    class_fq: &str,
    file: &str,
    is_reserved: impl Fn(&str) -> bool,
    out: &mut Vec<Declaration>,
) {
    loop {
        while cursor.at("@") {
            cursor.skip_annotation();
        }
        let Some(token) = cursor.peek() else {
            return;
        };
        if token.text == ";" {
            cursor.next();
            return;
        }
        let followed_by_entry_syntax = cursor
            .peek_at(1)
            .map_or(true, |t| matches!(t.text, "," | ";" | "(" | "{" | "}"));
        if token.kind != TokenKind::Ident || is_reserved(token.text) || !followed_by_entry_syntax {
            return;
        }
        cursor.next();
        out.push(Declaration::EnumEntry {
            name: token.text.to_string(),
            fq_name: format!("{}.{}", class_fq, token.text),
            file: file.to_string(),
            start_offset: token.start as i64,
            end_offset: token.end as i64,
            containing_class_fq_name: class_fq.to_string(),
        });
        if cursor.at("(") {
            cursor.skip_group("(", ")");
        }
        if cursor.at("{") {
            cursor.skip_group("{", "}");
        }
        if cursor.eat(",") {
            continue;
        }
        cursor.eat(";");
        return;
    }
}

/// Converts byte offsets into UTF-16 code unit offsets, the unit editors and
/// the JVM count positions in
pub(crate) struct Utf16Offsets {
    /// Byte offset just past each non-ASCII char, with the bytes saved so far
    shifts: Vec<(usize, usize)>,
}

impl Utf16Offsets {
    pub fn new(text: &str) -> Self {
        let mut shifts = Vec::new();
        let mut saved = 0;
        for (start, c) in text.char_indices() {
            if !c.is_ascii() {
                saved += c.len_utf8() - c.len_utf16();
                shifts.push((start + c.len_utf8(), saved));
            }
        }
        Self { shifts }
    }

    pub fn convert(&self, byte_offset: usize) -> usize {
        let passed = self.shifts.partition_point(|&(end, _)| end <= byte_offset);
        match passed {
            0 => byte_offset,
            n => byte_offset - self.shifts[n - 1].1,
        }
    }
}
