//! Micro-codec for the album's manifest files.
//!
//! This is deliberately not a general JSON implementation. It reads exactly
//! the shapes the album uses (strings, lists of strings, string-keyed maps of
//! strings) and writes a small variant tree. The writer output is standard
//! JSON; the reader is more lenient than JSON in a few ways:
//!
//! | Input | Accepted |
//! |---|---|
//! | `"..."` and `'...'` | both delimiters |
//! | `\n` `\r` `\t` `\b` `\f` `\uXXXX` | decoded as in JSON |
//! | `\x` (any other) | one level of unescaping: the backslash is dropped, `x` kept |
//! | `"""..."""` | multi-line string, taken verbatim |
//!
//! Parsing works on a [`Cursor`] with an exclusive end bound. A failed parse
//! clears the cursor's `ok` flag instead of returning an error, so a caller
//! can chain several reads and check once at the end. Once `ok` is false all
//! further reads return empty values.
//!
//! Booleans have no native representation: they travel as the strings
//! `"true"` and `"false"`.

use crate::types::Size;
use std::collections::BTreeMap;

/// Read position over a manifest text.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    text: &'a [u8],
    pos: usize,
    end: usize,
    ok: bool,
}

impl<'a> Cursor<'a> {
    /// Cursor over the whole text.
    pub fn new(text: &'a str) -> Self {
        Self::bounded(text, 0, text.len())
    }

    /// Cursor starting at byte `pos`, never reading at or beyond `end`.
    pub fn bounded(text: &'a str, pos: usize, end: usize) -> Self {
        Self {
            text: text.as_bytes(),
            pos,
            end: end.min(text.len()),
            ok: true,
        }
    }

    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn byte(&self) -> u8 {
        self.text[self.pos]
    }

    /// Advance to the next byte contained in `stoppers`, jumping over
    /// backslash-escaped bytes. Clears `ok` if the end bound is hit.
    fn skip_to(&mut self, stoppers: &[u8]) -> bool {
        if !self.ok {
            return false;
        }
        while self.pos < self.end && !stoppers.contains(&self.byte()) {
            if self.byte() == b'\\' {
                self.pos += 1;
            }
            self.pos += 1;
        }
        if self.pos >= self.end {
            self.ok = false;
        }
        self.ok
    }

    fn at_triple_quote(&self) -> bool {
        self.pos + 3 <= self.end && self.text[self.pos..self.end].starts_with(b"\"\"\"")
    }

    // Positions handed to `slice` always sit on ASCII delimiters, so they
    // are valid char boundaries of the original `str`.
    fn slice(&self, start: usize, stop: usize) -> &'a str {
        std::str::from_utf8(&self.text[start..stop]).unwrap_or_default()
    }

    fn parse_multiline(&mut self) -> String {
        self.pos += 3;
        let start = self.pos;
        while self.pos < self.end && !self.at_triple_quote() {
            self.pos += 1;
        }
        if self.pos >= self.end {
            self.ok = false;
            return String::new();
        }
        let value = self.slice(start, self.pos).to_string();
        self.pos += 3;
        value
    }

    /// Parse the next quoted string.
    pub fn parse_string(&mut self) -> String {
        if !self.skip_to(b"\"'") {
            return String::new();
        }
        if self.at_triple_quote() {
            return self.parse_multiline();
        }
        let delimiter = self.byte();
        self.pos += 1;
        let start = self.pos;
        if !self.skip_to(&[delimiter]) {
            return String::new();
        }
        let raw = self.slice(start, self.pos);
        self.pos += 1;
        unescape(raw)
    }

    /// Parse `[ "a", "b", ... ]`.
    pub fn parse_string_list(&mut self) -> Vec<String> {
        let mut list = Vec::new();
        if !self.skip_to(b"[") {
            return list;
        }
        self.pos += 1;
        while self.skip_to(b",]\"'") && self.byte() != b']' {
            if self.byte() == b',' {
                self.pos += 1;
            } else {
                let item = self.parse_string();
                if self.ok {
                    list.push(item);
                }
            }
        }
        if self.ok {
            self.pos += 1;
        }
        list
    }

    /// Parse `{ "key": "value", ... }`.
    pub fn parse_string_map(&mut self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if !self.skip_to(b"{") {
            return map;
        }
        self.pos += 1;
        while self.skip_to(b",}\"'") && self.byte() != b'}' {
            if self.byte() == b',' {
                self.pos += 1;
                continue;
            }
            let key = self.parse_string();
            if !self.skip_to(b":") {
                break;
            }
            self.pos += 1;
            let value = self.parse_string();
            if self.ok {
                map.insert(key, value);
            }
        }
        if self.ok {
            self.pos += 1;
        }
        map
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => match hex4(chars.as_str()) {
                Some(unit) => {
                    chars.nth(3);
                    out.push(decode_unit(unit, &mut chars));
                }
                None => out.push('u'),
            },
            Some(next) => out.push(next),
            None => {}
        }
    }
    out
}

fn hex4(text: &str) -> Option<u32> {
    let digits = text.get(..4)?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Decode one UTF-16 unit, consuming a following `\uXXXX` low surrogate
/// from `rest` when `unit` is a high surrogate.
fn decode_unit(unit: u32, rest: &mut std::str::Chars<'_>) -> char {
    if (0xD800..0xDC00).contains(&unit) {
        let tail = rest.as_str();
        if let Some(low) = tail.strip_prefix("\\u").and_then(hex4)
            && (0xDC00..0xE000).contains(&low)
        {
            rest.nth(5);
            let code = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
            return char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
        }
    }
    char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// Parse a complete string list; `None` if the text is malformed.
pub fn parse_string_list(text: &str) -> Option<Vec<String>> {
    let mut cursor = Cursor::new(text);
    let list = cursor.parse_string_list();
    cursor.ok().then_some(list)
}

/// Parse a complete string map; `None` if the text is malformed.
pub fn parse_string_map(text: &str) -> Option<BTreeMap<String, String>> {
    let mut cursor = Cursor::new(text);
    let map = cursor.parse_string_map();
    cursor.ok().then_some(map)
}

/// Variant tree accepted by [`write`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    StrList(Vec<String>),
    List(Vec<Value>),
    Size(Size),
    Int(i64),
    /// Keys are written in sorted order.
    Map(BTreeMap<String, Value>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Str(if b { "true" } else { "false" }.to_string())
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Serialize a value tree.
///
/// String lists put one item per line and end with a newline; maps separate
/// entries with `,\n`; generic lists separate items with `, ` except after a
/// map, which is followed by `,\n`.
pub fn write(value: &Value) -> String {
    match value {
        Value::Str(s) => quote(s),
        Value::StrList(items) => {
            let body: Vec<String> = items.iter().map(|s| quote(s)).collect();
            format!("[\n{}\n]\n", body.join(",\n"))
        }
        Value::List(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(if matches!(items[i - 1], Value::Map(_)) {
                        ",\n"
                    } else {
                        ", "
                    });
                }
                out.push_str(&write(item));
            }
            out.push(']');
            out
        }
        Value::Size(size) => format!("[{}, {}]", size.width, size.height),
        Value::Int(n) => n.to_string(),
        Value::Map(map) => {
            let body: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quote(k), write(v)))
                .collect();
            format!("{{ {} }}", body.join(",\n"))
        }
    }
}

/// Convenience: a string map written as a [`Value::Map`].
pub fn write_string_map(map: &BTreeMap<String, String>) -> String {
    let tree = map
        .iter()
        .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
        .collect();
    write(&Value::Map(tree))
}
