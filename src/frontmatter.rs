//! Front-matter header reader and writer.
//!
//! Book documents start with a `---` delimited header holding an
//! indentation-structured block of keys, lists and nested maps:
//!
//! ```text
//! ---
//! title: "Dune"
//! highlight_ids:
//!   - "5f1c…"
//! highlights:
//!   - highlight_id: "5f1c…"
//!     location: "120-122"
//!     note: null
//! ---
//! ```
//!
//! Only the subset the store needs is supported: string scalars, `null`,
//! block lists and block maps. Strings are always written double-quoted with
//! JSON escaping, so any text (newlines, colons, quotes) survives a round
//! trip byte-for-byte. Unquoted scalars (`true`, `3`) are kept as read and
//! written back unquoted. The reader is lenient: unquoted plain scalars,
//! single-quoted scalars, inline JSON flow values (`[..]`, `{..}`) and
//! list items at the same indent as their key are accepted, and lines it
//! cannot place are skipped.

use std::fmt::Write as _;

const DELIMITER: &str = "---";
const INDENT: usize = 2;

/// A header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Str(String),
    /// Unquoted scalar as read (`true`, `3`, bare words); written back as-is.
    Plain(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Plain(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
            other => Value::Plain(other.to_string()),
        }
    }
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

impl From<Option<&str>> for Value {
    fn from(s: Option<&str>) -> Self {
        s.map_or(Value::Null, Value::from)
    }
}

/// Ordered top-level header entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    entries: Vec<(String, Value)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Non-empty string value for `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Replace the value in place, or append a new entry.
    pub fn set(&mut self, key: &str, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============ Reading ============

/// Split a document into its header and body.
///
/// Text without a complete header (opening `---` line and a closing line
/// that is exactly `---`) is returned whole as the body.
pub fn parse_document(text: &str) -> (Header, String) {
    let content = text.strip_prefix('\u{feff}').unwrap_or(text);
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (Header::default(), text.to_string());
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == DELIMITER {
            let header = parse_header(&rest[..offset]);
            let body = rest[offset + line.len()..].to_string();
            return (header, body);
        }
        offset += line.len();
    }
    (Header::default(), text.to_string())
}

/// Parse the text between the delimiters.
pub fn parse_header(text: &str) -> Header {
    let lines = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(Line::new)
        .collect();
    let mut parser = Parser { lines, pos: 0 };
    let mut header = Header::new();
    loop {
        for (key, value) in parser.parse_map(0) {
            header.set(&key, value);
        }
        // parse_map(0) only stops early at a stray top-level list item.
        if parser.pos >= parser.lines.len() {
            break;
        }
        parser.pos += 1;
    }
    header
}

#[derive(Debug)]
struct Line {
    indent: usize,
    content: String,
}

impl Line {
    fn new(raw: &str) -> Self {
        let raw = raw.trim_end();
        let content = raw.trim_start_matches(' ');
        Self {
            indent: raw.len() - content.len(),
            content: content.to_string(),
        }
    }

    fn is_list_item(&self) -> bool {
        self.content == "-" || self.content.starts_with("- ")
    }
}

struct Parser {
    lines: Vec<Line>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Line> {
        self.lines.get(self.pos)
    }

    fn parse_map(&mut self, indent: usize) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = Vec::new();

        while let Some(line) = self.peek() {
            if line.indent < indent || (line.indent == indent && line.is_list_item()) {
                break;
            }
            if line.indent > indent {
                self.pos += 1;
                continue;
            }
            let parsed = split_key(&line.content).map(|(k, v)| (k.to_string(), v.to_string()));
            self.pos += 1;
            let Some((key, value)) = parsed else {
                continue;
            };

            let value = if value.is_empty() {
                self.parse_nested(indent, true)
            } else {
                parse_scalar(&value)
            };
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(existing) => existing.1 = value,
                None => entries.push((key, value)),
            }
        }
        entries
    }

    /// Value for a key or list item whose inline part was empty.
    fn parse_nested(&mut self, parent_indent: usize, allow_same_indent_list: bool) -> Value {
        let Some(line) = self.peek() else {
            return Value::Null;
        };
        let (indent, is_list) = (line.indent, line.is_list_item());
        if indent > parent_indent {
            if is_list {
                Value::List(self.parse_list(indent))
            } else {
                Value::Map(self.parse_map(indent))
            }
        } else if indent == parent_indent && is_list && allow_same_indent_list {
            Value::List(self.parse_list(indent))
        } else {
            Value::Null
        }
    }

    fn parse_list(&mut self, indent: usize) -> Vec<Value> {
        let mut items = Vec::new();

        while let Some(line) = self.peek() {
            if line.indent < indent || (line.indent == indent && !line.is_list_item()) {
                break;
            }
            if line.indent > indent {
                self.pos += 1;
                continue;
            }

            let rest = line.content[1..].trim_start().to_string();
            let consumed = line.content.len() - rest.len();
            if rest.is_empty() {
                self.pos += 1;
                items.push(self.parse_nested(indent, false));
            } else if split_key(&rest).is_some() {
                // Reinterpret "- key: value" as the first line of a map that
                // starts at the column after the dash.
                let item_indent = indent + consumed;
                self.lines[self.pos] = Line {
                    indent: item_indent,
                    content: rest,
                };
                items.push(Value::Map(self.parse_map(item_indent)));
            } else {
                self.pos += 1;
                items.push(parse_scalar(&rest));
            }
        }
        items
    }
}

/// Split `key: value` / `key:`. Quoted or flow content is never a key line.
fn split_key(content: &str) -> Option<(&str, &str)> {
    if content.starts_with(['"', '\'', '[', '{', '-']) {
        return None;
    }
    let (key, value) = match content.find(": ") {
        Some(index) => (&content[..index], &content[index + 2..]),
        None => (content.strip_suffix(':')?, ""),
    };
    let key = key.trim();
    if key.is_empty() || key.contains(':') {
        return None;
    }
    Some((key, value.trim()))
}

fn parse_scalar(raw: &str) -> Value {
    let raw = raw.trim();
    match raw {
        "" | "null" | "~" => return Value::Null,
        "[]" => return Value::List(Vec::new()),
        "{}" => return Value::Map(Vec::new()),
        _ => {}
    }

    if raw.starts_with('"') {
        if let Ok(s) = serde_json::from_str::<String>(raw) {
            return Value::Str(s);
        }
        let inner = raw.trim_matches('"');
        return Value::Str(inner.replace("\\\"", "\""));
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Value::Str(raw[1..raw.len() - 1].replace("''", "'"));
    }
    if raw.starts_with(['[', '{']) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
            return Value::from_json(value);
        }
    }
    Value::Plain(raw.to_string())
}

// ============ Writing ============

/// Render a header and body as a complete document.
pub fn format_document(header: &Header, body: &str) -> String {
    let mut out = String::from("---\n");
    write_entries(&mut out, &header.entries, 0);
    out.push_str("---\n");
    out.push_str(body);
    out
}

fn write_entries(out: &mut String, entries: &[(String, Value)], indent: usize) {
    let pad = " ".repeat(indent);
    for (key, value) in entries {
        match value {
            Value::List(items) if !items.is_empty() => {
                let _ = writeln!(out, "{}{}:", pad, key);
                write_list(out, items, indent + INDENT);
            }
            Value::Map(map) if !map.is_empty() => {
                let _ = writeln!(out, "{}{}:", pad, key);
                write_entries(out, map, indent + INDENT);
            }
            _ => {
                let _ = writeln!(out, "{}{}: {}", pad, key, inline(value));
            }
        }
    }
}

fn write_list(out: &mut String, items: &[Value], indent: usize) {
    let pad = " ".repeat(indent);
    for item in items {
        match item {
            Value::Map(map) if !map.is_empty() => {
                let mut nested = String::new();
                write_entries(&mut nested, map, indent + INDENT);
                let first_pad = " ".repeat(indent + INDENT);
                let _ = write!(out, "{}- ", pad);
                out.push_str(nested.strip_prefix(first_pad.as_str()).unwrap_or(&nested));
            }
            Value::List(inner) if !inner.is_empty() => {
                let _ = writeln!(out, "{}-", pad);
                write_list(out, inner, indent + INDENT);
            }
            _ => {
                let _ = writeln!(out, "{}- {}", pad, inline(item));
            }
        }
    }
}

fn inline(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Str(s) => serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s)),
        Value::Plain(s) => s.clone(),
        Value::List(_) => "[]".to_string(),
        Value::Map(_) => "{}".to_string(),
    }
}
