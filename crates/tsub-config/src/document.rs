//! Line-level tokenizer and document tree for the TRExFitter config dialect.
//!
//! The dialect is a flat sequence of `Key: value` lines. A value may be wrapped
//! in double quotes; `#` and `%` start a comment anywhere outside quotes. Block
//! structure (`Region:`, `Systematic:`, ...) is implied by key order only, so the
//! document keeps lines in order and leaves block interpretation to the scanner.
//!
//! Every line keeps its original bytes (including the line terminator), which
//! lets integrated-mode rewriting change one value and reproduce every other
//! byte of the file unchanged.

use std::ops::Range;
use std::path::{Path, PathBuf};

use tsub_core::{Error, Result};

/// A `Key: value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    /// Value text as written (comment removed, whitespace trimmed, quotes kept).
    pub raw_value: String,
    /// Value with one pair of surrounding double quotes removed.
    pub value: String,
    /// Whether the whole value was a single double-quoted string.
    pub quoted: bool,
    /// Byte range of `value` inside the line text (inside the quotes when quoted).
    pub value_span: Range<usize>,
}

impl Entry {
    /// `;`-separated tokens of the raw value with surrounding quotes stripped.
    ///
    /// Used for multi-name declarations such as `Systematic: "a"; "b"`.
    pub fn tokens(&self) -> Vec<String> {
        self.raw_value
            .split(';')
            .map(|t| strip_quotes(t.trim()))
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn key_is(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Comment,
    Entry(Entry),
    /// Non-empty content that is not a `Key: value` pair.
    Other,
}

#[derive(Debug, Clone)]
pub struct Line {
    /// 1-based line number.
    pub number: usize,
    text: String,
    ending: String,
    kind: LineKind,
}

impl Line {
    fn new(number: usize, physical: &str) -> Self {
        let (text, ending) = if let Some(t) = physical.strip_suffix("\r\n") {
            (t, "\r\n")
        } else if let Some(t) = physical.strip_suffix('\n') {
            (t, "\n")
        } else {
            (physical, "")
        };
        Self { number, text: text.to_string(), ending: ending.to_string(), kind: tokenize(text) }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &LineKind {
        &self.kind
    }

    pub fn entry(&self) -> Option<&Entry> {
        match &self.kind {
            LineKind::Entry(e) => Some(e),
            _ => None,
        }
    }

    /// Replace the value of an entry line, keeping key, spacing and comment intact.
    ///
    /// With `force_quotes`, an unquoted value is written back wrapped in double
    /// quotes; an already quoted value keeps its quotes either way.
    pub fn set_value(&mut self, new_value: &str, force_quotes: bool) -> bool {
        let LineKind::Entry(entry) = &self.kind else {
            return false;
        };
        let replacement = if force_quotes && !entry.quoted {
            format!("\"{new_value}\"")
        } else {
            new_value.to_string()
        };
        self.text.replace_range(entry.value_span.clone(), &replacement);
        self.kind = tokenize(&self.text);
        true
    }
}

/// Parsed config file.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    path: PathBuf,
    lines: Vec<Line>,
}

impl ConfigDocument {
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Self {
        let lines =
            text.split_inclusive('\n').enumerate().map(|(i, l)| Line::new(i + 1, l)).collect();
        Self { path: path.into(), lines }
    }

    /// Read and tokenize a config from disk.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingFile { what: "config file", path: path.to_path_buf() });
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(path, &text))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut [Line] {
        &mut self.lines
    }

    /// All entries in file order, paired with their line numbers.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &Entry)> {
        self.lines.iter().filter_map(|l| l.entry().map(|e| (l.number, e)))
    }

    /// First entry with the given key (case-insensitive).
    pub fn first(&self, key: &str) -> Option<(usize, &Entry)> {
        self.entries().find(|(_, e)| e.key_is(key))
    }

    /// Directory relative references in this config resolve against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Resolve a path-valued reference relative to this config's directory.
    pub fn resolve(&self, value: &str) -> PathBuf {
        let p = Path::new(value);
        if p.is_absolute() { p.to_path_buf() } else { self.base_dir().join(p) }
    }

    /// Reassemble the file text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for l in &self.lines {
            out.push_str(&l.text);
            out.push_str(&l.ending);
        }
        out
    }
}

/// Byte offset where a comment starts, ignoring markers inside double quotes.
fn comment_start(line: &str) -> Option<usize> {
    let mut in_double = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_double = !in_double,
            '#' | '%' if !in_double => return Some(i),
            _ => {}
        }
    }
    None
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') { &s[1..s.len() - 1] } else { s }
}

fn tokenize(text: &str) -> LineKind {
    let content = match comment_start(text) {
        Some(idx) => &text[..idx],
        None => text,
    };
    if content.trim().is_empty() {
        return if text.trim().is_empty() { LineKind::Blank } else { LineKind::Comment };
    }

    let key_start = content.len() - content.trim_start().len();
    let rest = &content[key_start..];
    let key_len = rest.find(|c: char| !is_key_char(c)).unwrap_or(rest.len());
    if key_len == 0 {
        return LineKind::Other;
    }
    let after_key = &rest[key_len..];
    let gap = after_key.len() - after_key.trim_start().len();
    if !after_key[gap..].starts_with(':') {
        return LineKind::Other;
    }
    let colon_end = key_start + key_len + gap + 1;

    let raw = &content[colon_end..];
    let end = colon_end + raw.trim_end().len();
    let start = (colon_end + raw.len() - raw.trim_start().len()).min(end);
    let raw_value = &content[start..end];

    let quoted = raw_value.len() >= 2
        && raw_value.starts_with('"')
        && raw_value.ends_with('"')
        && !raw_value[1..raw_value.len() - 1].contains('"');
    let (value, value_span) = if quoted {
        (raw_value[1..raw_value.len() - 1].to_string(), start + 1..end - 1)
    } else {
        (raw_value.to_string(), start..end)
    };

    LineKind::Entry(Entry {
        key: rest[..key_len].to_string(),
        raw_value: raw_value.to_string(),
        value,
        quoted,
        value_span,
    })
}
