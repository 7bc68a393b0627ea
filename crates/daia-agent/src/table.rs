//! Markdown table extraction and the placeholder scheme that round-trips it.
//!
//! Tables in a model reply are cut out and replaced by a short quoted
//! placeholder. The table text travels as a `.md` attachment on the reply, so
//! when that reply shows up in a later history window the placeholder can be
//! swapped back for the exact original table.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::{Captures, Regex};

pub const ARTIFACT_PREFIX: &str = "daia_replaced_table_";

fn table_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Rows end at a newline; a blank line ends the table.
        Regex::new(r"\|[^\n]*\|[ \t]*\n\|[- \t|:]*\|[ \t]*\n(?:\|[^\n]*\|[ \t]*\n?)*")
            .expect("table pattern is a valid regex")
    })
}

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"> `\[daia_replaced_table_(\d+)_(\d+)_as_image\]`")
            .expect("placeholder pattern is a valid regex")
    })
}

/// Ties an extracted table to the message it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceholderKey {
    pub message_id: u64,
    /// 1-based position among the valid tables of that message.
    pub ordinal: usize,
}

impl PlaceholderKey {
    pub fn new(message_id: u64, ordinal: usize) -> Self {
        Self {
            message_id,
            ordinal,
        }
    }

    /// The quoted line that stands in for the table in the sent text.
    pub fn placeholder(&self) -> String {
        format!(
            "> `[{ARTIFACT_PREFIX}{}_{}_as_image]`",
            self.message_id, self.ordinal
        )
    }

    /// Filename of the `.md` attachment carrying the table text.
    pub fn attachment_name(&self) -> String {
        format!("{ARTIFACT_PREFIX}{}_{}.md", self.message_id, self.ordinal)
    }

    /// Inverse of [`attachment_name`](Self::attachment_name).
    pub fn from_attachment_name(name: &str) -> Option<Self> {
        let stem = name.strip_prefix(ARTIFACT_PREFIX)?.strip_suffix(".md")?;
        let (message_id, ordinal) = stem.split_once('_')?;
        Some(Self {
            message_id: message_id.parse().ok()?,
            ordinal: ordinal.parse().ok()?,
        })
    }
}

impl fmt::Display for PlaceholderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.message_id, self.ordinal)
    }
}

/// Headers and rows of one parsed table, the renderer's input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    pub fn is_valid(&self) -> bool {
        !self.headers.is_empty() && !self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTable {
    pub data: TableData,
    /// The table exactly as it appeared, minus surrounding whitespace.
    pub raw_text: String,
    pub key: PlaceholderKey,
}

/// Result of [`extract_tables`]: placeholder text plus the tables removed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableExtraction {
    pub text: String,
    pub tables: Vec<ExtractedTable>,
}

impl TableExtraction {
    pub fn has_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    /// Placeholder key → original table text, the shape
    /// [`substitute_placeholders`] expects.
    pub fn resolver_map(&self) -> HashMap<String, String> {
        self.tables
            .iter()
            .map(|t| (t.key.to_string(), t.raw_text.clone()))
            .collect()
    }
}

/// Parse one markdown table. Ragged rows are padded or truncated to the
/// header count; never fails.
pub fn parse_table(raw: &str) -> TableData {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 3 {
        return TableData::default();
    }

    let headers = cells(lines[0]);
    let rows = lines[2..]
        .iter()
        .filter(|l| l.starts_with('|') && l.ends_with('|'))
        .map(|l| {
            let mut row = cells(l);
            row.resize(headers.len(), String::new());
            row
        })
        .collect();

    TableData { headers, rows }
}

fn cells(line: &str) -> Vec<String> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 2 {
        return Vec::new();
    }
    parts[1..parts.len() - 1]
        .iter()
        .map(|c| c.trim().to_string())
        .collect()
}

/// Find every valid table in `text`, number them from 1 and replace each
/// with its placeholder. Invalid candidates are left in place untouched.
pub fn extract_tables(text: &str, message_id: u64) -> TableExtraction {
    let mut out = String::with_capacity(text.len());
    let mut tables = Vec::new();
    let mut cursor = 0;

    for m in table_pattern().find_iter(text) {
        let candidate = m.as_str();
        let trimmed = candidate.trim();
        let data = parse_table(trimmed);
        if !data.is_valid() {
            continue;
        }

        let start = m.start() + (candidate.len() - candidate.trim_start().len());
        let end = start + trimmed.len();
        let key = PlaceholderKey::new(message_id, tables.len() + 1);

        out.push_str(&text[cursor..start]);
        out.push_str(&key.placeholder());
        cursor = end;

        tables.push(ExtractedTable {
            data,
            raw_text: trimmed.to_string(),
            key,
        });
    }
    out.push_str(&text[cursor..]);

    TableExtraction { text: out, tables }
}

/// Replace placeholders whose key is in `resolved` with the stored table
/// text. Unknown keys stay as they are.
pub fn substitute_placeholders(text: &str, resolved: &HashMap<String, String>) -> String {
    if resolved.is_empty() {
        return text.to_string();
    }
    placeholder_pattern()
        .replace_all(text, |caps: &Captures| {
            let key = format!("{}_{}", &caps[1], &caps[2]);
            match resolved.get(&key) {
                Some(table) => table.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
