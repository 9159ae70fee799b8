//! CSV export connector.
//!
//! Kindle CSV exports have gone through several header spellings
//! (`title` / `Book Title` / `book_title`, `Highlight` / `annotation`, ...).
//! Headers are normalised (lower case, spaces and hyphens to underscores)
//! before matching against the aliases below. Rows above the first row that
//! names a highlight-text column are treated as preamble and ignored.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::models::{Highlight, SourceTag};
use crate::traits::{Connector, SourceStatus};

const TITLE_ALIASES: &[&str] = &["title", "book_title", "book"];
const AUTHOR_ALIASES: &[&str] = &["author", "authors", "by"];
const LOCATION_ALIASES: &[&str] = &["location", "annotation_location", "loc"];
const TEXT_ALIASES: &[&str] = &["highlight", "annotation", "highlight_text", "text"];
const NOTE_ALIASES: &[&str] = &["note", "notes", "annotation_note"];

pub struct CsvConnector {
    path: PathBuf,
}

impl CsvConnector {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Connector for CsvConnector {
    fn name(&self) -> &str {
        "csv"
    }

    fn description(&self) -> &str {
        "Kindle CSV highlight export"
    }

    fn status(&self) -> SourceStatus {
        if self.path.exists() {
            SourceStatus::Ready
        } else {
            SourceStatus::Missing(self.path.clone())
        }
    }

    fn scan(&self) -> Result<Vec<Highlight>> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read CSV export: {}", self.path.display()))?;
        Ok(parse_csv(&text))
    }
}

/// Column positions resolved from a header row.
#[derive(Debug, Default)]
struct Columns {
    title: Option<usize>,
    author: Option<usize>,
    location: Option<usize>,
    text: Option<usize>,
    note: Option<usize>,
}

impl Columns {
    /// Resolve aliases against a candidate header row. Returns `None` unless
    /// the row names a highlight-text column.
    fn resolve(row: &csv::StringRecord) -> Option<Self> {
        let headers: Vec<String> = row.iter().map(normalize_header).collect();
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| headers.iter().position(|h| h == alias))
        };

        let columns = Columns {
            title: find(TITLE_ALIASES),
            author: find(AUTHOR_ALIASES),
            location: find(LOCATION_ALIASES),
            text: find(TEXT_ALIASES),
            note: find(NOTE_ALIASES),
        };
        columns.text.map(|_| columns)
    }
}

fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Parse CSV text into highlight records, one per row with text or a note.
/// Rows the reader cannot decode are skipped.
pub fn parse_csv(text: &str) -> Vec<Highlight> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut columns: Option<Columns> = None;
    let mut highlights = Vec::new();

    for record in reader.records() {
        let Ok(record) = record else {
            continue;
        };

        if columns.is_none() {
            columns = Columns::resolve(&record);
            continue;
        }
        let Some(cols) = &columns else {
            continue;
        };

        let field = |index: Option<usize>| -> Option<String> {
            index
                .and_then(|i| record.get(i))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let text = field(cols.text).unwrap_or_default();
        let note = field(cols.note);
        if text.is_empty() && note.is_none() {
            continue;
        }

        highlights.push(Highlight::new(
            field(cols.title).unwrap_or_else(|| "Unknown".to_string()),
            field(cols.author),
            field(cols.location),
            text,
            note,
            SourceTag::Csv,
        ));
    }

    highlights
}
