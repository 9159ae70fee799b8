//! Legacy `My Clippings.txt` connector.
//!
//! The device appends every highlight, note and bookmark to one text file,
//! separating entries with a line of ten `=` signs:
//!
//! ```text
//! The Example Book (Jane Doe)
//! - Your Highlight on Location 120-122 | Added on Friday, 1 January 2021 10:00:00
//!
//! This is a highlight from the book.
//! ==========
//! The Example Book (Jane Doe)
//! - Your Note on Location 120 | Added on Friday, 1 January 2021 10:00:00
//!
//! This is an attached note.
//! ==========
//! ```
//!
//! Notes are stored as separate entries. A note is attached to the most
//! recent highlight with the same title, author and leading location number;
//! a note with no such highlight becomes a record of its own with empty text.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::models::{Highlight, SourceTag};
use crate::traits::{Connector, SourceStatus};

const SEPARATOR: &str = "==========";

static HEADER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<title>.+?)(?:\s*\((?P<author>[^)]*)\))?$").expect("valid header pattern")
});

static META_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^-\s*(?:your\s+)?(?P<kind>highlight|note)\s+(?:on|at)\s+(?:(?:location|page|loc\.)\s+(?P<location>[\d\-]+))?",
    )
    .expect("valid metadata pattern")
});

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)").expect("valid number pattern"));

pub struct ClippingsConnector {
    path: PathBuf,
}

impl ClippingsConnector {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Connector for ClippingsConnector {
    fn name(&self) -> &str {
        "clippings"
    }

    fn description(&self) -> &str {
        "Legacy My Clippings.txt export"
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
            .with_context(|| format!("Failed to read clippings file: {}", self.path.display()))?;
        Ok(parse_clippings(&text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Highlight,
    Note,
}

/// Entry being assembled before the record is frozen.
struct PendingEntry {
    title: String,
    author: Option<String>,
    location: Option<String>,
    text: String,
    note: Option<String>,
}

/// (title, author, leading location number) used to pair notes with highlights.
type GroupingKey = (String, Option<String>, Option<String>);

/// Parse a whole clippings export into highlight records, in file order.
pub fn parse_clippings(text: &str) -> Vec<Highlight> {
    let mut entries: Vec<PendingEntry> = Vec::new();
    // Index into `entries` of the latest highlight still waiting for a note.
    let mut open_highlights: HashMap<GroupingKey, usize> = HashMap::new();

    for segment in text.split(SEPARATOR) {
        let lines: Vec<&str> = segment
            .lines()
            .map(|line| line.trim_matches(|c: char| c == '\u{feff}' || c.is_whitespace()))
            .filter(|line| !line.is_empty())
            .collect();
        if lines.len() < 2 {
            continue;
        }

        let Some((title, author)) = parse_header(lines[0]) else {
            continue;
        };
        let Some((kind, location)) = parse_meta(lines[1]) else {
            continue;
        };
        let body = lines[2..].join("\n").trim().to_string();
        let key = (title.clone(), author.clone(), location_key(location.as_deref()));

        match kind {
            EntryKind::Note => {
                if body.is_empty() {
                    continue;
                }
                match open_highlights.remove(&key) {
                    Some(index) => entries[index].note = Some(body),
                    None => entries.push(PendingEntry {
                        title,
                        author,
                        location,
                        text: String::new(),
                        note: Some(body),
                    }),
                }
            }
            EntryKind::Highlight => {
                entries.push(PendingEntry {
                    title,
                    author,
                    location,
                    text: body,
                    note: None,
                });
                open_highlights.insert(key, entries.len() - 1);
            }
        }
    }

    entries
        .into_iter()
        .filter(|e| !e.text.is_empty() || e.note.is_some())
        .map(|e| {
            Highlight::new(
                e.title,
                e.author,
                e.location,
                e.text,
                e.note,
                SourceTag::Clippings,
            )
        })
        .collect()
}

fn parse_header(line: &str) -> Option<(String, Option<String>)> {
    let caps = HEADER_PATTERN.captures(line)?;
    let title = caps.name("title")?.as_str().trim();
    let title = if title.is_empty() { "Unknown" } else { title };
    let author = caps
        .name("author")
        .map(|m| m.as_str().trim().to_string())
        .filter(|a| !a.is_empty());
    Some((title.to_string(), author))
}

fn parse_meta(line: &str) -> Option<(EntryKind, Option<String>)> {
    let caps = META_PATTERN.captures(line)?;
    let kind = if caps["kind"].eq_ignore_ascii_case("note") {
        EntryKind::Note
    } else {
        EntryKind::Highlight
    };
    let location = caps.name("location").map(|m| m.as_str().to_string());
    Some((kind, location))
}

/// Leading number of a location ("120-122" → "120"), the raw value when it
/// has none, or `None` when absent.
fn location_key(location: Option<&str>) -> Option<String> {
    let location = location?;
    match LEADING_NUMBER.captures(location) {
        Some(caps) => Some(caps[1].to_string()),
        None => Some(location.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "The Example Book (Jane Doe)
- Your Highlight on Location 120-122 | Added on Friday, 1 January 2021 10:00:00

This is a highlight from the book.
==========
The Example Book (Jane Doe)
- Your Note on Location 120 | Added on Friday, 1 January 2021 10:00:00

This is an attached note.
==========
";

    #[test]
    fn test_note_attaches_to_highlight() {
        let highlights = parse_clippings(SAMPLE);
        assert_eq!(highlights.len(), 1);
        let h = &highlights[0];
        assert_eq!(h.book_title(), "The Example Book");
        assert_eq!(h.author(), Some("Jane Doe"));
        assert_eq!(h.text(), "This is a highlight from the book.");
        assert_eq!(h.note(), Some("This is an attached note."));
        assert_eq!(h.location(), Some("120-122"));
        assert_eq!(h.source(), SourceTag::Clippings);
    }

    #[test]
    fn test_metadata_without_your_token() {
        let sample = "Another Book (Author Name)
- Highlight on Page 5 | Added on Friday, 1 January 2021 11:00:00
Highlight text without your token.
==========
";
        let highlights = parse_clippings(sample);
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].text(), "Highlight text without your token.");
        assert_eq!(highlights[0].location(), Some("5"));
    }

    #[test]
    fn test_orphan_note_becomes_standalone_record() {
        let sample = "Lonely Book (Someone)
- Your Note on Location 77 | Added on Monday
Thought with no highlight.
==========
";
        let highlights = parse_clippings(sample);
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].text(), "");
        assert_eq!(highlights[0].note(), Some("Thought with no highlight."));
        assert_eq!(highlights[0].location(), Some("77"));
    }

    #[test]
    fn test_second_note_does_not_overwrite_first() {
        let sample = "Book (A)
- Your Highlight on Location 10-11 | Added on Monday
Words.
==========
Book (A)
- Your Note on Location 10 | Added on Monday
First note.
==========
Book (A)
- Your Note on Location 10 | Added on Monday
Second note.
==========
";
        let highlights = parse_clippings(sample);
        assert_eq!(highlights.len(), 2);
        assert_eq!(highlights[0].note(), Some("First note."));
        assert_eq!(highlights[1].text(), "");
        assert_eq!(highlights[1].note(), Some("Second note."));
    }

    #[test]
    fn test_note_only_matches_same_book() {
        let sample = "Book One (A)
- Your Highlight on Location 5 | Added on Monday
One.
==========
Book Two (A)
- Your Note on Location 5 | Added on Monday
Note for two.
==========
";
        let highlights = parse_clippings(sample);
        assert_eq!(highlights.len(), 2);
        assert_eq!(highlights[0].note(), None);
        assert_eq!(highlights[1].book_title(), "Book Two");
    }

    #[test]
    fn test_header_without_author() {
        let sample = "Just A Title
- Your Highlight on Location 3 | Added on Monday
Text.
==========
";
        let highlights = parse_clippings(sample);
        assert_eq!(highlights[0].book_title(), "Just A Title");
        assert_eq!(highlights[0].author(), None);
    }

    #[test]
    fn test_nested_parentheses_take_last_group_as_author() {
        let (title, author) = parse_header("Dune (Dune Chronicles, Book 1) (Frank Herbert)").unwrap();
        assert_eq!(title, "Dune (Dune Chronicles, Book 1)");
        assert_eq!(author.as_deref(), Some("Frank Herbert"));
    }

    #[test]
    fn test_unmatched_metadata_skips_segment() {
        let sample = "Book (A)
- Your Bookmark on Location 9 | Added on Monday
==========
Book (A)
garbage metadata line
Body that should not surface.
==========
Book (A)
- Your Highlight on Location 12 | Added on Monday
Kept.
==========
";
        let highlights = parse_clippings(sample);
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].text(), "Kept.");
    }

    #[test]
    fn test_empty_highlight_is_discarded() {
        let sample = "Book (A)
- Your Highlight on Location 12 | Added on Monday
==========
";
        assert!(parse_clippings(sample).is_empty());
    }

    #[test]
    fn test_multiline_body_and_bom() {
        let sample = "\u{feff}Book (A)\r
- Your Highlight on Location 40-42 | Added on Monday\r
\r
First line.\r
Second line.\r
==========\r
";
        let highlights = parse_clippings(sample);
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].book_title(), "Book");
        assert_eq!(highlights[0].text(), "First line.\nSecond line.");
    }

    #[test]
    fn test_lowercase_locale_variant() {
        let sample = "Book (A)
- Your highlight at location 88-90 | Added on Monday
Variant.
==========
";
        let highlights = parse_clippings(sample);
        assert_eq!(highlights[0].location(), Some("88-90"));
    }

    #[test]
    fn test_location_key() {
        assert_eq!(location_key(Some("120-122")).as_deref(), Some("120"));
        assert_eq!(location_key(Some("-5")).as_deref(), Some("-5"));
        assert_eq!(location_key(None), None);
    }
}
