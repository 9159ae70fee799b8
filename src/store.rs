//! Per-book document store.
//!
//! Each book lives in `<vault>/<subdir>/<sanitized title>.md`. The header
//! records every highlight identifier ever merged into the document, in the
//! order they were first seen, plus a summary entry per highlight:
//!
//! ```text
//! ---
//! title: "The Example Book"
//! author: "Jane Doe"
//! highlight_ids:
//!   - "9c1d…"
//! updated: "2026-01-01T10:00:00+00:00"
//! highlights:
//!   - highlight_id: "9c1d…"
//!     location: "120-122"
//!     text: "This is a highlight from the book."
//!     note: "This is an attached note."
//!     source: "clippings"
//! ---
//! ```
//!
//! Merging is idempotent: highlights whose identifier is already in the
//! header are skipped, and a merge with nothing new does not touch the file.
//! Header keys the store does not own are carried through unchanged, and the
//! body is only ever appended to.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::frontmatter::{self, Header, Value};
use crate::markdown::{render_heading, render_highlight_section, sanitize_filename};
use crate::models::Highlight;

/// Result of a merge: highlights written and identifiers known afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub total: usize,
}

/// What a merge would do, computed without writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePreview {
    pub exists: bool,
    pub new: usize,
    pub existing: usize,
}

/// A book's Markdown document on disk.
#[derive(Debug, Clone)]
pub struct BookDocument {
    path: PathBuf,
    title: String,
    author: Option<String>,
}

impl BookDocument {
    /// Locate the document for a book under `book_dir`.
    pub fn locate(book_dir: &Path, title: &str, author: Option<&str>) -> Self {
        Self {
            path: book_path(book_dir, title),
            title: title.to_string(),
            author: author.map(str::to_string),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read header and body. A missing file reads as empty.
    pub fn read(&self) -> Result<(Header, String)> {
        if !self.path.exists() {
            return Ok((Header::new(), String::new()));
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read document: {}", self.path.display()))?;
        Ok(frontmatter::parse_document(&text))
    }

    /// Count what [`merge`](Self::merge) would add, without writing.
    pub fn preview(&self, highlights: &[Highlight]) -> Result<MergePreview> {
        let (header, _) = self.read()?;
        let known = known_ids(&header);
        let new = new_highlights(&known, highlights).len();
        Ok(MergePreview {
            exists: self.exists(),
            new,
            existing: known.len(),
        })
    }

    /// Merge `highlights` into the document.
    ///
    /// New highlights are appended to the identifier list and the summary
    /// entries, and (unless `heading_template` is empty) rendered as sections
    /// at the end of the body. When nothing is new the file is left alone.
    pub fn merge(&self, highlights: &[Highlight], heading_template: &str) -> Result<MergeOutcome> {
        let (mut header, mut body) = self.read()?;
        let known = known_ids(&header);
        let new = new_highlights(&known, highlights);

        if new.is_empty() {
            tracing::debug!(path = %self.path.display(), "document up to date");
            return Ok(MergeOutcome {
                added: 0,
                total: known.len(),
            });
        }

        let mut ids = known;
        ids.extend(new.iter().map(|h| h.id().to_string()));

        let title = header
            .get_str("title")
            .map(str::to_string)
            .unwrap_or_else(|| self.title.clone());
        let author = header
            .get_str("author")
            .map(str::to_string)
            .or_else(|| self.author.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let mut entries: Vec<Value> = header
            .get("highlights")
            .and_then(Value::as_list)
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        entries.extend(new.iter().map(|h| highlight_entry(h)));

        header.set("title", Value::Str(title.clone()));
        header.set("author", Value::Str(author.clone()));
        header.set(
            "highlight_ids",
            Value::List(ids.iter().cloned().map(Value::Str).collect()),
        );
        header.set(
            "updated",
            Value::Str(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)),
        );
        header.set("highlights", Value::List(entries));

        if !heading_template.is_empty() {
            for highlight in &new {
                let heading = render_heading(
                    heading_template,
                    &title,
                    Some(author.as_str()),
                    highlight.location(),
                );
                append_section(
                    &mut body,
                    &render_highlight_section(&heading, highlight.text(), highlight.note()),
                );
            }
        }

        self.write(&header, &body)?;
        tracing::debug!(
            path = %self.path.display(),
            added = new.len(),
            total = ids.len(),
            "merged highlights"
        );

        Ok(MergeOutcome {
            added: new.len(),
            total: ids.len(),
        })
    }

    /// Write atomically: a temp file in the target directory, then rename.
    fn write(&self, header: &Header, body: &str) -> Result<()> {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        tmp.write_all(frontmatter::format_document(header, body).as_bytes())
            .with_context(|| format!("Failed to write document: {}", self.path.display()))?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to replace document: {}", self.path.display()))?;
        Ok(())
    }
}

/// Path of the document for `title` under `book_dir`.
pub fn book_path(book_dir: &Path, title: &str) -> PathBuf {
    book_dir.join(format!("{}.md", sanitize_filename(title)))
}

/// Identifiers already recorded, first-seen order, duplicates removed.
///
/// Falls back to the summary entries when `highlight_ids` is absent.
pub fn known_ids(header: &Header) -> Vec<String> {
    let mut ids: Vec<String> = header
        .get("highlight_ids")
        .and_then(Value::as_list)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if ids.is_empty() {
        if let Some(entries) = header.get("highlights").and_then(Value::as_list) {
            ids = entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .get("highlight_id")
                        .or_else(|| entry.get("id"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect();
        }
    }

    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
    ids
}

/// Incoming highlights not yet recorded, first occurrence only.
fn new_highlights<'a>(known: &[String], incoming: &'a [Highlight]) -> Vec<&'a Highlight> {
    let mut seen: HashSet<&str> = known.iter().map(String::as_str).collect();
    incoming.iter().filter(|h| seen.insert(h.id())).collect()
}

fn highlight_entry(highlight: &Highlight) -> Value {
    Value::Map(vec![
        ("highlight_id".to_string(), highlight.id().into()),
        ("location".to_string(), highlight.location().into()),
        ("text".to_string(), highlight.text().into()),
        ("note".to_string(), highlight.note().into()),
        ("source".to_string(), highlight.source().as_str().into()),
    ])
}

fn append_section(body: &mut String, section: &str) {
    if !body.is_empty() {
        while !body.ends_with("\n\n") {
            body.push('\n');
        }
    }
    body.push_str(section);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceTag;
    use tempfile::TempDir;

    fn h(text: &str, location: &str) -> Highlight {
        Highlight::new(
            "The Example Book",
            Some("Jane Doe".to_string()),
            Some(location.to_string()),
            text,
            None,
            SourceTag::Csv,
        )
    }

    fn doc(tmp: &TempDir) -> BookDocument {
        BookDocument::locate(
            &tmp.path().join("Kindle Highlights"),
            "The Example Book",
            Some("Jane Doe"),
        )
    }

    fn header_ids(doc: &BookDocument) -> Vec<String> {
        let (header, _) = doc.read().unwrap();
        known_ids(&header)
    }

    #[test]
    fn test_missing_document_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let (header, body) = doc(&tmp).read().unwrap();
        assert!(header.is_empty());
        assert!(body.is_empty());
    }

    #[test]
    fn test_first_merge_creates_document() {
        let tmp = TempDir::new().unwrap();
        let doc = doc(&tmp);
        let batch = vec![h("one", "10"), h("two", "20")];

        let outcome = doc.merge(&batch, "Location {location}").unwrap();
        assert_eq!(outcome, MergeOutcome { added: 2, total: 2 });
        assert_eq!(
            doc.path(),
            tmp.path()
                .join("Kindle Highlights")
                .join("The Example Book.md")
        );

        let (header, body) = doc.read().unwrap();
        assert_eq!(header.get_str("title"), Some("The Example Book"));
        assert_eq!(header.get_str("author"), Some("Jane Doe"));
        assert!(header.get_str("updated").is_some());
        assert_eq!(
            known_ids(&header),
            vec![batch[0].id().to_string(), batch[1].id().to_string()]
        );
        let entries = header.get("highlights").and_then(Value::as_list).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].get("text"), Some(&Value::Str("two".to_string())));
        assert_eq!(entries[1].get("note"), Some(&Value::Null));
        assert_eq!(entries[1].get("source"), Some(&Value::Str("csv".to_string())));
        assert!(body.contains("## Location 10\n\n> one\n"));
        assert!(body.contains("## Location 20\n\n> two\n"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let doc = doc(&tmp);
        let batch = vec![h("one", "10"), h("two", "20")];

        doc.merge(&batch, "Location {location}").unwrap();
        let before = std::fs::read_to_string(doc.path()).unwrap();

        let outcome = doc.merge(&batch, "Location {location}").unwrap();
        assert_eq!(outcome, MergeOutcome { added: 0, total: 2 });
        assert_eq!(std::fs::read_to_string(doc.path()).unwrap(), before);
    }

    #[test]
    fn test_merge_preserves_first_seen_order() {
        let tmp = TempDir::new().unwrap();
        let doc = doc(&tmp);
        let (a1, a2, b1) = (h("a1", "1"), h("a2", "2"), h("b1", "3"));

        doc.merge(&[a1.clone(), a2.clone()], "").unwrap();
        let outcome = doc.merge(&[a2.clone(), b1.clone(), a1.clone()], "").unwrap();

        assert_eq!(outcome, MergeOutcome { added: 1, total: 3 });
        assert_eq!(
            header_ids(&doc),
            vec![a1.id().to_string(), a2.id().to_string(), b1.id().to_string()]
        );
    }

    #[test]
    fn test_duplicates_within_batch_count_once() {
        let tmp = TempDir::new().unwrap();
        let doc = doc(&tmp);
        let one = h("one", "10");

        let outcome = doc.merge(&[one.clone(), one.clone()], "").unwrap();
        assert_eq!(outcome, MergeOutcome { added: 1, total: 1 });
    }

    #[test]
    fn test_existing_title_author_and_extra_keys_win() {
        let tmp = TempDir::new().unwrap();
        let doc = doc(&tmp);
        std::fs::create_dir_all(doc.path().parent().unwrap()).unwrap();
        std::fs::write(
            doc.path(),
            "---\ntitle: \"Edited Title\"\ntags:\n  - \"reading\"\n---\nMy own notes.\n",
        )
        .unwrap();

        doc.merge(&[h("one", "10")], "Location {location}").unwrap();

        let (header, body) = doc.read().unwrap();
        assert_eq!(header.get_str("title"), Some("Edited Title"));
        assert_eq!(header.get_str("author"), Some("Jane Doe"));
        assert_eq!(
            header.get("tags"),
            Some(&Value::List(vec![Value::Str("reading".to_string())]))
        );
        assert!(body.starts_with("My own notes.\n\n## Location 10"));
    }

    #[test]
    fn test_unowned_plain_scalars_survive_merge_unquoted() {
        let tmp = TempDir::new().unwrap();
        let doc = doc(&tmp);
        std::fs::create_dir_all(doc.path().parent().unwrap()).unwrap();
        std::fs::write(doc.path(), "---\ndraft: true\nrating: 4\n---\n").unwrap();

        doc.merge(&[h("one", "10")], "").unwrap();

        let text = std::fs::read_to_string(doc.path()).unwrap();
        assert!(text.starts_with("---\ndraft: true\nrating: 4\ntitle: "));
    }

    #[test]
    fn test_unknown_author_default() {
        let tmp = TempDir::new().unwrap();
        let doc = BookDocument::locate(tmp.path(), "Anonymous", None);
        let highlight = Highlight::new("Anonymous", None, None, "text", None, SourceTag::Cloud);

        doc.merge(&[highlight], "").unwrap();
        let (header, body) = doc.read().unwrap();
        assert_eq!(header.get_str("author"), Some("Unknown"));
        assert!(body.is_empty());
    }

    #[test]
    fn test_legacy_entries_supply_known_ids() {
        let tmp = TempDir::new().unwrap();
        let doc = doc(&tmp);
        let one = h("one", "10");
        std::fs::create_dir_all(doc.path().parent().unwrap()).unwrap();
        std::fs::write(
            doc.path(),
            format!(
                "---\ntitle: \"The Example Book\"\nhighlights: [{{\"highlight_id\": \"{}\", \"text\": \"one\"}}]\n---\n",
                one.id()
            ),
        )
        .unwrap();

        let outcome = doc.merge(&[one, h("two", "20")], "").unwrap();
        assert_eq!(outcome, MergeOutcome { added: 1, total: 2 });
        let (header, _) = doc.read().unwrap();
        assert_eq!(header.get("highlights").and_then(Value::as_list).unwrap().len(), 2);
    }

    #[test]
    fn test_preview_does_not_write() {
        let tmp = TempDir::new().unwrap();
        let doc = doc(&tmp);
        let preview = doc.preview(&[h("one", "10")]).unwrap();
        assert_eq!(
            preview,
            MergePreview {
                exists: false,
                new: 1,
                existing: 0
            }
        );
        assert!(!tmp.path().join("Kindle Highlights").exists());
    }
}
