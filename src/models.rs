//! Core data models used throughout kindle-vault.
//!
//! A [`Highlight`] is the unit every connector produces and every document
//! stores. Its identifier is a content fingerprint, so the same highlight
//! parsed from the same export on two different runs always maps to the same
//! entry in the vault.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Separator used when fingerprinting; U+241F SYMBOL FOR UNIT SEPARATOR
/// does not occur in natural text.
const FIELD_SEPARATOR: &str = "\u{241f}";

/// Which export format a highlight was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Clippings,
    Csv,
    Cloud,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Clippings => "clippings",
            SourceTag::Csv => "csv",
            SourceTag::Cloud => "cloud",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One highlight/note pair with a derived, stable identifier.
///
/// Values are trimmed on construction and empty optional fields collapse to
/// `None`. Equality and hashing use the identifier only.
#[derive(Debug, Clone)]
pub struct Highlight {
    book_title: String,
    author: Option<String>,
    location: Option<String>,
    text: String,
    note: Option<String>,
    source: SourceTag,
    id: String,
}

impl Highlight {
    pub fn new(
        book_title: impl Into<String>,
        author: Option<String>,
        location: Option<String>,
        text: impl Into<String>,
        note: Option<String>,
        source: SourceTag,
    ) -> Self {
        let book_title = book_title.into().trim().to_string();
        let author = normalize_optional(author);
        let location = normalize_optional(location);
        let text = text.into().trim().to_string();
        let note = normalize_optional(note);

        let id = fingerprint(&[
            &book_title,
            author.as_deref().unwrap_or(""),
            location.as_deref().unwrap_or(""),
            &text,
            note.as_deref().unwrap_or(""),
            source.as_str(),
        ]);

        Self {
            book_title,
            author,
            location,
            text,
            note,
            source,
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn book_title(&self) -> &str {
        &self.book_title
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn source(&self) -> SourceTag {
        self.source
    }
}

impl PartialEq for Highlight {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Highlight {}

impl Hash for Highlight {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// All highlights for one (title, author) pair, in canonical order.
#[derive(Debug, Clone)]
pub struct BookHighlights {
    pub title: String,
    pub author: Option<String>,
    pub highlights: Vec<Highlight>,
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn fingerprint(components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(components.join(FIELD_SEPARATOR).as_bytes());
    format!("{:x}", hasher.finalize())
}
