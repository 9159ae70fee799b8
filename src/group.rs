//! Grouping highlights into books.
//!
//! Highlights are grouped by exact `(title, author)`. Books are ordered by
//! lower-cased title, then author (absent authors compare as `""`). Inside a
//! book, highlights are ordered by the first integer embedded in their
//! location; highlights without one go last. Both sorts are stable, so ties
//! keep the order the connectors produced.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::models::{BookHighlights, Highlight};

static FIRST_INTEGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("valid integer pattern"));

/// Group highlights by book in canonical order.
pub fn group_by_book(highlights: Vec<Highlight>) -> Vec<BookHighlights> {
    let mut books: Vec<BookHighlights> = Vec::new();
    let mut index: HashMap<(String, Option<String>), usize> = HashMap::new();

    for highlight in highlights {
        let key = (
            highlight.book_title().to_string(),
            highlight.author().map(str::to_string),
        );
        let slot = *index.entry(key).or_insert_with_key(|(title, author)| {
            books.push(BookHighlights {
                title: title.clone(),
                author: author.clone(),
                highlights: Vec::new(),
            });
            books.len() - 1
        });
        books[slot].highlights.push(highlight);
    }

    books.sort_by(|a, b| {
        (a.title.to_lowercase(), a.author.as_deref().unwrap_or(""))
            .cmp(&(b.title.to_lowercase(), b.author.as_deref().unwrap_or("")))
    });
    for book in &mut books {
        book.highlights
            .sort_by(|a, b| location_order(a).cmp(&location_order(b)));
    }
    books
}

/// Sort key for a location: `(first integer, literal)`; no integer sorts last.
fn location_order(highlight: &Highlight) -> (u64, &str) {
    let location = highlight.location().unwrap_or("");
    let number = FIRST_INTEGER
        .find(location)
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(u64::MAX);
    (number, location)
}
