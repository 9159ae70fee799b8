//! Sync orchestration.
//!
//! Coordinates the full run: connectors → grouping → per-book merge →
//! summary. A connector whose input is missing is skipped with a warning; a
//! cloud fetch failure is logged and skipped; any other error aborts the run.
//!
//! All user-facing output goes to the writer passed in, so the binary can
//! print to stdout while tests capture it.

use anyhow::Result;
use std::io::Write;

use crate::config::SyncConfig;
use crate::connector_cloud::FetchError;
use crate::group::group_by_book;
use crate::models::{BookHighlights, Highlight};
use crate::store::BookDocument;
use crate::traits::{ConnectorRegistry, SourceStatus};

/// What a run does with the highlights it collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Merge into the vault.
    Commit,
    /// Report what a commit would do; write nothing.
    DryRun,
    /// Print the parsed highlights; do not look at the vault.
    List,
}

impl SyncMode {
    pub fn from_flags(list_only: bool, dry_run: bool) -> Self {
        if list_only {
            SyncMode::List
        } else if dry_run {
            SyncMode::DryRun
        } else {
            SyncMode::Commit
        }
    }
}

/// Counters accumulated over one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub highlights_found: usize,
    pub books: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Highlights added (or, in a dry run, that would be added).
    pub added: usize,
    pub sources_skipped: usize,
    pub sources_failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub stats: SyncStats,
}

impl SyncReport {
    /// 0 on success (including nothing new), 1 when no source produced a
    /// highlight.
    pub fn exit_code(&self) -> u8 {
        if self.stats.highlights_found == 0 {
            1
        } else {
            0
        }
    }
}

/// Highlights gathered from every usable connector, in registry order.
#[derive(Debug, Default)]
pub struct Collected {
    pub highlights: Vec<Highlight>,
    pub skipped: usize,
    pub failed: usize,
}

/// Scan every connector in the registry.
pub fn collect_highlights(registry: &ConnectorRegistry) -> Result<Collected> {
    let mut collected = Collected::default();

    for connector in registry.connectors() {
        if let SourceStatus::Missing(path) = connector.status() {
            tracing::warn!(
                "{} not found; skipping {} source",
                path.display(),
                connector.description()
            );
            collected.skipped += 1;
            continue;
        }

        match connector.scan() {
            Ok(highlights) => {
                tracing::debug!(
                    source = connector.name(),
                    count = highlights.len(),
                    "scanned source"
                );
                collected.highlights.extend(highlights);
            }
            Err(e) => {
                if !e.is::<FetchError>() {
                    return Err(e);
                }
                tracing::error!(
                    source = connector.name(),
                    "skipping {}: {:#}",
                    connector.description(),
                    e
                );
                collected.failed += 1;
            }
        }
    }

    Ok(collected)
}

/// Run a sync and write progress and the summary to `out`.
pub fn run_sync(
    config: &SyncConfig,
    registry: &ConnectorRegistry,
    mode: SyncMode,
    out: &mut dyn Write,
) -> Result<SyncReport> {
    let collected = collect_highlights(registry)?;
    let mut stats = SyncStats {
        highlights_found: collected.highlights.len(),
        sources_skipped: collected.skipped,
        sources_failed: collected.failed,
        ..SyncStats::default()
    };

    if collected.highlights.is_empty() {
        writeln!(out, "No highlights found in the provided sources.")?;
        return Ok(SyncReport { mode, stats });
    }

    let books = group_by_book(collected.highlights);
    stats.books = books.len();

    match mode {
        SyncMode::List => list_books(&books, &stats, out)?,
        SyncMode::DryRun => preview_books(config, &books, &mut stats, out)?,
        SyncMode::Commit => merge_books(config, &books, &mut stats, out)?,
    }

    Ok(SyncReport { mode, stats })
}

fn found_line(stats: &SyncStats, out: &mut dyn Write) -> Result<()> {
    writeln!(
        out,
        "Found {} highlight(s) in {} book(s).",
        stats.highlights_found, stats.books
    )?;
    Ok(())
}

fn list_books(books: &[BookHighlights], stats: &SyncStats, out: &mut dyn Write) -> Result<()> {
    found_line(stats, out)?;
    for book in books {
        writeln!(out)?;
        match &book.author {
            Some(author) => writeln!(out, "{} ({})", book.title, author)?,
            None => writeln!(out, "{}", book.title)?,
        }
        for highlight in &book.highlights {
            let location = highlight.location().unwrap_or("-");
            if highlight.text().is_empty() {
                writeln!(out, "  [{}] (note only)", location)?;
            } else {
                writeln!(out, "  [{}] {}", location, first_line(highlight.text()))?;
            }
            if let Some(note) = highlight.note() {
                writeln!(out, "      Note: {}", first_line(note))?;
            }
        }
    }
    Ok(())
}

fn preview_books(
    config: &SyncConfig,
    books: &[BookHighlights],
    stats: &mut SyncStats,
    out: &mut dyn Write,
) -> Result<()> {
    found_line(stats, out)?;
    let book_dir = config.book_dir();

    for book in books {
        let doc = BookDocument::locate(&book_dir, &book.title, book.author.as_deref());
        let preview = doc.preview(&book.highlights)?;
        let path = doc.path().display();

        if preview.new == 0 {
            stats.unchanged += 1;
            writeln!(out, "[DRY-RUN] Up to date {}", path)?;
        } else if preview.exists {
            stats.updated += 1;
            writeln!(
                out,
                "[DRY-RUN] Would update {} (+{} highlight(s))",
                path, preview.new
            )?;
        } else {
            stats.created += 1;
            writeln!(
                out,
                "[DRY-RUN] Would create {} ({} highlight(s))",
                path, preview.new
            )?;
        }
        stats.added += preview.new;
    }

    writeln!(out, "Dry-run complete; no files were written.")?;
    writeln!(
        out,
        "  would add: {} highlight(s) ({} created, {} updated, {} unchanged)",
        stats.added, stats.created, stats.updated, stats.unchanged
    )?;
    Ok(())
}

fn merge_books(
    config: &SyncConfig,
    books: &[BookHighlights],
    stats: &mut SyncStats,
    out: &mut dyn Write,
) -> Result<()> {
    let book_dir = config.book_dir();

    for book in books {
        let doc = BookDocument::locate(&book_dir, &book.title, book.author.as_deref());
        let existed = doc.exists();
        let outcome = doc.merge(&book.highlights, &config.highlight_heading_template)?;
        let path = doc.path().display();

        if outcome.added == 0 {
            stats.unchanged += 1;
            writeln!(out, "Unchanged {}", path)?;
        } else if existed {
            stats.updated += 1;
            writeln!(
                out,
                "Updated {} (+{} highlight(s), {} total)",
                path, outcome.added, outcome.total
            )?;
        } else {
            stats.created += 1;
            writeln!(out, "Created {} ({} highlight(s))", path, outcome.added)?;
        }
        stats.added += outcome.added;
    }

    writeln!(
        out,
        "Sync complete: {} new highlights added ({} created, {} updated, {} unchanged).",
        stats.added, stats.created, stats.updated, stats.unchanged
    )?;
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
