//! # Kindle Vault
//!
//! Sync Kindle highlights into a folder of Markdown notes, one document per
//! book, without ever duplicating a highlight.
//!
//! Highlights are read from the legacy `My Clippings.txt` file, a CSV export,
//! or the Kindle Cloud notebook. Every highlight gets a content fingerprint;
//! each book document records the fingerprints it already holds in its
//! front-matter header, so re-running a sync against the same exports adds
//! nothing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   ┌──────────┐   ┌────────────────┐
//! │   Connectors    │──▶│  Group   │──▶│ Document store │
//! │ Clippings/CSV/  │   │ by book  │   │ merge + write  │
//! │     Cloud       │   └──────────┘   └────────────────┘
//! └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kvault --clippings "My Clippings.txt" --vault ~/Obsidian --dry-run
//! kvault --clippings "My Clippings.txt" --csv highlights.csv --vault ~/Obsidian
//! kvault --config kvault.json --cloud --cookies ~/.kindle-cookies
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | JSON/TOML configuration and CLI overrides |
//! | [`models`] | Highlight record and book grouping types |
//! | [`traits`] | Connector trait and registry |
//! | [`connector_clippings`] | `My Clippings.txt` parser |
//! | [`connector_csv`] | CSV export parser |
//! | [`connector_cloud`] | Kindle Cloud notebook fetcher |
//! | [`group`] | Grouping and canonical ordering |
//! | [`frontmatter`] | Header reader/writer |
//! | [`markdown`] | Filenames and highlight sections |
//! | [`store`] | Per-book merge engine |
//! | [`ingest`] | Sync orchestration |

pub mod config;
pub mod connector_clippings;
pub mod connector_cloud;
pub mod connector_csv;
pub mod frontmatter;
pub mod group;
pub mod ingest;
pub mod markdown;
pub mod models;
pub mod store;
pub mod traits;
