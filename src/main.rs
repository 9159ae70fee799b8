//! # Kindle Vault CLI (`kvault`)
//!
//! Reads highlights from the configured sources and merges them into one
//! Markdown document per book.
//!
//! ## Usage
//!
//! ```bash
//! kvault [--config kvault.json] [--clippings PATH] [--csv PATH] [--vault DIR] [--dry-run]
//! ```
//!
//! ## Exit status
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Sync (or dry run / listing) finished, including "nothing new" |
//! | 1 | No source produced a single highlight |
//! | 2 | Configuration or I/O error |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what would change
//! kvault --clippings "/Volumes/Kindle/documents/My Clippings.txt" --vault ~/Obsidian --dry-run
//!
//! # Sync a CSV export into a custom subdirectory
//! kvault --csv ~/Downloads/highlights.csv --vault ~/Obsidian --subdir Reading
//!
//! # Include the cloud notebook
//! kvault --config kvault.json --cloud --cookies ~/.kindle-cookies
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kindle_vault::config::{self, Overrides};
use kindle_vault::ingest::{self, SyncMode};
use kindle_vault::traits::ConnectorRegistry;

/// Sync Kindle highlights into deduplicated Markdown notes.
///
/// Settings come from an optional JSON (or `.toml`) configuration file;
/// flags override file values.
#[derive(Parser)]
#[command(name = "kvault", version)]
struct Cli {
    /// Path to a configuration file (JSON, or TOML with a `.toml` extension).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to `My Clippings.txt`.
    #[arg(long)]
    clippings: Option<PathBuf>,

    /// Path to a Kindle CSV export.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Root of the Markdown vault.
    #[arg(long)]
    vault: Option<PathBuf>,

    /// Subdirectory of the vault that holds book documents.
    #[arg(long)]
    subdir: Option<String>,

    /// Heading for each new highlight section. Placeholders: {title},
    /// {author}, {location}. An empty string disables sections.
    #[arg(long)]
    heading_template: Option<String>,

    /// Show what would be created or updated without writing any file.
    #[arg(long)]
    dry_run: bool,

    /// List parsed highlights and exit without touching the vault.
    #[arg(long = "list")]
    list_only: bool,

    /// Also fetch highlights from the Kindle Cloud notebook.
    #[arg(long)]
    cloud: bool,

    /// Cookie file for the Kindle Cloud session.
    #[arg(long)]
    cookies: Option<PathBuf>,

    /// Log debug diagnostics to stderr.
    #[arg(long, short)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let overrides = Overrides {
        clippings_path: cli.clippings,
        kindle_export_csv: cli.csv,
        vault_root: cli.vault,
        vault_subdir: cli.subdir,
        highlight_heading_template: cli.heading_template,
        dry_run: cli.dry_run,
        cloud: cli.cloud,
        cookie_path: cli.cookies,
    };
    let config = config::load_config(cli.config.as_deref())?.with_overrides(overrides)?;
    let registry = ConnectorRegistry::from_config(&config)?;

    let mode = SyncMode::from_flags(cli.list_only, config.dry_run);
    let stdout = std::io::stdout();
    let report = ingest::run_sync(&config, &registry, mode, &mut stdout.lock())?;
    Ok(report.exit_code())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
