//! Configuration loading and CLI override merging.
//!
//! Configuration files are JSON by default; a `.toml` extension switches to
//! TOML. Every key is optional and empty strings count as absent, so a file
//! only needs the settings it wants to change.
//!
//! ```json
//! {
//!   "clippings_path": "~/Documents/My Clippings.txt",
//!   "kindle_export_csv": "~/Downloads/highlights.csv",
//!   "vault_root": "~/Obsidian",
//!   "vault_subdir": "Kindle Highlights",
//!   "highlight_heading_template": "Location {location}",
//!   "cloud": { "enabled": true, "region": "uk", "cookie_path": "~/.kindle-cookies" }
//! }
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub clippings_path: Option<PathBuf>,
    pub kindle_export_csv: Option<PathBuf>,
    pub vault_root: PathBuf,
    pub vault_subdir: String,
    pub dry_run: bool,
    pub highlight_heading_template: String,
    pub cloud: CloudConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            clippings_path: None,
            kindle_export_csv: None,
            vault_root: PathBuf::from("./vault"),
            vault_subdir: default_vault_subdir(),
            dry_run: false,
            highlight_heading_template: default_heading_template(),
            cloud: CloudConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CloudConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub email: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default, deserialize_with = "non_empty_path")]
    pub cookie_path: Option<PathBuf>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            email: None,
            region: default_region(),
            cookie_path: None,
            page_size: default_page_size(),
            timeout_secs: None,
        }
    }
}

fn default_vault_subdir() -> String {
    "Kindle Highlights".to_string()
}
fn default_heading_template() -> String {
    "Location {location}".to_string()
}
fn default_region() -> String {
    "us".to_string()
}
fn default_page_size() -> usize {
    100
}

/// On-disk shape; every field optional so partial files merge onto defaults.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default, deserialize_with = "non_empty_path")]
    clippings_path: Option<PathBuf>,
    #[serde(default, alias = "csv_path", deserialize_with = "non_empty_path")]
    kindle_export_csv: Option<PathBuf>,
    #[serde(default, deserialize_with = "non_empty_path")]
    vault_root: Option<PathBuf>,
    #[serde(default, deserialize_with = "non_empty_string")]
    vault_subdir: Option<String>,
    #[serde(default)]
    dry_run: Option<bool>,
    #[serde(default, deserialize_with = "non_empty_string")]
    highlight_heading_template: Option<String>,
    #[serde(default)]
    cloud: Option<CloudConfig>,
}

/// Values supplied on the command line. `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub clippings_path: Option<PathBuf>,
    pub kindle_export_csv: Option<PathBuf>,
    pub vault_root: Option<PathBuf>,
    pub vault_subdir: Option<String>,
    pub highlight_heading_template: Option<String>,
    pub dry_run: bool,
    pub cloud: bool,
    pub cookie_path: Option<PathBuf>,
}

fn non_empty_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn non_empty_path<'de, D>(deserializer: D) -> std::result::Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(non_empty_string(deserializer)?.map(PathBuf::from))
}

/// Load a configuration file, or return defaults when `path` is `None`.
///
/// A path that was given but cannot be read is an error: the caller should
/// abort before any parsing begins. Cross-field checks run later, in
/// [`SyncConfig::with_overrides`], once command-line values are merged in.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let path = expand_home(path);

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let file: FileConfig = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    };

    let defaults = SyncConfig::default();
    let config = SyncConfig {
        clippings_path: file.clippings_path,
        kindle_export_csv: file.kindle_export_csv,
        vault_root: file.vault_root.unwrap_or(defaults.vault_root),
        vault_subdir: file.vault_subdir.unwrap_or(defaults.vault_subdir),
        dry_run: file.dry_run.unwrap_or(false),
        highlight_heading_template: file
            .highlight_heading_template
            .unwrap_or(defaults.highlight_heading_template),
        cloud: file.cloud.unwrap_or_default(),
    };

    Ok(config)
}

impl SyncConfig {
    /// Apply command-line overrides on top of file values, then expand `~/`
    /// in every path.
    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self> {
        if overrides.clippings_path.is_some() {
            self.clippings_path = overrides.clippings_path;
        }
        if overrides.kindle_export_csv.is_some() {
            self.kindle_export_csv = overrides.kindle_export_csv;
        }
        if let Some(root) = overrides.vault_root {
            self.vault_root = root;
        }
        if let Some(subdir) = overrides.vault_subdir {
            self.vault_subdir = subdir;
        }
        if let Some(template) = overrides.highlight_heading_template {
            self.highlight_heading_template = template;
        }
        if overrides.dry_run {
            self.dry_run = true;
        }
        if overrides.cloud {
            self.cloud.enabled = true;
        }
        if overrides.cookie_path.is_some() {
            self.cloud.cookie_path = overrides.cookie_path;
        }

        self.clippings_path = self.clippings_path.as_deref().map(expand_home);
        self.kindle_export_csv = self.kindle_export_csv.as_deref().map(expand_home);
        self.vault_root = expand_home(&self.vault_root);
        self.cloud.cookie_path = self.cloud.cookie_path.as_deref().map(expand_home);

        validate(&self)?;
        Ok(self)
    }

    /// Directory that holds one Markdown document per book.
    pub fn book_dir(&self) -> PathBuf {
        self.vault_root.join(&self.vault_subdir)
    }
}

fn validate(config: &SyncConfig) -> Result<()> {
    if config.cloud.page_size == 0 {
        bail!("cloud.page_size must be > 0");
    }
    if config.cloud.enabled && config.cloud.cookie_path.is_none() {
        bail!("cloud.cookie_path must be set when cloud fetching is enabled");
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(raw) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
        None => path.to_path_buf(),
    }
}
