//! Source connectors and the registry that drives them.
//!
//! Every export format is wrapped in a [`Connector`]: something that can say
//! whether its input is reachable and, if so, turn it into [`Highlight`]s.
//! The orchestrator only ever talks to a [`ConnectorRegistry`], which makes it
//! easy to plug in an in-memory connector for tests or a front-end.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ConnectorRegistry              │
//! │  ┌──────────┐ ┌─────────┐ ┌───────────┐  │
//! │  │Clippings │ │   CSV   │ │   Cloud   │  │
//! │  └──────────┘ └─────────┘ └───────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     run_sync() → group → document store
//! ```

use anyhow::Result;
use std::path::PathBuf;

use crate::config::SyncConfig;
use crate::models::Highlight;

/// Whether a connector's input can be read right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Ready,
    /// The configured input path does not exist.
    Missing(PathBuf),
}

/// A producer of highlight records.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use kindle_vault::models::Highlight;
/// use kindle_vault::traits::Connector;
///
/// struct Fixed(Vec<Highlight>);
///
/// impl Connector for Fixed {
///     fn name(&self) -> &str { "fixed" }
///     fn description(&self) -> &str { "Highlights held in memory" }
///     fn scan(&self) -> Result<Vec<Highlight>> { Ok(self.0.clone()) }
/// }
/// ```
pub trait Connector: Send {
    /// Short name used in log lines and warnings (e.g. `"clippings"`).
    fn name(&self) -> &str;

    /// One-line description for listings.
    fn description(&self) -> &str;

    /// Reachability check run before [`scan`](Connector::scan). A connector
    /// reporting [`SourceStatus::Missing`] is skipped with a warning.
    fn status(&self) -> SourceStatus {
        SourceStatus::Ready
    }

    /// Read the source and return every highlight it contains.
    ///
    /// Malformed individual entries are dropped, not reported. Errors are
    /// reserved for failures that make the whole source unreadable.
    fn scan(&self) -> Result<Vec<Highlight>>;
}

/// Ordered collection of connectors; scan order is registration order.
pub struct ConnectorRegistry {
    connectors: Vec<Box<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Create an empty connector registry.
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Create a registry with the built-in connectors enabled in `config`:
    /// clippings, then CSV, then cloud.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        use crate::connector_clippings::ClippingsConnector;
        use crate::connector_cloud::CloudConnector;
        use crate::connector_csv::CsvConnector;

        let mut registry = Self::new();

        if let Some(path) = &config.clippings_path {
            registry.register(Box::new(ClippingsConnector::new(path.clone())));
        }
        if let Some(path) = &config.kindle_export_csv {
            registry.register(Box::new(CsvConnector::new(path.clone())));
        }
        if config.cloud.enabled {
            registry.register(Box::new(CloudConnector::from_config(&config.cloud)?));
        }

        Ok(registry)
    }

    /// Register a connector.
    pub fn register(&mut self, connector: Box<dyn Connector>) {
        self.connectors.push(connector);
    }

    /// Get all registered connectors.
    pub fn connectors(&self) -> &[Box<dyn Connector>] {
        &self.connectors
    }

    /// Find a connector by name.
    pub fn find(&self, name: &str) -> Option<&dyn Connector> {
        self.connectors
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Return the count of registered connectors.
    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
