//! Engine configuration.
//!
//! Every section deserializes from JSON with defaults for missing keys:
//!
//! ```json
//! {
//!   "storage": { "path": "./data", "compression": true },
//!   "query": { "best_effort_search": true, "default_limit": 40 },
//!   "reconcile": { "delete_orphans": false }
//! }
//! ```

use serde::Deserialize;

use crate::error::Error;
use crate::storage::StorageConfig;

/// Query compilation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Drop a user filter that fails to parse or resolve instead of failing
    /// the query. The dropped filter is logged at `warn`.
    pub best_effort_search: bool,

    /// Page size used when a fetch asks for no limit. Zero means unbounded.
    pub default_limit: usize,
}

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Payload key carrying the volatile selection marker of linked objects.
    pub selected_marker: String,

    /// Delete members removed from owned collections on commit. When off
    /// they are kept with their back-reference cleared.
    pub delete_orphans: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            selected_marker: "selected".to_string(),
            delete_orphans: false,
        }
    }
}

impl ReconcileConfig {
    /// Enable orphan deletion.
    pub fn with_delete_orphans(mut self, delete: bool) -> Self {
        self.delete_orphans = delete;
        self
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub query: QueryConfig,
    pub reconcile: ReconcileConfig,
}

impl EngineConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::InvalidData(format!("invalid configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(!config.query.best_effort_search);
        assert_eq!(config.reconcile.selected_marker, "selected");
        assert!(!config.reconcile.delete_orphans);
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json(
            r#"{"query": {"best_effort_search": true}, "reconcile": {"delete_orphans": true}}"#,
        )
        .unwrap();
        assert!(config.query.best_effort_search);
        assert_eq!(config.query.default_limit, 0);
        assert!(config.reconcile.delete_orphans);
        assert!(config.storage.compression);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            EngineConfig::from_json("{\"query\": 3}"),
            Err(Error::InvalidData(_))
        ));
    }
}
