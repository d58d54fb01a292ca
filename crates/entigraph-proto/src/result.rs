//! Result types for projection queries.

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueMap};

/// Key under which compact references carry the optimistic-lock version.
pub const VERSION_KEY: &str = "$version";

/// Build the compact reference map `{id, $version}` used for relations in
/// projection rows, optionally with the display field of the target.
pub fn compact_reference(id: Value, version: Value, display: Option<(&str, Value)>) -> ValueMap {
    let mut map = ValueMap::new();
    map.insert("id".to_string(), id);
    map.insert(VERSION_KEY.to_string(), version);
    if let Some((name, value)) = display {
        map.insert(name.to_string(), value);
    }
    map
}

/// A page of projection rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Rows keyed by the requested field paths.
    pub rows: Vec<ValueMap>,
    /// Total number of matching rows, when counted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Offset of the first row.
    pub offset: usize,
    /// Page size; zero means unbounded.
    pub limit: usize,
}

impl QueryResult {
    /// Create a result page.
    pub fn new(rows: Vec<ValueMap>, offset: usize, limit: usize) -> Self {
        Self {
            rows,
            total: None,
            offset,
            limit,
        }
    }

    /// Attach the total match count.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Number of rows in this page.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the page is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Check if more rows exist past this page.
    pub fn has_more(&self) -> bool {
        match self.total {
            Some(total) => (self.offset + self.rows.len()) < total as usize,
            None => false,
        }
    }
}
