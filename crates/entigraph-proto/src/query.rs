//! Ordering and paging types shared by queries and search requests.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Ordering specification for a query.
///
/// The textual form used by search requests is the field path, optionally
/// prefixed with `-` for descending order: `"name"`, `"-customer.name"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Field path to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order spec.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Check if this spec sorts descending.
    pub fn is_descending(&self) -> bool {
        self.direction == OrderDirection::Desc
    }
}

impl FromStr for OrderSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (field, direction) = match s.strip_prefix('-') {
            Some(rest) => (rest.trim(), OrderDirection::Desc),
            None => (s, OrderDirection::Asc),
        };
        if field.is_empty() {
            return Err(Error::InvalidOrder(s.to_string()));
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// Limit/offset paging. A limit of zero means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of results to return.
    pub limit: usize,
    /// Number of results to skip.
    pub offset: usize,
}

impl Pagination {
    /// Create pagination with limit and offset.
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// Create pagination with just a limit.
    pub fn limit(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }

    /// No paging at all.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Apply this page to a sequence.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        if self.limit == 0 {
            iter.collect()
        } else {
            iter.take(self.limit).collect()
        }
    }
}
