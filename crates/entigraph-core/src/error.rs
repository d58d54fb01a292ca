//! Core error types.

use entigraph_lang::ParseError;
use thiserror::Error;

use crate::storage::EntityId;

/// Core engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed criteria, domain text or field path.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A name did not resolve against the metadata registry.
    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// The row was modified or deleted since the caller last read it.
    #[error("concurrency conflict: {entity}#{id} was modified or deleted by another transaction")]
    ConcurrencyConflict { entity: String, id: EntityId },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Payload error.
    #[error("protocol error: {0}")]
    Protocol(#[from] entigraph_proto::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Key decoding error.
    #[error("invalid key format")]
    InvalidKey,

    /// Record not found.
    #[error("record not found: {entity}#{id}")]
    NotFound { entity: String, id: EntityId },

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Inconsistent schema definition.
    #[error("schema error: {0}")]
    Schema(String),

    /// The operation cannot be carried out by this backend.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A parallel worker failed.
    #[error("worker failed: {0}")]
    WorkerFailed(String),
}

impl Error {
    /// Create a concurrency conflict error.
    pub fn conflict(entity: impl Into<String>, id: EntityId) -> Self {
        Error::ConcurrencyConflict {
            entity: entity.into(),
            id,
        }
    }

    /// Whether a best-effort search may recover from this error by dropping
    /// the offending filter.
    pub fn is_filter_error(&self) -> bool {
        matches!(self, Error::Parse(_) | Error::Resolution(_))
    }

    /// Check if this is a concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict { .. })
    }
}

/// Registry lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No entity with this name is registered.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// The entity has no property with this name.
    #[error("unknown property '{property}' on entity '{entity}'")]
    UnknownProperty { entity: String, property: String },

    /// A collection was used where a single value is required.
    #[error("'{path}' on entity '{entity}' is a collection and cannot be filtered directly")]
    NotFilterable { entity: String, path: String },

    /// A path continued past a scalar property.
    #[error("'{path}' on entity '{entity}' is not a relation")]
    NotNavigable { entity: String, path: String },
}

impl ResolutionError {
    /// Create an unknown property error.
    pub fn unknown_property(entity: &str, property: &str) -> Self {
        ResolutionError::UnknownProperty {
            entity: entity.to_string(),
            property: property.to_string(),
        }
    }
}
