//! Payload error types.

use thiserror::Error;

/// Errors raised while decoding client payloads.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload was not valid JSON or did not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// A value could not be converted to the requested type.
    #[error("invalid value: expected {expected}, got {actual}")]
    InvalidValue {
        expected: &'static str,
        actual: String,
    },

    /// An ordering specification could not be parsed.
    #[error("invalid order specification: {0:?}")]
    InvalidOrder(String),
}
