//! Entigraph payload types.
//!
//! This crate defines the data exchanged between clients and the entigraph
//! engine: runtime values, criteria trees, ordering and paging, and
//! projection results. Everything serializes to and from plain JSON with
//! serde.
//!
//! # Modules
//!
//! - [`value`] - Runtime values for parameters, entity fields and rows
//! - [`criteria`] - Criteria trees sent by search clients
//! - [`query`] - Ordering and paging
//! - [`result`] - Projection rows and compact references
//! - [`error`] - Payload error types

pub mod criteria;
pub mod error;
pub mod query;
pub mod result;
pub mod value;

pub use criteria::{Criterion, DomainClause};
pub use error::Error;
pub use query::{OrderDirection, OrderSpec, Pagination};
pub use result::{compact_reference, QueryResult, VERSION_KEY};
pub use value::{Value, ValueMap};
