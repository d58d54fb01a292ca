//! Property metadata registry.
//!
//! The catalog describes entity types: their scalar, enum, reference and
//! collection properties, which collections own their members, which
//! properties are transient or computed, and which one is displayed.

mod entity;
mod property;
mod registry;
mod schema;
mod types;

pub use entity::EntityDef;
pub use property::{ComputeFn, Computed, PropertyDescriptor};
pub use registry::Registry;
pub use schema::SchemaBundle;
pub use types::{PropertyKind, ScalarType};

/// Primary key property.
pub const ID: &str = "id";
/// Optimistic-lock version property.
pub const VERSION: &str = "version";
/// Conventional display field name.
pub const NAME: &str = "name";
