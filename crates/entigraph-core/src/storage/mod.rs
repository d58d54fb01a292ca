//! Storage layer for entigraph.
//!
//! This module provides a sled-based entity store with optimistic versioning
//! and units of work that commit a whole object graph atomically.

mod config;
mod engine;
mod record;
mod unit_of_work;

pub mod key;

pub use config::StorageConfig;
pub use engine::StorageEngine;
pub use key::{EntityId, EntityKey};
pub use record::{PersistedEntity, Record};
pub use unit_of_work::{CommitSummary, Handle, Slot, UnitOfWork};

use crate::catalog::{EntityDef, PropertyDescriptor, Registry};
use crate::error::Error;

/// Read access to persisted entities.
///
/// This is the seam between the engine's read paths (context views,
/// projection second passes) and whatever holds the data.
pub trait EntityLoader {
    /// The metadata the loaded rows conform to.
    fn registry(&self) -> &Registry;

    /// Load one entity by id.
    fn find(&self, entity: &str, id: EntityId) -> Result<Option<PersistedEntity>, Error>;

    /// Load the members of a collection property of `owner_id`.
    fn fetch_collection(
        &self,
        owner: &EntityDef,
        property: &PropertyDescriptor,
        owner_id: EntityId,
    ) -> Result<Vec<PersistedEntity>, Error>;
}
