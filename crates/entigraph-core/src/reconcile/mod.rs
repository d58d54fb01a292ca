//! Entity graph reconciliation.
//!
//! Clients send back whole object graphs as nested value maps. The
//! [`Reconciler`] merges such a payload into a unit of work: it creates,
//! links or updates each node, diffs collection membership, and enforces
//! optimistic concurrency on every object whose fields actually change.

mod reconciler;
mod session;

pub use reconciler::{verify, Reconciled, Reconciler};
pub use session::Session;

use entigraph_proto::ValueMap;
use tracing::info;

use crate::config::ReconcileConfig;
use crate::error::Error;
use crate::storage::{CommitSummary, EntityId, StorageEngine};

/// Reconcile one payload and commit it. Returns the id of the root object
/// and what the commit wrote.
pub fn save(
    engine: &StorageEngine,
    config: &ReconcileConfig,
    entity: &str,
    values: &ValueMap,
) -> Result<(EntityId, CommitSummary), Error> {
    let mut uow = engine.unit_of_work();
    let root = Reconciler::new(&mut uow, config.clone()).edit(entity, values)?;
    let summary = uow.commit()?;
    let id = summary
        .id_of(root.handle)
        .ok_or_else(|| Error::InvalidData(format!("{} was not saved", entity)))?;
    info!(
        entity,
        id,
        inserted = summary.inserted,
        updated = summary.updated,
        deleted = summary.deleted,
        "saved"
    );
    Ok((id, summary))
}
