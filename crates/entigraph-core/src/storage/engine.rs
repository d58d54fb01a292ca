//! Storage engine implementation.

use std::sync::Arc;

use entigraph_proto::{Value, ValueMap};
use sled::{Db, Tree};
use tracing::debug;

use super::key::{prefix, EntityId, EntityKey};
use super::record::{PersistedEntity, Record};
use super::unit_of_work::UnitOfWork;
use super::{EntityLoader, StorageConfig};
use crate::catalog::{EntityDef, PropertyDescriptor, Registry};
use crate::error::Error;

/// Tree name for entity records.
const DATA_TREE: &str = "data";

/// The main storage engine wrapping sled.
///
/// Each entity row is one [`Record`] in the data tree. Writes that must be
/// atomic go through a [`UnitOfWork`].
pub struct StorageEngine {
    /// The underlying sled database.
    db: Db,

    /// Tree for entity records.
    data_tree: Tree,

    /// Metadata for the stored entities.
    registry: Arc<Registry>,
}

impl StorageEngine {
    /// Open or create a storage engine with the given configuration.
    pub fn open(config: &StorageConfig, registry: Arc<Registry>) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let data_tree = db.open_tree(DATA_TREE)?;
        debug!(path = %config.path.display(), temporary = config.temporary, "opened storage");

        Ok(Self {
            db,
            data_tree,
            registry,
        })
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// The metadata registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn data_tree(&self) -> &Tree {
        &self.data_tree
    }

    /// Start a unit of work.
    pub fn unit_of_work(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self)
    }

    /// Allocate a fresh entity id.
    pub fn next_id(&self) -> Result<EntityId, Error> {
        // sled starts at 0; ids are positive so that `id <= 0` can mean "new"
        Ok(self.db.generate_id()? as EntityId + 1)
    }

    /// Read the raw record of an entity.
    pub fn get_record(&self, entity: &str, id: EntityId) -> Result<Option<Record>, Error> {
        match self.data_tree.get(EntityKey::new(entity, id).encode())? {
            Some(bytes) => Ok(Some(Record::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read and decode an entity.
    pub fn get(&self, entity: &str, id: EntityId) -> Result<Option<PersistedEntity>, Error> {
        let def = self.registry.get(entity)?;
        match self.get_record(entity, id)? {
            Some(record) => Ok(Some(PersistedEntity::decode(def, id, &record)?)),
            None => Ok(None),
        }
    }

    /// Current version of an entity, or `None` if it does not exist.
    pub fn current_version(&self, entity: &str, id: EntityId) -> Result<Option<i64>, Error> {
        Ok(self.get_record(entity, id)?.map(|r| r.version))
    }

    /// Scan all rows of an entity type in id order.
    pub fn scan(&self, entity: &str) -> Result<Vec<PersistedEntity>, Error> {
        let def = self.registry.get(entity)?;
        let mut rows = Vec::new();
        for result in self.data_tree.scan_prefix(prefix(entity)) {
            let (key_bytes, value_bytes) = result?;
            let key = EntityKey::decode(&key_bytes).ok_or(Error::InvalidKey)?;
            let record = Record::from_bytes(&value_bytes)?;
            rows.push(PersistedEntity::decode(def, key.id, &record)?);
        }
        Ok(rows)
    }

    /// Count rows of an entity type.
    pub fn count(&self, entity: &str) -> Result<usize, Error> {
        self.registry.get(entity)?;
        Ok(self.data_tree.scan_prefix(prefix(entity)).count())
    }

    /// Insert a row directly, outside any unit of work.
    ///
    /// Scalars are coerced to their declared types and relations are
    /// expected as ids.
    pub fn insert(&self, entity: &str, fields: ValueMap) -> Result<PersistedEntity, Error> {
        let def = self.registry.get(entity)?;
        let stored = stored_form(def, fields)?;
        let id = self.next_id()?;
        let record = Record::new(&stored)?;
        self.data_tree
            .insert(EntityKey::new(entity, id).encode(), record.to_bytes()?)?;
        PersistedEntity::decode(def, id, &record)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}

/// Keep only stored properties, coercing scalars.
fn stored_form(def: &EntityDef, fields: ValueMap) -> Result<ValueMap, Error> {
    let mut stored = ValueMap::new();
    for (name, value) in fields {
        let Some(prop) = def.property(&name) else {
            continue;
        };
        if !prop.is_stored() || prop.is_builtin() {
            continue;
        }
        let value = if prop.is_relation() { value } else { prop.coerce(value)? };
        stored.insert(name, value);
    }
    Ok(stored)
}

impl EntityLoader for StorageEngine {
    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn find(&self, entity: &str, id: EntityId) -> Result<Option<PersistedEntity>, Error> {
        self.get(entity, id)
    }

    fn fetch_collection(
        &self,
        owner: &EntityDef,
        property: &PropertyDescriptor,
        owner_id: EntityId,
    ) -> Result<Vec<PersistedEntity>, Error> {
        let target = self.registry.target_of(property)?;
        match property.mapped_by() {
            Some(mapped_by) => {
                let owner_ref = Value::Int(owner_id);
                Ok(self
                    .scan(&target.name)?
                    .into_iter()
                    .filter(|row| row.get(mapped_by).loosely_equals(&owner_ref))
                    .collect())
            }
            None => {
                let Some(row) = self.get(&owner.name, owner_id)? else {
                    return Ok(Vec::new());
                };
                let ids = match row.fields.get(&property.name) {
                    Some(Value::List(ids)) => ids.iter().filter_map(Value::as_i64).collect(),
                    _ => Vec::new(),
                };
                let mut members = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(member) = self.get(&target.name, id)? {
                        members.push(member);
                    }
                }
                Ok(members)
            }
        }
    }
}
