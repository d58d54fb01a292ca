//! Units of work: an in-memory working set of entities committed atomically.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use entigraph_proto::{Value, ValueMap};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tracing::{debug, warn};

use super::key::{EntityId, EntityKey};
use super::record::{PersistedEntity, Record};
use super::{EntityLoader, StorageEngine};
use crate::catalog::{EntityDef, PropertyKind, Registry};
use crate::error::{Error, ResolutionError};

/// Handle to an object in a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(usize);

/// The in-memory value of one property.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Scalar or enum value.
    Value(Value),
    /// Single reference.
    Ref(Option<Handle>),
    /// Collection members in order.
    Many(Vec<Handle>),
}

#[derive(Debug)]
struct WorkingObject {
    entity: Arc<EntityDef>,
    id: Option<EntityId>,
    /// Version read from the store; `None` for objects created here.
    loaded_version: Option<i64>,
    /// Fields as read from the store.
    stored: ValueMap,
    /// Properties touched so far, resolved to handles.
    slots: BTreeMap<String, Slot>,
    deleted: bool,
}

/// What a commit wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSummary {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Rows deleted.
    pub deleted: usize,
    assigned: HashMap<Handle, EntityId>,
}

impl CommitSummary {
    /// Id of an object after the commit, including freshly assigned ids.
    pub fn id_of(&self, handle: Handle) -> Option<EntityId> {
        self.assigned.get(&handle).copied()
    }

    /// Whether the commit wrote nothing.
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

enum Write {
    Insert {
        key: Vec<u8>,
        bytes: Vec<u8>,
    },
    Update {
        entity: String,
        id: EntityId,
        key: Vec<u8>,
        expected: i64,
        fields: ValueMap,
    },
    Delete {
        entity: String,
        id: EntityId,
        key: Vec<u8>,
        expected: i64,
    },
}

/// A working set of entities loaded from and written back to a
/// [`StorageEngine`].
///
/// Objects are addressed by [`Handle`]. Each stored row is loaded at most
/// once (an identity map keyed by entity and id), relations are resolved
/// lazily on first access, and nothing reaches the store until
/// [`commit`](UnitOfWork::commit), which writes every change in one sled
/// transaction. A row whose stored version moved since it was loaded aborts
/// the whole commit with [`Error::ConcurrencyConflict`]. Dropping a unit of
/// work without committing discards it.
pub struct UnitOfWork<'e> {
    engine: &'e StorageEngine,
    objects: Vec<WorkingObject>,
    identity: HashMap<(String, EntityId), Handle>,
    orphans: Vec<(Handle, String)>,
    delete_orphans: bool,
}

impl<'e> UnitOfWork<'e> {
    pub(crate) fn new(engine: &'e StorageEngine) -> Self {
        Self {
            engine,
            objects: Vec::new(),
            identity: HashMap::new(),
            orphans: Vec::new(),
            delete_orphans: true,
        }
    }

    /// Choose whether orphans of owned collections are deleted on commit.
    /// When disabled they are kept with their back-reference cleared.
    pub fn set_delete_orphans(&mut self, delete: bool) {
        self.delete_orphans = delete;
    }

    /// The underlying engine.
    pub fn engine(&self) -> &'e StorageEngine {
        self.engine
    }

    /// The metadata registry.
    pub fn registry(&self) -> &'e Registry {
        self.engine.registry()
    }

    /// Load an entity, returning the same handle for repeated loads.
    pub fn find(&mut self, entity: &str, id: EntityId) -> Result<Option<Handle>, Error> {
        if let Some(&handle) = self.identity.get(&(entity.to_string(), id)) {
            let deleted = self.objects[handle.0].deleted;
            return Ok(if deleted { None } else { Some(handle) });
        }
        match self.engine.get(entity, id)? {
            Some(row) => Ok(Some(self.adopt(row)?)),
            None => Ok(None),
        }
    }

    /// Load an entity that must exist; a missing row means it was deleted
    /// concurrently.
    pub fn load(&mut self, entity: &str, id: EntityId) -> Result<Handle, Error> {
        self.find(entity, id)?
            .ok_or_else(|| Error::conflict(entity, id))
    }

    fn adopt(&mut self, row: PersistedEntity) -> Result<Handle, Error> {
        if let Some(&handle) = self.identity.get(&(row.entity.clone(), row.id)) {
            return Ok(handle);
        }
        let entity = self.registry().get(&row.entity)?.clone();
        let handle = Handle(self.objects.len());
        self.identity.insert((row.entity.clone(), row.id), handle);
        self.objects.push(WorkingObject {
            entity,
            id: Some(row.id),
            loaded_version: Some(row.version),
            stored: row.fields,
            slots: BTreeMap::new(),
            deleted: false,
        });
        Ok(handle)
    }

    fn object(&self, handle: Handle) -> Result<&WorkingObject, Error> {
        self.objects.get(handle.0).ok_or_else(|| unknown_handle(handle))
    }

    fn object_mut(&mut self, handle: Handle) -> Result<&mut WorkingObject, Error> {
        self.objects.get_mut(handle.0).ok_or_else(|| unknown_handle(handle))
    }

    /// Create a new, unsaved object.
    pub fn create(&mut self, entity: &str) -> Result<Handle, Error> {
        let entity = self.registry().get(entity)?.clone();
        let handle = Handle(self.objects.len());
        self.objects.push(WorkingObject {
            entity,
            id: None,
            loaded_version: None,
            stored: ValueMap::new(),
            slots: BTreeMap::new(),
            deleted: false,
        });
        Ok(handle)
    }

    /// Entity definition of an object.
    pub fn entity(&self, handle: Handle) -> Result<&Arc<EntityDef>, Error> {
        Ok(&self.object(handle)?.entity)
    }

    /// Id of an object; `None` until a new object is committed.
    pub fn id(&self, handle: Handle) -> Option<EntityId> {
        self.objects.get(handle.0).and_then(|o| o.id)
    }

    /// Version the object was loaded at.
    pub fn version(&self, handle: Handle) -> Option<i64> {
        self.objects.get(handle.0).and_then(|o| o.loaded_version)
    }

    /// Check if the object was created in this unit of work.
    pub fn is_new(&self, handle: Handle) -> Result<bool, Error> {
        Ok(self.object(handle)?.loaded_version.is_none())
    }

    /// Check if the object is scheduled for deletion.
    pub fn is_deleted(&self, handle: Handle) -> Result<bool, Error> {
        Ok(self.object(handle)?.deleted)
    }

    /// Current value of a property.
    pub fn slot(&mut self, handle: Handle, field: &str) -> Result<Slot, Error> {
        self.materialize(handle, field)?;
        Ok(self
            .object(handle)?
            .slots
            .get(field)
            .cloned()
            .unwrap_or(Slot::Value(Value::Null)))
    }

    fn materialize(&mut self, handle: Handle, field: &str) -> Result<(), Error> {
        let object = self.object(handle)?;
        if object.slots.contains_key(field) {
            return Ok(());
        }
        let entity = object.entity.clone();
        let owner_id = object.id;
        let loaded_version = object.loaded_version;
        let stored = object.stored.get(field).cloned();
        let prop = entity
            .property(field)
            .ok_or_else(|| ResolutionError::unknown_property(&entity.name, field))?;

        let slot = match &prop.kind {
            PropertyKind::Reference { target } => match stored.as_ref().and_then(Value::as_i64) {
                Some(id) => {
                    let found = self.find(target, id)?;
                    if found.is_none() {
                        warn!(entity = %entity.name, field, target = %target, id, "dangling reference");
                    }
                    Slot::Ref(found)
                }
                None => Slot::Ref(None),
            },
            PropertyKind::Collection { target, mapped_by, .. } => match owner_id {
                None => Slot::Many(Vec::new()),
                Some(owner_id) => {
                    let rows = match mapped_by {
                        Some(_) => self.engine.fetch_collection(&entity, prop, owner_id)?,
                        None => {
                            let ids: Vec<EntityId> = match &stored {
                                Some(Value::List(ids)) => ids.iter().filter_map(Value::as_i64).collect(),
                                _ => Vec::new(),
                            };
                            let mut rows = Vec::with_capacity(ids.len());
                            for id in ids {
                                if let Some(row) = self.engine.get(target, id)? {
                                    rows.push(row);
                                }
                            }
                            rows
                        }
                    };
                    let mut members = Vec::with_capacity(rows.len());
                    for row in rows {
                        let member = self.adopt(row)?;
                        if !self.objects[member.0].deleted {
                            members.push(member);
                        }
                    }
                    Slot::Many(members)
                }
            },
            _ if prop.is_id() => Slot::Value(owner_id.map(Value::Int).unwrap_or(Value::Null)),
            _ if prop.is_version() => Slot::Value(loaded_version.map(Value::Int).unwrap_or(Value::Null)),
            _ => Slot::Value(stored.unwrap_or(Value::Null)),
        };

        self.object_mut(handle)?.slots.insert(field.to_string(), slot);
        Ok(())
    }

    /// Replace the value of a property, returning the previous value.
    ///
    /// Scalars are coerced to the declared type. `id` and `version` are
    /// managed by the store and cannot be set.
    pub fn set(&mut self, handle: Handle, field: &str, slot: Slot) -> Result<Slot, Error> {
        let entity = self.object(handle)?.entity.clone();
        let prop = entity
            .property(field)
            .ok_or_else(|| ResolutionError::unknown_property(&entity.name, field))?;
        if prop.is_builtin() {
            return Err(Error::InvalidData(format!(
                "{}.{} is managed by the store",
                entity.name, field
            )));
        }
        let targets: &[Handle] = match &slot {
            Slot::Ref(Some(target)) => std::slice::from_ref(target),
            Slot::Many(members) => members,
            _ => &[],
        };
        if let Some(&foreign) = targets.iter().find(|h| h.0 >= self.objects.len()) {
            return Err(unknown_handle(foreign));
        }
        let slot = match (&prop.kind, slot) {
            (PropertyKind::Reference { .. }, slot @ Slot::Ref(_)) => slot,
            (PropertyKind::Collection { .. }, slot @ Slot::Many(_)) => slot,
            (PropertyKind::Scalar { .. } | PropertyKind::Enum { .. }, Slot::Value(v)) => {
                Slot::Value(prop.coerce(v)?)
            }
            (_, slot) => {
                return Err(Error::InvalidData(format!(
                    "{:?} does not fit {}.{}",
                    slot, entity.name, field
                )));
            }
        };
        self.materialize(handle, field)?;
        Ok(self
            .object_mut(handle)?
            .slots
            .insert(field.to_string(), slot)
            .unwrap_or(Slot::Value(Value::Null)))
    }

    /// Scalar view of a property: references as ids, collections as id lists.
    pub fn value(&mut self, handle: Handle, field: &str) -> Result<Value, Error> {
        Ok(match self.slot(handle, field)? {
            Slot::Value(v) => v,
            Slot::Ref(r) => r.and_then(|h| self.id(h)).map(Value::Int).unwrap_or(Value::Null),
            Slot::Many(members) => Value::List(
                members
                    .into_iter()
                    .map(|h| self.id(h).map(Value::Int).unwrap_or(Value::Null))
                    .collect(),
            ),
        })
    }

    /// Target of a reference property.
    pub fn reference(&mut self, handle: Handle, field: &str) -> Result<Option<Handle>, Error> {
        match self.slot(handle, field)? {
            Slot::Ref(r) => Ok(r),
            _ => Err(Error::InvalidData(format!("'{}' is not a reference", field))),
        }
    }

    /// Members of a collection property.
    pub fn collection(&mut self, handle: Handle, field: &str) -> Result<Vec<Handle>, Error> {
        match self.slot(handle, field)? {
            Slot::Many(members) => Ok(members),
            _ => Err(Error::InvalidData(format!("'{}' is not a collection", field))),
        }
    }

    /// Schedule an object for deletion.
    pub fn delete(&mut self, handle: Handle) -> Result<(), Error> {
        self.object_mut(handle)?.deleted = true;
        Ok(())
    }

    /// Record that `handle` was removed from an owned collection whose
    /// back-reference is `back_ref`. Unless it is re-attached before commit
    /// it is deleted then.
    pub fn mark_orphan(&mut self, handle: Handle, back_ref: &str) {
        self.orphans.push((handle, back_ref.to_string()));
    }

    /// Fields of an object in stored form.
    pub fn stored_fields(&self, handle: Handle) -> Result<ValueMap, Error> {
        let object = self.object(handle)?;
        let mut fields = object.stored.clone();
        for (name, slot) in &object.slots {
            let Some(prop) = object.entity.property(name) else {
                continue;
            };
            if !prop.is_stored() || prop.is_builtin() {
                continue;
            }
            let value = match slot {
                Slot::Value(v) => v.clone(),
                Slot::Ref(r) => r
                    .and_then(|h| self.id(h))
                    .map(Value::Int)
                    .unwrap_or(Value::Null),
                Slot::Many(members) => Value::List(
                    members
                        .iter()
                        .filter_map(|&h| self.id(h))
                        .map(Value::Int)
                        .collect(),
                ),
            };
            fields.insert(name.clone(), value);
        }
        Ok(fields)
    }

    /// Write every change atomically.
    pub fn commit(mut self) -> Result<CommitSummary, Error> {
        self.link_back_references()?;
        if self.delete_orphans {
            for (handle, back_ref) in std::mem::take(&mut self.orphans) {
                if self.slot(handle, &back_ref)? == Slot::Ref(None) {
                    self.object_mut(handle)?.deleted = true;
                }
            }
        }

        let engine = self.engine;
        let mut summary = CommitSummary::default();
        for (i, object) in self.objects.iter_mut().enumerate() {
            if object.deleted {
                continue;
            }
            let id = match object.id {
                Some(id) => id,
                None => {
                    let id = engine.next_id()?;
                    object.id = Some(id);
                    id
                }
            };
            summary.assigned.insert(Handle(i), id);
        }

        let writes = self.plan_writes()?;
        if writes.is_empty() {
            return Ok(summary);
        }

        let result: Result<(), TransactionError<Error>> =
            engine.data_tree().transaction(|tx| {
                for write in &writes {
                    match write {
                        Write::Insert { key, bytes } => {
                            tx.insert(key.as_slice(), bytes.as_slice())?;
                        }
                        Write::Update {
                            entity,
                            id,
                            key,
                            expected,
                            fields,
                        } => {
                            let current = match tx.get(key.as_slice())? {
                                Some(bytes) => Record::from_bytes(&bytes)
                                    .map_err(ConflictableTransactionError::Abort)?,
                                None => {
                                    return Err(ConflictableTransactionError::Abort(
                                        Error::conflict(entity.as_str(), *id),
                                    ))
                                }
                            };
                            if current.version != *expected {
                                return Err(ConflictableTransactionError::Abort(Error::conflict(
                                    entity.as_str(),
                                    *id,
                                )));
                            }
                            let next = current
                                .next(fields)
                                .and_then(|r| r.to_bytes())
                                .map_err(ConflictableTransactionError::Abort)?;
                            tx.insert(key.as_slice(), next)?;
                        }
                        Write::Delete {
                            entity,
                            id,
                            key,
                            expected,
                        } => {
                            let current = match tx.get(key.as_slice())? {
                                Some(bytes) => Record::from_bytes(&bytes)
                                    .map_err(ConflictableTransactionError::Abort)?,
                                None => continue,
                            };
                            if current.version != *expected {
                                return Err(ConflictableTransactionError::Abort(Error::conflict(
                                    entity.as_str(),
                                    *id,
                                )));
                            }
                            tx.remove(key.as_slice())?;
                        }
                    }
                }
                Ok(())
            });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(Error::Storage(e)),
        }

        for write in &writes {
            match write {
                Write::Insert { .. } => summary.inserted += 1,
                Write::Update { .. } => summary.updated += 1,
                Write::Delete { .. } => summary.deleted += 1,
            }
        }
        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "committed unit of work"
        );
        Ok(summary)
    }

    /// Point members of mapped collections back at their owner.
    fn link_back_references(&mut self) -> Result<(), Error> {
        let mut links = Vec::new();
        for (i, object) in self.objects.iter().enumerate() {
            if object.deleted {
                continue;
            }
            for (name, slot) in &object.slots {
                let Slot::Many(members) = slot else { continue };
                let Some(mapped_by) = object.entity.property(name).and_then(|p| p.mapped_by())
                else {
                    continue;
                };
                for &member in members {
                    links.push((member, mapped_by.to_string(), Handle(i)));
                }
            }
        }
        for (member, mapped_by, owner) in links {
            if self.slot(member, &mapped_by)? != Slot::Ref(Some(owner)) {
                self.objects[member.0]
                    .slots
                    .insert(mapped_by, Slot::Ref(Some(owner)));
            }
        }
        Ok(())
    }

    fn plan_writes(&self) -> Result<Vec<Write>, Error> {
        let mut writes = Vec::new();
        for (i, object) in self.objects.iter().enumerate() {
            let Some(id) = object.id else { continue };
            let key = EntityKey::new(object.entity.name.as_str(), id).encode();
            match (object.deleted, object.loaded_version) {
                (true, Some(expected)) => writes.push(Write::Delete {
                    entity: object.entity.name.clone(),
                    id,
                    key,
                    expected,
                }),
                (true, None) => {}
                (false, None) => {
                    let record = Record::new(&self.stored_fields(Handle(i))?)?;
                    writes.push(Write::Insert {
                        key,
                        bytes: record.to_bytes()?,
                    });
                }
                (false, Some(expected)) => {
                    let fields = self.stored_fields(Handle(i))?;
                    if !same_fields(&fields, &object.stored) {
                        writes.push(Write::Update {
                            entity: object.entity.name.clone(),
                            id,
                            key,
                            expected,
                            fields,
                        });
                    }
                }
            }
        }
        Ok(writes)
    }
}

fn unknown_handle(handle: Handle) -> Error {
    Error::InvalidData(format!("{:?} does not belong to this unit of work", handle))
}

/// Field maps are equal when they agree on every non-null value.
fn same_fields(a: &ValueMap, b: &ValueMap) -> bool {
    let non_null = |m: &ValueMap| -> ValueMap {
        m.iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };
    Value::Map(non_null(a)).loosely_equals(&Value::Map(non_null(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PropertyDescriptor, ScalarType, SchemaBundle};
    use crate::storage::StorageConfig;
    use entigraph_proto::value_map;

    fn engine() -> StorageEngine {
        let bundle = SchemaBundle::new()
            .with_entity(
                EntityDef::new("Order")
                    .with_property(PropertyDescriptor::scalar("total", ScalarType::Float64))
                    .with_property(PropertyDescriptor::reference("customer", "Customer"))
                    .with_property(
                        PropertyDescriptor::one_to_many("lines", "Line", "order").owned(),
                    ),
            )
            .with_entity(
                EntityDef::new("Line")
                    .with_property(PropertyDescriptor::reference("order", "Order"))
                    .with_property(PropertyDescriptor::scalar("qty", ScalarType::Int64)),
            )
            .with_entity(
                EntityDef::new("Customer")
                    .with_property(PropertyDescriptor::scalar("name", ScalarType::String)),
            );
        let registry = Arc::new(Registry::build(bundle).unwrap());
        StorageEngine::open(&StorageConfig::temporary(), registry).unwrap()
    }

    #[test]
    fn test_identity_map() {
        let engine = engine();
        let row = engine.insert("Customer", value_map! { "name" => "Acme" }).unwrap();
        let mut uow = engine.unit_of_work();
        let a = uow.find("Customer", row.id).unwrap().unwrap();
        let b = uow.find("Customer", row.id).unwrap().unwrap();
        assert_eq!(a, b);
        assert!(uow.find("Customer", row.id + 50).unwrap().is_none());
        assert!(uow.load("Customer", row.id + 50).unwrap_err().is_conflict());
    }

    #[test]
    fn test_create_with_relations_and_commit() {
        let engine = engine();
        let mut uow = engine.unit_of_work();
        let customer = uow.create("Customer").unwrap();
        uow.set(customer, "name", Slot::Value("Acme".into())).unwrap();
        let order = uow.create("Order").unwrap();
        uow.set(order, "customer", Slot::Ref(Some(customer))).unwrap();
        let line = uow.create("Line").unwrap();
        uow.set(line, "qty", Slot::Value("3".into())).unwrap();
        uow.set(order, "lines", Slot::Many(vec![line])).unwrap();

        let summary = uow.commit().unwrap();
        assert_eq!(summary.inserted, 3);
        let order_id = summary.id_of(order).unwrap();
        let line_id = summary.id_of(line).unwrap();

        let stored_order = engine.get("Order", order_id).unwrap().unwrap();
        assert_eq!(
            stored_order.reference_id("customer"),
            summary.id_of(customer)
        );
        let stored_line = engine.get("Line", line_id).unwrap().unwrap();
        assert_eq!(stored_line.reference_id("order"), Some(order_id));
        assert_eq!(stored_line.get("qty"), Value::Int(3));
    }

    #[test]
    fn test_unchanged_objects_are_not_written() {
        let engine = engine();
        let row = engine.insert("Customer", value_map! { "name" => "Acme" }).unwrap();
        let mut uow = engine.unit_of_work();
        let handle = uow.load("Customer", row.id).unwrap();
        uow.set(handle, "name", Slot::Value("Acme".into())).unwrap();
        let summary = uow.commit().unwrap();
        assert!(summary.is_empty());
        assert_eq!(engine.current_version("Customer", row.id).unwrap(), Some(0));
    }

    #[test]
    fn test_stale_version_aborts_commit() {
        let engine = engine();
        let a = engine.insert("Customer", value_map! { "name" => "A" }).unwrap();
        let b = engine.insert("Customer", value_map! { "name" => "B" }).unwrap();

        let mut first = engine.unit_of_work();
        let ha = first.load("Customer", a.id).unwrap();
        let hb = first.load("Customer", b.id).unwrap();
        first.set(ha, "name", Slot::Value("A2".into())).unwrap();
        first.set(hb, "name", Slot::Value("B2".into())).unwrap();

        let mut second = engine.unit_of_work();
        let hb2 = second.load("Customer", b.id).unwrap();
        second.set(hb2, "name", Slot::Value("B3".into())).unwrap();
        second.commit().unwrap();

        let err = first.commit().unwrap_err();
        assert!(matches!(err, Error::ConcurrencyConflict { ref entity, id } if entity == "Customer" && id == b.id));
        // nothing from the failed commit landed
        assert_eq!(engine.get("Customer", a.id).unwrap().unwrap().get("name"), Value::from("A"));
        assert_eq!(engine.get("Customer", b.id).unwrap().unwrap().get("name"), Value::from("B3"));
    }

    #[test]
    fn test_orphans_deleted_unless_reattached() {
        let engine = engine();
        let order = engine.insert("Order", ValueMap::new()).unwrap();
        let l1 = engine.insert("Line", value_map! { "order" => order.id }).unwrap();
        let l2 = engine.insert("Line", value_map! { "order" => order.id }).unwrap();

        let mut uow = engine.unit_of_work();
        let ho = uow.load("Order", order.id).unwrap();
        let lines = uow.collection(ho, "lines").unwrap();
        assert_eq!(lines.len(), 2);
        let (keep, drop) = (lines[0], lines[1]);
        uow.set(ho, "lines", Slot::Many(vec![keep])).unwrap();
        uow.set(drop, "order", Slot::Ref(None)).unwrap();
        uow.mark_orphan(drop, "order");
        let summary = uow.commit().unwrap();
        assert_eq!(summary.deleted, 1);

        assert!(engine.get("Line", l1.id).unwrap().is_some());
        assert!(engine.get("Line", l2.id).unwrap().is_none());
    }

    #[test]
    fn test_kept_orphans_lose_back_reference() {
        let engine = engine();
        let order = engine.insert("Order", ValueMap::new()).unwrap();
        let line = engine.insert("Line", value_map! { "order" => order.id }).unwrap();

        let mut uow = engine.unit_of_work();
        uow.set_delete_orphans(false);
        let ho = uow.load("Order", order.id).unwrap();
        let hl = uow.collection(ho, "lines").unwrap()[0];
        uow.set(ho, "lines", Slot::Many(vec![])).unwrap();
        uow.set(hl, "order", Slot::Ref(None)).unwrap();
        uow.mark_orphan(hl, "order");
        uow.commit().unwrap();

        let stored = engine.get("Line", line.id).unwrap().unwrap();
        assert_eq!(stored.reference_id("order"), None);
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn test_set_rejects_mismatched_slots() {
        let engine = engine();
        let mut uow = engine.unit_of_work();
        let order = uow.create("Order").unwrap();
        assert!(uow.set(order, "customer", Slot::Value(Value::Int(1))).is_err());
        assert!(uow.set(order, "id", Slot::Value(Value::Int(1))).is_err());
        assert!(uow.set(order, "nope", Slot::Value(Value::Null)).is_err());
    }

    #[test]
    fn test_deleting_a_new_object_writes_nothing() {
        let engine = engine();
        let mut uow = engine.unit_of_work();
        let order = uow.create("Order").unwrap();
        assert!(uow.is_new(order).unwrap());
        uow.delete(order).unwrap();
        assert!(uow.is_deleted(order).unwrap());
        let summary = uow.commit().unwrap();
        assert!(summary.is_empty());
        assert_eq!(summary.id_of(order), None);
    }

    #[test]
    fn test_handle_from_another_unit_of_work() {
        let engine = engine();
        let mut other = engine.unit_of_work();
        other.create("Order").unwrap();
        let foreign = other.create("Order").unwrap();

        let mut uow = engine.unit_of_work();
        let order = uow.create("Order").unwrap();
        assert!(matches!(uow.slot(foreign, "total"), Err(Error::InvalidData(_))));
        assert!(matches!(uow.delete(foreign), Err(Error::InvalidData(_))));
        assert!(matches!(uow.entity(foreign), Err(Error::InvalidData(_))));
        assert!(matches!(
            uow.set(order, "lines", Slot::Many(vec![foreign])),
            Err(Error::InvalidData(_))
        ));
        assert_eq!(uow.id(foreign), None);
    }
}
