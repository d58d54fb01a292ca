//! Merging nested payloads into a unit of work.

use std::collections::HashSet;

use entigraph_proto::{Value, ValueMap};
use tracing::debug;

use super::session::Session;
use crate::catalog::{EntityDef, PropertyDescriptor, PropertyKind, ID, VERSION};
use crate::config::ReconcileConfig;
use crate::error::Error;
use crate::storage::{EntityId, EntityLoader, Handle, Slot, UnitOfWork};

/// Outcome of reconciling one payload node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    /// The object the payload was merged into.
    pub handle: Handle,
    /// Whether any field of this object changed value.
    pub changed: bool,
}

/// Merges nested value maps into the objects of a [`UnitOfWork`].
///
/// For each payload node:
///
/// - no `id`, or an `id <= 0`, creates a new object;
/// - an `id` without `version` links the stored object without touching its
///   fields, apart from the volatile selection marker;
/// - an `id` with a `version` merges the present fields into the stored
///   object. Absent fields are left alone; an explicit `null` clears.
///
/// When a merged object changes, the payload `version` must match the
/// stored one or the edit fails with [`Error::ConcurrencyConflict`]. An
/// object whose fields all hold their current values is not checked.
pub struct Reconciler<'u, 'e> {
    uow: &'u mut UnitOfWork<'e>,
    config: ReconcileConfig,
    session: Session,
}

impl<'u, 'e> Reconciler<'u, 'e> {
    /// Create a reconciler writing into `uow`.
    pub fn new(uow: &'u mut UnitOfWork<'e>, config: ReconcileConfig) -> Self {
        uow.set_delete_orphans(config.delete_orphans);
        Self {
            uow,
            config,
            session: Session::new(),
        }
    }

    /// The session state of this reconciler.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Selection marker the payload set on a linked object.
    pub fn selected(&self, handle: Handle) -> Option<bool> {
        self.session.selected(handle)
    }

    /// Merge a payload for `entity`.
    pub fn edit(&mut self, entity: &str, values: &ValueMap) -> Result<Reconciled, Error> {
        let def = self.uow.registry().get(entity)?.clone();
        let id = values.get(ID).and_then(Value::as_i64).filter(|id| *id > 0);
        let version = match values.get(VERSION) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_i64().ok_or_else(|| {
                Error::InvalidData(format!("{}.version must be a number, got {}", def.name, v))
            })?),
        };

        match (id, version) {
            (None, _) => {
                let handle = self.uow.create(&def.name)?;
                self.merge(handle, &def, values)?;
                debug!(entity = %def.name, "reconciled new object");
                Ok(Reconciled {
                    handle,
                    changed: true,
                })
            }
            (Some(id), None) => {
                let handle = self.uow.load(&def.name, id)?;
                if let Some(marker) = values.get(&self.config.selected_marker).and_then(Value::as_bool) {
                    self.session.mark_selected(handle, marker);
                }
                Ok(Reconciled {
                    handle,
                    changed: false,
                })
            }
            (Some(id), Some(version)) => {
                let handle = self.uow.load(&def.name, id)?;
                if !self.session.touch(&def.name, id) {
                    return Ok(Reconciled {
                        handle,
                        changed: false,
                    });
                }
                let changed = self.merge(handle, &def, values)?;
                if !changed {
                    // a later node for the same id may still carry edits
                    self.session.untouch(&def.name, id);
                }
                if changed && self.uow.version(handle) != Some(version) {
                    debug!(
                        entity = %def.name,
                        id,
                        payload = version,
                        stored = ?self.uow.version(handle),
                        "stale payload version"
                    );
                    return Err(Error::conflict(def.name.as_str(), id));
                }
                debug!(entity = %def.name, id, changed, "reconciled object");
                Ok(Reconciled { handle, changed })
            }
        }
    }

    /// Apply the present fields of `values` to `handle`. Returns whether any
    /// field changed value.
    fn merge(&mut self, handle: Handle, def: &EntityDef, values: &ValueMap) -> Result<bool, Error> {
        let mut changed = false;
        for (name, value) in values {
            if name == ID || name == VERSION || *name == self.config.selected_marker {
                continue;
            }
            let Some(prop) = def.property(name) else {
                debug!(entity = %def.name, field = %name, "ignoring unknown field");
                continue;
            };
            if prop.is_computed() {
                continue;
            }
            changed |= match &prop.kind {
                PropertyKind::Reference { target } => self.merge_reference(handle, prop, target, value)?,
                PropertyKind::Collection { target, .. } => {
                    self.merge_collection(handle, prop, target, value)?
                }
                PropertyKind::Scalar { .. } | PropertyKind::Enum { .. } => {
                    let value = prop.coerce(value.clone())?;
                    let current = self.uow.value(handle, name)?;
                    if same_value(&current, &value) {
                        false
                    } else {
                        self.uow.set(handle, name, Slot::Value(value))?;
                        true
                    }
                }
            };
        }
        Ok(changed)
    }

    fn merge_reference(
        &mut self,
        handle: Handle,
        prop: &PropertyDescriptor,
        target: &str,
        value: &Value,
    ) -> Result<bool, Error> {
        let next = match value {
            Value::Null => None,
            other => Some(self.element(target, other)?),
        };
        let current = self.uow.reference(handle, &prop.name)?;
        if current == next {
            return Ok(false);
        }
        self.uow.set(handle, &prop.name, Slot::Ref(next))?;
        Ok(true)
    }

    fn merge_collection(
        &mut self,
        handle: Handle,
        prop: &PropertyDescriptor,
        target: &str,
        value: &Value,
    ) -> Result<bool, Error> {
        let items = match value {
            Value::Null => &[][..],
            Value::List(items) => items.as_slice(),
            other => {
                return Err(Error::InvalidData(format!(
                    "{} expects a list, got {}",
                    prop.name,
                    other.type_name()
                )))
            }
        };

        let mut next = Vec::with_capacity(items.len());
        for item in items {
            let member = match (item, prop.mapped_by()) {
                (Value::Map(map), Some(back_ref)) if map.contains_key(back_ref) => {
                    let mut map = map.clone();
                    map.remove(back_ref);
                    self.edit(target, &map)?.handle
                }
                _ => self.element(target, item)?,
            };
            if !next.contains(&member) {
                next.push(member);
            }
        }

        let current = self.uow.collection(handle, &prop.name)?;
        let before: HashSet<Handle> = current.iter().copied().collect();
        let after: HashSet<Handle> = next.iter().copied().collect();
        if before == after {
            return Ok(false);
        }

        // membership of a mapped collection lives on the members
        if let Some(back_ref) = prop.mapped_by() {
            for &removed in before.difference(&after) {
                if self.uow.reference(removed, back_ref)? == Some(handle) {
                    self.uow.set(removed, back_ref, Slot::Ref(None))?;
                }
                if prop.is_owned() {
                    self.uow.mark_orphan(removed, back_ref);
                }
            }
        }
        self.uow.set(handle, &prop.name, Slot::Many(next))?;
        Ok(true)
    }

    /// Resolve a relation element: maps are reconciled, numbers are ids.
    fn element(&mut self, target: &str, value: &Value) -> Result<Handle, Error> {
        match value {
            Value::Map(map) => Ok(self.edit(target, map)?.handle),
            other => match other.as_i64() {
                Some(id) => self.uow.load(target, id),
                None => Err(Error::InvalidData(format!(
                    "cannot read {} as a reference to {}",
                    other.type_name(),
                    target
                ))),
            },
        }
    }
}

/// Check a payload against the store without writing.
///
/// Every node with an `id` and a `version` must match the stored version,
/// and a collection in such a node must not list fewer members than are
/// stored.
pub fn verify(loader: &dyn EntityLoader, entity: &str, values: &ValueMap) -> Result<(), Error> {
    let def = loader.registry().get(entity)?.clone();
    let id = values.get(ID).and_then(Value::as_i64).filter(|id| *id > 0);
    let version = values.get(VERSION).and_then(Value::as_i64);

    let versioned = match (id, version) {
        (Some(id), Some(version)) => {
            check_version(loader, &def.name, id, version)?;
            Some(id)
        }
        _ => None,
    };

    for (name, value) in values {
        let Some(prop) = def.property(name) else {
            continue;
        };
        let Some(target) = prop.target() else {
            continue;
        };
        match value {
            Value::Map(map) => verify(loader, target, map)?,
            Value::List(items) => {
                if let Some(owner) = versioned {
                    let stored = loader.fetch_collection(&def, prop, owner)?;
                    if items.len() < stored.len() {
                        return Err(Error::conflict(def.name.as_str(), owner));
                    }
                }
                for item in items {
                    if let Value::Map(map) = item {
                        verify(loader, target, map)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_version(loader: &dyn EntityLoader, entity: &str, id: EntityId, version: i64) -> Result<(), Error> {
    match loader.find(entity, id)? {
        Some(row) if row.version == version => Ok(()),
        _ => Err(Error::conflict(entity, id)),
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a.is_null(), b.is_null()) {
        (true, true) => true,
        (false, false) => a.loosely_equals(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{Registry, ScalarType, SchemaBundle};
    use crate::storage::{StorageConfig, StorageEngine};
    use entigraph_proto::value_map;

    fn engine() -> StorageEngine {
        let bundle = SchemaBundle::new()
            .with_entity(
                EntityDef::new("Order")
                    .with_property(PropertyDescriptor::scalar("total", ScalarType::Float64))
                    .with_property(PropertyDescriptor::reference("customer", "Customer"))
                    .with_property(PropertyDescriptor::reference("billing", "Customer"))
                    .with_property(PropertyDescriptor::one_to_many("lines", "Line", "order").owned()),
            )
            .with_entity(
                EntityDef::new("Line")
                    .with_property(PropertyDescriptor::reference("order", "Order"))
                    .with_property(PropertyDescriptor::scalar("qty", ScalarType::Int64)),
            )
            .with_entity(
                EntityDef::new("Customer")
                    .with_property(PropertyDescriptor::scalar("name", ScalarType::String))
                    .with_property(PropertyDescriptor::reference("favourite", "Order")),
            );
        let registry = Arc::new(Registry::build(bundle).unwrap());
        StorageEngine::open(&StorageConfig::temporary(), registry).unwrap()
    }

    #[test]
    fn test_create_nested() {
        let engine = engine();
        let mut uow = engine.unit_of_work();
        let mut reconciler = Reconciler::new(&mut uow, ReconcileConfig::default());
        let result = reconciler
            .edit(
                "Order",
                &value_map! {
                    "total" => "12.5",
                    "customer" => value_map! { "name" => "Acme" },
                    "lines" => vec![value_map! { "qty" => 2 }, value_map! { "id" => 0, "qty" => 3 }],
                },
            )
            .unwrap();
        assert!(result.changed);
        let summary = uow.commit().unwrap();
        assert_eq!(summary.inserted, 4);

        let order_id = summary.id_of(result.handle).unwrap();
        let order = engine.get("Order", order_id).unwrap().unwrap();
        assert_eq!(order.get("total"), Value::Float(12.5));
        assert!(order.reference_id("customer").is_some());
        let lines = engine.scan("Line").unwrap();
        assert!(lines.iter().all(|l| l.reference_id("order") == Some(order_id)));
    }

    #[test]
    fn test_link_only_keeps_fields_and_marks_selection() {
        let engine = engine();
        let customer = engine.insert("Customer", value_map! { "name" => "Acme" }).unwrap();
        let mut uow = engine.unit_of_work();
        let mut reconciler = Reconciler::new(&mut uow, ReconcileConfig::default());
        let result = reconciler
            .edit(
                "Customer",
                &value_map! { "id" => customer.id, "name" => "Ignored", "selected" => true },
            )
            .unwrap();
        assert!(!result.changed);
        assert_eq!(reconciler.selected(result.handle), Some(true));
        assert!(uow.commit().unwrap().is_empty());
        assert_eq!(engine.get("Customer", customer.id).unwrap().unwrap().get("name"), Value::from("Acme"));
    }

    #[test]
    fn test_identical_payload_is_unchanged() {
        let engine = engine();
        let customer = engine.insert("Customer", value_map! { "name" => "Acme" }).unwrap();
        let payload = value_map! { "id" => customer.id, "version" => 5, "name" => "Acme" };
        let mut uow = engine.unit_of_work();
        let mut reconciler = Reconciler::new(&mut uow, ReconcileConfig::default());
        // stale version, but nothing changes so nothing is checked
        assert!(!reconciler.edit("Customer", &payload).unwrap().changed);
    }

    #[test]
    fn test_stale_version_conflicts() {
        let engine = engine();
        let customer = engine.insert("Customer", value_map! { "name" => "Acme" }).unwrap();
        let mut uow = engine.unit_of_work();
        let mut reconciler = Reconciler::new(&mut uow, ReconcileConfig::default());
        let err = reconciler
            .edit(
                "Customer",
                &value_map! { "id" => customer.id, "version" => 1, "name" => "Other" },
            )
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_cycle_is_a_back_reference() {
        let engine = engine();
        let order = engine.insert("Order", value_map! { "total" => 1.0 }).unwrap();
        let customer = engine
            .insert("Customer", value_map! { "name" => "Acme", "favourite" => order.id })
            .unwrap();
        let payload = value_map! {
            "id" => order.id,
            "version" => 0,
            "customer" => value_map! {
                "id" => customer.id,
                "version" => 0,
                "name" => "Acme2",
                "favourite" => value_map! { "id" => order.id, "version" => 0, "total" => 99.0 },
            },
        };
        let mut uow = engine.unit_of_work();
        let mut reconciler = Reconciler::new(&mut uow, ReconcileConfig::default());
        let result = reconciler.edit("Order", &payload).unwrap();
        // the order itself is unchanged; its nested occurrence was skipped
        assert!(!result.changed);
        assert_eq!(reconciler.session().touched_count(), 1);
        uow.commit().unwrap();

        let stored = engine.get("Order", order.id).unwrap().unwrap();
        assert_eq!(stored.reference_id("customer"), Some(customer.id));
        assert_eq!(stored.get("total"), Value::Float(1.0));
        let customer = engine.get("Customer", customer.id).unwrap().unwrap();
        assert_eq!(customer.get("name"), Value::from("Acme2"));
    }

    #[test]
    fn test_unchanged_occurrence_does_not_hide_later_edits() {
        let engine = engine();
        let customer = engine.insert("Customer", value_map! { "name" => "Acme" }).unwrap();
        let payload = value_map! {
            "total" => 3.0,
            "billing" => value_map! { "id" => customer.id, "version" => 0, "name" => "Acme" },
            "customer" => value_map! { "id" => customer.id, "version" => 0, "name" => "Renamed" },
        };
        let mut uow = engine.unit_of_work();
        let mut reconciler = Reconciler::new(&mut uow, ReconcileConfig::default());
        reconciler.edit("Order", &payload).unwrap();
        assert!(reconciler.session().is_touched("Customer", customer.id));
        uow.commit().unwrap();

        let stored = engine.get("Customer", customer.id).unwrap().unwrap();
        assert_eq!(stored.get("name"), Value::from("Renamed"));
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn test_collection_element_back_reference_is_ignored() {
        let engine = engine();
        let payload = value_map! {
            "total" => 10.0,
            "lines" => vec![value_map! { "qty" => 1, "order" => value_map! { "total" => 5.0 } }],
        };
        let mut uow = engine.unit_of_work();
        let mut reconciler = Reconciler::new(&mut uow, ReconcileConfig::default());
        let result = reconciler.edit("Order", &payload).unwrap();
        let summary = uow.commit().unwrap();
        assert_eq!(summary.inserted, 2);

        assert_eq!(engine.scan("Order").unwrap().len(), 1);
        let line = &engine.scan("Line").unwrap()[0];
        assert_eq!(line.reference_id("order"), summary.id_of(result.handle));
    }

    #[test]
    fn test_missing_row_is_a_conflict() {
        let engine = engine();
        let mut uow = engine.unit_of_work();
        let mut reconciler = Reconciler::new(&mut uow, ReconcileConfig::default());
        let err = reconciler
            .edit("Customer", &value_map! { "id" => 404, "version" => 0, "name" => "x" })
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_verify() {
        let engine = engine();
        let order = engine.insert("Order", value_map! { "total" => 1.0 }).unwrap();
        engine
            .insert("Line", value_map! { "order" => order.id, "qty" => 1 })
            .unwrap();
        engine
            .insert("Line", value_map! { "order" => order.id, "qty" => 2 })
            .unwrap();

        assert!(verify(&engine, "Order", &value_map! { "id" => order.id, "version" => 0 }).is_ok());
        assert!(verify(&engine, "Order", &value_map! { "id" => order.id, "version" => 1 })
            .unwrap_err()
            .is_conflict());
        let shrunk = value_map! {
            "id" => order.id,
            "version" => 0,
            "lines" => vec![value_map! { "qty" => 1 }],
        };
        assert!(verify(&engine, "Order", &shrunk).unwrap_err().is_conflict());
    }
}
