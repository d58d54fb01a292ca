//! Lazy view over a partial value map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use entigraph_proto::{Value, ValueMap};
use tracing::trace;

use crate::catalog::{EntityDef, PropertyDescriptor, ID, VERSION};
use crate::config::ReconcileConfig;
use crate::error::{Error, ResolutionError};
use crate::storage::{EntityLoader, PersistedEntity};

enum Linked<'a> {
    One(Option<Box<ContextView<'a>>>),
    Many(Vec<ContextView<'a>>),
}

/// Read access to an entity as a client currently sees it.
///
/// A view wraps the value map a client sent. Fields present in the map win;
/// any other field is read from the persisted row, which is fetched by id
/// at most once. Relations are exposed as further views, built on first
/// access and kept. Computed fields are derived from their dependencies,
/// each read the same way, and memoized until [`set`](Self::set) changes a
/// dependency.
///
/// A related map that carries an id but no `version` only links the stored
/// row: its other fields are ignored, apart from the selection marker.
pub struct ContextView<'a> {
    loader: &'a dyn EntityLoader,
    entity: Arc<EntityDef>,
    values: ValueMap,
    persisted: Option<Option<PersistedEntity>>,
    linked: HashMap<String, Linked<'a>>,
    computed: HashMap<String, Value>,
    selected_marker: String,
}

impl<'a> ContextView<'a> {
    /// Create a view of `values` as an instance of `entity`.
    pub fn new(loader: &'a dyn EntityLoader, entity: &str, values: ValueMap) -> Result<Self, Error> {
        Ok(Self {
            loader,
            entity: loader.registry().get(entity)?.clone(),
            values,
            persisted: None,
            linked: HashMap::new(),
            computed: HashMap::new(),
            selected_marker: ReconcileConfig::default().selected_marker,
        })
    }

    /// Use `marker` as the name of the selection field.
    pub fn with_selected_marker(mut self, marker: impl Into<String>) -> Self {
        self.selected_marker = marker.into();
        self
    }

    /// The viewed entity type.
    pub fn entity(&self) -> &EntityDef {
        &self.entity
    }

    /// Id from the map, if it names a stored row.
    pub fn id(&self) -> Option<i64> {
        self.values.get(ID).and_then(Value::as_i64).filter(|id| *id > 0)
    }

    /// The values sent by the client.
    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    fn property(&self, field: &str) -> Result<PropertyDescriptor, Error> {
        self.entity
            .property(field)
            .cloned()
            .ok_or_else(|| ResolutionError::unknown_property(&self.entity.name, field).into())
    }

    fn persisted(&mut self) -> Result<Option<&PersistedEntity>, Error> {
        if self.persisted.is_none() {
            let row = match self.id() {
                Some(id) => {
                    trace!(entity = %self.entity.name, id, "loading persisted instance");
                    self.loader.find(&self.entity.name, id)?
                }
                None => None,
            };
            self.persisted = Some(row);
        }
        Ok(self.persisted.as_ref().and_then(Option::as_ref))
    }

    /// Value of a stored field: the map first, else the persisted row.
    /// Relations come back as sent, or as ids when read from the store.
    fn raw(&mut self, prop: &PropertyDescriptor) -> Result<Value, Error> {
        if let Some(value) = self.values.get(&prop.name) {
            return Ok(value.clone());
        }
        let loader = self.loader;
        let entity = self.entity.clone();
        let Some(row) = self.persisted()? else {
            return Ok(Value::Null);
        };
        if prop.is_collection() && prop.mapped_by().is_some() {
            let members = loader.fetch_collection(&entity, prop, row.id)?;
            return Ok(Value::List(members.into_iter().map(|m| Value::Int(m.id)).collect()));
        }
        Ok(row.get(&prop.name))
    }

    /// Value of a field. Computed fields are derived from their dependencies.
    pub fn get(&mut self, field: &str) -> Result<Value, Error> {
        let prop = self.property(field)?;
        if !prop.is_computed() {
            return self.raw(&prop);
        }
        if let Some(value) = self.computed.get(field) {
            return Ok(value.clone());
        }

        let compute = prop
            .computed
            .as_ref()
            .and_then(|c| c.compute_fn())
            .cloned()
            .ok_or_else(|| {
                Error::Unsupported(format!(
                    "{}.{} has no derivation attached",
                    self.entity.name, field
                ))
            })?;
        let mut inputs = ValueMap::new();
        for dep in prop.depends_on() {
            let value = self.get(dep)?;
            inputs.insert(dep.clone(), as_id(value));
        }
        let value = compute(&inputs);
        self.computed.insert(field.to_string(), value.clone());
        Ok(value)
    }

    /// View of the target of a reference, or `None` when it is null.
    pub fn reference(&mut self, field: &str) -> Result<Option<&mut ContextView<'a>>, Error> {
        let prop = self.property(field)?;
        let Some(target) = prop.target().filter(|_| prop.is_reference()).map(str::to_string) else {
            return Err(Error::InvalidData(format!("'{}' is not a reference", field)));
        };
        if !self.linked.contains_key(field) {
            let view = match self.raw(&prop)? {
                Value::Null => None,
                value => Some(Box::new(self.link(&target, value)?)),
            };
            self.linked.insert(field.to_string(), Linked::One(view));
        }
        match self.linked.get_mut(field) {
            Some(Linked::One(view)) => Ok(view.as_deref_mut()),
            _ => Ok(None),
        }
    }

    /// Views of the members of a collection.
    pub fn collection(&mut self, field: &str) -> Result<&mut [ContextView<'a>], Error> {
        let prop = self.property(field)?;
        let Some(target) = prop.target().filter(|_| prop.is_collection()).map(str::to_string) else {
            return Err(Error::InvalidData(format!("'{}' is not a collection", field)));
        };
        if !self.linked.contains_key(field) {
            let items = match self.raw(&prop)? {
                Value::List(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            let views = items
                .into_iter()
                .map(|item| self.link(&target, item))
                .collect::<Result<Vec<_>, _>>()?;
            self.linked.insert(field.to_string(), Linked::Many(views));
        }
        match self.linked.get_mut(field) {
            Some(Linked::Many(views)) => Ok(views.as_mut_slice()),
            _ => Ok(&mut []),
        }
    }

    fn link(&self, target: &str, value: Value) -> Result<ContextView<'a>, Error> {
        let mut values = ValueMap::new();
        match value {
            Value::Map(map) => {
                let stored = map.get(ID).and_then(Value::as_i64).filter(|id| *id > 0);
                if stored.is_none() || map.contains_key(VERSION) {
                    values = map;
                } else {
                    for key in [ID, self.selected_marker.as_str()] {
                        if let Some(value) = map.get(key) {
                            values.insert(key.to_string(), value.clone());
                        }
                    }
                }
            }
            other => {
                values.insert(ID.to_string(), other);
            }
        }
        Ok(ContextView::new(self.loader, target, values)?.with_selected_marker(self.selected_marker.clone()))
    }

    /// Write a field into the map. Linked views of the field and computed
    /// values depending on it are dropped.
    pub fn set(&mut self, field: &str, value: Value) -> Result<(), Error> {
        let prop = self.property(field)?;
        if prop.is_computed() {
            return Err(Error::InvalidData(format!(
                "{}.{} is computed",
                self.entity.name, field
            )));
        }
        self.values.insert(field.to_string(), value);
        self.linked.remove(field);
        self.invalidate(field);
        Ok(())
    }

    fn invalidate(&mut self, field: &str) {
        let mut stale: HashSet<String> = HashSet::new();
        let mut pending = vec![field.to_string()];
        while let Some(changed) = pending.pop() {
            for prop in self.entity.properties() {
                if prop.depends_on().iter().any(|d| *d == changed) && stale.insert(prop.name.clone()) {
                    pending.push(prop.name.clone());
                }
            }
        }
        for name in stale {
            self.computed.remove(&name);
        }
    }

    /// Every property as currently seen, the map first and the persisted
    /// row otherwise. The persisted version is carried over when the map
    /// has none. Computed fields are included only when asked for.
    pub fn snapshot(&mut self, include_computed: bool) -> Result<ValueMap, Error> {
        let entity = self.entity.clone();
        let mut snapshot = ValueMap::new();
        for prop in entity.properties() {
            if prop.is_computed() {
                if include_computed {
                    let value = self.get(&prop.name)?;
                    snapshot.insert(prop.name.clone(), value);
                }
                continue;
            }
            if prop.name == VERSION && !self.values.contains_key(VERSION) {
                let version = self.persisted()?.map(|row| Value::Int(row.version));
                snapshot.insert(VERSION.to_string(), version.unwrap_or(Value::Null));
                continue;
            }
            let value = self.raw(prop)?;
            snapshot.insert(prop.name.clone(), value);
        }
        Ok(snapshot)
    }
}

/// Relation values as ids.
fn as_id(value: Value) -> Value {
    match value {
        Value::Map(map) => map.get(ID).cloned().unwrap_or(Value::Null),
        Value::List(items) => Value::List(items.into_iter().map(as_id).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::catalog::{Registry, ScalarType, SchemaBundle};
    use crate::storage::EntityId;
    use entigraph_proto::value_map;

    /// In-memory loader counting lookups.
    struct Fixture {
        registry: Registry,
        rows: Vec<PersistedEntity>,
        finds: AtomicUsize,
    }

    impl EntityLoader for Fixture {
        fn registry(&self) -> &Registry {
            &self.registry
        }

        fn find(&self, entity: &str, id: EntityId) -> Result<Option<PersistedEntity>, Error> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.iter().find(|r| r.entity == entity && r.id == id).cloned())
        }

        fn fetch_collection(
            &self,
            _owner: &EntityDef,
            property: &PropertyDescriptor,
            owner_id: EntityId,
        ) -> Result<Vec<PersistedEntity>, Error> {
            let target = property.target().unwrap_or_default();
            let back = property.mapped_by().unwrap_or_default();
            Ok(self
                .rows
                .iter()
                .filter(|r| r.entity == target && r.reference_id(back) == Some(owner_id))
                .cloned()
                .collect())
        }
    }

    fn row(entity: &str, id: EntityId, version: i64, fields: ValueMap) -> PersistedEntity {
        PersistedEntity {
            entity: entity.to_string(),
            id,
            version,
            fields,
        }
    }

    fn fixture() -> Fixture {
        let registry = Registry::build(
            SchemaBundle::new()
                .with_entity(
                    EntityDef::new("Order")
                        .with_property(PropertyDescriptor::scalar("qty", ScalarType::Int64))
                        .with_property(PropertyDescriptor::scalar("price", ScalarType::Float64))
                        .with_property(
                            PropertyDescriptor::scalar("total", ScalarType::Float64).computed(
                                &["qty", "price"],
                                |deps| {
                                    match (deps["qty"].as_f64(), deps["price"].as_f64()) {
                                        (Some(q), Some(p)) => Value::Float(q * p),
                                        _ => Value::Null,
                                    }
                                },
                            ),
                        )
                        .with_property(PropertyDescriptor::reference("customer", "Customer"))
                        .with_property(PropertyDescriptor::one_to_many("lines", "Line", "order")),
                )
                .with_entity(
                    EntityDef::new("Line").with_property(PropertyDescriptor::reference("order", "Order")),
                )
                .with_entity(
                    EntityDef::new("Customer")
                        .with_property(PropertyDescriptor::scalar("name", ScalarType::String)),
                ),
        )
        .unwrap();
        Fixture {
            registry,
            rows: vec![
                row("Order", 1, 3, value_map! { "qty" => 2, "price" => 5.0, "customer" => 7 }),
                row("Customer", 7, 0, value_map! { "name" => "Acme" }),
                row("Line", 10, 1, value_map! { "order" => 1 }),
                row("Line", 11, 0, value_map! { "order" => 1 }),
            ],
            finds: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_map_first_then_persisted_once() {
        let fixture = fixture();
        let mut view = ContextView::new(&fixture, "Order", value_map! { "id" => 1, "qty" => 4 }).unwrap();
        assert_eq!(view.get("qty").unwrap(), Value::Int(4));
        assert_eq!(view.get("price").unwrap(), Value::Float(5.0));
        assert_eq!(view.get("customer").unwrap(), Value::Int(7));
        assert_eq!(fixture.finds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_computed_memo_and_invalidation() {
        let fixture = fixture();
        let mut view = ContextView::new(&fixture, "Order", value_map! { "id" => 1 }).unwrap();
        assert_eq!(view.get("total").unwrap(), Value::Float(10.0));
        view.set("qty", Value::Int(3)).unwrap();
        assert_eq!(view.get("total").unwrap(), Value::Float(15.0));
        assert!(view.set("total", Value::Float(1.0)).is_err());
    }

    #[test]
    fn test_linked_views() {
        let fixture = fixture();
        let mut view = ContextView::new(&fixture, "Order", value_map! { "id" => 1 }).unwrap();
        let customer = view.reference("customer").unwrap().unwrap();
        assert_eq!(customer.get("name").unwrap(), Value::from("Acme"));

        let lines = view.collection("lines").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].id(), Some(10));

        view.set("customer", value_map! { "name" => "New" }.into()).unwrap();
        let customer = view.reference("customer").unwrap().unwrap();
        assert_eq!(customer.get("name").unwrap(), Value::from("New"));
        assert_eq!(customer.id(), None);
    }

    #[test]
    fn test_unversioned_reference_reads_the_stored_row() {
        let fixture = fixture();
        let payload = value_map! {
            "id" => 1,
            "customer" => value_map! { "id" => 7, "name" => "Spoofed", "selected" => true },
        };
        let mut view = ContextView::new(&fixture, "Order", payload).unwrap();
        let customer = view.reference("customer").unwrap().unwrap();
        assert_eq!(customer.get("name").unwrap(), Value::from("Acme"));
        assert_eq!(customer.values().get("selected"), Some(&Value::Bool(true)));

        let versioned = value_map! {
            "customer" => value_map! { "id" => 7, "version" => 0, "name" => "Edited" },
        };
        let mut view = ContextView::new(&fixture, "Order", versioned).unwrap();
        let customer = view.reference("customer").unwrap().unwrap();
        assert_eq!(customer.get("name").unwrap(), Value::from("Edited"));
    }

    #[test]
    fn test_snapshot() {
        let fixture = fixture();
        let mut view = ContextView::new(&fixture, "Order", value_map! { "id" => 1, "qty" => 1 }).unwrap();
        let plain = view.snapshot(false).unwrap();
        assert_eq!(plain["version"], Value::Int(3));
        assert_eq!(plain["qty"], Value::Int(1));
        assert_eq!(plain["lines"], Value::List(vec![Value::Int(10), Value::Int(11)]));
        assert!(!plain.contains_key("total"));

        let full = view.snapshot(true).unwrap();
        assert_eq!(full["total"], Value::Float(5.0));
    }

    #[test]
    fn test_new_object_has_no_persisted_fallback() {
        let fixture = fixture();
        let mut view = ContextView::new(&fixture, "Order", value_map! { "qty" => 1 }).unwrap();
        assert_eq!(view.get("price").unwrap(), Value::Null);
        assert_eq!(fixture.finds.load(Ordering::SeqCst), 0);
    }
}
