//! Entity definitions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::property::PropertyDescriptor;
use super::types::ScalarType;
use super::{ID, NAME, VERSION};

/// An entity type: a named, ordered set of properties.
///
/// Every entity carries an `id` (Int64) and a `version` (Int64) property;
/// they are added automatically when missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name.
    pub name: String,
    /// Properties in declaration order.
    #[serde(default)]
    properties: Vec<PropertyDescriptor>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl EntityDef {
    /// Create an entity with only the built-in `id` and `version` properties.
    pub fn new(name: impl Into<String>) -> Self {
        let mut entity = Self {
            name: name.into(),
            properties: Vec::new(),
            index: HashMap::new(),
        };
        entity.ensure_builtins();
        entity
    }

    /// Add a property, replacing any property with the same name.
    pub fn with_property(mut self, property: PropertyDescriptor) -> Self {
        self.push_property(property);
        self
    }

    fn push_property(&mut self, property: PropertyDescriptor) {
        match self.index.get(&property.name) {
            Some(&i) => self.properties[i] = property,
            None => {
                self.index.insert(property.name.clone(), self.properties.len());
                self.properties.push(property);
            }
        }
    }

    /// Insert the built-in properties if missing and rebuild the name index.
    /// Called after deserialization.
    pub(crate) fn ensure_builtins(&mut self) {
        self.reindex();
        let mut builtins = Vec::new();
        if !self.index.contains_key(ID) {
            builtins.push(PropertyDescriptor::scalar(ID, ScalarType::Int64));
        }
        if !self.index.contains_key(VERSION) {
            builtins.push(PropertyDescriptor::scalar(VERSION, ScalarType::Int64));
        }
        if !builtins.is_empty() {
            builtins.append(&mut self.properties);
            self.properties = builtins;
            self.reindex();
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
    }

    /// Get a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    pub(crate) fn property_mut(&mut self, name: &str) -> Option<&mut PropertyDescriptor> {
        self.index.get(name).map(|&i| &mut self.properties[i])
    }

    /// Check if a property exists.
    pub fn has_property(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All properties in declaration order.
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Properties persisted on this entity's records.
    pub fn stored_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties
            .iter()
            .filter(|p| p.is_stored() && !p.is_builtin())
    }

    /// Collections of this entity.
    pub fn collections(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_collection())
    }

    /// The display field: the property flagged as such, else a property
    /// called `name`.
    pub fn display_property(&self) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.display_field)
            .or_else(|| self.property(NAME))
    }

    /// Name of the display field.
    pub fn display_field(&self) -> Option<&str> {
        self.display_property().map(|p| p.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_added() {
        let entity = EntityDef::new("Order");
        assert!(entity.property(ID).is_some());
        assert!(entity.property(VERSION).is_some());
        assert_eq!(entity.properties().len(), 2);
        assert_eq!(entity.stored_properties().count(), 0);
    }

    #[test]
    fn test_display_field_fallback() {
        let named = EntityDef::new("Customer")
            .with_property(PropertyDescriptor::scalar("name", ScalarType::String));
        assert_eq!(named.display_field(), Some("name"));

        let flagged = named
            .clone()
            .with_property(PropertyDescriptor::scalar("code", ScalarType::String).display());
        assert_eq!(flagged.display_field(), Some("code"));

        assert_eq!(EntityDef::new("Tag").display_field(), None);
    }

    #[test]
    fn test_replace_property() {
        let entity = EntityDef::new("Order")
            .with_property(PropertyDescriptor::scalar("total", ScalarType::Int64))
            .with_property(PropertyDescriptor::scalar("total", ScalarType::Float64));
        assert_eq!(entity.properties().len(), 3);
        assert_eq!(
            entity.property("total").and_then(|p| p.scalar_type()),
            Some(ScalarType::Float64)
        );
    }

    #[test]
    fn test_deserialize_rebuilds_index() {
        let mut entity: EntityDef = serde_json::from_str(
            r#"{"name": "Tag", "properties": [{"name": "label", "kind": "scalar", "type": "string"}]}"#,
        )
        .unwrap();
        assert!(entity.property("label").is_none());
        entity.ensure_builtins();
        assert!(entity.property("label").is_some());
        assert_eq!(entity.properties()[0].name, ID);
    }
}
