//! Schema bundle - the declarative description a registry is built from.

use serde::{Deserialize, Serialize};

use super::entity::EntityDef;
use super::property::ComputeFn;
use crate::error::{Error, ResolutionError};

/// All entity definitions of an application.
///
/// Bundles are usually loaded from JSON. Computed properties declared there
/// only list their dependencies; derivation functions are attached in code
/// with [`SchemaBundle::attach_compute`] before the registry is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaBundle {
    /// Entity definitions.
    #[serde(default)]
    pub entities: Vec<EntityDef>,
}

impl SchemaBundle {
    /// Create an empty schema bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity to the schema.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.retain(|e| e.name != entity.name);
        self.entities.push(entity);
        self
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// List all entity names.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.name.as_str()).collect()
    }

    /// Attach the derivation function of a computed property.
    pub fn attach_compute(
        &mut self,
        entity: &str,
        property: &str,
        compute: ComputeFn,
    ) -> Result<(), Error> {
        let def = self
            .entities
            .iter_mut()
            .find(|e| e.name == entity)
            .ok_or_else(|| ResolutionError::UnknownEntity(entity.to_string()))?;
        def.ensure_builtins();
        let prop = def
            .property_mut(property)
            .ok_or_else(|| ResolutionError::unknown_property(entity, property))?;
        prop.set_compute(compute);
        Ok(())
    }

    /// Parse a schema bundle from JSON.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let mut bundle: SchemaBundle = serde_json::from_str(text)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        for entity in &mut bundle.entities {
            entity.ensure_builtins();
        }
        Ok(bundle)
    }

    /// Serialize the schema bundle to JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PropertyDescriptor, ScalarType};
    use entigraph_proto::Value;
    use std::sync::Arc;

    #[test]
    fn test_json_roundtrip() {
        let bundle = SchemaBundle::new().with_entity(
            EntityDef::new("Customer")
                .with_property(PropertyDescriptor::scalar("name", ScalarType::String).required()),
        );
        let json = bundle.to_json().unwrap();
        let parsed = SchemaBundle::from_json(&json).unwrap();
        assert_eq!(parsed, bundle);
        assert_eq!(parsed.entity_names(), vec!["Customer"]);
    }

    #[test]
    fn test_attach_compute() {
        let mut bundle = SchemaBundle::from_json(
            r#"{"entities": [{"name": "Line", "properties": [
                {"name": "qty", "kind": "scalar", "type": "int64"},
                {"name": "double", "kind": "scalar", "type": "int64", "computed": {"depends_on": ["qty"]}}
            ]}]}"#,
        )
        .unwrap();
        bundle
            .attach_compute(
                "Line",
                "double",
                Arc::new(|deps| Value::Int(deps.get("qty").and_then(Value::as_i64).unwrap_or(0) * 2)),
            )
            .unwrap();

        let prop = bundle.get_entity("Line").unwrap().property("double").unwrap();
        assert_eq!(prop.depends_on(), ["qty".to_string()]);
        assert!(prop.computed.as_ref().unwrap().compute_fn().is_some());

        assert!(bundle
            .attach_compute("Line", "nope", Arc::new(|_| Value::Null))
            .is_err());
    }
}
