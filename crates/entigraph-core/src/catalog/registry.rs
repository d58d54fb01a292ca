//! The metadata registry: validated, immutable entity metadata.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::entity::EntityDef;
use super::property::PropertyDescriptor;
use super::schema::SchemaBundle;
use crate::error::{Error, ResolutionError};

/// Read-only lookup of entity and property metadata.
///
/// A registry is built once from a [`SchemaBundle`] and shared freely
/// between threads afterwards; nothing in it changes at runtime.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: HashMap<String, Arc<EntityDef>>,
}

impl Registry {
    /// Validate a bundle and build a registry from it.
    ///
    /// Relation targets must exist, `mapped_by` must name a reference on the
    /// target pointing back at the owner, and computed dependencies must
    /// name real properties without forming a cycle.
    pub fn build(bundle: SchemaBundle) -> Result<Self, Error> {
        let mut entities = HashMap::new();
        for mut entity in bundle.entities {
            entity.ensure_builtins();
            if entities.contains_key(&entity.name) {
                return Err(Error::Schema(format!("entity '{}' defined twice", entity.name)));
            }
            entities.insert(entity.name.clone(), Arc::new(entity));
        }

        let registry = Self { entities };
        for entity in registry.entities.values() {
            registry.validate(entity)?;
        }
        debug!(entities = registry.entities.len(), "built metadata registry");
        Ok(registry)
    }

    fn validate(&self, entity: &EntityDef) -> Result<(), Error> {
        for prop in entity.properties() {
            if let Some(target) = prop.target() {
                let target_def = self.entities.get(target).ok_or_else(|| {
                    Error::Schema(format!(
                        "{}.{} targets unknown entity '{}'",
                        entity.name, prop.name, target
                    ))
                })?;
                if let Some(mapped_by) = prop.mapped_by() {
                    let back = target_def.property(mapped_by);
                    let valid = back
                        .map(|b| b.is_reference() && b.target() == Some(entity.name.as_str()))
                        .unwrap_or(false);
                    if !valid {
                        return Err(Error::Schema(format!(
                            "{}.{} is mapped by '{}', which is not a reference from {} to {}",
                            entity.name, prop.name, mapped_by, target, entity.name
                        )));
                    }
                }
            }
            for dep in prop.depends_on() {
                if !entity.has_property(dep) {
                    return Err(Error::Schema(format!(
                        "{}.{} depends on unknown property '{}'",
                        entity.name, prop.name, dep
                    )));
                }
            }
        }
        check_dependency_cycles(entity)?;
        if entity.properties().iter().filter(|p| p.display_field).count() > 1 {
            return Err(Error::Schema(format!(
                "entity '{}' declares more than one display field",
                entity.name
            )));
        }
        Ok(())
    }

    /// Build a registry from JSON schema text.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        Self::build(SchemaBundle::from_json(text)?)
    }

    /// Get an entity by name.
    pub fn entity(&self, name: &str) -> Option<&Arc<EntityDef>> {
        self.entities.get(name)
    }

    /// Get an entity by name, failing with a resolution error.
    pub fn get(&self, name: &str) -> Result<&Arc<EntityDef>, Error> {
        self.entities
            .get(name)
            .ok_or_else(|| ResolutionError::UnknownEntity(name.to_string()).into())
    }

    /// Get a property, failing with a resolution error.
    pub fn property(&self, entity: &str, name: &str) -> Result<&PropertyDescriptor, Error> {
        self.get(entity)?
            .property(name)
            .ok_or_else(|| ResolutionError::unknown_property(entity, name).into())
    }

    /// The target entity of a relation property.
    pub fn target_of(&self, property: &PropertyDescriptor) -> Result<&Arc<EntityDef>, Error> {
        let target = property.target().ok_or_else(|| {
            Error::Schema(format!("'{}' is not a relation", property.name))
        })?;
        self.get(target)
    }

    /// All entity names, sorted.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Depth-first walk over `depends_on`; reaching a property still on the
/// path means a cycle.
fn check_dependency_cycles(entity: &EntityDef) -> Result<(), Error> {
    fn visit<'e>(
        entity: &'e EntityDef,
        name: &'e str,
        path: &mut Vec<&'e str>,
        done: &mut HashSet<&'e str>,
    ) -> Result<(), Error> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|p| *p == name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(name);
            return Err(Error::Schema(format!(
                "computed properties of '{}' depend on each other: {}",
                entity.name,
                cycle.join(" -> ")
            )));
        }
        let Some(prop) = entity.property(name) else {
            return Ok(());
        };
        path.push(name);
        for dep in prop.depends_on() {
            visit(entity, dep, path, done)?;
        }
        path.pop();
        done.insert(name);
        Ok(())
    }

    let mut done = HashSet::new();
    for prop in entity.properties() {
        if prop.is_computed() {
            visit(entity, &prop.name, &mut Vec::new(), &mut done)?;
        }
    }
    Ok(())
}
