//! Join planning for dotted association paths.
//!
//! A filter on `customer.address.city` needs the root joined to its customer
//! and the customer joined to its address. The [`PathResolver`] walks such a
//! path against the registry and records every reference hop in a
//! [`JoinPlan`], which hands out one alias per distinct prefix:
//!
//! ```text
//! LEFT JOIN self.customer _customer
//! LEFT JOIN _customer.address _customer_address
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use entigraph_lang::ParseError;

use crate::catalog::{EntityDef, PropertyDescriptor, Registry};
use crate::error::{Error, ResolutionError};

/// Alias of the root entity.
pub const ROOT_ALIAS: &str = "self";

/// One joined association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    /// Canonical dotted path, e.g. `self.customer.address`.
    pub path: String,
    /// Alias the association is joined from.
    pub parent: String,
    /// Reference property followed.
    pub property: String,
    /// Alias of the joined entity.
    pub alias: String,
    /// Name of the joined entity.
    pub entity: String,
}

/// Joins needed by a query, in the order they were first required.
///
/// Each canonical path is joined at most once; asking for the same prefix
/// again returns the alias handed out the first time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinPlan {
    joins: Vec<Join>,
    by_path: HashMap<String, usize>,
    aliases: HashSet<String>,
}

impl JoinPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias for `parent.property`, adding a join if the path is new.
    pub fn ensure(&mut self, parent: &str, path: &str, property: &str, entity: &str) -> &str {
        if let Some(&index) = self.by_path.get(path) {
            return &self.joins[index].alias;
        }

        let base = format!(
            "_{}",
            path.strip_prefix("self.").unwrap_or(path).replace('.', "_")
        );
        let mut alias = base.clone();
        let mut suffix = 1;
        while self.aliases.contains(&alias) {
            suffix += 1;
            alias = format!("{}{}", base, suffix);
        }

        self.aliases.insert(alias.clone());
        self.by_path.insert(path.to_string(), self.joins.len());
        self.joins.push(Join {
            path: path.to_string(),
            parent: parent.to_string(),
            property: property.to_string(),
            alias,
            entity: entity.to_string(),
        });
        &self.joins[self.joins.len() - 1].alias
    }

    /// Alias already assigned to a canonical path.
    pub fn alias_of(&self, path: &str) -> Option<&str> {
        self.by_path.get(path).map(|&i| self.joins[i].alias.as_str())
    }

    /// Joins in order.
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Number of joins.
    pub fn len(&self) -> usize {
        self.joins.len()
    }

    /// Check if no join is needed.
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Render the join clauses, one `LEFT JOIN` per association.
    pub fn render(&self) -> String {
        self.joins
            .iter()
            .map(|j| format!(" LEFT JOIN {}.{} {}", j.parent, j.property, j.alias))
            .collect()
    }
}

/// What a path resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    /// Expression to render, e.g. `_customer.name` or `_customer`.
    pub expression: String,
    /// Entity that declares the leaf property.
    pub owner: Arc<EntityDef>,
    /// The leaf property.
    pub property: PropertyDescriptor,
}

/// Resolves dotted paths against the registry.
pub struct PathResolver<'r> {
    registry: &'r Registry,
    root: Arc<EntityDef>,
}

impl<'r> PathResolver<'r> {
    /// Create a resolver for paths rooted at `root`.
    pub fn new(registry: &'r Registry, root: &str) -> Result<Self, Error> {
        Ok(Self {
            registry,
            root: registry.get(root)?.clone(),
        })
    }

    /// The root entity.
    pub fn root(&self) -> &Arc<EntityDef> {
        &self.root
    }

    /// The registry paths resolve against.
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Find the leaf property of a path without planning joins.
    pub fn property_at(&self, path: &str) -> Result<(Arc<EntityDef>, PropertyDescriptor), Error> {
        let segments = split(path)?;
        let (leaf, hops) = segments
            .split_last()
            .ok_or_else(|| ParseError::msg("empty field path"))?;
        let mut entity = self.root.clone();
        for (i, segment) in hops.iter().enumerate() {
            let prop = self.lookup(&entity, segment)?;
            entity = self.step(&entity, prop, &segments[..=i])?;
        }
        let prop = self.lookup(&entity, leaf)?.clone();
        Ok((entity, prop))
    }

    /// Resolve a path for use in a filter or an ordering, adding the joins
    /// it needs to `plan`.
    ///
    /// Reference hops are joined. A collection before the last segment is
    /// a parse error; a collection as the last segment cannot be compared
    /// and fails to resolve. A reference leaf is joined and resolves to its
    /// alias.
    pub fn resolve(&self, path: &str, plan: &mut JoinPlan) -> Result<ResolvedPath, Error> {
        let segments = split(path)?;
        let (leaf, hops) = segments
            .split_last()
            .ok_or_else(|| ParseError::msg("empty field path"))?;
        let mut entity = self.root.clone();
        let mut alias = ROOT_ALIAS.to_string();
        let mut canonical = ROOT_ALIAS.to_string();

        for (i, segment) in hops.iter().enumerate() {
            let prop = self.lookup(&entity, segment)?;
            let target = self.step(&entity, prop, &segments[..=i])?;
            canonical = format!("{}.{}", canonical, segment);
            alias = plan.ensure(&alias, &canonical, segment, &target.name).to_string();
            entity = target;
        }

        let prop = self.lookup(&entity, leaf)?.clone();
        if prop.is_collection() {
            return Err(ResolutionError::NotFilterable {
                entity: self.root.name.clone(),
                path: path.to_string(),
            }
            .into());
        }
        let expression = if prop.is_reference() {
            let target = self.registry.target_of(&prop)?;
            canonical = format!("{}.{}", canonical, leaf);
            plan.ensure(&alias, &canonical, leaf, &target.name).to_string()
        } else {
            format!("{}.{}", alias, leaf)
        };
        Ok(ResolvedPath {
            expression,
            owner: entity,
            property: prop,
        })
    }

    fn lookup<'e>(&self, entity: &'e EntityDef, name: &str) -> Result<&'e PropertyDescriptor, Error> {
        entity
            .property(name)
            .ok_or_else(|| ResolutionError::unknown_property(&entity.name, name).into())
    }

    /// Follow `prop` from `entity` as a non-terminal segment.
    fn step(
        &self,
        entity: &EntityDef,
        prop: &PropertyDescriptor,
        walked: &[&str],
    ) -> Result<Arc<EntityDef>, Error> {
        if prop.is_collection() {
            return Err(ParseError::msg(format!(
                "cannot navigate through collection '{}' of {}",
                walked.join("."),
                entity.name
            ))
            .with_hint("filter on the collection's members from their own entity")
            .into());
        }
        if !prop.is_reference() {
            return Err(ResolutionError::NotNavigable {
                entity: entity.name.clone(),
                path: walked.join("."),
            }
            .into());
        }
        Ok(self.registry.target_of(prop)?.clone())
    }
}

fn split(path: &str) -> Result<Vec<&str>, Error> {
    let path = path.strip_prefix("self.").unwrap_or(path);
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ParseError::msg(format!("malformed field path '{}'", path)).into());
    }
    Ok(segments)
}
