//! Projection of entities into plain rows.
//!
//! A [`Selector`] is built from the field names a client asked for. Rows
//! always carry `id` and `version`. A reference becomes a compact map with
//! the target's `id`, its `$version` and its display field. Collections are
//! not joined; a second pass loads them per row as lists of compact maps.

use entigraph_proto::{compact_reference, Value, ValueMap};
use tracing::debug;

use super::join::PathResolver;
use crate::catalog::{PropertyDescriptor, ID, VERSION};
use crate::error::Error;
use crate::storage::EntityLoader;

/// One selected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectField {
    /// A scalar or enum value, possibly behind references.
    Scalar { name: String },
    /// A reference, projected as `{id, $version, <display>}`.
    Reference {
        name: String,
        display: Option<String>,
    },
}

impl SelectField {
    /// Name the field was requested under.
    pub fn name(&self) -> &str {
        match self {
            SelectField::Scalar { name } | SelectField::Reference { name, .. } => name,
        }
    }
}

/// A projection over one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    entity: String,
    fields: Vec<SelectField>,
    collections: Vec<PropertyDescriptor>,
}

impl Selector {
    /// Build a projection from requested field names.
    ///
    /// Names that do not resolve are skipped, as are binary, transient and
    /// computed properties and collections below the root.
    pub fn new(resolver: &PathResolver<'_>, names: &[&str]) -> Result<Self, Error> {
        let mut selector = Self {
            entity: resolver.root().name.clone(),
            fields: vec![
                SelectField::Scalar { name: ID.to_string() },
                SelectField::Scalar {
                    name: VERSION.to_string(),
                },
            ],
            collections: Vec::new(),
        };

        for name in names {
            let name = name.strip_prefix("self.").unwrap_or(name);
            if selector.contains(name) {
                continue;
            }
            let prop = match resolver.property_at(name) {
                Ok((_, prop)) => prop,
                Err(Error::Resolution(e)) => {
                    debug!(field = name, error = %e, "skipping unknown projection field");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if prop.is_binary() || prop.transient || prop.is_computed() {
                debug!(field = name, "skipping non-projectable field");
                continue;
            }

            if prop.is_collection() {
                if name.contains('.') {
                    debug!(field = name, "skipping nested collection");
                } else {
                    selector.collections.push(prop);
                }
            } else if prop.is_reference() {
                let target = resolver.registry().target_of(&prop)?;
                selector.fields.push(SelectField::Reference {
                    name: name.to_string(),
                    display: target.display_field().map(str::to_string),
                });
            } else {
                selector.fields.push(SelectField::Scalar {
                    name: name.to_string(),
                });
            }
        }
        Ok(selector)
    }

    fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name() == name) || self.collections.iter().any(|c| c.name == name)
    }

    /// The projected entity.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Fields fetched by the main query.
    pub fn fields(&self) -> &[SelectField] {
        &self.fields
    }

    /// Collections loaded by the second pass.
    pub fn collections(&self) -> &[PropertyDescriptor] {
        &self.collections
    }

    /// Dotted paths of the tuple the main query returns, in order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.fields.len() + 4);
        for field in &self.fields {
            match field {
                SelectField::Scalar { name } => columns.push(name.clone()),
                SelectField::Reference { name, display } => {
                    columns.push(format!("{}.{}", name, ID));
                    columns.push(format!("{}.{}", name, VERSION));
                    if let Some(display) = display {
                        columns.push(format!("{}.{}", name, display));
                    }
                }
            }
        }
        columns
    }

    /// Assemble one row from a tuple laid out as [`columns`](Self::columns).
    pub fn row(&self, tuple: Vec<Value>) -> Result<ValueMap, Error> {
        let mut values = tuple.into_iter();
        let mut next = |name: &str| {
            values
                .next()
                .ok_or_else(|| Error::InvalidData(format!("projection tuple is missing '{}'", name)))
        };

        let mut row = ValueMap::new();
        for field in &self.fields {
            match field {
                SelectField::Scalar { name } => {
                    let value = next(name)?;
                    row.insert(name.clone(), value);
                }
                SelectField::Reference { name, display } => {
                    let id = next(name)?;
                    let version = next(name)?;
                    let shown = match display {
                        Some(display) => Some((display.as_str(), next(name)?)),
                        None => None,
                    };
                    let value = if id.is_null() {
                        Value::Null
                    } else {
                        Value::Map(compact_reference(id, version, shown))
                    };
                    row.insert(name.clone(), value);
                }
            }
        }
        Ok(row)
    }

    /// Second pass: add each selected collection to the rows as a list of
    /// compact `{id, $version}` maps.
    pub fn fetch_collections(&self, loader: &dyn EntityLoader, rows: &mut [ValueMap]) -> Result<(), Error> {
        if self.collections.is_empty() {
            return Ok(());
        }
        let owner = loader.registry().get(&self.entity)?.clone();
        for row in rows.iter_mut() {
            let Some(id) = row.get(ID).and_then(Value::as_i64) else {
                continue;
            };
            for prop in &self.collections {
                let mut members = loader.fetch_collection(&owner, prop, id)?;
                members.sort_by_key(|m| m.id);
                let items = members
                    .into_iter()
                    .map(|m| Value::Map(compact_reference(Value::Int(m.id), Value::Int(m.version), None)))
                    .collect();
                row.insert(prop.name.clone(), Value::List(items));
            }
        }
        Ok(())
    }
}
