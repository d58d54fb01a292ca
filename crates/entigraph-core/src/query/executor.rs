//! Query execution against the embedded store.
//!
//! The store scans the root entity, follows reference paths row by row and
//! evaluates the compiled predicate with [`FilterEvaluator`]. Raw domain
//! clauses are lowered to structured predicates first. Bulk statements
//! run in a single transaction that checks every row is still at the
//! version it was matched at.

use std::cmp::Ordering;
use std::collections::HashMap;

use entigraph_proto::{OrderDirection, OrderSpec, Pagination, Value, ValueMap};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tracing::debug;

use super::compiler::{CompiledQuery, QueryKind};
use super::filter::FilterEvaluator;
use crate::catalog::{Registry, ID, VERSION};
use crate::error::{Error, ResolutionError};
use crate::storage::{EntityId, EntityKey, EntityLoader, PersistedEntity, Record, StorageEngine};

/// A store that can run compiled queries.
pub trait QueryStore: EntityLoader {
    /// Matching entities, ordered and paged.
    fn select(&self, query: &CompiledQuery, page: Pagination) -> Result<Vec<PersistedEntity>, Error>;

    /// Matching rows as tuples laid out as the query's projection columns
    /// (`id` and `version` without a projection).
    fn select_tuples(&self, query: &CompiledQuery, page: Pagination) -> Result<Vec<Vec<Value>>, Error>;

    /// Number of matching entities.
    fn count(&self, query: &CompiledQuery) -> Result<u64, Error>;

    /// Run a bulk update or delete, returning the number of rows affected.
    fn execute(&self, query: &CompiledQuery) -> Result<u64, Error>;
}

/// Reads dotted paths off rows, caching the entities references point at.
struct Navigator<'s> {
    engine: &'s StorageEngine,
    registry: &'s Registry,
    cache: HashMap<(String, EntityId), Option<PersistedEntity>>,
}

impl<'s> Navigator<'s> {
    fn new(engine: &'s StorageEngine) -> Self {
        Self {
            engine,
            registry: engine.registry(),
            cache: HashMap::new(),
        }
    }

    fn load(&mut self, entity: &str, id: EntityId) -> Result<Option<PersistedEntity>, Error> {
        let key = (entity.to_string(), id);
        if let Some(row) = self.cache.get(&key) {
            return Ok(row.clone());
        }
        let row = self.engine.get(entity, id)?;
        self.cache.insert(key, row.clone());
        Ok(row)
    }

    /// Value at `path` of `root`. A null reference along the way yields null;
    /// a reference leaf yields the referenced id.
    fn value_at(&mut self, root: &PersistedEntity, path: &str) -> Result<Value, Error> {
        let registry = self.registry;
        let path = path.strip_prefix("self.").unwrap_or(path);
        let mut segments = path.split('.').peekable();
        let mut hop: Option<PersistedEntity> = None;

        while let Some(segment) = segments.next() {
            let row = hop.as_ref().unwrap_or(root);
            if segments.peek().is_none() {
                return Ok(row.get(segment));
            }
            let def = registry.get(&row.entity)?;
            let prop = def
                .property(segment)
                .ok_or_else(|| ResolutionError::unknown_property(&def.name, segment))?;
            if !prop.is_reference() {
                return Err(ResolutionError::NotNavigable {
                    entity: def.name.clone(),
                    path: path.to_string(),
                }
                .into());
            }
            let Some(id) = row.reference_id(segment) else {
                return Ok(Value::Null);
            };
            let target = registry.target_of(prop)?.name.clone();
            match self.load(&target, id)? {
                Some(next) => hop = Some(next),
                None => return Ok(Value::Null),
            }
        }
        Ok(Value::Null)
    }
}

impl StorageEngine {
    /// Rows of the query's entity that satisfy its predicate, in id order.
    fn matching(&self, query: &CompiledQuery, nav: &mut Navigator<'_>) -> Result<Vec<PersistedEntity>, Error> {
        let predicate = match &query.predicate {
            Some(p) => Some(p.lower(&query.named_values())?),
            None => None,
        };
        let rows = self.scan(&query.entity)?;
        let Some(predicate) = predicate else {
            return Ok(rows);
        };

        let mut matched = Vec::new();
        for row in rows {
            if FilterEvaluator::evaluate(&predicate, &mut |path: &str| nav.value_at(&row, path))? {
                matched.push(row);
            }
        }
        Ok(matched)
    }

    fn ordered(
        &self,
        query: &CompiledQuery,
        page: Pagination,
        nav: &mut Navigator<'_>,
    ) -> Result<Vec<PersistedEntity>, Error> {
        let rows = self.matching(query, nav)?;
        if query.order_by.is_empty() {
            return Ok(page.apply(rows));
        }

        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let keys = query
                .order_by
                .iter()
                .map(|spec| nav.value_at(&row, &spec.field))
                .collect::<Result<Vec<_>, _>>()?;
            keyed.push((keys, row));
        }
        sort_rows(&mut keyed, &query.order_by);
        Ok(page.apply(keyed.into_iter().map(|(_, row)| row).collect()))
    }

    fn bulk_update(&self, query: &CompiledQuery, values: &ValueMap) -> Result<u64, Error> {
        let mut nav = Navigator::new(self);
        let targets: Vec<PersistedEntity> = self
            .matching(query, &mut nav)?
            .into_iter()
            .filter(|row| values.iter().any(|(name, value)| changes(&row.get(name), value)))
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let result: Result<(), TransactionError<Error>> = self.data_tree().transaction(|tx| {
            for row in &targets {
                let key = EntityKey::new(row.entity.as_str(), row.id).encode();
                let current = match tx.get(key.as_slice())? {
                    Some(bytes) => Record::from_bytes(&bytes).map_err(ConflictableTransactionError::Abort)?,
                    None => {
                        return Err(ConflictableTransactionError::Abort(Error::conflict(
                            row.entity.as_str(),
                            row.id,
                        )))
                    }
                };
                if current.version != row.version {
                    return Err(ConflictableTransactionError::Abort(Error::conflict(
                        row.entity.as_str(),
                        row.id,
                    )));
                }
                let mut fields = current.fields().map_err(ConflictableTransactionError::Abort)?;
                fields.extend(values.clone());
                let next = current
                    .next(&fields)
                    .and_then(|r| r.to_bytes())
                    .map_err(ConflictableTransactionError::Abort)?;
                tx.insert(key.as_slice(), next)?;
            }
            Ok(())
        });
        finish(result)?;
        debug!(entity = %query.entity, rows = targets.len(), "bulk update");
        Ok(targets.len() as u64)
    }

    fn bulk_delete(&self, query: &CompiledQuery) -> Result<u64, Error> {
        let mut nav = Navigator::new(self);
        let targets = self.matching(query, &mut nav)?;
        if targets.is_empty() {
            return Ok(0);
        }

        let result: Result<(), TransactionError<Error>> = self.data_tree().transaction(|tx| {
            for row in &targets {
                let key = EntityKey::new(row.entity.as_str(), row.id).encode();
                let Some(bytes) = tx.get(key.as_slice())? else {
                    return Err(ConflictableTransactionError::Abort(Error::conflict(
                        row.entity.as_str(),
                        row.id,
                    )));
                };
                let current = Record::from_bytes(&bytes).map_err(ConflictableTransactionError::Abort)?;
                if current.version != row.version {
                    return Err(ConflictableTransactionError::Abort(Error::conflict(
                        row.entity.as_str(),
                        row.id,
                    )));
                }
                tx.remove(key.as_slice())?;
            }
            Ok(())
        });
        finish(result)?;
        debug!(entity = %query.entity, rows = targets.len(), "bulk delete");
        Ok(targets.len() as u64)
    }
}

impl QueryStore for StorageEngine {
    fn select(&self, query: &CompiledQuery, page: Pagination) -> Result<Vec<PersistedEntity>, Error> {
        let mut nav = Navigator::new(self);
        self.ordered(query, page, &mut nav)
    }

    fn select_tuples(&self, query: &CompiledQuery, page: Pagination) -> Result<Vec<Vec<Value>>, Error> {
        let mut nav = Navigator::new(self);
        let rows = self.ordered(query, page, &mut nav)?;
        let columns = match &query.selector {
            Some(selector) => selector.columns(),
            None => vec![ID.to_string(), VERSION.to_string()],
        };
        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| nav.value_at(row, column))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect()
    }

    fn count(&self, query: &CompiledQuery) -> Result<u64, Error> {
        let mut nav = Navigator::new(self);
        Ok(self.matching(query, &mut nav)?.len() as u64)
    }

    fn execute(&self, query: &CompiledQuery) -> Result<u64, Error> {
        match &query.kind {
            QueryKind::Update(values) => self.bulk_update(query, values),
            QueryKind::Delete => self.bulk_delete(query),
            QueryKind::Select | QueryKind::Count => Err(Error::Unsupported(format!(
                "'{}' does not modify rows",
                query.text
            ))),
        }
    }
}

/// Whether setting `new` over `current` changes the row. Nulls are equal
/// to each other here.
fn changes(current: &Value, new: &Value) -> bool {
    match (current.is_null(), new.is_null()) {
        (true, true) => false,
        (true, false) | (false, true) => true,
        (false, false) => !FilterEvaluator::values_equal(current, new),
    }
}

fn finish(result: Result<(), TransactionError<Error>>) -> Result<(), Error> {
    match result {
        Ok(()) => Ok(()),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
    }
}

fn sort_rows(rows: &mut [(Vec<Value>, PersistedEntity)], order_by: &[OrderSpec]) {
    rows.sort_by(|(a_keys, a), (b_keys, b)| {
        for (i, spec) in order_by.iter().enumerate() {
            let cmp = compare_values(&a_keys[i], &b_keys[i]);
            let cmp = match spec.direction {
                OrderDirection::Asc => cmp,
                OrderDirection::Desc => cmp.reverse(),
            };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        a.id.cmp(&b.id)
    });
}

/// Compare two values for sorting, nulls first.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => FilterEvaluator::ordering(a, b).unwrap_or(Ordering::Equal),
    }
}
