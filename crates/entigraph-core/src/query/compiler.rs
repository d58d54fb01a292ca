//! Query compilation.
//!
//! A [`Query`] collects filters, ordering, bindings and a projection for
//! one entity and compiles them into a [`CompiledQuery`]: the statement
//! text, its joins, the logical predicate and every parameter. Text stores
//! execute the statement; the embedded store evaluates the predicate.
//!
//! ```text
//! SELECT self FROM Order self LEFT JOIN self.customer _customer
//!   WHERE _customer.name = ?1 ORDER BY self.total DESC
//! ```
//!
//! Bulk updates and deletes select their targets through a subquery over
//! the same entity, with `that` as the root alias and every join alias
//! prefixed once more with `_`, so the outer statement never joins:
//!
//! ```text
//! DELETE FROM Order self WHERE self.id IN
//!   (SELECT that.id FROM Order that LEFT JOIN that.customer __customer
//!    WHERE __customer.name = ?1)
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use entigraph_lang::{DomainExpr, ParseError};
use entigraph_proto::{Criterion, OrderSpec, Pagination, QueryResult, Value, ValueMap};
use tracing::{debug, warn};

use super::binder::{as_param, Bindings, DeclaredParam, ParamType, Parameter};
use super::criteria::CriteriaParser;
use super::executor::QueryStore;
use super::join::{JoinPlan, PathResolver, ROOT_ALIAS};
use super::predicate::{Operand, Operator, PredicateNode};
use super::selector::Selector;
use crate::catalog::{Registry, ID, VERSION};
use crate::config::QueryConfig;
use crate::error::Error;
use crate::storage::PersistedEntity;

/// Root alias inside bulk subqueries.
pub const SUBQUERY_ALIAS: &str = "that";

/// Prefix of the named parameters carrying bulk update values.
const SET_PREFIX: &str = "__set_";

/// Kind of statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    Select,
    Count,
    /// Bulk update with the coerced new field values.
    Update(ValueMap),
    Delete,
}

/// A compiled statement.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub kind: QueryKind,
    /// Root entity.
    pub entity: String,
    /// Statement text.
    pub text: String,
    /// Joins the statement needs.
    pub joins: JoinPlan,
    /// Logical predicate, with raw domain parameters already bound.
    pub predicate: Option<PredicateNode>,
    /// Ordering, empty for counts and bulk statements.
    pub order_by: Vec<OrderSpec>,
    /// Projection, when fields were selected.
    pub selector: Option<Selector>,
    /// Positional parameters, `?1` first.
    pub positional: Vec<Value>,
    /// Named parameters, including the implicit variables and typed nulls
    /// for referenced names nobody bound.
    pub named: BTreeMap<String, Parameter>,
}

impl CompiledQuery {
    /// Named parameter values as a plain map.
    pub fn named_values(&self) -> ValueMap {
        self.named
            .iter()
            .map(|(name, param)| (name.clone(), param.value.clone()))
            .collect()
    }

    /// Check if this statement modifies rows.
    pub fn is_bulk(&self) -> bool {
        matches!(self.kind, QueryKind::Update(_) | QueryKind::Delete)
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone)]
enum Filter {
    Text { expression: String, params: Vec<Value> },
    Criteria(Criterion),
    Search(ValueMap),
    Node(PredicateNode),
}

/// Query builder for one entity.
///
/// Filters given through [`filter`](Self::filter),
/// [`criteria`](Self::criteria), [`search`](Self::search) and
/// [`filter_node`](Self::filter_node) are the user's filters. With
/// best-effort search enabled, a user filter that fails to parse or resolve
/// is dropped with a warning. A [`permission`](Self::permission) filter is
/// never dropped.
#[derive(Debug, Clone)]
pub struct Query<'r> {
    registry: &'r Registry,
    entity: String,
    config: QueryConfig,
    filters: Vec<Filter>,
    permission: Option<PredicateNode>,
    order_by: Vec<OrderSpec>,
    bindings: Bindings,
    projection: Option<Vec<String>>,
}

impl<'r> Query<'r> {
    /// Start a query over `entity`.
    pub fn new(registry: &'r Registry, entity: &str) -> Result<Self, Error> {
        let def = registry.get(entity)?;
        Ok(Self {
            registry,
            entity: def.name.clone(),
            config: QueryConfig::default(),
            filters: Vec::new(),
            permission: None,
            order_by: Vec::new(),
            bindings: Bindings::new(),
            projection: None,
        })
    }

    /// Use the given configuration.
    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable or disable best-effort search.
    pub fn best_effort(mut self, enabled: bool) -> Self {
        self.config.best_effort_search = enabled;
        self
    }

    /// Fix the clock behind `__date__` and `__time__`.
    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.bindings.set_clock(now);
        self
    }

    /// Add a domain expression with positional parameters.
    pub fn filter(mut self, expression: impl Into<String>, params: Vec<Value>) -> Self {
        self.filters.push(Filter::Text {
            expression: expression.into(),
            params,
        });
        self
    }

    /// Add a criteria payload.
    pub fn criteria(mut self, criterion: &Criterion) -> Self {
        self.filters.push(Filter::Criteria(criterion.clone()));
        self
    }

    /// Add a simple search map.
    pub fn search(mut self, search: &ValueMap) -> Self {
        self.filters.push(Filter::Search(search.clone()));
        self
    }

    /// Add a structured predicate.
    pub fn filter_node(mut self, node: PredicateNode) -> Self {
        self.filters.push(Filter::Node(node));
        self
    }

    /// Add a permission filter, conjoined with everything else.
    pub fn permission(mut self, node: PredicateNode) -> Self {
        self.permission = Some(match self.permission.take() {
            Some(existing) => PredicateNode::and(vec![existing, node]),
            None => node,
        });
        self
    }

    /// Order by a field path; a leading `-` sorts descending.
    pub fn order(mut self, spec: &str) -> Result<Self, Error> {
        self.order_by.push(spec.parse::<OrderSpec>()?);
        Ok(self)
    }

    /// Order by a parsed spec.
    pub fn order_by(mut self, spec: OrderSpec) -> Self {
        self.order_by.push(spec);
        self
    }

    /// Bind a named parameter.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<Self, Error> {
        self.bindings.bind(name, value)?;
        Ok(self)
    }

    /// Project the given fields instead of whole entities.
    pub fn select(mut self, names: &[&str]) -> Self {
        self.projection = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Compile a `SELECT`.
    pub fn compile_select(&self) -> Result<CompiledQuery, Error> {
        self.compile(QueryKind::Select)
    }

    /// Compile a `SELECT COUNT`.
    pub fn compile_count(&self) -> Result<CompiledQuery, Error> {
        self.compile(QueryKind::Count)
    }

    /// Compile a bulk update setting `values` on every matching row.
    pub fn compile_update(&self, values: &ValueMap) -> Result<CompiledQuery, Error> {
        let values = self.update_values(values)?;
        self.compile(QueryKind::Update(values))
    }

    /// Compile a bulk delete of every matching row.
    pub fn compile_delete(&self) -> Result<CompiledQuery, Error> {
        self.compile(QueryKind::Delete)
    }

    /// Fetch matching entities. A zero limit falls back to the configured
    /// default limit.
    pub fn fetch<S: QueryStore>(&self, store: &S, limit: usize, offset: usize) -> Result<Vec<PersistedEntity>, Error> {
        let query = self.compile_select()?;
        store.select(&query, self.page(limit, offset))
    }

    /// Fetch the first matching entity.
    pub fn fetch_one<S: QueryStore>(&self, store: &S) -> Result<Option<PersistedEntity>, Error> {
        let query = self.compile_select()?;
        Ok(store.select(&query, Pagination::limit(1))?.into_iter().next())
    }

    /// Count matching entities.
    pub fn count<S: QueryStore>(&self, store: &S) -> Result<u64, Error> {
        store.count(&self.compile_count()?)
    }

    /// Fetch a page of projection rows with the total match count.
    pub fn fetch_rows<S: QueryStore>(&self, store: &S, page: Pagination) -> Result<QueryResult, Error> {
        let query = self.compile_select()?;
        let page = self.page(page.limit, page.offset);
        let selector = match &query.selector {
            Some(selector) => selector.clone(),
            None => Selector::new(&PathResolver::new(self.registry, &self.entity)?, &[])?,
        };
        let mut rows = store
            .select_tuples(&query, page)?
            .into_iter()
            .map(|tuple| selector.row(tuple))
            .collect::<Result<Vec<_>, _>>()?;
        selector.fetch_collections(store, &mut rows)?;
        let total = store.count(&self.compile_count()?)?;
        Ok(QueryResult::new(rows, page.offset, page.limit).with_total(total))
    }

    /// Set `values` on every matching row, bumping versions. Rows that
    /// already hold the values are left alone. Returns the number of rows
    /// changed.
    pub fn update<S: QueryStore>(&self, store: &S, values: &ValueMap) -> Result<u64, Error> {
        store.execute(&self.compile_update(values)?)
    }

    /// Delete every matching row. Returns the number of rows removed.
    pub fn delete<S: QueryStore>(&self, store: &S) -> Result<u64, Error> {
        store.execute(&self.compile_delete()?)
    }

    fn page(&self, limit: usize, offset: usize) -> Pagination {
        let limit = if limit == 0 { self.config.default_limit } else { limit };
        Pagination::new(limit, offset)
    }

    /// Check and coerce bulk update values. Only stored top-level fields
    /// other than `id` and `version` can be set.
    fn update_values(&self, values: &ValueMap) -> Result<ValueMap, Error> {
        let def = self.registry.get(&self.entity)?;
        let mut coerced = ValueMap::new();
        for (name, value) in values {
            let prop = def
                .property(name)
                .filter(|p| p.is_stored() && !p.is_builtin() && !p.is_collection())
                .ok_or_else(|| {
                    Error::InvalidData(format!(
                        "'{}' cannot be set by a bulk update of {}",
                        name, self.entity
                    ))
                })?;
            let value = if prop.is_reference() {
                as_param(value.clone())
            } else {
                prop.coerce(value.clone())?
            };
            coerced.insert(name.clone(), value);
        }
        if coerced.is_empty() {
            return Err(Error::InvalidData("bulk update without values".to_string()));
        }
        Ok(coerced)
    }

    fn compile(&self, kind: QueryKind) -> Result<CompiledQuery, Error> {
        let resolver = PathResolver::new(self.registry, &self.entity)?;
        match self.compile_with(&resolver, kind.clone(), true) {
            Err(e) if self.config.best_effort_search && !self.filters.is_empty() && e.is_filter_error() => {
                warn!(entity = %self.entity, error = %e, "dropping search filter that cannot be used");
                self.compile_with(&resolver, kind, false)
            }
            other => other,
        }
    }

    fn compile_with(
        &self,
        resolver: &PathResolver<'r>,
        kind: QueryKind,
        with_filters: bool,
    ) -> Result<CompiledQuery, Error> {
        let mut bindings = self.bindings.clone();
        let mut parts = Vec::new();
        if with_filters {
            for filter in &self.filters {
                if let Some(node) = self.user_filter(filter, &mut bindings)? {
                    parts.push(node);
                }
            }
        }
        if let Some(permission) = &self.permission {
            parts.push(permission.clone());
        }
        let predicate = if parts.is_empty() {
            None
        } else {
            Some(bind_raw(PredicateNode::and(parts), &bindings))
        };

        let bulk = matches!(kind, QueryKind::Update(_) | QueryKind::Delete);
        let mut renderer = Renderer::new(resolver, bulk);
        let where_clause = predicate.as_ref().map(|p| renderer.render(p)).transpose()?;

        let mut selector = None;
        let mut order_by = Vec::new();
        let mut text = String::new();
        let entity = &self.entity;

        match &kind {
            QueryKind::Select => {
                let head = match &self.projection {
                    Some(names) => {
                        let names: Vec<&str> = names.iter().map(String::as_str).collect();
                        let projection = Selector::new(resolver, &names)?;
                        let columns = projection
                            .columns()
                            .iter()
                            .map(|c| renderer.path(c))
                            .collect::<Result<Vec<_>, _>>()?;
                        selector = Some(projection);
                        columns.join(", ")
                    }
                    None => ROOT_ALIAS.to_string(),
                };
                let mut order = Vec::with_capacity(self.order_by.len());
                for spec in &self.order_by {
                    let mut expression = renderer.path(&spec.field)?;
                    if resolver.property_at(&spec.field)?.1.is_reference() {
                        expression = format!("{}.{}", expression, ID);
                    }
                    order.push(if spec.is_descending() {
                        format!("{} DESC", expression)
                    } else {
                        expression
                    });
                }
                order_by = self.order_by.clone();

                text.push_str(&format!("SELECT {} FROM {} {}{}", head, entity, ROOT_ALIAS, renderer.plan.render()));
                if let Some(w) = &where_clause {
                    text.push_str(&format!(" WHERE {}", w));
                }
                if !order.is_empty() {
                    text.push_str(&format!(" ORDER BY {}", order.join(", ")));
                }
            }
            QueryKind::Count => {
                text.push_str(&format!(
                    "SELECT COUNT({}.{}) FROM {} {}{}",
                    ROOT_ALIAS,
                    ID,
                    entity,
                    ROOT_ALIAS,
                    renderer.plan.render()
                ));
                if let Some(w) = &where_clause {
                    text.push_str(&format!(" WHERE {}", w));
                }
            }
            QueryKind::Update(values) => {
                let mut sets = vec![format!("{0}.{1} = {0}.{1} + 1", ROOT_ALIAS, VERSION)];
                let mut changed = Vec::with_capacity(values.len());
                for (name, value) in values {
                    let param = format!("{}{}", SET_PREFIX, name);
                    sets.push(format!("{}.{} = :{}", ROOT_ALIAS, name, param));
                    changed.push(if value.is_null() {
                        format!("{}.{} IS NOT NULL", ROOT_ALIAS, name)
                    } else {
                        format!("{0}.{1} IS NULL OR {0}.{1} != :{2}", ROOT_ALIAS, name, param)
                    });
                }
                text.push_str(&format!("UPDATE {} {} SET {}", entity, ROOT_ALIAS, sets.join(", ")));
                let mut conditions = Vec::new();
                if let Some(w) = &where_clause {
                    conditions.push(subquery(entity, &renderer.rendered_joins(), w));
                }
                conditions.push(format!("({})", changed.join(" OR ")));
                text.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
            }
            QueryKind::Delete => {
                text.push_str(&format!("DELETE FROM {} {}", entity, ROOT_ALIAS));
                if let Some(w) = &where_clause {
                    text.push_str(&format!(" WHERE {}", subquery(entity, &renderer.rendered_joins(), w)));
                }
            }
        }

        let Renderer {
            plan,
            positional,
            declared,
            ..
        } = renderer;
        let mut named = bindings.named(&declared);
        if let QueryKind::Update(values) = &kind {
            let def = self.registry.get(entity)?;
            for (name, value) in values {
                let ty = def.property(name).map(ParamType::of).unwrap_or(ParamType::Untyped);
                named.insert(
                    format!("{}{}", SET_PREFIX, name),
                    Parameter {
                        value: value.clone(),
                        ty,
                    },
                );
            }
        }

        debug!(entity = %entity, statement = %text, "compiled query");
        Ok(CompiledQuery {
            kind,
            entity: entity.clone(),
            text,
            joins: plan,
            predicate,
            order_by,
            selector,
            positional,
            named,
        })
    }

    fn user_filter(&self, filter: &Filter, bindings: &mut Bindings) -> Result<Option<PredicateNode>, Error> {
        match filter {
            Filter::Text { expression, params } => {
                let expr = DomainExpr::parse(expression)?;
                Ok(Some(PredicateNode::raw(expr.source(), params.clone())))
            }
            Filter::Criteria(criterion) => {
                let parsed = CriteriaParser::new(self.registry, &self.entity)?.parse(criterion)?;
                bindings.extend(parsed.context)?;
                Ok(parsed.predicate)
            }
            Filter::Search(search) => {
                let parsed = CriteriaParser::new(self.registry, &self.entity)?.parse_search(search)?;
                bindings.extend(parsed.context)?;
                Ok(parsed.predicate)
            }
            Filter::Node(node) => Ok(Some(node.clone())),
        }
    }
}

fn subquery(entity: &str, joins: &str, where_clause: &str) -> String {
    format!(
        "{0}.{1} IN (SELECT {2}.{1} FROM {3} {2}{4} WHERE {5})",
        ROOT_ALIAS, ID, SUBQUERY_ALIAS, entity, joins, where_clause
    )
}

/// Bind raw domain parameters: names of bound variables stand for their
/// values and entity maps become ids.
fn bind_raw(node: PredicateNode, bindings: &Bindings) -> PredicateNode {
    match node {
        PredicateNode::Raw { expression, params } => PredicateNode::Raw {
            expression,
            params: params.iter().map(|p| bindings.positional(p)).collect(),
        },
        PredicateNode::And(children) => {
            PredicateNode::And(children.into_iter().map(|c| bind_raw(c, bindings)).collect())
        }
        PredicateNode::Or(children) => {
            PredicateNode::Or(children.into_iter().map(|c| bind_raw(c, bindings)).collect())
        }
        PredicateNode::Not(children) => {
            PredicateNode::Not(children.into_iter().map(|c| bind_raw(c, bindings)).collect())
        }
        other => other,
    }
}

/// Alias used for `alias` inside a bulk subquery.
fn subquery_alias(alias: &str) -> String {
    if alias == ROOT_ALIAS {
        SUBQUERY_ALIAS.to_string()
    } else {
        format!("_{}", alias)
    }
}

struct Renderer<'a, 'r> {
    resolver: &'a PathResolver<'r>,
    plan: JoinPlan,
    positional: Vec<Value>,
    declared: Vec<DeclaredParam>,
    subquery: bool,
}

impl<'a, 'r> Renderer<'a, 'r> {
    fn new(resolver: &'a PathResolver<'r>, subquery: bool) -> Self {
        Self {
            resolver,
            plan: JoinPlan::new(),
            positional: Vec::new(),
            declared: Vec::new(),
            subquery,
        }
    }

    fn path(&mut self, path: &str) -> Result<String, Error> {
        let expression = self.resolver.resolve(path, &mut self.plan)?.expression;
        if !self.subquery {
            return Ok(expression);
        }
        Ok(match expression.split_once('.') {
            Some((alias, rest)) => format!("{}.{}", subquery_alias(alias), rest),
            None => subquery_alias(&expression),
        })
    }

    fn rendered_joins(&self) -> String {
        self.plan
            .joins()
            .iter()
            .map(|j| {
                format!(
                    " LEFT JOIN {}.{} {}",
                    subquery_alias(&j.parent),
                    j.property,
                    subquery_alias(&j.alias)
                )
            })
            .collect()
    }

    fn param(&mut self, value: Value) -> String {
        self.positional.push(as_param(value));
        format!("?{}", self.positional.len())
    }

    fn render(&mut self, node: &PredicateNode) -> Result<String, Error> {
        Ok(match node {
            PredicateNode::Comparison {
                field,
                op,
                operand,
                fold_case,
            } => {
                let expression = self.path(field)?;
                if op.is_unary() {
                    return Ok(format!("{} {}", expression, op.symbol()));
                }
                let right = match operand {
                    Operand::None => return Ok(format!("{} {}", expression, op.symbol())),
                    Operand::Field(other) => self.path(other)?,
                    Operand::Values(values) => format!("({})", self.param(Value::List(values.clone()))),
                    Operand::Value(value) if matches!(op, Operator::In | Operator::NotIn) => {
                        format!("({})", self.param(value.clone()))
                    }
                    Operand::Value(value) => self.param(value.clone()),
                };
                if *fold_case {
                    format!("LOWER({}) {} LOWER({})", expression, op.symbol(), right)
                } else {
                    format!("{} {} {}", expression, op.symbol(), right)
                }
            }
            PredicateNode::Between {
                field,
                start,
                end,
                inclusive,
                negated,
            } => {
                let expression = self.path(field)?;
                let low = self.param(start.clone());
                let high = self.param(end.clone());
                let range = if *inclusive {
                    format!("{} BETWEEN {} AND {}", expression, low, high)
                } else {
                    format!("({0} > {1} AND {0} < {2})", expression, low, high)
                };
                if *negated {
                    format!("NOT ({})", range)
                } else {
                    range
                }
            }
            PredicateNode::And(children) => self.group(children, " AND ", "1 = 1")?,
            PredicateNode::Or(children) => self.group(children, " OR ", "1 = 0")?,
            PredicateNode::Not(children) if children.is_empty() => "1 = 1".to_string(),
            PredicateNode::Not(children) => {
                let any = self.group(children, " OR ", "1 = 0")?;
                format!("NOT ({})", any)
            }
            PredicateNode::Constant(true) => "1 = 1".to_string(),
            PredicateNode::Constant(false) => "1 = 0".to_string(),
            PredicateNode::Raw { expression, params } => self.raw(expression, params)?,
        })
    }

    fn group(&mut self, children: &[PredicateNode], joiner: &str, empty: &str) -> Result<String, Error> {
        if children.is_empty() {
            return Ok(empty.to_string());
        }
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            let text = self.render(child)?;
            parts.push(match child {
                PredicateNode::And(_) | PredicateNode::Or(_) | PredicateNode::Raw { .. }
                    if children.len() > 1 =>
                {
                    format!("({})", text)
                }
                _ => text,
            });
        }
        Ok(parts.join(joiner))
    }

    fn raw(&mut self, expression: &str, params: &[Value]) -> Result<String, Error> {
        let expr = DomainExpr::parse(expression)?;
        if expr.placeholder_count() > params.len() {
            return Err(ParseError::msg(format!(
                "'{}' uses {} parameter(s) but {} were given",
                expression,
                expr.placeholder_count(),
                params.len()
            ))
            .into());
        }
        let offset = self.positional.len();
        let text = expr.render(offset, |path, _| self.path(path))?;
        self.positional.extend(params.iter().cloned());

        for named in expr.named_parameters() {
            let ty = named
                .compared_path
                .as_deref()
                .and_then(|path| self.resolver.property_at(path).ok())
                .map(|(_, prop)| ParamType::of(&prop))
                .unwrap_or(ParamType::Untyped);
            if let Some(existing) = self.declared.iter_mut().find(|d| d.name == named.name) {
                if existing.ty == ParamType::Untyped {
                    existing.ty = ty;
                }
            } else {
                self.declared.push(DeclaredParam { name: named.name, ty });
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, PropertyDescriptor, ScalarType, SchemaBundle};
    use chrono::NaiveDate;
    use entigraph_proto::value_map;

    fn registry() -> Registry {
        Registry::build(
            SchemaBundle::new()
                .with_entity(
                    EntityDef::new("Order")
                        .with_property(PropertyDescriptor::scalar("total", ScalarType::Float64))
                        .with_property(PropertyDescriptor::scalar("placed", ScalarType::Date))
                        .with_property(PropertyDescriptor::scalar("status", ScalarType::String))
                        .with_property(PropertyDescriptor::reference("customer", "Customer"))
                        .with_property(PropertyDescriptor::one_to_many("lines", "Line", "order")),
                )
                .with_entity(
                    EntityDef::new("Line").with_property(PropertyDescriptor::reference("order", "Order")),
                )
                .with_entity(
                    EntityDef::new("Customer")
                        .with_property(PropertyDescriptor::scalar("name", ScalarType::String))
                        .with_property(PropertyDescriptor::reference("address", "Address")),
                )
                .with_entity(
                    EntityDef::new("Address")
                        .with_property(PropertyDescriptor::scalar("city", ScalarType::String)),
                ),
        )
        .unwrap()
    }

    fn clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_select_text() {
        let registry = registry();
        let query = Query::new(&registry, "Order")
            .unwrap()
            .filter("self.customer.name = ? AND self.total > ?", vec!["Acme".into(), 10.into()])
            .order("-customer.address.city")
            .unwrap()
            .order("total")
            .unwrap();
        let compiled = query.compile_select().unwrap();
        assert_eq!(
            compiled.text,
            "SELECT self FROM Order self LEFT JOIN self.customer _customer \
             LEFT JOIN _customer.address _customer_address \
             WHERE _customer.name = ?1 AND self.total > ?2 \
             ORDER BY _customer_address.city DESC, self.total"
        );
        assert_eq!(compiled.positional, vec![Value::from("Acme"), Value::Int(10)]);
        assert_eq!(compiled.joins.len(), 2);
    }

    #[test]
    fn test_structured_rendering() {
        let registry = registry();
        let compiled = Query::new(&registry, "Order")
            .unwrap()
            .filter_node(PredicateNode::between("total", 5, 10, false))
            .filter_node(PredicateNode::Comparison {
                field: "customer.name".into(),
                op: Operator::Like,
                operand: Operand::Value("%ac%".into()),
                fold_case: true,
            })
            .filter_node(PredicateNode::Not(vec![
                PredicateNode::compare("status", Operator::In, vec!["closed", "void"]),
                PredicateNode::null_check("placed", true),
            ]))
            .compile_count()
            .unwrap();
        assert_eq!(
            compiled.text,
            "SELECT COUNT(self.id) FROM Order self LEFT JOIN self.customer _customer \
             WHERE (self.total > ?1 AND self.total < ?2) \
             AND LOWER(_customer.name) LIKE LOWER(?3) \
             AND NOT (self.status IN (?4) OR self.placed IS NULL)"
        );
        assert_eq!(compiled.positional.len(), 4);
    }

    #[test]
    fn test_projection_always_has_id_and_version() {
        let registry = registry();
        let compiled = Query::new(&registry, "Order")
            .unwrap()
            .select(&["customer", "total"])
            .compile_select()
            .unwrap();
        assert_eq!(
            compiled.text,
            "SELECT self.id, self.version, _customer.id, _customer.version, _customer.name, self.total \
             FROM Order self LEFT JOIN self.customer _customer"
        );
        let selector = compiled.selector.unwrap();
        assert_eq!(&selector.columns()[..2], &["id".to_string(), "version".to_string()]);
    }

    #[test]
    fn test_named_parameters_and_typed_nulls() {
        let registry = registry();
        let compiled = Query::new(&registry, "Order")
            .unwrap()
            .at(clock())
            .filter("self.placed < :__date__ AND self.status = :status AND self.placed > :since", vec![])
            .compile_select()
            .unwrap();
        assert_eq!(
            compiled.named["__date__"].value,
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        assert_eq!(
            compiled.named["status"],
            Parameter::null(ParamType::Scalar(ScalarType::String))
        );
        assert_eq!(
            compiled.named["since"],
            Parameter::null(ParamType::Scalar(ScalarType::Date))
        );
    }

    #[test]
    fn test_bulk_delete_uses_subquery() {
        let registry = registry();
        let compiled = Query::new(&registry, "Order")
            .unwrap()
            .filter("self.customer.name = ?", vec!["Acme".into()])
            .order("total")
            .unwrap()
            .compile_delete()
            .unwrap();
        assert_eq!(
            compiled.text,
            "DELETE FROM Order self WHERE self.id IN (SELECT that.id FROM Order that \
             LEFT JOIN that.customer __customer WHERE __customer.name = ?1)"
        );
        assert!(compiled.order_by.is_empty());
        assert!(compiled.is_bulk());
    }

    #[test]
    fn test_bulk_update_skips_unchanged_rows() {
        let registry = registry();
        let compiled = Query::new(&registry, "Order")
            .unwrap()
            .filter("self.total > ?", vec![100.into()])
            .compile_update(&value_map! { "status" => "big", "placed" => Value::Null })
            .unwrap();
        assert_eq!(
            compiled.text,
            "UPDATE Order self SET self.version = self.version + 1, \
             self.placed = :__set_placed, self.status = :__set_status \
             WHERE self.id IN (SELECT that.id FROM Order that WHERE that.total > ?1) \
             AND (self.placed IS NOT NULL OR self.status IS NULL OR self.status != :__set_status)"
        );
        assert_eq!(compiled.named["__set_status"].value, Value::from("big"));
    }

    #[test]
    fn test_bulk_update_rejects_unsettable_fields() {
        let registry = registry();
        let query = Query::new(&registry, "Order").unwrap();
        for values in [
            value_map! { "lines" => Value::List(vec![]) },
            value_map! { "version" => 3 },
            value_map! { "customer.name" => "x" },
            ValueMap::new(),
        ] {
            assert!(matches!(query.compile_update(&values), Err(Error::InvalidData(_))));
        }
    }

    #[test]
    fn test_best_effort_drops_bad_filters_only() {
        let registry = registry();
        let strict = Query::new(&registry, "Order")
            .unwrap()
            .filter("self.nope = 1", vec![]);
        assert!(matches!(strict.compile_select(), Err(Error::Resolution(_))));

        let lenient = strict
            .best_effort(true)
            .permission(PredicateNode::compare("status", Operator::Eq, "open"));
        let compiled = lenient.compile_select().unwrap();
        assert_eq!(compiled.text, "SELECT self FROM Order self WHERE self.status = ?1");

        let bad_permission = Query::new(&registry, "Order")
            .unwrap()
            .best_effort(true)
            .permission(PredicateNode::compare("nope", Operator::Eq, 1));
        assert!(bad_permission.compile_select().is_err());
    }

    #[test]
    fn test_criteria_context_binds_parameters() {
        let registry = registry();
        let criterion = Criterion::default().with_domain("self.status = :s", value_map! { "s" => "open" });
        let compiled = Query::new(&registry, "Order")
            .unwrap()
            .criteria(&criterion)
            .compile_select()
            .unwrap();
        assert_eq!(compiled.text, "SELECT self FROM Order self WHERE self.status = :s");
        assert_eq!(compiled.named["s"].value, Value::from("open"));
    }

    #[test]
    fn test_missing_positional_parameter() {
        let registry = registry();
        let query = Query::new(&registry, "Order")
            .unwrap()
            .filter("self.total > ?1 AND self.total < ?2", vec![1.into()]);
        assert!(matches!(query.compile_select(), Err(Error::Parse(_))));
    }
}
