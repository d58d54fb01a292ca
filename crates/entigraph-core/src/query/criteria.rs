//! Criteria parsing.
//!
//! Turns a [`Criterion`] tree into a [`PredicateNode`] for one entity.
//! Leaf operators accept several spellings:
//!
//! | operator | meaning |
//! |---|---|
//! | `=` `eq` `equals` | equality; a null value tests for null |
//! | `!=` `ne` `notEqual` | inequality; a null value tests for non-null |
//! | `<` `lt` `lessThan`, `>` `gt` `greaterThan` | ordering |
//! | `<=` `le` `lessOrEqual`, `>=` `ge` `greaterOrEqual` | ordering |
//! | `like` `notLike` | case-insensitive substring match |
//! | `contains` `startsWith` `endsWith` | case-sensitive match; `not…` negates, `i…` folds case |
//! | `isNull` `notNull` | null checks |
//! | `in` `notIn` | membership |
//! | `between` `notBetween` | exclusive range |
//! | `betweenInclusive` `notBetweenInclusive` | inclusive range |
//! | `eqField` `neField` `ltField` `leField` `gtField` `geField` | compare with another field |
//! | `and` `or` `not` | groups; `not` matches when no child does |

use entigraph_lang::{DomainExpr, ParseError};
use entigraph_proto::{Criterion, Value, ValueMap};
use tracing::debug;

use super::join::PathResolver;
use super::predicate::{Operand, Operator, PredicateNode};
use crate::catalog::{PropertyDescriptor, Registry};
use crate::error::Error;

/// Property that marks archived rows.
pub const ARCHIVED: &str = "archived";

/// Result of parsing a criteria payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCriteria {
    /// Combined predicate, if the payload filters at all.
    pub predicate: Option<PredicateNode>,
    /// Named parameters for the domain clauses.
    pub context: ValueMap,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LeafOp {
    Compare(Operator),
    Pattern {
        negated: bool,
        leading: bool,
        trailing: bool,
        fold_case: bool,
    },
    Range {
        inclusive: bool,
        negated: bool,
    },
    FieldCompare(Operator),
}

fn leaf_operator(name: &str) -> Result<LeafOp, ParseError> {
    use LeafOp::*;

    let pattern = |negated, leading, trailing, fold_case| Pattern {
        negated,
        leading,
        trailing,
        fold_case,
    };
    Ok(match name {
        "=" | "eq" | "equals" => Compare(Operator::Eq),
        "!=" | "ne" | "notEqual" => Compare(Operator::Ne),
        "<" | "lt" | "lessThan" => Compare(Operator::Lt),
        ">" | "gt" | "greaterThan" => Compare(Operator::Gt),
        "<=" | "le" | "lessOrEqual" => Compare(Operator::Le),
        ">=" | "ge" | "greaterOrEqual" => Compare(Operator::Ge),
        "isNull" => Compare(Operator::IsNull),
        "notNull" | "isNotNull" => Compare(Operator::NotNull),
        "in" => Compare(Operator::In),
        "notIn" => Compare(Operator::NotIn),
        "like" => pattern(false, true, true, true),
        "notLike" => pattern(true, true, true, true),
        "contains" => pattern(false, true, true, false),
        "notContains" => pattern(true, true, true, false),
        "startsWith" => pattern(false, false, true, false),
        "notStartsWith" => pattern(true, false, true, false),
        "endsWith" => pattern(false, true, false, false),
        "notEndsWith" => pattern(true, true, false, false),
        "iContains" => pattern(false, true, true, true),
        "iNotContains" => pattern(true, true, true, true),
        "iStartsWith" => pattern(false, false, true, true),
        "iNotStartsWith" => pattern(true, false, true, true),
        "iEndsWith" => pattern(false, true, false, true),
        "iNotEndsWith" => pattern(true, true, false, true),
        "between" => Range {
            inclusive: false,
            negated: false,
        },
        "notBetween" => Range {
            inclusive: false,
            negated: true,
        },
        "betweenInclusive" => Range {
            inclusive: true,
            negated: false,
        },
        "notBetweenInclusive" => Range {
            inclusive: true,
            negated: true,
        },
        "eqField" => FieldCompare(Operator::Eq),
        "neField" => FieldCompare(Operator::Ne),
        "ltField" => FieldCompare(Operator::Lt),
        "leField" => FieldCompare(Operator::Le),
        "gtField" => FieldCompare(Operator::Gt),
        "geField" => FieldCompare(Operator::Ge),
        other => {
            return Err(ParseError::msg(format!("unknown operator '{}'", other)));
        }
    })
}

/// Parses criteria payloads against one entity.
pub struct CriteriaParser<'r> {
    resolver: PathResolver<'r>,
}

impl<'r> CriteriaParser<'r> {
    /// Create a parser for criteria on `entity`.
    pub fn new(registry: &'r Registry, entity: &str) -> Result<Self, Error> {
        Ok(Self {
            resolver: PathResolver::new(registry, entity)?,
        })
    }

    /// Parse a root criteria payload.
    ///
    /// The result conjoins, in order: the `_domains` clauses (combined with
    /// `or` when the root operator is `or`, which is the default), the
    /// `_domain` clause, the archived filter for entities that have an
    /// `archived` property unless `_archived` is set, and the criteria tree.
    pub fn parse(&self, root: &Criterion) -> Result<ParsedCriteria, Error> {
        let mut all = Vec::new();
        let mut context = ValueMap::new();

        if !root.domains.is_empty() {
            let mut domains = Vec::with_capacity(root.domains.len());
            for clause in &root.domains {
                domains.push(raw_domain(&clause.domain)?);
                context.extend(clause.context.clone());
            }
            if root.operator.as_deref().unwrap_or("or") == "or" {
                all.push(PredicateNode::or(domains));
            } else {
                all.extend(domains);
            }
        }

        if let Some(domain) = &root.domain {
            all.push(raw_domain(domain)?);
        }
        context.extend(root.domain_context.clone());

        if !root.includes_archived() && self.resolver.root().has_property(ARCHIVED) {
            all.push(PredicateNode::or(vec![
                PredicateNode::null_check(ARCHIVED, true),
                PredicateNode::compare(ARCHIVED, Operator::Eq, false),
            ]));
        }

        if root.field_name.is_some() || !root.criteria.is_empty() {
            all.push(self.parse_root_tree(root)?);
        }

        let predicate = if all.is_empty() {
            None
        } else {
            Some(PredicateNode::and(all))
        };
        debug!(entity = %self.resolver.root().name, ?predicate, "parsed criteria");
        Ok(ParsedCriteria { predicate, context })
    }

    /// Parse a simple search map: every key that starts with a letter is a
    /// field matched with `like`, and the matches are `or`-combined.
    /// `_domain` and `_domainContext` are honoured as in [`parse`](Self::parse).
    pub fn parse_search(&self, search: &ValueMap) -> Result<ParsedCriteria, Error> {
        let criteria = search
            .iter()
            .filter(|(key, _)| key.starts_with(|c: char| c.is_ascii_alphabetic()))
            .map(|(key, value)| Criterion::leaf(key.clone(), "like", value.clone()))
            .collect();
        let root = Criterion {
            operator: Some("or".to_string()),
            criteria,
            domain: search.get("_domain").and_then(Value::as_str).map(str::to_string),
            domain_context: search
                .get("_domainContext")
                .and_then(Value::as_map)
                .cloned()
                .unwrap_or_default(),
            ..Default::default()
        };
        self.parse(&root)
    }

    fn parse_root_tree(&self, root: &Criterion) -> Result<PredicateNode, Error> {
        if root.field_name.is_none() && root.operator.is_none() {
            let mut group = root.clone();
            group.operator = Some("or".to_string());
            return self.parse_criterion(&group);
        }
        self.parse_criterion(root)
    }

    /// Parse one node of a criteria tree.
    pub fn parse_criterion(&self, criterion: &Criterion) -> Result<PredicateNode, Error> {
        let operator = criterion.operator.as_deref();
        let group = match operator {
            Some(op @ ("and" | "or" | "not")) => Some(op),
            None if criterion.field_name.is_none() && !criterion.criteria.is_empty() => Some("or"),
            _ => None,
        };

        if let Some(group) = group {
            if let Some(field) = &criterion.field_name {
                return Err(ParseError::msg(format!(
                    "'{}' groups criteria and cannot apply to field '{}'",
                    group, field
                ))
                .into());
            }
            let children = criterion
                .criteria
                .iter()
                .map(|c| self.parse_criterion(c))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(match group {
                "and" => PredicateNode::And(children),
                "or" => PredicateNode::Or(children),
                _ => PredicateNode::Not(children),
            });
        }

        let Some(field) = criterion.field_name.as_deref() else {
            return Err(ParseError::msg("criterion has neither a field nor child criteria").into());
        };
        let op = leaf_operator(operator.unwrap_or("="))?;
        let value = criterion.value.clone().map(trim);

        // a textual operand on a reference compares the target's display field
        let field = match (&value, op) {
            (Some(Value::String(_)), LeafOp::Compare(_) | LeafOp::Pattern { .. }) => {
                self.display_path(field)?
            }
            _ => field.to_string(),
        };

        match op {
            LeafOp::Compare(op) if op.is_unary() => Ok(PredicateNode::null_check(field, op == Operator::IsNull)),
            LeafOp::Compare(op @ (Operator::In | Operator::NotIn)) => {
                let items = match value {
                    Some(Value::List(items)) => items,
                    Some(single) => vec![single],
                    None => return Err(missing_value(&field, "a list of values")),
                };
                let items = items
                    .into_iter()
                    .map(|v| self.coerce(&field, trim(v)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PredicateNode::Comparison {
                    field,
                    op,
                    operand: Operand::Values(items),
                    fold_case: false,
                })
            }
            LeafOp::Compare(op) => match value {
                None | Some(Value::Null) if op == Operator::Eq => Ok(PredicateNode::null_check(field, true)),
                None | Some(Value::Null) if op == Operator::Ne => Ok(PredicateNode::null_check(field, false)),
                None | Some(Value::Null) => Err(missing_value(&field, "a value")),
                Some(value) => {
                    let value = self.coerce(&field, value)?;
                    Ok(PredicateNode::Comparison {
                        field,
                        op,
                        operand: Operand::Value(value),
                        fold_case: false,
                    })
                }
            },
            LeafOp::Pattern {
                negated,
                leading,
                trailing,
                fold_case,
            } => {
                let text = match value {
                    Some(Value::String(s)) => s,
                    Some(Value::Null) | None => return Err(missing_value(&field, "a search text")),
                    Some(other) => other.to_string(),
                };
                let pattern = format!(
                    "{}{}{}",
                    if leading { "%" } else { "" },
                    text,
                    if trailing { "%" } else { "" }
                );
                Ok(PredicateNode::Comparison {
                    field,
                    op: if negated { Operator::NotLike } else { Operator::Like },
                    operand: Operand::Value(Value::String(pattern)),
                    fold_case,
                })
            }
            LeafOp::Range { inclusive, negated } => {
                let (start, end) = criterion.bounds();
                let (Some(start), Some(end)) = (start, end) else {
                    return Err(missing_value(&field, "both a start and an end"));
                };
                let start = self.coerce(&field, trim(start.clone()))?;
                let end = self.coerce(&field, trim(end.clone()))?;
                Ok(PredicateNode::Between {
                    field,
                    start,
                    end,
                    inclusive,
                    negated,
                })
            }
            LeafOp::FieldCompare(op) => match value {
                Some(Value::String(other)) => Ok(PredicateNode::field_compare(field, op, other)),
                _ => Err(missing_value(&field, "the name of another field")),
            },
        }
    }

    /// `field.<display field>` when `field` is a reference, else `field`.
    fn display_path(&self, field: &str) -> Result<String, Error> {
        let (_, prop) = self.resolver.property_at(field)?;
        if !prop.is_reference() {
            return Ok(field.to_string());
        }
        let target = self.resolver.registry().target_of(&prop)?;
        Ok(match target.display_field() {
            Some(display) => format!("{}.{}", field, display),
            None => field.to_string(),
        })
    }

    /// Convert a literal to the declared type of the field it is compared
    /// with. Relations keep their value; entity maps compare by id later.
    fn coerce(&self, field: &str, value: Value) -> Result<Value, Error> {
        let (_, prop) = self.resolver.property_at(field)?;
        coerce_literal(&prop, field, value)
    }
}

fn coerce_literal(prop: &PropertyDescriptor, field: &str, value: Value) -> Result<Value, Error> {
    if prop.is_relation() || value.is_null() {
        return Ok(value);
    }
    prop.coerce(value).map_err(|e| {
        ParseError::msg(format!("invalid value for '{}': {}", field, e)).into()
    })
}

fn raw_domain(domain: &str) -> Result<PredicateNode, Error> {
    let expr = DomainExpr::parse(domain)?;
    Ok(PredicateNode::raw(expr.source(), Vec::new()))
}

fn trim(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other,
    }
}

fn missing_value(field: &str, what: &str) -> Error {
    ParseError::msg(format!("criterion on '{}' needs {}", field, what)).into()
}
