//! Criteria payloads sent by search clients.
//!
//! A criteria tree is a nested JSON object. Leaf nodes carry an `operator`,
//! a `fieldName` and one or two values; group nodes carry `and`, `or` or
//! `not` with child `criteria`. The root may also carry free-text domain
//! clauses and a named-parameter context for them:
//!
//! ```json
//! {
//!   "operator": "and",
//!   "criteria": [
//!     { "fieldName": "customer.name", "operator": "=", "value": "Acme" },
//!     { "fieldName": "total", "operator": "between", "value": 5, "value2": 10 }
//!   ],
//!   "_domain": "self.status = :status",
//!   "_domainContext": { "status": "open" }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::{Value, ValueMap};

/// One node of a criteria tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    /// Operator name; absent means `or` on group nodes and `=` on leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    /// Dotted field path of a leaf node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,

    /// Primary operand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Upper bound for range operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<Value>,

    /// Lower bound for range operators; takes precedence over `value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Value>,

    /// Upper bound for range operators; takes precedence over `value2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Value>,

    /// Children of a group node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<Criterion>,

    /// Free-text domain clause.
    #[serde(rename = "_domain", default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Named parameters for domain clauses.
    #[serde(rename = "_domainContext", default, skip_serializing_if = "ValueMap::is_empty")]
    pub domain_context: ValueMap,

    /// Additional domain clauses, each with its own context.
    #[serde(rename = "_domains", default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<DomainClause>,

    /// Include archived rows.
    #[serde(rename = "_archived", default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<Value>,
}

/// A free-text domain clause with its parameter context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainClause {
    /// Domain expression.
    pub domain: String,
    /// Named parameters for the expression.
    #[serde(default)]
    pub context: ValueMap,
}

impl Criterion {
    /// Create a leaf node.
    pub fn leaf(field: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            operator: Some(operator.into()),
            field_name: Some(field.into()),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Create a leaf node with a unary operator such as `isNull`.
    pub fn unary(field: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            operator: Some(operator.into()),
            field_name: Some(field.into()),
            ..Default::default()
        }
    }

    /// Create a range node.
    pub fn range(
        field: impl Into<String>,
        operator: impl Into<String>,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> Self {
        Self {
            operator: Some(operator.into()),
            field_name: Some(field.into()),
            value: Some(start.into()),
            value2: Some(end.into()),
            ..Default::default()
        }
    }

    /// Create a group node.
    pub fn group(operator: impl Into<String>, criteria: Vec<Criterion>) -> Self {
        Self {
            operator: Some(operator.into()),
            criteria,
            ..Default::default()
        }
    }

    /// Conjunction of children.
    pub fn and(criteria: Vec<Criterion>) -> Self {
        Self::group("and", criteria)
    }

    /// Disjunction of children.
    pub fn or(criteria: Vec<Criterion>) -> Self {
        Self::group("or", criteria)
    }

    /// Attach a free-text domain clause.
    pub fn with_domain(mut self, domain: impl Into<String>, context: ValueMap) -> Self {
        self.domain = Some(domain.into());
        self.domain_context.extend(context);
        self
    }

    /// Attach an additional domain clause.
    pub fn with_extra_domain(mut self, domain: impl Into<String>, context: ValueMap) -> Self {
        self.domains.push(DomainClause {
            domain: domain.into(),
            context,
        });
        self
    }

    /// Include or exclude archived rows.
    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = Some(Value::Bool(archived));
        self
    }

    /// Check if this node is a group node.
    pub fn is_group(&self) -> bool {
        matches!(
            self.operator.as_deref(),
            Some("and") | Some("or") | Some("not")
        ) || (self.field_name.is_none() && !self.criteria.is_empty())
    }

    /// Bounds of a range node, reading `start`/`end` before `value`/`value2`.
    pub fn bounds(&self) -> (Option<&Value>, Option<&Value>) {
        (
            self.start.as_ref().or(self.value.as_ref()),
            self.end.as_ref().or(self.value2.as_ref()),
        )
    }

    /// Whether archived rows were requested; accepts booleans and the
    /// strings `"true"`/`"false"` in any case.
    pub fn includes_archived(&self) -> bool {
        match &self.archived {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Parse a criteria tree from JSON text.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }
}
