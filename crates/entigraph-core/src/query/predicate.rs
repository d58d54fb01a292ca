//! Predicate trees.
//!
//! A [`PredicateNode`] is what the criteria parser produces and what the
//! compiler renders. Leaf fields are dotted paths relative to the root
//! entity; they are resolved to join aliases only when a query is compiled.

use entigraph_lang::{CompareOp, Condition, DomainExpr, Literal, Operand as DomainOperand, ParseError};
use entigraph_proto::{Value, ValueMap};

use super::filter::FilterEvaluator;
use crate::error::Error;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    NotNull,
}

impl Operator {
    /// Rendered form of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::NotNull => "IS NOT NULL",
        }
    }

    /// Operators that take no operand.
    pub fn is_unary(self) -> bool {
        matches!(self, Operator::IsNull | Operator::NotNull)
    }

    fn from_compare(op: CompareOp) -> Self {
        match op {
            CompareOp::Eq => Operator::Eq,
            CompareOp::Ne => Operator::Ne,
            CompareOp::Lt => Operator::Lt,
            CompareOp::Le => Operator::Le,
            CompareOp::Gt => Operator::Gt,
            CompareOp::Ge => Operator::Ge,
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand (null checks).
    None,
    /// A literal value.
    Value(Value),
    /// A list of literal values (`IN`).
    Values(Vec<Value>),
    /// Another field of the same row.
    Field(String),
}

/// A node of a predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateNode {
    /// `field op operand`; with `fold_case` both sides are lower-cased.
    Comparison {
        field: String,
        op: Operator,
        operand: Operand,
        fold_case: bool,
    },
    /// Range test. Exclusive bounds unless `inclusive`.
    Between {
        field: String,
        start: Value,
        end: Value,
        inclusive: bool,
        negated: bool,
    },
    /// Every child matches; empty is true.
    And(Vec<PredicateNode>),
    /// Some child matches; empty is false.
    Or(Vec<PredicateNode>),
    /// No child matches.
    Not(Vec<PredicateNode>),
    /// Free-text domain expression with its positional parameters.
    Raw { expression: String, params: Vec<Value> },
    /// A condition already decided while lowering a domain expression.
    Constant(bool),
}

impl PredicateNode {
    /// `field op value`.
    pub fn compare(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        let operand = match value.into() {
            Value::List(values) => Operand::Values(values),
            value => Operand::Value(value),
        };
        PredicateNode::Comparison {
            field: field.into(),
            op,
            operand,
            fold_case: false,
        }
    }

    /// `field IS [NOT] NULL`.
    pub fn null_check(field: impl Into<String>, is_null: bool) -> Self {
        PredicateNode::Comparison {
            field: field.into(),
            op: if is_null { Operator::IsNull } else { Operator::NotNull },
            operand: Operand::None,
            fold_case: false,
        }
    }

    /// `field op other` where both sides are fields.
    pub fn field_compare(field: impl Into<String>, op: Operator, other: impl Into<String>) -> Self {
        PredicateNode::Comparison {
            field: field.into(),
            op,
            operand: Operand::Field(other.into()),
            fold_case: false,
        }
    }

    /// Range test.
    pub fn between(
        field: impl Into<String>,
        start: impl Into<Value>,
        end: impl Into<Value>,
        inclusive: bool,
    ) -> Self {
        PredicateNode::Between {
            field: field.into(),
            start: start.into(),
            end: end.into(),
            inclusive,
            negated: false,
        }
    }

    /// A domain expression.
    pub fn raw(expression: impl Into<String>, params: Vec<Value>) -> Self {
        PredicateNode::Raw {
            expression: expression.into(),
            params,
        }
    }

    /// Conjunction, flattening nested conjunctions. A single node is
    /// returned as is.
    pub fn and(nodes: Vec<PredicateNode>) -> Self {
        let mut flat = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                PredicateNode::And(children) => flat.extend(children),
                node => flat.push(node),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            PredicateNode::And(flat)
        }
    }

    /// Disjunction, flattening nested disjunctions.
    pub fn or(nodes: Vec<PredicateNode>) -> Self {
        let mut flat = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                PredicateNode::Or(children) => flat.extend(children),
                node => flat.push(node),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            PredicateNode::Or(flat)
        }
    }

    /// Every dotted field path the tree references, in order. Paths inside
    /// raw expressions are not included.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            PredicateNode::Comparison { field, operand, .. } => {
                out.push(field);
                if let Operand::Field(other) = operand {
                    out.push(other);
                }
            }
            PredicateNode::Between { field, .. } => out.push(field),
            PredicateNode::And(children)
            | PredicateNode::Or(children)
            | PredicateNode::Not(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            PredicateNode::Raw { .. } | PredicateNode::Constant(_) => {}
        }
    }

    /// Check if the tree contains a raw domain expression.
    pub fn has_raw(&self) -> bool {
        match self {
            PredicateNode::Raw { .. } => true,
            PredicateNode::And(children)
            | PredicateNode::Or(children)
            | PredicateNode::Not(children) => children.iter().any(PredicateNode::has_raw),
            _ => false,
        }
    }

    /// Replace raw domain expressions by structured nodes, substituting
    /// parameters. Missing named parameters read as null.
    pub fn lower(&self, named: &ValueMap) -> Result<PredicateNode, Error> {
        Ok(match self {
            PredicateNode::Raw { expression, params } => {
                let expr = DomainExpr::parse(expression)?;
                let condition = expr.condition()?;
                lower_condition(&condition, params, named)?
            }
            PredicateNode::And(children) => PredicateNode::And(lower_all(children, named)?),
            PredicateNode::Or(children) => PredicateNode::Or(lower_all(children, named)?),
            PredicateNode::Not(children) => PredicateNode::Not(lower_all(children, named)?),
            other => other.clone(),
        })
    }
}

fn lower_all(nodes: &[PredicateNode], named: &ValueMap) -> Result<Vec<PredicateNode>, Error> {
    nodes.iter().map(|n| n.lower(named)).collect()
}

/// An operand of a domain condition after parameter substitution.
enum Side {
    Path(String),
    Value(Value),
}

fn side(operand: &DomainOperand, params: &[Value], named: &ValueMap) -> Result<Side, Error> {
    Ok(match operand {
        DomainOperand::Path(path) => Side::Path(path.clone()),
        DomainOperand::Positional(n) => Side::Value(
            params
                .get(n - 1)
                .cloned()
                .ok_or_else(|| ParseError::msg(format!("no value for parameter ?{}", n)))?,
        ),
        DomainOperand::Named(name) => Side::Value(named.get(name).cloned().unwrap_or(Value::Null)),
        DomainOperand::Literal(literal) => Side::Value(match literal {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::String(s) => Value::String(s.clone()),
        }),
    })
}

fn value_side(operand: &DomainOperand, params: &[Value], named: &ValueMap) -> Result<Value, Error> {
    match side(operand, params, named)? {
        Side::Value(v) => Ok(v),
        Side::Path(path) => Err(Error::Unsupported(format!(
            "field 'self.{}' used where a value is expected",
            path
        ))),
    }
}

fn lower_condition(
    condition: &Condition,
    params: &[Value],
    named: &ValueMap,
) -> Result<PredicateNode, Error> {
    let lower = |c: &Condition| lower_condition(c, params, named);
    Ok(match condition {
        Condition::And(children) => {
            PredicateNode::And(children.iter().map(lower).collect::<Result<_, _>>()?)
        }
        Condition::Or(children) => {
            PredicateNode::Or(children.iter().map(lower).collect::<Result<_, _>>()?)
        }
        Condition::Not(inner) => PredicateNode::Not(vec![lower(inner.as_ref())?]),
        Condition::Compare { left, op, right } => {
            let op_left = Operator::from_compare(*op);
            let op_right = Operator::from_compare(op.flip());
            match (side(left, params, named)?, side(right, params, named)?) {
                (Side::Path(a), Side::Path(b)) => PredicateNode::field_compare(a, op_left, b),
                (Side::Path(field), Side::Value(v)) => comparison(field, op_left, v),
                (Side::Value(v), Side::Path(field)) => comparison(field, op_right, v),
                (Side::Value(a), Side::Value(b)) => {
                    PredicateNode::Constant(FilterEvaluator::test(op_left, &a, &b))
                }
            }
        }
        Condition::IsNull { operand, negated } => match side(operand, params, named)? {
            Side::Path(field) => PredicateNode::null_check(field, !negated),
            Side::Value(v) => PredicateNode::Constant(v.is_null() != *negated),
        },
        Condition::Like {
            operand,
            pattern,
            negated,
        } => {
            let pattern = value_side(pattern, params, named)?;
            let op = if *negated { Operator::NotLike } else { Operator::Like };
            match side(operand, params, named)? {
                Side::Path(field) => PredicateNode::Comparison {
                    field,
                    op,
                    operand: Operand::Value(pattern),
                    fold_case: false,
                },
                Side::Value(v) => PredicateNode::Constant(FilterEvaluator::test(op, &v, &pattern)),
            }
        }
        Condition::In {
            operand,
            values,
            negated,
        } => {
            let mut list = Vec::new();
            for value in values {
                match value_side(value, params, named)? {
                    Value::List(items) => list.extend(items),
                    item => list.push(item),
                }
            }
            let op = if *negated { Operator::NotIn } else { Operator::In };
            match side(operand, params, named)? {
                Side::Path(field) => PredicateNode::Comparison {
                    field,
                    op,
                    operand: Operand::Values(list),
                    fold_case: false,
                },
                Side::Value(v) => {
                    PredicateNode::Constant(FilterEvaluator::test(op, &v, &Value::List(list)))
                }
            }
        }
        Condition::Between {
            operand,
            low,
            high,
            negated,
        } => {
            let start = value_side(low, params, named)?;
            let end = value_side(high, params, named)?;
            match side(operand, params, named)? {
                Side::Path(field) => PredicateNode::Between {
                    field,
                    start,
                    end,
                    inclusive: true,
                    negated: *negated,
                },
                Side::Value(v) => PredicateNode::Constant(
                    FilterEvaluator::in_range(&v, &start, &end, true) != *negated,
                ),
            }
        }
    })
}

fn comparison(field: String, op: Operator, value: Value) -> PredicateNode {
    PredicateNode::Comparison {
        field,
        op,
        operand: Operand::Value(value),
        fold_case: false,
    }
}
