//! Predicate evaluation.
//!
//! Used by stores that filter rows themselves rather than handing the
//! rendered statement to a database. Null handling follows SQL: any
//! comparison with a null operand is false, only `IS [NOT] NULL` tests nulls.

use std::cmp::Ordering;

use entigraph_proto::Value;

use super::predicate::{Operand, Operator, PredicateNode};
use crate::catalog::ID;
use crate::error::Error;

/// Evaluates predicate trees against rows.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a predicate. `lookup` returns the value at a dotted path of
    /// the row being tested; raw domain nodes must have been lowered first.
    pub fn evaluate<F>(node: &PredicateNode, lookup: &mut F) -> Result<bool, Error>
    where
        F: FnMut(&str) -> Result<Value, Error>,
    {
        match node {
            PredicateNode::Comparison {
                field,
                op,
                operand,
                fold_case,
            } => {
                let value = lookup(field)?;
                let operand = match operand {
                    Operand::None => Value::Null,
                    Operand::Value(v) => v.clone(),
                    Operand::Values(vs) => Value::List(vs.clone()),
                    Operand::Field(other) => lookup(other)?,
                };
                if *fold_case {
                    Ok(Self::test(*op, &fold(value), &fold(operand)))
                } else {
                    Ok(Self::test(*op, &value, &operand))
                }
            }
            PredicateNode::Between {
                field,
                start,
                end,
                inclusive,
                negated,
            } => {
                let value = lookup(field)?;
                if value.is_null() || start.is_null() || end.is_null() {
                    return Ok(false);
                }
                Ok(Self::in_range(&value, start, end, *inclusive) != *negated)
            }
            PredicateNode::And(children) => {
                for child in children {
                    if !Self::evaluate(child, lookup)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            PredicateNode::Or(children) => {
                for child in children {
                    if Self::evaluate(child, lookup)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            PredicateNode::Not(children) => {
                for child in children {
                    if Self::evaluate(child, lookup)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            PredicateNode::Constant(b) => Ok(*b),
            PredicateNode::Raw { expression, .. } => Err(Error::Unsupported(format!(
                "domain expression '{}' must be lowered before evaluation",
                expression
            ))),
        }
    }

    /// Apply one operator to a field value and its operand.
    pub fn test(op: Operator, value: &Value, operand: &Value) -> bool {
        let value = as_key(value);
        match op {
            Operator::IsNull => value.is_null(),
            Operator::NotNull => !value.is_null(),
            Operator::In | Operator::NotIn => {
                if value.is_null() {
                    return false;
                }
                let found = match operand {
                    Value::List(items) => items.iter().any(|i| Self::values_equal(value, i)),
                    single => Self::values_equal(value, single),
                };
                found == (op == Operator::In)
            }
            Operator::Like | Operator::NotLike => match (value, operand) {
                (Value::String(s), Value::String(p)) => {
                    Self::like_match(s, p) == (op == Operator::Like)
                }
                _ => false,
            },
            _ if value.is_null() || operand.is_null() => false,
            Operator::Eq => Self::values_equal(value, operand),
            Operator::Ne => !Self::values_equal(value, operand),
            Operator::Lt => Self::ordering(value, operand).is_some_and(Ordering::is_lt),
            Operator::Le => Self::ordering(value, operand).is_some_and(Ordering::is_le),
            Operator::Gt => Self::ordering(value, operand).is_some_and(Ordering::is_gt),
            Operator::Ge => Self::ordering(value, operand).is_some_and(Ordering::is_ge),
        }
    }

    /// Range test; exclusive bounds unless `inclusive`.
    pub fn in_range(value: &Value, start: &Value, end: &Value, inclusive: bool) -> bool {
        let (Some(low), Some(high)) = (Self::ordering(value, start), Self::ordering(value, end))
        else {
            return false;
        };
        if inclusive {
            low.is_ge() && high.is_le()
        } else {
            low.is_gt() && high.is_lt()
        }
    }

    /// Check if two values are equal. Entity references compare by id.
    pub fn values_equal(a: &Value, b: &Value) -> bool {
        let (a, b) = (as_key(a), as_key(b));
        match (a, b) {
            (Value::Date(_), Value::DateTime(_)) | (Value::DateTime(_), Value::Date(_)) => {
                Self::ordering(a, b) == Some(Ordering::Equal)
            }
            _ => a.loosely_equals(b),
        }
    }

    /// Compare two values, returning their ordering if comparable.
    pub fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
        match (as_key(a), as_key(b)) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a @ (Value::Int(_) | Value::Float(_)), b @ (Value::Int(_) | Value::Float(_))) => {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::DateTime(b)) => Some(a.and_hms_opt(0, 0, 0)?.cmp(b)),
            (Value::DateTime(a), Value::Date(b)) => Some(a.cmp(&b.and_hms_opt(0, 0, 0)?)),
            _ => None,
        }
    }

    /// Match a string against a SQL LIKE pattern.
    ///
    /// Supports:
    /// - `%` matches zero or more characters
    /// - `_` matches exactly one character
    /// - `\\%` matches literal `%`
    /// - `\\_` matches literal `_`
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let value: Vec<char> = value.chars().collect();
        let pattern = like_tokens(pattern);

        // greedy match; on a mismatch only the latest `%` is retried
        let (mut v, mut p) = (0, 0);
        let mut retry: Option<(usize, usize)> = None;
        while v < value.len() {
            match pattern.get(p) {
                Some(LikeToken::Any) => {
                    retry = Some((p + 1, v));
                    p += 1;
                }
                Some(LikeToken::One) => {
                    v += 1;
                    p += 1;
                }
                Some(LikeToken::Char(c)) if *c == value[v] => {
                    v += 1;
                    p += 1;
                }
                _ => match retry {
                    Some((after, from)) => {
                        retry = Some((after, from + 1));
                        p = after;
                        v = from + 1;
                    }
                    None => return false,
                },
            }
        }
        pattern[p..].iter().all(|t| *t == LikeToken::Any)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    Any,
    One,
    Char(char),
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            '\\' => LikeToken::Char(chars.next().unwrap_or('\\')),
            c => LikeToken::Char(c),
        });
    }
    tokens
}

/// A value as it takes part in comparisons: an entity map stands for its id.
fn as_key(value: &Value) -> &Value {
    match value {
        Value::Map(map) => map.get(ID).unwrap_or(value),
        _ => value,
    }
}

fn fold(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_lowercase()),
        Value::List(items) => Value::List(items.into_iter().map(fold).collect()),
        other => other,
    }
}
