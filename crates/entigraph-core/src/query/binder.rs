//! Parameter binding.
//!
//! Named parameters come from `Query::bind`, from a criteria payload's
//! domain context, and from two implicit read-only variables: `__date__`
//! (today) and `__time__` (now). A named parameter that a domain expression
//! references but nobody bound still gets a value: a null carrying the type
//! of the field it is compared with.

use std::collections::BTreeMap;

use chrono::{Local, NaiveDateTime};
use entigraph_proto::{Value, ValueMap};

use crate::catalog::{PropertyDescriptor, PropertyKind, ScalarType, ID};
use crate::error::Error;

/// Implicit variable holding the current date.
pub const DATE_VAR: &str = "__date__";
/// Implicit variable holding the current timestamp.
pub const TIME_VAR: &str = "__time__";

/// Declared type of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    Scalar(ScalarType),
    Enum(String),
    /// An entity reference, bound as its id.
    Entity(String),
    /// Nothing is known about the parameter.
    Untyped,
}

impl ParamType {
    /// Type of values compared with `property`.
    pub fn of(property: &PropertyDescriptor) -> Self {
        match &property.kind {
            PropertyKind::Scalar { scalar } => ParamType::Scalar(*scalar),
            PropertyKind::Enum { name, .. } => ParamType::Enum(name.clone()),
            PropertyKind::Reference { target } | PropertyKind::Collection { target, .. } => {
                ParamType::Entity(target.clone())
            }
        }
    }
}

/// A named parameter referenced by a compiled query.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredParam {
    pub name: String,
    pub ty: ParamType,
}

/// A bound named parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub value: Value,
    pub ty: ParamType,
}

impl Parameter {
    /// A null of the given type.
    pub fn null(ty: ParamType) -> Self {
        Self {
            value: Value::Null,
            ty,
        }
    }
}

/// Values bound to a query.
#[derive(Debug, Clone)]
pub struct Bindings {
    values: ValueMap,
    now: NaiveDateTime,
}

impl Default for Bindings {
    fn default() -> Self {
        Self::at(Local::now().naive_local())
    }
}

impl Bindings {
    /// Create bindings whose implicit variables reflect the current time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create bindings with a fixed clock.
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            values: ValueMap::new(),
            now,
        }
    }

    /// Fix the clock behind the implicit variables.
    pub fn set_clock(&mut self, now: NaiveDateTime) {
        self.now = now;
    }

    /// Bind a named parameter. The implicit variables cannot be rebound.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<(), Error> {
        let name = name.into();
        if name == DATE_VAR || name == TIME_VAR {
            return Err(Error::InvalidData(format!("'{}' is read-only", name)));
        }
        self.values.insert(name, value.into());
        Ok(())
    }

    /// Bind every entry of a context map.
    pub fn extend(&mut self, context: ValueMap) -> Result<(), Error> {
        for (name, value) in context {
            self.bind(name, value)?;
        }
        Ok(())
    }

    /// Value of a variable, including the implicit ones.
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            DATE_VAR => Some(Value::Date(self.now.date())),
            TIME_VAR => Some(Value::DateTime(self.now)),
            _ => self.values.get(name).cloned(),
        }
    }

    /// Check if a variable is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Prepare a positional parameter.
    ///
    /// A string naming a bound variable stands for that variable's value,
    /// and entity maps bind as their id.
    pub fn positional(&self, value: &Value) -> Value {
        match value {
            Value::String(name) => match self.get(name) {
                Some(bound) => as_param(bound),
                None => value.clone(),
            },
            other => as_param(other.clone()),
        }
    }

    /// Named parameters for a query: every bound variable, the implicit
    /// ones, and a typed null for each declared parameter nobody bound.
    pub fn named(&self, declared: &[DeclaredParam]) -> BTreeMap<String, Parameter> {
        let ty_of = |name: &str| {
            declared
                .iter()
                .find(|d| d.name == name)
                .map(|d| d.ty.clone())
                .unwrap_or(ParamType::Untyped)
        };

        let mut params = BTreeMap::new();
        for (name, value) in &self.values {
            params.insert(
                name.clone(),
                Parameter {
                    value: as_param(value.clone()),
                    ty: ty_of(name),
                },
            );
        }
        params.insert(
            DATE_VAR.to_string(),
            Parameter {
                value: Value::Date(self.now.date()),
                ty: ParamType::Scalar(ScalarType::Date),
            },
        );
        params.insert(
            TIME_VAR.to_string(),
            Parameter {
                value: Value::DateTime(self.now),
                ty: ParamType::Scalar(ScalarType::DateTime),
            },
        );
        for param in declared {
            params
                .entry(param.name.clone())
                .or_insert_with(|| Parameter::null(param.ty.clone()));
        }
        params
    }
}

/// Entity maps become their id; lists are converted element-wise.
pub(crate) fn as_param(value: Value) -> Value {
    match value {
        Value::Map(mut map) => match map.remove(ID) {
            Some(id) => id,
            None => Value::Map(map),
        },
        Value::List(items) => Value::List(items.into_iter().map(as_param).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use entigraph_proto::value_map;

    fn clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_implicit_variables() {
        let bindings = Bindings::at(clock());
        assert_eq!(
            bindings.get(DATE_VAR),
            Some(Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()))
        );
        assert_eq!(bindings.get(TIME_VAR), Some(Value::DateTime(clock())));

        let mut bindings = bindings;
        assert!(bindings.bind(DATE_VAR, "2020-01-01").is_err());
    }

    #[test]
    fn test_typed_null_for_missing() {
        let mut bindings = Bindings::at(clock());
        bindings.bind("status", "open").unwrap();
        let declared = vec![
            DeclaredParam {
                name: "status".into(),
                ty: ParamType::Scalar(ScalarType::String),
            },
            DeclaredParam {
                name: "since".into(),
                ty: ParamType::Scalar(ScalarType::Date),
            },
        ];
        let named = bindings.named(&declared);
        assert_eq!(named["status"].value, Value::from("open"));
        assert_eq!(named["since"], Parameter::null(ParamType::Scalar(ScalarType::Date)));
        assert!(named.contains_key(DATE_VAR));
        assert!(named.contains_key(TIME_VAR));
    }

    #[test]
    fn test_positional_context_names_and_entities() {
        let mut bindings = Bindings::at(clock());
        bindings
            .extend(value_map! { "customer" => value_map! { "id" => 4, "name" => "Acme" } })
            .unwrap();
        assert_eq!(bindings.positional(&Value::from("customer")), Value::Int(4));
        assert_eq!(bindings.positional(&Value::from("plain")), Value::from("plain"));
        assert_eq!(
            bindings.positional(&Value::from(vec![value_map! { "id" => 1 }])),
            Value::List(vec![Value::Int(1)])
        );
        assert!(matches!(
            bindings.positional(&Value::from(DATE_VAR)),
            Value::Date(_)
        ));
    }
}
