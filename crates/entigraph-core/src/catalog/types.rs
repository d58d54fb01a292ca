//! Core type definitions for the catalog.

use chrono::{NaiveDate, NaiveDateTime};
use entigraph_proto::Value;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Scalar data types a property can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// Decimal number, held as a float.
    Decimal,
    /// Short string.
    String,
    /// Long text.
    Text,
    /// Binary data. Never projected.
    Bytes,
    /// Calendar date.
    Date,
    /// Date and time.
    DateTime,
}

/// The shape of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyKind {
    /// A plain value.
    Scalar {
        #[serde(rename = "type")]
        scalar: ScalarType,
    },
    /// A value restricted to a fixed set of names.
    Enum {
        /// Name of the enum type.
        name: String,
        /// Allowed variant values.
        variants: Vec<String>,
    },
    /// A single reference to another entity.
    Reference {
        /// Target entity name.
        target: String,
    },
    /// A collection of other entities.
    Collection {
        /// Target entity name.
        target: String,
        /// The reference property on the target pointing back to the owner.
        /// Collections without one store their member ids on the owner.
        #[serde(default)]
        mapped_by: Option<String>,
        /// Whether removed members are orphans to be deleted.
        #[serde(default)]
        owned: bool,
    },
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float64 | ScalarType::Decimal
        )
    }

    /// Check if this type is a string-like type.
    pub fn is_string_like(&self) -> bool {
        matches!(self, ScalarType::String | ScalarType::Text)
    }

    /// Convert a loosely typed payload value into this type.
    ///
    /// Null passes through. Numbers may arrive as strings and dates as ISO
    /// strings; anything that cannot be read as this type is an error.
    pub fn coerce(&self, value: Value) -> Result<Value, Error> {
        if value.is_null() {
            return Ok(value);
        }
        let mismatch = |value: &Value| {
            Error::InvalidData(format!("cannot read {} as {:?}", value.type_name(), self))
        };

        match self {
            ScalarType::Bool => match &value {
                Value::Bool(_) => Ok(value),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
                _ => Err(mismatch(&value)),
            },
            ScalarType::Int32 | ScalarType::Int64 => {
                value.as_i64().map(Value::Int).ok_or_else(|| mismatch(&value))
            }
            ScalarType::Float64 | ScalarType::Decimal => match &value {
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| mismatch(&value)),
                _ => value.as_f64().map(Value::Float).ok_or_else(|| mismatch(&value)),
            },
            ScalarType::String | ScalarType::Text => match value {
                Value::String(_) => Ok(value),
                Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Date(_)
                | Value::DateTime(_) => Ok(Value::String(value.to_string())),
                other => Err(mismatch(&other)),
            },
            ScalarType::Bytes => Ok(value),
            ScalarType::Date => match &value {
                Value::Date(_) => Ok(value),
                Value::DateTime(dt) => Ok(Value::Date(dt.date())),
                Value::String(s) => parse_date(s)
                    .map(Value::Date)
                    .or_else(|| parse_datetime(s).map(|dt| Value::Date(dt.date())))
                    .ok_or_else(|| mismatch(&value)),
                _ => Err(mismatch(&value)),
            },
            ScalarType::DateTime => match &value {
                Value::DateTime(_) => Ok(value),
                Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0).map(Value::DateTime).unwrap_or(Value::Null)),
                Value::String(s) => parse_datetime(s)
                    .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
                    .map(Value::DateTime)
                    .ok_or_else(|| mismatch(&value)),
                _ => Err(mismatch(&value)),
            },
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()
}

impl PropertyKind {
    /// Create a scalar kind.
    pub fn scalar(scalar: ScalarType) -> Self {
        PropertyKind::Scalar { scalar }
    }

    /// Target entity of a relation.
    pub fn target(&self) -> Option<&str> {
        match self {
            PropertyKind::Reference { target } | PropertyKind::Collection { target, .. } => {
                Some(target)
            }
            _ => None,
        }
    }

    /// Check if this is a single-valued reference.
    pub fn is_reference(&self) -> bool {
        matches!(self, PropertyKind::Reference { .. })
    }

    /// Check if this is a collection.
    pub fn is_collection(&self) -> bool {
        matches!(self, PropertyKind::Collection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(ScalarType::Int64.coerce("12".into()).unwrap(), Value::Int(12));
        assert_eq!(ScalarType::Float64.coerce(Value::Int(3)).unwrap(), Value::Float(3.0));
        assert_eq!(ScalarType::Decimal.coerce("2.50".into()).unwrap(), Value::Float(2.5));
        assert!(ScalarType::Int32.coerce("x".into()).is_err());
    }

    #[test]
    fn test_coerce_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(ScalarType::Date.coerce("2024-02-29".into()).unwrap(), Value::Date(date));
        assert_eq!(
            ScalarType::DateTime.coerce("2024-02-29T10:30:00".into()).unwrap(),
            Value::DateTime(date.and_hms_opt(10, 30, 0).unwrap())
        );
        assert_eq!(
            ScalarType::Date.coerce("2024-02-29T10:30:00.000Z".into()).unwrap(),
            Value::Date(date)
        );
    }

    #[test]
    fn test_null_passes_through() {
        assert_eq!(ScalarType::Bool.coerce(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_kind_serde() {
        let kind: PropertyKind =
            serde_json::from_str(r#"{"kind": "collection", "target": "Line", "mapped_by": "order", "owned": true}"#)
                .unwrap();
        assert_eq!(kind.target(), Some("Line"));
        assert!(kind.is_collection());

        let scalar: PropertyKind = serde_json::from_str(r#"{"kind": "scalar", "type": "date_time"}"#).unwrap();
        assert_eq!(scalar, PropertyKind::scalar(ScalarType::DateTime));
    }
}
