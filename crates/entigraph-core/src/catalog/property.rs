//! Property descriptors.

use std::fmt;
use std::sync::Arc;

use entigraph_proto::{Value, ValueMap};
use serde::{Deserialize, Serialize};

use super::types::{PropertyKind, ScalarType};
use super::{ID, VERSION};

/// Function deriving a computed property from its dependencies.
///
/// The map passed in holds exactly the declared dependencies. Relation
/// dependencies are given as ids (or lists of ids).
pub type ComputeFn = Arc<dyn Fn(&ValueMap) -> Value + Send + Sync>;

/// Computed property definition.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Computed {
    /// Properties the value is derived from.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(skip)]
    compute: Option<ComputeFn>,
}

impl Computed {
    /// Create a computed definition.
    pub fn new(depends_on: Vec<String>, compute: Option<ComputeFn>) -> Self {
        Self {
            depends_on,
            compute,
        }
    }

    /// The derivation function, when one has been attached.
    pub fn compute_fn(&self) -> Option<&ComputeFn> {
        self.compute.as_ref()
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("depends_on", &self.depends_on)
            .field("compute", &self.compute.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl PartialEq for Computed {
    fn eq(&self, other: &Self) -> bool {
        self.depends_on == other.depends_on
    }
}

/// Metadata for one property of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name.
    pub name: String,
    /// Value shape.
    #[serde(flatten)]
    pub kind: PropertyKind,
    /// Whether a value is required.
    #[serde(default)]
    pub required: bool,
    /// Transient properties live only in payloads and are never stored.
    #[serde(default)]
    pub transient: bool,
    /// Whether this is the entity's display field.
    #[serde(default, rename = "display")]
    pub display_field: bool,
    /// Computed property definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<Computed>,
}

impl PropertyDescriptor {
    fn with_kind(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            transient: false,
            display_field: false,
            computed: None,
        }
    }

    /// Create a scalar property.
    pub fn scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self::with_kind(name, PropertyKind::scalar(scalar))
    }

    /// Create an enum property.
    pub fn enumeration(name: impl Into<String>, enum_name: impl Into<String>, variants: &[&str]) -> Self {
        Self::with_kind(
            name,
            PropertyKind::Enum {
                name: enum_name.into(),
                variants: variants.iter().map(|v| v.to_string()).collect(),
            },
        )
    }

    /// Create a single-valued reference.
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            PropertyKind::Reference {
                target: target.into(),
            },
        )
    }

    /// Create a collection whose members point back through `mapped_by`.
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            name,
            PropertyKind::Collection {
                target: target.into(),
                mapped_by: Some(mapped_by.into()),
                owned: false,
            },
        )
    }

    /// Create a collection whose member ids are stored on the owner.
    pub fn many_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            PropertyKind::Collection {
                target: target.into(),
                mapped_by: None,
                owned: false,
            },
        )
    }

    /// Mark a collection as owning its members.
    pub fn owned(mut self) -> Self {
        if let PropertyKind::Collection { owned, .. } = &mut self.kind {
            *owned = true;
        }
        self
    }

    /// Mark as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as transient.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Mark as the display field.
    pub fn display(mut self) -> Self {
        self.display_field = true;
        self
    }

    /// Make this property computed from `depends_on` by `compute`.
    pub fn computed<F>(mut self, depends_on: &[&str], compute: F) -> Self
    where
        F: Fn(&ValueMap) -> Value + Send + Sync + 'static,
    {
        self.computed = Some(Computed::new(
            depends_on.iter().map(|d| d.to_string()).collect(),
            Some(Arc::new(compute)),
        ));
        self
    }

    /// Attach or replace the derivation function of a computed property.
    pub fn set_compute(&mut self, compute: ComputeFn) {
        match &mut self.computed {
            Some(computed) => computed.compute = Some(compute),
            None => self.computed = Some(Computed::new(Vec::new(), Some(compute))),
        }
    }

    /// Check if this is the primary key.
    pub fn is_id(&self) -> bool {
        self.name == ID
    }

    /// Check if this is the optimistic-lock version.
    pub fn is_version(&self) -> bool {
        self.name == VERSION
    }

    /// Check if this is the id or version property.
    pub fn is_builtin(&self) -> bool {
        self.is_id() || self.is_version()
    }

    /// Check if this is a single-valued reference.
    pub fn is_reference(&self) -> bool {
        self.kind.is_reference()
    }

    /// Check if this is a collection.
    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }

    /// Check if this is a reference or a collection.
    pub fn is_relation(&self) -> bool {
        self.kind.target().is_some()
    }

    /// Target entity of a relation.
    pub fn target(&self) -> Option<&str> {
        self.kind.target()
    }

    /// Back-reference property on the target of a collection.
    pub fn mapped_by(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Collection { mapped_by, .. } => mapped_by.as_deref(),
            _ => None,
        }
    }

    /// Check if this collection owns its members.
    pub fn is_owned(&self) -> bool {
        matches!(self.kind, PropertyKind::Collection { owned: true, .. })
    }

    /// Check if this property is computed.
    pub fn is_computed(&self) -> bool {
        self.computed.is_some()
    }

    /// Dependencies of a computed property.
    pub fn depends_on(&self) -> &[String] {
        self.computed
            .as_ref()
            .map(|c| c.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// Scalar type, if this is a scalar property.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.kind {
            PropertyKind::Scalar { scalar } => Some(scalar),
            _ => None,
        }
    }

    /// Check if this property holds binary data.
    pub fn is_binary(&self) -> bool {
        self.scalar_type() == Some(ScalarType::Bytes)
    }

    /// Whether the property is persisted on the owner's record.
    ///
    /// Transient and computed properties are not, and neither are collections
    /// that are derived from a back-reference on their members.
    pub fn is_stored(&self) -> bool {
        !self.transient && !self.is_computed() && !(self.is_collection() && self.mapped_by().is_some())
    }

    /// Convert a scalar payload value to this property's type.
    pub fn coerce(&self, value: Value) -> Result<Value, crate::error::Error> {
        match &self.kind {
            PropertyKind::Scalar { scalar } => scalar.coerce(value),
            PropertyKind::Enum { name, variants } => match &value {
                Value::Null => Ok(value),
                Value::String(s) if variants.iter().any(|v| v == s) => Ok(value),
                _ => Err(crate::error::Error::InvalidData(format!(
                    "{} is not a variant of enum {}",
                    value, name
                ))),
            },
            _ => Ok(value),
        }
    }
}
