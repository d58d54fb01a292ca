//! Record type for stored values.

use entigraph_proto::{Value, ValueMap};
use rkyv::{Archive, Deserialize, Serialize};

use super::key::{current_timestamp, EntityId};
use crate::catalog::{EntityDef, ID, VERSION};
use crate::error::Error;

/// A stored record with metadata.
///
/// Field data is kept as JSON inside the rkyv envelope; relations are stored
/// as ids (references) or id lists (collections without a back-reference).
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Record {
    /// Serialized field data.
    pub data: Vec<u8>,

    /// Optimistic-lock version, bumped on every write.
    pub version: i64,

    /// Creation timestamp in microseconds since Unix epoch.
    pub created_at: u64,

    /// Last write timestamp in microseconds since Unix epoch.
    pub updated_at: u64,
}

impl Record {
    /// Create a new record at version zero.
    pub fn new(fields: &ValueMap) -> Result<Self, Error> {
        let now = current_timestamp();
        Ok(Self {
            data: encode_fields(fields)?,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// The next version of this record with new field data.
    pub fn next(&self, fields: &ValueMap) -> Result<Self, Error> {
        Ok(Self {
            data: encode_fields(fields)?,
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: current_timestamp(),
        })
    }

    /// Decode the field data.
    pub fn fields(&self) -> Result<ValueMap, Error> {
        serde_json::from_slice(&self.data).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Serialize the record to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

fn encode_fields(fields: &ValueMap) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(fields).map_err(|e| Error::Serialization(e.to_string()))
}

/// A decoded entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedEntity {
    /// Entity type name.
    pub entity: String,
    /// Identifier.
    pub id: EntityId,
    /// Current version.
    pub version: i64,
    /// Stored fields, typed according to the entity definition.
    pub fields: ValueMap,
}

impl PersistedEntity {
    /// Decode a record, coercing stored values to their declared types and
    /// dropping fields the entity no longer declares.
    pub fn decode(def: &EntityDef, id: EntityId, record: &Record) -> Result<Self, Error> {
        let raw = record.fields()?;
        let mut fields = ValueMap::new();
        for (name, value) in raw {
            if let Some(prop) = def.property(&name) {
                if prop.is_builtin() {
                    continue;
                }
                let value = if prop.is_relation() { value } else { prop.coerce(value)? };
                fields.insert(name, value);
            }
        }
        Ok(Self {
            entity: def.name.clone(),
            id,
            version: record.version,
            fields,
        })
    }

    /// Value of a field; `id` and `version` are answered from the row itself.
    pub fn get(&self, name: &str) -> Value {
        match name {
            ID => Value::Int(self.id),
            VERSION => Value::Int(self.version),
            _ => self.fields.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    /// Id stored in a reference field.
    pub fn reference_id(&self, name: &str) -> Option<EntityId> {
        self.fields.get(name).and_then(Value::as_i64)
    }

    /// All fields including `id` and `version`.
    pub fn to_map(&self) -> ValueMap {
        let mut map = self.fields.clone();
        map.insert(ID.to_string(), Value::Int(self.id));
        map.insert(VERSION.to_string(), Value::Int(self.version));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PropertyDescriptor, ScalarType};
    use entigraph_proto::value_map;

    #[test]
    fn test_record_roundtrip() {
        let record = Record::new(&value_map! { "name" => "Acme" }).unwrap();
        let bytes = record.to_bytes().unwrap();
        let decoded = Record::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, record);
        assert_eq!(decoded.version, 0);
        assert_eq!(decoded.fields().unwrap()["name"], Value::from("Acme"));
    }

    #[test]
    fn test_next_bumps_version() {
        let record = Record::new(&ValueMap::new()).unwrap();
        let next = record.next(&value_map! { "a" => 1 }).unwrap();
        assert_eq!(next.version, 1);
        assert_eq!(next.created_at, record.created_at);
    }

    #[test]
    fn test_decode_coerces_and_drops_unknown() {
        let def = EntityDef::new("Order")
            .with_property(PropertyDescriptor::scalar("placed", ScalarType::Date))
            .with_property(PropertyDescriptor::reference("customer", "Customer"));
        let record = Record::new(&value_map! {
            "placed" => "2024-01-31",
            "customer" => 4,
            "legacy" => true,
        })
        .unwrap();

        let entity = PersistedEntity::decode(&def, 9, &record).unwrap();
        assert!(matches!(entity.fields["placed"], Value::Date(_)));
        assert_eq!(entity.reference_id("customer"), Some(4));
        assert!(!entity.fields.contains_key("legacy"));
        assert_eq!(entity.get("id"), Value::Int(9));
        assert_eq!(entity.get("version"), Value::Int(0));
    }
}
