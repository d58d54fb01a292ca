//! Key encoding for entity records.

use std::fmt;

/// Entity identifier.
pub type EntityId = i64;

/// Separator between entity name and id in a key.
const SEPARATOR: u8 = 0;

/// Size of an encoded id in bytes.
pub const ID_SIZE: usize = 8;

/// Key of one entity record.
///
/// Key format: `[entity name][0x00][id (8 bytes, big-endian)]`
///
/// Big-endian ids keep a prefix scan over one entity type in id order.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Entity type name.
    pub entity: String,
    /// Entity identifier.
    pub id: EntityId,
}

impl EntityKey {
    /// Create a new key.
    pub fn new(entity: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity: entity.into(),
            id,
        }
    }

    /// Encode the key to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = prefix(&self.entity);
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf
    }

    /// Decode a key from bytes.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ID_SIZE + 1 {
            return None;
        }
        let (head, id_bytes) = bytes.split_at(bytes.len() - ID_SIZE);
        let (name, sep) = head.split_at(head.len() - 1);
        if sep != [SEPARATOR] {
            return None;
        }
        let entity = std::str::from_utf8(name).ok()?.to_string();
        let mut buf = [0u8; ID_SIZE];
        buf.copy_from_slice(id_bytes);
        Some(Self {
            entity,
            id: EntityId::from_be_bytes(buf),
        })
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

/// Scan prefix covering every record of one entity type.
pub fn prefix(entity: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entity.len() + 1 + ID_SIZE);
    buf.extend_from_slice(entity.as_bytes());
    buf.push(SEPARATOR);
    buf
}

/// Get the current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let key = EntityKey::new("OrderLine", 42);
        let decoded = EntityKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_key_ordering() {
        let a = EntityKey::new("Order", 2).encode();
        let b = EntityKey::new("Order", 10).encode();
        assert!(a < b);
        assert!(a.starts_with(&prefix("Order")));
        assert!(!EntityKey::new("OrderLine", 1).encode().starts_with(&prefix("Order")));
    }

    #[test]
    fn test_decode_rejects_short_keys() {
        assert!(EntityKey::decode(&[1, 2, 3]).is_none());
    }
}
