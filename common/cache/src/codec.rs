//! Byte encoding of cached entities
//!
//! Entities are stored as JSON. Two shapes share a key space:
//! - plain entries, written by the pass-through and mutex strategies
//! - [`LogicalEntry`] wrappers, written by the logical-expiration strategy
//!
//! The empty byte string is reserved as the null marker. No JSON document is
//! empty, so a marker can never be confused with an encoded value.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::CacheError;

pub const NULL_MARKER: &[u8] = b"";

pub fn is_null_marker(bytes: &[u8]) -> bool {
    bytes == NULL_MARKER
}

pub fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>, CacheError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V, CacheError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// A payload together with the instant it stops being fresh.
///
/// The store never expires these physically. Freshness is decided by
/// comparing `expire_time` with the reader's clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalEntry<T> {
    pub data: T,
    pub expire_time: DateTime<Utc>,
}

impl<T> LogicalEntry<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        let expire_time = chrono::TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::expiring_at(data, expire_time)
    }

    pub fn expiring_at(data: T, expire_time: DateTime<Utc>) -> Self {
        Self { data, expire_time }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_time <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Whole seconds for the store's TTL arguments, rounded up and never zero.
pub fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Shop {
        id: i64,
        name: String,
    }

    #[test]
    fn test_encoded_values_never_collide_with_null_marker() {
        assert!(!is_null_marker(&encode(&"").unwrap()));
        assert!(!is_null_marker(&encode(&Vec::<i32>::new()).unwrap()));
        assert!(is_null_marker(b""));
    }

    #[test]
    fn test_logical_entry_wire_shape() {
        let expire_time = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let entry = LogicalEntry::expiring_at(
            Shop {
                id: 1,
                name: "tea house".to_string(),
            },
            expire_time,
        );

        let json: serde_json::Value = serde_json::from_slice(&encode(&entry).unwrap()).unwrap();
        assert_eq!(json["data"]["name"], "tea house");
        assert_eq!(json["expire_time"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn test_logical_entry_expiry_boundary() {
        let now = Utc::now();
        let entry = LogicalEntry::expiring_at(1, now);

        assert!(entry.is_expired_at(now));
        assert!(!entry.is_expired_at(now - chrono::TimeDelta::seconds(1)));
        assert!(!LogicalEntry::new(1, Duration::from_secs(60)).is_expired());
        assert!(LogicalEntry::new(1, Duration::ZERO).is_expired());
    }

    #[test]
    fn test_plain_value_does_not_decode_as_logical_entry() {
        let bytes = encode(&Shop {
            id: 1,
            name: "x".to_string(),
        })
        .unwrap();

        let result = decode::<LogicalEntry<Shop>>(&bytes);
        assert!(matches!(result, Err(CacheError::Codec(_))));
    }

    #[test]
    fn test_ttl_secs_rounds_up() {
        assert_eq!(ttl_secs(Duration::from_secs(120)), 120);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }
}
