use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::{Client, CustomRedisError};

/// In-memory stand-in for Redis.
///
/// Unlike a canned-response mock this one keeps state, so conditional sets
/// behave atomically across concurrent tasks and TTLs expire on the tokio
/// clock (`tokio::time::pause` / `advance` work in tests). Clones share the
/// same store, call log and injected failures.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    entries: HashMap<String, MockEntry>,
    failures: HashMap<String, CustomRedisError>,
    calls: Vec<MockRedisCall>,
}

struct MockEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

enum StoredValue {
    Bytes(Vec<u8>),
    Hash(HashMap<String, String>),
}

impl MockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRedisValue {
    None,
    Bytes(Vec<u8>),
    BytesWithTTL(Vec<u8>, u64),
    TTL(u64),
    Fields(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

impl MockState {
    fn record(&mut self, op: &str, key: &str, value: MockRedisValue) -> Result<(), CustomRedisError> {
        self.calls.push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });
        match self.failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn live_entry(&mut self, key: &str) -> Option<&mut MockEntry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn put(&mut self, key: String, value: StoredValue, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key, MockEntry { value, expires_at });
    }
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking test thread must not cascade into every other assertion
    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed a value without recording a call.
    pub fn insert(&self, key: &str, value: impl Into<Vec<u8>>, ttl: Option<Duration>) -> Self {
        self.lock_state()
            .put(key.to_owned(), StoredValue::Bytes(value.into()), ttl);
        self.clone()
    }

    /// Make every subsequent call of `op` (e.g. "get", "setex") fail with `err`.
    pub fn fail_op(&self, op: &str, err: CustomRedisError) -> Self {
        self.lock_state().failures.insert(op.to_owned(), err);
        self.clone()
    }

    pub fn clear_failures(&self) {
        self.lock_state().failures.clear();
    }

    /// Current value of a key, bypassing the call log.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        match self.lock_state().live_entry(key).map(|e| &e.value) {
            Some(StoredValue::Bytes(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Remaining TTL of a key, bypassing the call log.
    pub fn peek_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock_state()
            .live_entry(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        self.lock_state().calls.clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<MockRedisCall> {
        self.lock_state()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, k: String) -> Result<Option<Vec<u8>>, CustomRedisError> {
        let mut state = self.lock_state();
        state.record("get", &k, MockRedisValue::None)?;

        match state.live_entry(&k).map(|e| &e.value) {
            Some(StoredValue::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(StoredValue::Hash(_)) => Err(CustomRedisError::ParseError(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            )),
            None => Ok(None),
        }
    }

    async fn set(&self, k: String, v: Vec<u8>) -> Result<(), CustomRedisError> {
        let mut state = self.lock_state();
        state.record("set", &k, MockRedisValue::Bytes(v.clone()))?;
        state.put(k, StoredValue::Bytes(v), None);
        Ok(())
    }

    async fn setex(&self, k: String, v: Vec<u8>, seconds: u64) -> Result<(), CustomRedisError> {
        let mut state = self.lock_state();
        state.record("setex", &k, MockRedisValue::BytesWithTTL(v.clone(), seconds))?;
        state.put(k, StoredValue::Bytes(v), Some(Duration::from_secs(seconds)));
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        k: String,
        v: Vec<u8>,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        let mut state = self.lock_state();
        state.record("set_nx_ex", &k, MockRedisValue::BytesWithTTL(v.clone(), seconds))?;

        if state.live_entry(&k).is_some() {
            return Ok(false);
        }
        state.put(k, StoredValue::Bytes(v), Some(Duration::from_secs(seconds)));
        Ok(true)
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        let mut state = self.lock_state();
        state.record("del", &k, MockRedisValue::None)?;
        state.entries.remove(&k);
        Ok(())
    }

    async fn del_if_eq(&self, k: String, expected: Vec<u8>) -> Result<bool, CustomRedisError> {
        let mut state = self.lock_state();
        state.record("del_if_eq", &k, MockRedisValue::Bytes(expected.clone()))?;

        let owned = matches!(
            state.live_entry(&k).map(|e| &e.value),
            Some(StoredValue::Bytes(bytes)) if *bytes == expected
        );
        if owned {
            state.entries.remove(&k);
        }
        Ok(owned)
    }

    async fn expire(&self, k: String, seconds: u64) -> Result<bool, CustomRedisError> {
        let mut state = self.lock_state();
        state.record("expire", &k, MockRedisValue::TTL(seconds))?;

        match state.live_entry(&k) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hset_multiple(
        &self,
        k: String,
        fields: Vec<(String, String)>,
    ) -> Result<(), CustomRedisError> {
        let mut state = self.lock_state();
        state.record("hset_multiple", &k, MockRedisValue::Fields(fields.clone()))?;

        match state.live_entry(&k).map(|e| &mut e.value) {
            Some(StoredValue::Hash(existing)) => {
                existing.extend(fields);
                return Ok(());
            }
            Some(StoredValue::Bytes(_)) => {
                return Err(CustomRedisError::ParseError(
                    "WRONGTYPE Operation against a key holding the wrong kind of value"
                        .to_string(),
                ))
            }
            None => {}
        }
        state.put(k, StoredValue::Hash(fields.into_iter().collect()), None);
        Ok(())
    }

    async fn hgetall(&self, k: String) -> Result<HashMap<String, String>, CustomRedisError> {
        let mut state = self.lock_state();
        state.record("hgetall", &k, MockRedisValue::None)?;

        match state.live_entry(&k).map(|e| &e.value) {
            Some(StoredValue::Hash(fields)) => Ok(fields.clone()),
            Some(StoredValue::Bytes(_)) => Err(CustomRedisError::ParseError(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            )),
            None => Ok(HashMap::new()),
        }
    }
}
