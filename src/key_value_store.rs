use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};

use crate::{commands::hyperloglog::HyperLogLog, stream::StreamLog};

/// Shared handle to the store, as passed into every command entry point.
pub type SharedStore = Arc<Mutex<KeyValueStore>>;

/// The tagged union of every value shape the engine can hold.
///
/// Exactly one tag is active per key at a time; invoking an operation
/// against the wrong tag is a [`CommandError::TypeMismatch`], checked at the
/// access boundary rather than through a runtime cast.
///
/// [`CommandError::TypeMismatch`]: crate::commands::CommandError::TypeMismatch
#[derive(Clone, Debug, PartialEq)]
pub enum DataType {
    String(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    SortedSet(BTreeMap<String, f64>),
    Hash(HashMap<String, String>),
    Stream(StreamLog),
    HyperLogLog(HyperLogLog),
}

impl DataType {
    /// Short tag name, as reported by the key-type operation.
    pub fn type_name(&self) -> &'static str {
        match self {
            DataType::String(_) => "string",
            DataType::List(_) => "list",
            DataType::Set(_) => "set",
            DataType::SortedSet(_) => "zset",
            DataType::Hash(_) => "hash",
            DataType::Stream(_) => "stream",
            DataType::HyperLogLog(_) => "hyperloglog",
        }
    }
}

/// A stored value together with its optional absolute expiry deadline.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub data: DataType,
    pub expiration: Option<Instant>,
}

impl Value {
    /// A value that never expires.
    pub fn permanent(data: DataType) -> Self {
        Value {
            data,
            expiration: None,
        }
    }
}

/// The key namespace plus the expiring key registry.
///
/// Every accessor resolves the key through the expiry check first: a key
/// whose deadline has elapsed is logically absent even while still
/// physically present, and is reaped in place on access. A periodic sweep
/// ([`crate::expiry::ExpiryReaper`]) handles keys nobody touches.
#[derive(Clone, Debug, Default)]
pub struct KeyValueStore {
    entries: HashMap<String, Value>,
}

impl KeyValueStore {
    pub fn new() -> Self {
        KeyValueStore {
            entries: HashMap::new(),
        }
    }

    fn is_expired(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(Value {
                expiration: Some(deadline),
                ..
            }) => *deadline <= Instant::now(),
            _ => false,
        }
    }

    /// Looks up a live value, reaping the key first if its TTL elapsed.
    pub fn get(&mut self, key: &str) -> Option<&Value> {
        if self.is_expired(key) {
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        if self.is_expired(key) {
            self.entries.remove(key);
            return None;
        }

        self.entries.get_mut(key)
    }

    /// Inserts or overwrites a key. A fresh write always replaces any
    /// previous value and deadline, expired or not.
    pub fn insert(&mut self, key: String, value: Value) {
        self.entries.insert(key, value);
    }

    /// Returns the live value under `key`, creating a permanent one from
    /// `default` when the key is absent or expired.
    pub fn get_or_insert_with(
        &mut self,
        key: &str,
        default: impl FnOnce() -> DataType,
    ) -> &mut Value {
        if self.is_expired(key) {
            self.entries.remove(key);
        }

        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Value::permanent(default()))
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if self.is_expired(key) {
            self.entries.remove(key);
            return None;
        }

        self.entries.remove(key)
    }

    pub fn contains_key(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Records an absolute deadline `now + ttl` for an existing key.
    /// Returns false when the key is absent (or already expired).
    pub fn set_expiry(&mut self, key: &str, ttl: Duration) -> bool {
        let deadline = Instant::now() + ttl;

        match self.get_mut(key) {
            Some(value) => {
                value.expiration = Some(deadline);
                true
            }
            None => false,
        }
    }

    /// Physically removes every key whose deadline has elapsed and returns
    /// how many were reaped. Runs under the caller's store lock, so a sweep
    /// can never race a fresh write.
    pub fn reap_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();

        self.entries.retain(|_, value| match value.expiration {
            Some(deadline) => deadline > now,
            None => true,
        });

        before - self.entries.len()
    }

    /// Number of live keys.
    pub fn len(&mut self) -> usize {
        self.reap_expired();
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}
