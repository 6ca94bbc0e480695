use std::time::Duration;

use tokio::time::Instant;

use crate::{
    commands::CommandError,
    key_value_store::{DataType, KeyValueStore, SharedStore, Value},
};

/// Stores a string value under `key`, replacing any previous value and
/// deadline. With `ttl` set, the key expires `ttl` after the write.
///
/// # Arguments
///
/// * `store` - A thread-safe reference to the key-value store
/// * `key` - The key to write
/// * `value` - The string payload
/// * `ttl` - Optional time-to-live; `None` stores the key permanently
pub async fn set(
    store: &SharedStore,
    key: &str,
    value: &str,
    ttl: Option<Duration>,
) -> Result<(), CommandError> {
    let mut store_guard = store.lock().await;
    apply_set(&mut store_guard, key, value, ttl)
}

/// Retrieves the string stored under `key`.
///
/// # Returns
///
/// * `Ok(String)` - The live value
/// * `Err(CommandError::NotFound)` - The key is absent or its TTL elapsed
/// * `Err(CommandError::TypeMismatch)` - The key holds a non-string value
pub async fn get(store: &SharedStore, key: &str) -> Result<String, CommandError> {
    let mut store_guard = store.lock().await;
    apply_get(&mut store_guard, key)
}

/// Increments the integer stored under `key` by one, creating it at 1 when
/// absent. Non-integer strings are rejected without mutation.
pub async fn incr(store: &SharedStore, key: &str) -> Result<i64, CommandError> {
    let mut store_guard = store.lock().await;
    apply_incr(&mut store_guard, key)
}

pub(crate) fn apply_set(
    store: &mut KeyValueStore,
    key: &str,
    value: &str,
    ttl: Option<Duration>,
) -> Result<(), CommandError> {
    let expiration = ttl.map(|ttl| Instant::now() + ttl);

    store.insert(
        key.to_string(),
        Value {
            data: DataType::String(value.to_string()),
            expiration,
        },
    );

    Ok(())
}

pub(crate) fn apply_get(store: &mut KeyValueStore, key: &str) -> Result<String, CommandError> {
    let Some(value) = store.get(key) else {
        return Err(CommandError::NotFound);
    };

    let DataType::String(ref stored) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(stored.clone())
}

pub(crate) fn apply_incr(store: &mut KeyValueStore, key: &str) -> Result<i64, CommandError> {
    let value = store.get_or_insert_with(key, || DataType::String("0".to_string()));

    let DataType::String(ref mut stored) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let current = stored
        .parse::<i64>()
        .map_err(|_| CommandError::InvalidArgument("value is not an integer".to_string()))?;

    let incremented = current
        .checked_add(1)
        .ok_or_else(|| CommandError::InvalidArgument("increment out of range".to_string()))?;

    *stored = incremented.to_string();

    Ok(incremented)
}
