use std::collections::HashMap;

use crate::{
    commands::CommandError,
    key_value_store::{DataType, KeyValueStore, SharedStore},
};

/// Sets field/value pairs in the hash at `key`, creating it when absent.
/// Returns how many fields were newly created (overwrites don't count).
pub async fn hset(
    store: &SharedStore,
    key: &str,
    pairs: &[(String, String)],
) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_hset(&mut store_guard, key, pairs)
}

/// Value of a single field, or `NotFound` when the key or field is absent.
pub async fn hget(store: &SharedStore, key: &str, field: &str) -> Result<String, CommandError> {
    let mut store_guard = store.lock().await;
    apply_hget(&mut store_guard, key, field)
}

/// Every field/value pair in the hash; an absent key yields an empty map.
pub async fn hget_all(
    store: &SharedStore,
    key: &str,
) -> Result<HashMap<String, String>, CommandError> {
    let mut store_guard = store.lock().await;
    apply_hget_all(&mut store_guard, key)
}

/// Deletes fields from the hash, returning how many existed.
pub async fn hdel(
    store: &SharedStore,
    key: &str,
    fields: &[String],
) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_hdel(&mut store_guard, key, fields)
}

pub(crate) fn apply_hset(
    store: &mut KeyValueStore,
    key: &str,
    pairs: &[(String, String)],
) -> Result<usize, CommandError> {
    let value = store.get_or_insert_with(key, || DataType::Hash(HashMap::new()));

    let DataType::Hash(ref mut hash) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let mut created = 0;
    for (field, field_value) in pairs {
        if hash.insert(field.clone(), field_value.clone()).is_none() {
            created += 1;
        }
    }

    Ok(created)
}

pub(crate) fn apply_hget(
    store: &mut KeyValueStore,
    key: &str,
    field: &str,
) -> Result<String, CommandError> {
    let Some(value) = store.get(key) else {
        return Err(CommandError::NotFound);
    };

    let DataType::Hash(ref hash) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    hash.get(field).cloned().ok_or(CommandError::NotFound)
}

pub(crate) fn apply_hget_all(
    store: &mut KeyValueStore,
    key: &str,
) -> Result<HashMap<String, String>, CommandError> {
    let Some(value) = store.get(key) else {
        return Ok(HashMap::new());
    };

    let DataType::Hash(ref hash) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(hash.clone())
}

pub(crate) fn apply_hdel(
    store: &mut KeyValueStore,
    key: &str,
    fields: &[String],
) -> Result<usize, CommandError> {
    let Some(value) = store.get_mut(key) else {
        return Ok(0);
    };

    let DataType::Hash(ref mut hash) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let mut removed = 0;
    for field in fields {
        if hash.remove(field).is_some() {
            removed += 1;
        }
    }

    let emptied = hash.is_empty();
    if emptied {
        store.remove(key);
    }

    Ok(removed)
}
