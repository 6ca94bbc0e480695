use std::collections::BTreeSet;

use crate::{
    commands::CommandError,
    key_value_store::{DataType, KeyValueStore, SharedStore},
};

/// Adds `members` to the set at `key`, creating it when absent. Duplicate
/// adds are no-ops; the returned count is how many members were newly
/// inserted.
pub async fn sadd(
    store: &SharedStore,
    key: &str,
    members: &[String],
) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_sadd(&mut store_guard, key, members)
}

/// Removes `members` from the set, returning how many were present.
pub async fn srem(
    store: &SharedStore,
    key: &str,
    members: &[String],
) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_srem(&mut store_guard, key, members)
}

/// Cardinality of the set; 0 when the key is absent.
pub async fn scard(store: &SharedStore, key: &str) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_scard(&mut store_guard, key)
}

/// All members, sorted lexicographically for a deterministic order.
pub async fn smembers(store: &SharedStore, key: &str) -> Result<Vec<String>, CommandError> {
    let mut store_guard = store.lock().await;
    apply_smembers(&mut store_guard, key)
}

pub async fn sismember(
    store: &SharedStore,
    key: &str,
    member: &str,
) -> Result<bool, CommandError> {
    let mut store_guard = store.lock().await;
    apply_sismember(&mut store_guard, key, member)
}

pub(crate) fn apply_sadd(
    store: &mut KeyValueStore,
    key: &str,
    members: &[String],
) -> Result<usize, CommandError> {
    let value = store.get_or_insert_with(key, || DataType::Set(BTreeSet::new()));

    let DataType::Set(ref mut set) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let mut added = 0;
    for member in members {
        if set.insert(member.clone()) {
            added += 1;
        }
    }

    Ok(added)
}

pub(crate) fn apply_srem(
    store: &mut KeyValueStore,
    key: &str,
    members: &[String],
) -> Result<usize, CommandError> {
    let Some(value) = store.get_mut(key) else {
        return Ok(0);
    };

    let DataType::Set(ref mut set) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let mut removed = 0;
    for member in members {
        if set.remove(member) {
            removed += 1;
        }
    }

    let emptied = set.is_empty();
    if emptied {
        store.remove(key);
    }

    Ok(removed)
}

pub(crate) fn apply_scard(store: &mut KeyValueStore, key: &str) -> Result<usize, CommandError> {
    let Some(value) = store.get(key) else {
        return Ok(0);
    };

    let DataType::Set(ref set) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(set.len())
}

pub(crate) fn apply_smembers(
    store: &mut KeyValueStore,
    key: &str,
) -> Result<Vec<String>, CommandError> {
    let Some(value) = store.get(key) else {
        return Ok(Vec::new());
    };

    let DataType::Set(ref set) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(set.iter().cloned().collect())
}

pub(crate) fn apply_sismember(
    store: &mut KeyValueStore,
    key: &str,
    member: &str,
) -> Result<bool, CommandError> {
    let Some(value) = store.get(key) else {
        return Ok(false);
    };

    let DataType::Set(ref set) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(set.contains(member))
}
