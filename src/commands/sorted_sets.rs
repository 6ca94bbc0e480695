use std::collections::BTreeMap;

use crate::{
    commands::{normalize_range, CommandError},
    key_value_store::{DataType, KeyValueStore, SharedStore},
};

/// Adds (or rescores) `entries` of `(score, member)` pairs in the sorted
/// set at `key`. Returns how many members were newly inserted.
pub async fn zadd(
    store: &SharedStore,
    key: &str,
    entries: &[(f64, String)],
) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_zadd(&mut store_guard, key, entries)
}

/// Members between the inclusive `start` and `stop` rank indexes, ordered
/// by (score ascending, member lexicographic ascending). Negative indexes
/// count from the end (-1 = last).
pub async fn zrange(
    store: &SharedStore,
    key: &str,
    start: isize,
    stop: isize,
) -> Result<Vec<String>, CommandError> {
    let mut store_guard = store.lock().await;
    apply_zrange(&mut store_guard, key, start, stop)
}

/// Removes and returns the highest-ordered `(member, score)` pair, ties
/// broken by the lexicographically greatest member.
///
/// # Returns
///
/// * `Err(CommandError::NotFound)` - The sorted set is empty or absent
pub async fn zpop_max(store: &SharedStore, key: &str) -> Result<(String, f64), CommandError> {
    let mut store_guard = store.lock().await;
    apply_zpop_max(&mut store_guard, key)
}

/// Score of `member`, or `NotFound` when the key or member is absent.
pub async fn zscore(store: &SharedStore, key: &str, member: &str) -> Result<f64, CommandError> {
    let mut store_guard = store.lock().await;
    apply_zscore(&mut store_guard, key, member)
}

/// Number of members; 0 when the key is absent.
pub async fn zcard(store: &SharedStore, key: &str) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_zcard(&mut store_guard, key)
}

pub(crate) fn apply_zadd(
    store: &mut KeyValueStore,
    key: &str,
    entries: &[(f64, String)],
) -> Result<usize, CommandError> {
    for (score, member) in entries {
        if score.is_nan() {
            return Err(CommandError::InvalidArgument(format!(
                "score for member '{}' is not a number",
                member
            )));
        }
    }

    let value = store.get_or_insert_with(key, || DataType::SortedSet(BTreeMap::new()));

    let DataType::SortedSet(ref mut sorted_set) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let mut added = 0;
    for (score, member) in entries {
        if sorted_set.insert(member.clone(), *score).is_none() {
            added += 1;
        }
    }

    Ok(added)
}

pub(crate) fn apply_zrange(
    store: &mut KeyValueStore,
    key: &str,
    start: isize,
    stop: isize,
) -> Result<Vec<String>, CommandError> {
    let Some(value) = store.get(key) else {
        return Ok(Vec::new());
    };

    let DataType::SortedSet(ref sorted_set) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let ranked = members_by_rank(sorted_set);

    let Some((start, stop)) = normalize_range(ranked.len(), start, stop) else {
        return Ok(Vec::new());
    };

    Ok(ranked[start..=stop]
        .iter()
        .map(|(member, _)| member.clone())
        .collect())
}

pub(crate) fn apply_zpop_max(
    store: &mut KeyValueStore,
    key: &str,
) -> Result<(String, f64), CommandError> {
    let Some(value) = store.get_mut(key) else {
        return Err(CommandError::NotFound);
    };

    let DataType::SortedSet(ref mut sorted_set) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let Some((member, score)) = sorted_set
        .iter()
        .max_by(|(a_member, a_score), (b_member, b_score)| {
            a_score
                .partial_cmp(b_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a_member.cmp(b_member))
        })
        .map(|(member, score)| (member.clone(), *score))
    else {
        return Err(CommandError::NotFound);
    };

    sorted_set.remove(&member);

    let emptied = sorted_set.is_empty();
    if emptied {
        store.remove(key);
    }

    Ok((member, score))
}

pub(crate) fn apply_zscore(
    store: &mut KeyValueStore,
    key: &str,
    member: &str,
) -> Result<f64, CommandError> {
    let Some(value) = store.get(key) else {
        return Err(CommandError::NotFound);
    };

    let DataType::SortedSet(ref sorted_set) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    sorted_set.get(member).copied().ok_or(CommandError::NotFound)
}

pub(crate) fn apply_zcard(store: &mut KeyValueStore, key: &str) -> Result<usize, CommandError> {
    let Some(value) = store.get(key) else {
        return Ok(0);
    };

    let DataType::SortedSet(ref sorted_set) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(sorted_set.len())
}

/// Members ordered by (score ascending, member lexicographic ascending),
/// the canonical sorted-set ordering used for rank-based queries.
fn members_by_rank(sorted_set: &BTreeMap<String, f64>) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = sorted_set
        .iter()
        .map(|(member, score)| (member.clone(), *score))
        .collect();

    ranked.sort_by(|(a_member, a_score), (b_member, b_score)| {
        a_score
            .partial_cmp(b_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a_member.cmp(b_member))
    });

    ranked
}
