use std::time::Duration;

use crate::{
    commands::CommandError,
    key_value_store::{KeyValueStore, SharedStore},
};

/// Deletes keys outright, returning how many live keys were removed.
pub async fn del(store: &SharedStore, keys: &[String]) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_del(&mut store_guard, keys)
}

/// Whether `key` is live (present and not expired).
pub async fn exists(store: &SharedStore, key: &str) -> Result<bool, CommandError> {
    let mut store_guard = store.lock().await;
    Ok(store_guard.contains_key(key))
}

/// Attaches a time-to-live to an existing key. Returns false when the key
/// is absent or already expired.
pub async fn expire(store: &SharedStore, key: &str, ttl: Duration) -> Result<bool, CommandError> {
    let mut store_guard = store.lock().await;
    apply_expire(&mut store_guard, key, ttl)
}

/// Tag name of the value under `key` ("string", "list", ...), or `None`
/// when the key is absent.
pub async fn key_type(store: &SharedStore, key: &str) -> Result<Option<&'static str>, CommandError> {
    let mut store_guard = store.lock().await;
    Ok(store_guard.get(key).map(|value| value.data.type_name()))
}

pub(crate) fn apply_del(store: &mut KeyValueStore, keys: &[String]) -> Result<usize, CommandError> {
    let mut removed = 0;
    for key in keys {
        if store.remove(key).is_some() {
            removed += 1;
        }
    }

    Ok(removed)
}

pub(crate) fn apply_expire(
    store: &mut KeyValueStore,
    key: &str,
    ttl: Duration,
) -> Result<bool, CommandError> {
    Ok(store.set_expiry(key, ttl))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::sync::Mutex;

    use super::{del, exists, expire, key_type};
    use crate::{
        commands::{lists, lists::ListEnd, strings},
        key_value_store::KeyValueStore,
        state::State,
    };

    #[tokio::test]
    async fn test_del_and_exists() {
        let store = Arc::new(Mutex::new(KeyValueStore::new()));
        strings::set(&store, "name", "Fahril", None).await.unwrap();

        assert_eq!(exists(&store, "name").await, Ok(true));
        assert_eq!(
            del(&store, &["name".to_string(), "ghost".to_string()]).await,
            Ok(1)
        );
        assert_eq!(exists(&store, "name").await, Ok(false));
    }

    #[tokio::test]
    async fn test_key_type_reports_tag() {
        let store = Arc::new(Mutex::new(KeyValueStore::new()));
        let state = Arc::new(Mutex::new(State::new()));

        strings::set(&store, "s", "v", None).await.unwrap();
        lists::push(&store, &state, "l", ListEnd::Tail, &["v".to_string()])
            .await
            .unwrap();

        assert_eq!(key_type(&store, "s").await, Ok(Some("string")));
        assert_eq!(key_type(&store, "l").await, Ok(Some("list")));
        assert_eq!(key_type(&store, "ghost").await, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_makes_key_vanish() {
        let store = Arc::new(Mutex::new(KeyValueStore::new()));
        strings::set(&store, "name", "Fahril", None).await.unwrap();

        assert_eq!(expire(&store, "name", Duration::from_millis(30)).await, Ok(true));
        assert_eq!(expire(&store, "ghost", Duration::from_millis(30)).await, Ok(false));

        tokio::time::advance(Duration::from_millis(40)).await;

        assert_eq!(exists(&store, "name").await, Ok(false));
    }
}
