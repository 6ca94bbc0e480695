use std::{collections::VecDeque, time::Duration};

use tokio::sync::mpsc;

use crate::{
    commands::{normalize_range, CommandError},
    key_value_store::{DataType, KeyValueStore, SharedStore},
    state::{wait_for_event, SharedState},
};

/// Which end of the list an operation targets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ListEnd {
    Head,
    Tail,
}

/// Pushes `values` onto one end of the list at `key`, creating the list
/// when absent, and wakes one blocked popper. Returns the list length after
/// the push.
pub async fn push(
    store: &SharedStore,
    state: &SharedState,
    key: &str,
    end: ListEnd,
    values: &[String],
) -> Result<usize, CommandError> {
    let length = {
        let mut store_guard = store.lock().await;
        apply_push(&mut store_guard, key, end, values)?
    };

    // Notify after the store lock is released so the woken task can pop
    // immediately.
    let mut state_guard = state.lock().await;
    state_guard.notify_list_push(key);

    Ok(length)
}

/// Removes and returns one element from the given end of the list.
///
/// # Returns
///
/// * `Ok(String)` - The popped element
/// * `Err(CommandError::NotFound)` - The list is empty or absent
/// * `Err(CommandError::TypeMismatch)` - The key holds a non-list value
pub async fn pop(store: &SharedStore, key: &str, end: ListEnd) -> Result<String, CommandError> {
    let mut store_guard = store.lock().await;
    apply_pop(&mut store_guard, key, end)
}

/// Number of elements in the list; 0 when the key is absent.
pub async fn llen(store: &SharedStore, key: &str) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_llen(&mut store_guard, key)
}

/// Elements between the inclusive `start` and `stop` indexes. Negative
/// indexes count from the end (-1 = last). An empty range yields an empty
/// vector, never an error.
pub async fn lrange(
    store: &SharedStore,
    key: &str,
    start: isize,
    stop: isize,
) -> Result<Vec<String>, CommandError> {
    let mut store_guard = store.lock().await;
    apply_lrange(&mut store_guard, key, start, stop)
}

/// Head-pop that blocks until an element arrives or `timeout` elapses.
///
/// The subscriber is registered before the final pre-wait check, so a push
/// racing the call's start is never missed. `timeout` of `None` blocks
/// until data arrives; on timeout the call resolves to `Ok(None)`, the
/// defined empty outcome rather than an error.
pub async fn blpop(
    store: &SharedStore,
    state: &SharedState,
    key: &str,
    timeout: Option<Duration>,
) -> Result<Option<String>, CommandError> {
    {
        let mut store_guard = store.lock().await;
        match apply_pop(&mut store_guard, key, ListEnd::Head) {
            Ok(element) => return Ok(Some(element)),
            Err(CommandError::NotFound) => {}
            Err(other) => return Err(other),
        }
    }

    let (sender, mut receiver) = mpsc::channel(1);
    let token = {
        let mut state_guard = state.lock().await;
        state_guard.subscribe_list(key, sender)
    };

    // Re-check now that the subscriber is registered: a push in the gap
    // above would otherwise be missed.
    {
        let mut store_guard = store.lock().await;
        match apply_pop(&mut store_guard, key, ListEnd::Head) {
            Ok(element) => {
                drop(store_guard);
                state.lock().await.unsubscribe_list(key, token);
                return Ok(Some(element));
            }
            Err(CommandError::NotFound) => {}
            Err(other) => {
                drop(store_guard);
                state.lock().await.unsubscribe_list(key, token);
                return Err(other);
            }
        }
    }

    let waited = wait_for_event(&mut receiver, timeout).await;
    state.lock().await.unsubscribe_list(key, token);

    match waited {
        Ok(()) => {
            let mut store_guard = store.lock().await;
            match apply_pop(&mut store_guard, key, ListEnd::Head) {
                Ok(element) => Ok(Some(element)),
                // Another popper won the race for this element.
                Err(CommandError::NotFound) => Ok(None),
                Err(other) => Err(other),
            }
        }
        Err(CommandError::Timeout) => Ok(None),
        Err(other) => Err(other),
    }
}

pub(crate) fn apply_push(
    store: &mut KeyValueStore,
    key: &str,
    end: ListEnd,
    values: &[String],
) -> Result<usize, CommandError> {
    let value = store.get_or_insert_with(key, || DataType::List(VecDeque::new()));

    let DataType::List(ref mut list) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    for element in values {
        match end {
            ListEnd::Head => list.push_front(element.clone()),
            ListEnd::Tail => list.push_back(element.clone()),
        }
    }

    Ok(list.len())
}

pub(crate) fn apply_pop(
    store: &mut KeyValueStore,
    key: &str,
    end: ListEnd,
) -> Result<String, CommandError> {
    let Some(value) = store.get_mut(key) else {
        return Err(CommandError::NotFound);
    };

    let DataType::List(ref mut list) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let popped = match end {
        ListEnd::Head => list.pop_front(),
        ListEnd::Tail => list.pop_back(),
    };

    let emptied = list.is_empty();
    if emptied {
        store.remove(key);
    }

    popped.ok_or(CommandError::NotFound)
}

pub(crate) fn apply_llen(store: &mut KeyValueStore, key: &str) -> Result<usize, CommandError> {
    let Some(value) = store.get(key) else {
        return Ok(0);
    };

    let DataType::List(ref list) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(list.len())
}

pub(crate) fn apply_lrange(
    store: &mut KeyValueStore,
    key: &str,
    start: isize,
    stop: isize,
) -> Result<Vec<String>, CommandError> {
    let Some(value) = store.get(key) else {
        return Ok(Vec::new());
    };

    let DataType::List(ref list) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let Some((start, stop)) = normalize_range(list.len(), start, stop) else {
        return Ok(Vec::new());
    };

    Ok(list.range(start..=stop).cloned().collect())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::sync::Mutex;

    use super::{blpop, llen, lrange, pop, push, ListEnd};
    use crate::{
        commands::{strings, CommandError},
        key_value_store::KeyValueStore,
        state::State,
    };

    fn shared() -> (Arc<Mutex<KeyValueStore>>, Arc<Mutex<State>>) {
        (
            Arc::new(Mutex::new(KeyValueStore::new())),
            Arc::new(Mutex::new(State::new())),
        )
    }

    #[tokio::test]
    async fn test_push_pop_both_ends() {
        let (store, state) = shared();

        push(
            &store,
            &state,
            "names",
            ListEnd::Tail,
            &["Fahril".to_string(), "Hadi".to_string()],
        )
        .await
        .unwrap();
        push(&store, &state, "names", ListEnd::Head, &["Abu".to_string()])
            .await
            .unwrap();

        assert_eq!(llen(&store, "names").await, Ok(3));
        assert_eq!(pop(&store, "names", ListEnd::Head).await, Ok("Abu".to_string()));
        assert_eq!(
            pop(&store, "names", ListEnd::Tail).await,
            Ok("Hadi".to_string())
        );
        assert_eq!(
            pop(&store, "names", ListEnd::Head).await,
            Ok("Fahril".to_string())
        );
        assert_eq!(
            pop(&store, "names", ListEnd::Head).await,
            Err(CommandError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_pop_absent_key() {
        let (store, _) = shared();
        assert_eq!(
            pop(&store, "nothing", ListEnd::Head).await,
            Err(CommandError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let (store, state) = shared();
        strings::set(&store, "word", "hello", None).await.unwrap();

        assert_eq!(
            push(&store, &state, "word", ListEnd::Tail, &["x".to_string()]).await,
            Err(CommandError::TypeMismatch)
        );
        assert_eq!(
            pop(&store, "word", ListEnd::Head).await,
            Err(CommandError::TypeMismatch)
        );
    }

    #[tokio::test]
    async fn test_lrange_negative_indexes() {
        let (store, state) = shared();
        let values: Vec<String> = ["grape", "apple", "pineapple", "mango", "raspberry"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        push(&store, &state, "fruits", ListEnd::Tail, &values)
            .await
            .unwrap();

        let test_cases = vec![
            (0, 2, vec!["grape", "apple", "pineapple"]),
            (-2, -1, vec!["mango", "raspberry"]),
            (0, -1, vec!["grape", "apple", "pineapple", "mango", "raspberry"]),
            (3, 1, vec![]),
        ];

        for (start, stop, expected) in test_cases {
            let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
            assert_eq!(
                lrange(&store, "fruits", start, stop).await,
                Ok(expected),
                "start={} stop={}",
                start,
                stop
            );
        }
    }

    #[tokio::test]
    async fn test_blpop_immediate() {
        let (store, state) = shared();
        push(&store, &state, "jobs", ListEnd::Tail, &["a".to_string()])
            .await
            .unwrap();

        let result = blpop(&store, &state, "jobs", Some(Duration::from_millis(10))).await;
        assert_eq!(result, Ok(Some("a".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blpop_times_out_empty() {
        let (store, state) = shared();

        let result = blpop(&store, &state, "jobs", Some(Duration::from_millis(50))).await;
        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn test_blpop_woken_by_push() {
        let (store, state) = shared();

        let waiter_store = Arc::clone(&store);
        let waiter_state = Arc::clone(&state);
        let waiter = tokio::spawn(async move {
            blpop(
                &waiter_store,
                &waiter_state,
                "jobs",
                Some(Duration::from_secs(5)),
            )
            .await
        });

        // Give the waiter time to park before pushing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        push(&store, &state, "jobs", ListEnd::Tail, &["work".to_string()])
            .await
            .unwrap();

        let result = waiter.await.expect("waiter task must not panic");
        assert_eq!(result, Ok(Some("work".to_string())));
    }
}
