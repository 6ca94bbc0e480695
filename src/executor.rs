use std::time::Duration;

use tracing::debug;

use crate::{
    commands::{
        hashes, hyperloglog, keys,
        lists::{self, ListEnd},
        sets, sorted_sets, streams, strings, CommandError,
    },
    key_value_store::{KeyValueStore, SharedStore},
    state::SharedState,
    stream::EntryId,
};

/// One mutating or reading step inside a batch.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Get {
        key: String,
    },
    Incr {
        key: String,
    },
    Del {
        keys: Vec<String>,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    LPush {
        key: String,
        values: Vec<String>,
    },
    RPush {
        key: String,
        values: Vec<String>,
    },
    LPop {
        key: String,
    },
    RPop {
        key: String,
    },
    SAdd {
        key: String,
        members: Vec<String>,
    },
    SRem {
        key: String,
        members: Vec<String>,
    },
    ZAdd {
        key: String,
        entries: Vec<(f64, String)>,
    },
    HSet {
        key: String,
        pairs: Vec<(String, String)>,
    },
    HDel {
        key: String,
        fields: Vec<String>,
    },
    XAdd {
        key: String,
        fields: Vec<(String, String)>,
    },
    PfAdd {
        key: String,
        members: Vec<String>,
    },
}

impl Operation {
    /// The key a successful run of this operation may have pushed onto, used
    /// to wake blocked readers after the batch commits.
    fn notifies(&self) -> Option<Notification<'_>> {
        match self {
            Operation::LPush { key, .. } | Operation::RPush { key, .. } => {
                Some(Notification::ListPush(key))
            }
            Operation::XAdd { key, .. } => Some(Notification::StreamAppend(key)),
            _ => None,
        }
    }
}

enum Notification<'op> {
    ListPush(&'op str),
    StreamAppend(&'op str),
}

/// Result of one batch step.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationOutput {
    Ok,
    Integer(i64),
    Value(String),
    Bool(bool),
    Id(EntryId),
}

/// Runs `operations` back to back as a pipeline. Each step takes the store
/// lock on its own, so steps from other tasks may interleave, but results
/// come back in submission order with one slot per operation and a failed
/// step never stops the ones after it.
pub async fn pipeline(
    store: &SharedStore,
    state: &SharedState,
    operations: &[Operation],
) -> Vec<Result<OperationOutput, CommandError>> {
    let mut results = Vec::with_capacity(operations.len());

    for operation in operations {
        let result = {
            let mut store_guard = store.lock().await;
            apply(&mut store_guard, operation)
        };

        if result.is_ok() {
            notify(state, operation).await;
        }

        results.push(result);
    }

    results
}

/// Runs `operations` as an atomic transaction: all of them apply under a
/// single hold of the store lock, against a working copy that only replaces
/// the live store when every step avoids a hard failure.
///
/// `NotFound` is an expected per-step outcome (a read of an absent key) and
/// fills its result slot without aborting. A `TypeMismatch` or
/// `InvalidArgument` anywhere aborts the whole batch: the live store is
/// untouched and the error names the offending step.
///
/// # Returns
///
/// * `Ok(Vec<...>)` - One result slot per operation, in submission order
/// * `Err(CommandError::TransactionAborted)` - A step failed hard; nothing
///   was applied
pub async fn transaction(
    store: &SharedStore,
    state: &SharedState,
    operations: &[Operation],
) -> Result<Vec<Result<OperationOutput, CommandError>>, CommandError> {
    let mut results = Vec::with_capacity(operations.len());

    {
        let mut store_guard = store.lock().await;
        let mut working = store_guard.clone();

        for (index, operation) in operations.iter().enumerate() {
            let result = apply(&mut working, operation);

            if let Err(ref error) = result {
                if is_hard_error(error) {
                    return Err(CommandError::TransactionAborted(format!(
                        "operation {} failed: {}",
                        index, error
                    )));
                }
            }

            results.push(result);
        }

        *store_guard = working;
    }

    debug!(operations = operations.len(), "transaction committed");

    for (operation, result) in operations.iter().zip(&results) {
        if result.is_ok() {
            notify(state, operation).await;
        }
    }

    Ok(results)
}

/// Dispatches one operation against an already-locked store.
fn apply(
    store: &mut KeyValueStore,
    operation: &Operation,
) -> Result<OperationOutput, CommandError> {
    match operation {
        Operation::Set { key, value, ttl } => {
            strings::apply_set(store, key, value, *ttl).map(|_| OperationOutput::Ok)
        }
        Operation::Get { key } => strings::apply_get(store, key).map(OperationOutput::Value),
        Operation::Incr { key } => strings::apply_incr(store, key).map(OperationOutput::Integer),
        Operation::Del { keys } => {
            keys::apply_del(store, keys).map(|removed| OperationOutput::Integer(removed as i64))
        }
        Operation::Expire { key, ttl } => {
            keys::apply_expire(store, key, *ttl).map(OperationOutput::Bool)
        }
        Operation::LPush { key, values } => lists::apply_push(store, key, ListEnd::Head, values)
            .map(|length| OperationOutput::Integer(length as i64)),
        Operation::RPush { key, values } => lists::apply_push(store, key, ListEnd::Tail, values)
            .map(|length| OperationOutput::Integer(length as i64)),
        Operation::LPop { key } => {
            lists::apply_pop(store, key, ListEnd::Head).map(OperationOutput::Value)
        }
        Operation::RPop { key } => {
            lists::apply_pop(store, key, ListEnd::Tail).map(OperationOutput::Value)
        }
        Operation::SAdd { key, members } => {
            sets::apply_sadd(store, key, members).map(|added| OperationOutput::Integer(added as i64))
        }
        Operation::SRem { key, members } => sets::apply_srem(store, key, members)
            .map(|removed| OperationOutput::Integer(removed as i64)),
        Operation::ZAdd { key, entries } => sorted_sets::apply_zadd(store, key, entries)
            .map(|added| OperationOutput::Integer(added as i64)),
        Operation::HSet { key, pairs } => hashes::apply_hset(store, key, pairs)
            .map(|created| OperationOutput::Integer(created as i64)),
        Operation::HDel { key, fields } => hashes::apply_hdel(store, key, fields)
            .map(|removed| OperationOutput::Integer(removed as i64)),
        Operation::XAdd { key, fields } => {
            streams::apply_xadd(store, key, fields.clone()).map(OperationOutput::Id)
        }
        Operation::PfAdd { key, members } => {
            hyperloglog::apply_pf_add(store, key, members).map(OperationOutput::Bool)
        }
    }
}

/// Whether `error` voids a whole transaction. A missing key is a normal
/// outcome; mistyped access and malformed arguments are not.
fn is_hard_error(error: &CommandError) -> bool {
    matches!(
        error,
        CommandError::TypeMismatch | CommandError::InvalidArgument(_)
    )
}

async fn notify(state: &SharedState, operation: &Operation) {
    let Some(notification) = operation.notifies() else {
        return;
    };

    let mut state_guard = state.lock().await;
    match notification {
        Notification::ListPush(key) => state_guard.notify_list_push(key),
        Notification::StreamAppend(key) => state_guard.notify_stream_append(key),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::{pipeline, transaction, Operation, OperationOutput};
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
    async fn test_pipeline_keeps_submission_order() {
        let (store, state) = shared();

        let operations = vec![
            Operation::Set {
                key: "name".to_string(),
                value: "Fahril".to_string(),
                ttl: None,
            },
            Operation::Get {
                key: "name".to_string(),
            },
            Operation::Incr {
                key: "hits".to_string(),
            },
            Operation::Incr {
                key: "hits".to_string(),
            },
        ];

        let results = pipeline(&store, &state, &operations).await;

        assert_eq!(
            results,
            vec![
                Ok(OperationOutput::Ok),
                Ok(OperationOutput::Value("Fahril".to_string())),
                Ok(OperationOutput::Integer(1)),
                Ok(OperationOutput::Integer(2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_pipeline_failure_does_not_stop_later_steps() {
        let (store, state) = shared();

        let operations = vec![
            Operation::Get {
                key: "missing".to_string(),
            },
            Operation::Set {
                key: "name".to_string(),
                value: "Fahril".to_string(),
                ttl: None,
            },
        ];

        let results = pipeline(&store, &state, &operations).await;

        assert_eq!(results[0], Err(CommandError::NotFound));
        assert_eq!(results[1], Ok(OperationOutput::Ok));
        assert_eq!(strings::get(&store, "name").await, Ok("Fahril".to_string()));
    }

    #[tokio::test]
    async fn test_transaction_commits_all() {
        let (store, state) = shared();

        let operations = vec![
            Operation::Set {
                key: "a".to_string(),
                value: "1".to_string(),
                ttl: None,
            },
            Operation::Incr {
                key: "a".to_string(),
            },
            Operation::SAdd {
                key: "s".to_string(),
                members: vec!["x".to_string()],
            },
        ];

        let results = transaction(&store, &state, &operations).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[1], Ok(OperationOutput::Integer(2)));
        assert_eq!(strings::get(&store, "a").await, Ok("2".to_string()));
    }

    #[tokio::test]
    async fn test_transaction_aborts_without_partial_effects() {
        let (store, state) = shared();
        strings::set(&store, "word", "hello", None).await.unwrap();

        let operations = vec![
            Operation::Set {
                key: "a".to_string(),
                value: "1".to_string(),
                ttl: None,
            },
            // incrementing a non-integer is a hard failure
            Operation::Incr {
                key: "word".to_string(),
            },
        ];

        let result = transaction(&store, &state, &operations).await;

        assert!(matches!(
            result,
            Err(CommandError::TransactionAborted(ref message)) if message.contains("operation 1")
        ));
        // the first step must not have leaked into the live store
        assert_eq!(strings::get(&store, "a").await, Err(CommandError::NotFound));
        assert_eq!(strings::get(&store, "word").await, Ok("hello".to_string()));
    }

    #[tokio::test]
    async fn test_transaction_tolerates_not_found() {
        let (store, state) = shared();

        let operations = vec![
            Operation::Get {
                key: "missing".to_string(),
            },
            Operation::Set {
                key: "name".to_string(),
                value: "Fahril".to_string(),
                ttl: None,
            },
        ];

        let results = transaction(&store, &state, &operations).await.unwrap();

        assert_eq!(results[0], Err(CommandError::NotFound));
        assert_eq!(strings::get(&store, "name").await, Ok("Fahril".to_string()));
    }
}
