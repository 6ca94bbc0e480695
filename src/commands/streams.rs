use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::{
    commands::CommandError,
    key_value_store::{DataType, KeyValueStore, SharedStore},
    state::{wait_for_event, SharedState},
    stream::{Consumer, EntryId, StreamEntry, StreamLog},
};

/// Appends an entry to the stream at `key`, creating the stream when
/// absent, and wakes every blocked group reader.
///
/// The allocated ID is strictly greater than every ID already in the
/// stream, even when multiple appends land within the same millisecond
/// tick (the sequence component is bumped instead of the timestamp).
///
/// # Arguments
///
/// * `store` - A thread-safe reference to the key-value store
/// * `state` - A thread-safe reference to the blocked-reader registry
/// * `key` - The stream key
/// * `fields` - Field/value pairs stored in submission order
///
/// # Returns
///
/// * `Ok(EntryId)` - The ID assigned to the new entry
/// * `Err(CommandError::TypeMismatch)` - The key holds a non-stream value
pub async fn xadd(
    store: &SharedStore,
    state: &SharedState,
    key: &str,
    fields: Vec<(String, String)>,
) -> Result<EntryId, CommandError> {
    let id = {
        let mut store_guard = store.lock().await;
        apply_xadd(&mut store_guard, key, fields)?
    };

    trace!(key, %id, "appended stream entry");

    // Notify after the store lock is released so woken readers can take it
    // immediately.
    let mut state_guard = state.lock().await;
    state_guard.notify_stream_append(key);

    Ok(id)
}

/// Entries with `start <= id <= stop`, in ID order.
pub async fn xrange(
    store: &SharedStore,
    key: &str,
    start: EntryId,
    stop: EntryId,
) -> Result<Vec<StreamEntry>, CommandError> {
    let mut store_guard = store.lock().await;

    let Some(stream) = resolve_stream(&mut store_guard, key)? else {
        return Ok(Vec::new());
    };

    Ok(stream.range(start, stop))
}

/// Number of entries in the stream; 0 when the key is absent.
pub async fn xlen(store: &SharedStore, key: &str) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;

    let Some(stream) = resolve_stream(&mut store_guard, key)? else {
        return Ok(0);
    };

    Ok(stream.len())
}

/// Creates a consumer group on the stream at `key` with its cursor at
/// `start`: `"0"` reads from the beginning, `"$"` only entries appended
/// after this call, or an explicit `"<ms>-<seq>"` ID. The stream is created
/// empty when absent, so a group can be set up ahead of the first append.
/// Returns false when the group already exists (its cursor is untouched).
pub async fn create_group(
    store: &SharedStore,
    key: &str,
    group: &str,
    start: &str,
) -> Result<bool, CommandError> {
    let mut store_guard = store.lock().await;
    apply_create_group(&mut store_guard, key, group, start)
}

/// Registers a named consumer with an empty pending list. Returns false
/// when the consumer already exists.
pub async fn create_consumer(
    store: &SharedStore,
    key: &str,
    group: &str,
    consumer: &str,
) -> Result<bool, CommandError> {
    let mut store_guard = store.lock().await;
    apply_create_consumer(&mut store_guard, key, group, consumer)
}

/// Reads up to `count` undelivered entries on behalf of `consumer`.
///
/// Returned entries all have IDs strictly greater than the group's cursor
/// at call time; the cursor advances to the last returned ID and the IDs
/// join the consumer's pending list until acknowledged. An unknown
/// consumer is registered on first read.
///
/// With no undelivered entries, a zero `block` returns empty immediately;
/// otherwise the call suspends until an append to this stream or the
/// timeout, whichever comes first, and resolves to the defined empty
/// outcome on timeout. The subscriber is registered before the final
/// pre-wait read, so an append racing the call's start is never missed.
///
/// # Returns
///
/// * `Ok(Vec<StreamEntry>)` - Up to `count` entries in ID order (possibly
///   empty)
/// * `Err(CommandError::InvalidArgument)` - `count` is zero
/// * `Err(CommandError::NotFound)` - The stream does not exist
/// * `Err(CommandError::NoSuchGroup)` - The group was never created
pub async fn read_group(
    store: &SharedStore,
    state: &SharedState,
    key: &str,
    group: &str,
    consumer: &str,
    count: usize,
    block: Duration,
) -> Result<Vec<StreamEntry>, CommandError> {
    if count == 0 {
        return Err(CommandError::InvalidArgument(
            "count must be positive".to_string(),
        ));
    }

    {
        let mut store_guard = store.lock().await;
        let entries = apply_read_group(&mut store_guard, key, group, consumer, count)?;
        if !entries.is_empty() || block.is_zero() {
            return Ok(entries);
        }
    }

    let (sender, mut receiver) = mpsc::channel(1);
    let token = {
        let mut state_guard = state.lock().await;
        state_guard.subscribe_stream(key, sender)
    };

    // Re-check now that the subscriber is registered: an append in the gap
    // above would otherwise be missed.
    {
        let mut store_guard = store.lock().await;
        match apply_read_group(&mut store_guard, key, group, consumer, count) {
            Ok(entries) if !entries.is_empty() => {
                drop(store_guard);
                state.lock().await.unsubscribe_stream(key, token);
                return Ok(entries);
            }
            Ok(_) => {}
            Err(error) => {
                drop(store_guard);
                state.lock().await.unsubscribe_stream(key, token);
                return Err(error);
            }
        }
    }

    let waited = wait_for_event(&mut receiver, Some(block)).await;
    state.lock().await.unsubscribe_stream(key, token);

    match waited {
        Ok(()) => {
            let mut store_guard = store.lock().await;
            apply_read_group(&mut store_guard, key, group, consumer, count)
        }
        Err(CommandError::Timeout) => Ok(Vec::new()),
        Err(other) => Err(other),
    }
}

/// Acknowledges a delivered entry, removing it from the consumer's pending
/// list. Returns how many entries were actually removed (0 or 1).
pub async fn ack(
    store: &SharedStore,
    key: &str,
    group: &str,
    consumer: &str,
    id: EntryId,
) -> Result<usize, CommandError> {
    let mut store_guard = store.lock().await;
    apply_ack(&mut store_guard, key, group, consumer, id)
}

pub(crate) fn apply_xadd(
    store: &mut KeyValueStore,
    key: &str,
    fields: Vec<(String, String)>,
) -> Result<EntryId, CommandError> {
    let value = store.get_or_insert_with(key, || DataType::Stream(StreamLog::new()));

    let DataType::Stream(ref mut stream) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(stream.append(fields))
}

pub(crate) fn apply_create_group(
    store: &mut KeyValueStore,
    key: &str,
    group: &str,
    start: &str,
) -> Result<bool, CommandError> {
    let value = store.get_or_insert_with(key, || DataType::Stream(StreamLog::new()));

    let DataType::Stream(ref mut stream) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    let cursor = stream.resolve_start(start)?;

    Ok(stream.create_group(group, cursor))
}

pub(crate) fn apply_create_consumer(
    store: &mut KeyValueStore,
    key: &str,
    group: &str,
    consumer: &str,
) -> Result<bool, CommandError> {
    let Some(stream) = resolve_stream_mut(store, key)? else {
        return Err(CommandError::NotFound);
    };

    let Some(group_state) = stream.group_mut(group) else {
        return Err(CommandError::NoSuchGroup(group.to_string()));
    };

    if group_state.consumers.contains_key(consumer) {
        return Ok(false);
    }

    group_state
        .consumers
        .insert(consumer.to_string(), Consumer::default());

    Ok(true)
}

pub(crate) fn apply_read_group(
    store: &mut KeyValueStore,
    key: &str,
    group: &str,
    consumer: &str,
    count: usize,
) -> Result<Vec<StreamEntry>, CommandError> {
    let Some(stream) = resolve_stream_mut(store, key)? else {
        return Err(CommandError::NotFound);
    };

    let Some(group_state) = stream.group(group) else {
        return Err(CommandError::NoSuchGroup(group.to_string()));
    };

    let entries = stream.entries_after(group_state.last_delivered, count);

    if let Some(last) = entries.last() {
        let last_id = last.id;
        let delivered: Vec<EntryId> = entries.iter().map(|entry| entry.id).collect();

        // resolve_stream_mut succeeded above; this lookup cannot fail
        if let Some(group_state) = stream.group_mut(group) {
            group_state.last_delivered = last_id;
            let consumer_state = group_state
                .consumers
                .entry(consumer.to_string())
                .or_default();
            consumer_state.pending.extend(delivered);
        }
    }

    Ok(entries)
}

pub(crate) fn apply_ack(
    store: &mut KeyValueStore,
    key: &str,
    group: &str,
    consumer: &str,
    id: EntryId,
) -> Result<usize, CommandError> {
    let Some(stream) = resolve_stream_mut(store, key)? else {
        return Err(CommandError::NotFound);
    };

    let Some(group_state) = stream.group_mut(group) else {
        return Err(CommandError::NoSuchGroup(group.to_string()));
    };

    let Some(consumer_state) = group_state.consumers.get_mut(consumer) else {
        return Ok(0);
    };

    Ok(usize::from(consumer_state.pending.remove(&id)))
}

fn resolve_stream<'store>(
    store: &'store mut KeyValueStore,
    key: &str,
) -> Result<Option<&'store StreamLog>, CommandError> {
    let Some(value) = store.get(key) else {
        return Ok(None);
    };

    let DataType::Stream(ref stream) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(Some(stream))
}

fn resolve_stream_mut<'store>(
    store: &'store mut KeyValueStore,
    key: &str,
) -> Result<Option<&'store mut StreamLog>, CommandError> {
    let Some(value) = store.get_mut(key) else {
        return Ok(None);
    };

    let DataType::Stream(ref mut stream) = value.data else {
        return Err(CommandError::TypeMismatch);
    };

    Ok(Some(stream))
}
