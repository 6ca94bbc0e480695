use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use tokio::sync::{mpsc, Mutex};

use crate::commands::CommandError;

/// Shared handle to the blocked-reader registry.
pub type SharedState = Arc<Mutex<State>>;

/// A task parked on a blocking operation, reachable through its channel.
/// The token identifies the registration so the task can remove itself on
/// timeout.
#[derive(Debug)]
pub struct Subscriber {
    pub token: u64,
    pub sender: mpsc::Sender<()>,
}

/// Registry of tasks blocked on list pops and stream reads.
///
/// List waiters queue FIFO and a push wakes exactly one of them (the value
/// can only go to one popper). Stream waiters all wake on append, since an
/// appended entry is observable by every blocked group reader.
#[derive(Debug, Default)]
pub struct State {
    list_waiters: HashMap<String, VecDeque<Subscriber>>,
    stream_waiters: HashMap<String, Vec<Subscriber>>,
    next_token: u64,
}

impl State {
    pub fn new() -> Self {
        State::default()
    }

    fn allocate_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    pub fn subscribe_list(&mut self, key: &str, sender: mpsc::Sender<()>) -> u64 {
        let token = self.allocate_token();
        self.list_waiters
            .entry(key.to_string())
            .or_default()
            .push_back(Subscriber { token, sender });
        token
    }

    pub fn subscribe_stream(&mut self, key: &str, sender: mpsc::Sender<()>) -> u64 {
        let token = self.allocate_token();
        self.stream_waiters
            .entry(key.to_string())
            .or_default()
            .push(Subscriber { token, sender });
        token
    }

    pub fn unsubscribe_list(&mut self, key: &str, token: u64) {
        if let Some(waiters) = self.list_waiters.get_mut(key) {
            waiters.retain(|subscriber| subscriber.token != token);
        }
    }

    pub fn unsubscribe_stream(&mut self, key: &str, token: u64) {
        if let Some(waiters) = self.stream_waiters.get_mut(key) {
            waiters.retain(|subscriber| subscriber.token != token);
        }
    }

    /// Wakes the longest-waiting list popper for `key`, if any.
    pub fn notify_list_push(&mut self, key: &str) {
        if let Some(waiters) = self.list_waiters.get_mut(key) {
            if let Some(subscriber) = waiters.pop_front() {
                let _ = subscriber.sender.try_send(());
            }
        }
    }

    /// Wakes every blocked stream reader for `key`.
    pub fn notify_stream_append(&mut self, key: &str) {
        if let Some(waiters) = self.stream_waiters.get(key) {
            for subscriber in waiters {
                let _ = subscriber.sender.try_send(());
            }
        }
    }
}

/// Parks the caller until a notification arrives or `block` elapses.
///
/// `None` blocks until a notification arrives. A closed channel is treated
/// like a timeout: the waiter was dropped from the registry and no data is
/// coming.
pub async fn wait_for_event(
    receiver: &mut mpsc::Receiver<()>,
    block: Option<Duration>,
) -> Result<(), CommandError> {
    let received = match block {
        None => receiver.recv().await,
        Some(duration) => match tokio::time::timeout(duration, receiver.recv()).await {
            Ok(received) => received,
            Err(_) => None,
        },
    };

    match received {
        Some(()) => Ok(()),
        None => Err(CommandError::Timeout),
    }
}
