//! Background expiry sweep.
//!
//! The store already reaps expired keys lazily on access; this task handles
//! keys nobody touches again. Each sweep takes the store lock, so it can
//! never interleave with a mutation mid-operation.

use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use crate::key_value_store::SharedStore;

pub struct ExpiryReaper {
    store: SharedStore,
    interval: Duration,
}

impl ExpiryReaper {
    pub fn new(store: SharedStore, interval: Duration) -> Self {
        ExpiryReaper { store, interval }
    }

    /// Runs the sweep loop forever; intended to be spawned as a task.
    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        info!(interval = ?self.interval, "expiry reaper started");

        loop {
            ticker.tick().await;

            let reaped = self.store.lock().await.reap_expired();
            if reaped > 0 {
                debug!(reaped, "reaped expired keys");
            }
        }
    }

    /// Spawns the reaper on the current runtime.
    pub fn spawn(store: SharedStore, interval: Duration) -> tokio::task::JoinHandle<()> {
        let reaper = ExpiryReaper::new(store, interval);
        tokio::spawn(reaper.run())
    }
}
