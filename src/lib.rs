//! An in-memory multi-type data-structure engine.
//!
//! This crate provides the storage core of a small data-structure server:
//!
//! - Typed values (string, list, set, sorted set, hash, stream, HyperLogLog)
//!   behind a single key namespace with per-key expiration
//! - Batched execution: pipelines (independent operations) and transactions
//!   (all-or-nothing application)
//! - Append-only stream logs with consumer groups, delivery cursors,
//!   pending-entry tracking and blocking reads
//! - Blocking operations with client notifications
//!
//! There is no wire protocol, transport or persistence layer here; callers
//! construct a store with [`key_value_store::KeyValueStore::new`], share it
//! behind `Arc<Mutex<_>>` and invoke the command entry points in
//! [`commands`] directly.

pub mod commands;
pub mod executor;
pub mod expiry;
pub mod key_value_store;
pub mod state;
pub mod stream;
