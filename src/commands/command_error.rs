use thiserror::Error;

/// Every way an engine operation can fail.
///
/// `Timeout` is not a failure in the usual sense: the blocking entry points
/// convert it into their defined empty-result outcome before returning, so
/// callers only ever observe it through the internal wait helper.
#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    /// The key is absent or its TTL elapsed; also the outcome of popping an
    /// empty collection.
    #[error("key not found")]
    NotFound,
    /// The operation targets a key holding a different value tag.
    #[error("operation against a key holding the wrong kind of value")]
    TypeMismatch,
    /// Malformed input (bad entry ID, zero count, out-of-range coordinate),
    /// rejected before any mutation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A consumer-group operation named a group that was never created.
    #[error("no such consumer group '{0}'")]
    NoSuchGroup(String),
    /// A blocking wait elapsed without a notification.
    #[error("blocking wait timed out")]
    Timeout,
    /// A transaction precondition failed; nothing was applied.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
}
