use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::commands::CommandError;

/// Identifier of a single stream entry: a millisecond timestamp plus a
/// sequence number that disambiguates entries appended within the same
/// timestamp tick. Ordering is derived, first by timestamp then sequence,
/// which is exactly the delivery order of the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    /// Parses the textual `"<ms>-<seq>"` form. A bare `"<ms>"` is accepted
    /// with an implied sequence of 0.
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let mut parts = input.splitn(2, '-');

        let ms = parts
            .next()
            .unwrap_or_default()
            .parse::<u64>()
            .map_err(|_| {
                CommandError::InvalidArgument(format!("invalid stream entry ID '{}'", input))
            })?;

        let seq = match parts.next() {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                CommandError::InvalidArgument(format!("invalid stream entry ID '{}'", input))
            })?,
            None => 0,
        };

        Ok(EntryId { ms, seq })
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One immutable log entry: its ID plus the field/value pairs in the order
/// they were submitted.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: Vec<(String, String)>,
}

/// A named consumer inside a group, tracking the entries delivered to it
/// but not yet acknowledged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Consumer {
    pub pending: BTreeSet<EntryId>,
}

/// A consumer group: the shared last-delivered cursor plus its registered
/// consumers. Groups persist independently of entry turnover.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsumerGroup {
    pub last_delivered: EntryId,
    pub consumers: HashMap<String, Consumer>,
}

/// Append-only log of ordered entries plus the consumer groups reading it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamLog {
    entries: BTreeMap<EntryId, Vec<(String, String)>>,
    groups: HashMap<String, ConsumerGroup>,
}

impl StreamLog {
    pub fn new() -> Self {
        StreamLog::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> Option<EntryId> {
        self.entries.keys().next_back().copied()
    }

    /// Appends a new entry with a freshly allocated ID, strictly greater
    /// than every ID already in the log.
    pub fn append(&mut self, fields: Vec<(String, String)>) -> EntryId {
        let id = next_id(self.last_id(), wall_clock_ms());
        self.entries.insert(id, fields);
        id
    }

    /// Entries with `start <= id <= stop`, in ID order.
    pub fn range(&self, start: EntryId, stop: EntryId) -> Vec<StreamEntry> {
        if start > stop {
            return Vec::new();
        }

        self.entries
            .range(start..=stop)
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    /// Up to `count` entries with ID strictly greater than `cursor`.
    pub fn entries_after(&self, cursor: EntryId, count: usize) -> Vec<StreamEntry> {
        self.entries
            .range((
                std::ops::Bound::Excluded(cursor),
                std::ops::Bound::Unbounded,
            ))
            .take(count)
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    /// Resolves a textual group start position: `"$"` means "after the
    /// current last entry", `"0"` means "from the beginning", anything else
    /// is an explicit entry ID.
    pub fn resolve_start(&self, start: &str) -> Result<EntryId, CommandError> {
        match start {
            "$" => Ok(self.last_id().unwrap_or(EntryId::ZERO)),
            other => EntryId::parse(other),
        }
    }

    /// Registers a consumer group with its cursor at `start`. Returns false
    /// when the group already exists (the existing cursor is untouched).
    pub fn create_group(&mut self, name: &str, start: EntryId) -> bool {
        if self.groups.contains_key(name) {
            return false;
        }

        self.groups.insert(
            name.to_string(),
            ConsumerGroup {
                last_delivered: start,
                consumers: HashMap::new(),
            },
        );
        true
    }

    pub fn group(&self, name: &str) -> Option<&ConsumerGroup> {
        self.groups.get(name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut ConsumerGroup> {
        self.groups.get_mut(name)
    }
}

/// Allocates the next entry ID for a stream whose newest entry is `last`.
///
/// The timestamp component comes from the wall clock; when the clock has
/// not advanced past the last entry (same tick, or a clock regression) the
/// sequence component is bumped instead, so IDs stay strictly increasing.
fn next_id(last: Option<EntryId>, now_ms: u64) -> EntryId {
    match last {
        Some(last) if now_ms <= last.ms => EntryId {
            ms: last.ms,
            seq: last.seq + 1,
        },
        _ => EntryId { ms: now_ms, seq: 0 },
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
