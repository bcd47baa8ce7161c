use serde::{Deserialize, Serialize};

use kestrel_common::hlc::HybridTimestamp;
use kestrel_common::types::Revision;

/// One key's state at one revision; `value = None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub revision: Revision,
}

impl Entry {
    pub fn new(key: Vec<u8>, value: Option<Vec<u8>>, revision: Revision) -> Self {
        Self { key, value, revision }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// (old, new) pair for one key at one revision. `old = None` means the key
/// did not exist before this revision. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryEvent {
    pub old: Option<Entry>,
    pub new: Entry,
}

impl EntryEvent {
    pub fn new(old: Option<Entry>, new: Entry) -> Self {
        Self { old, new }
    }
}

/// Ordered sequence of entry events sharing one revision and one
/// wall-clock-correlated timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub events: Vec<EntryEvent>,
    pub revision: Revision,
    pub timestamp: HybridTimestamp,
}

impl WatchEvent {
    pub fn new(events: Vec<EntryEvent>, revision: Revision, timestamp: HybridTimestamp) -> Self {
        Self { events, revision, timestamp }
    }

    /// Convenience accessor for single-entry events.
    pub fn single(&self) -> Option<&EntryEvent> {
        match self.events.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Point-in-time entry lookup keyed by (key, revision).
pub trait EntryReader: Send + Sync + 'static {
    /// The entry visible for `key` at `revision`, or `None` if the key had
    /// no state at that revision.
    fn get(&self, key: &[u8], revision: Revision) -> Option<Entry>;
}
