//! In-memory revisioned key-value storage backing the metadata log.
//!
//! Every applied batch gets the next revision; point-in-time reads answer
//! "what was this key's state at revision R", which is what the watch
//! pipeline needs to build (old, new) event pairs. `MetaStorageListener`
//! is the glue between a replication group's applied commands and the
//! pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use kestrel_common::error::ProtocolError;
use kestrel_common::hlc::HybridTimestamp;
use kestrel_common::types::Revision;
use kestrel_raft::runtime::StateMachineListener;

use crate::entry::{Entry, EntryReader};
use crate::processor::WatchProcessor;

/// Commands applied by the metadata group's state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaCommand {
    /// Write a batch of key/value pairs at one new revision; `None` deletes.
    PutAll {
        kvs: Vec<(Vec<u8>, Option<Vec<u8>>)>,
        timestamp: HybridTimestamp,
    },
    /// Advance safe time without producing a revision (heartbeat).
    SafeTimeSync { timestamp: HybridTimestamp },
}

pub fn encode_meta_command(command: &MetaCommand) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(command).map_err(|e| ProtocolError::Encode(e.to_string()))
}

pub fn decode_meta_command(bytes: &[u8]) -> Result<MetaCommand, ProtocolError> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[derive(Default)]
struct StorageInner {
    revision: Revision,
    /// (key, revision) → value; `None` is a tombstone.
    history: BTreeMap<(Vec<u8>, Revision), Option<Vec<u8>>>,
}

/// Multi-version key-value storage with one revision per applied batch.
#[derive(Default)]
pub struct RevisionedStorage {
    inner: RwLock<StorageInner>,
}

impl RevisionedStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn revision(&self) -> Revision {
        self.inner.read().revision
    }

    /// Apply one batch at the next revision; returns the stamped entries.
    pub fn put_all(&self, kvs: Vec<(Vec<u8>, Option<Vec<u8>>)>) -> (Revision, Vec<Entry>) {
        let mut inner = self.inner.write();
        inner.revision += 1;
        let revision = inner.revision;
        let entries = kvs
            .into_iter()
            .map(|(key, value)| {
                inner.history.insert((key.clone(), revision), value.clone());
                Entry::new(key, value, revision)
            })
            .collect();
        (revision, entries)
    }
}

impl EntryReader for RevisionedStorage {
    fn get(&self, key: &[u8], revision: Revision) -> Option<Entry> {
        let inner = self.inner.read();
        inner
            .history
            .range((key.to_vec(), 0)..=(key.to_vec(), revision))
            .next_back()
            .map(|((_, found_revision), value)| {
                Entry::new(key.to_vec(), value.clone(), *found_revision)
            })
    }
}

/// State machine listener of the metadata replication group: applies
/// committed batches to storage and pushes them into the watch pipeline.
pub struct MetaStorageListener {
    storage: Arc<RevisionedStorage>,
    processor: Arc<WatchProcessor>,
}

impl MetaStorageListener {
    pub fn new(storage: Arc<RevisionedStorage>, processor: Arc<WatchProcessor>) -> Arc<Self> {
        Arc::new(Self { storage, processor })
    }
}

impl StateMachineListener for MetaStorageListener {
    fn on_apply(&self, index: u64, command: &[u8]) -> Result<Vec<u8>, String> {
        let command = decode_meta_command(command).map_err(|e| e.to_string())?;
        match command {
            MetaCommand::PutAll { kvs, timestamp } => {
                let (revision, entries) = self.storage.put_all(kvs);
                tracing::debug!(index, revision, count = entries.len(),
                    "metadata batch applied");
                self.processor.notify(entries, timestamp);
                serde_json::to_vec(&revision).map_err(|e| e.to_string())
            }
            MetaCommand::SafeTimeSync { timestamp } => {
                self.processor.advance_safe_time(timestamp);
                Ok(Vec::new())
            }
        }
    }
}
