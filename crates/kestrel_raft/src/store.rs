//! In-memory log storage and state-machine adapter for replication groups.
//!
//! The log store keeps entries, vote, and committed pointer in memory (the
//! coordination core is volatile; durable state lives behind the storage
//! engine boundary). The state machine forwards applied commands to the
//! registered `StateMachineListener` and publishes the applied index on a
//! watch channel, which backs the "node ready" future.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::sync::Arc;

use openraft::storage::{LogFlushed, LogState, RaftLogStorage, RaftStateMachine, Snapshot};
use openraft::{
    BasicNode, Entry, EntryPayload, LogId, OptionalSend, RaftLogReader, RaftSnapshotBuilder,
    SnapshotMeta, StorageError, StoredMembership, Vote,
};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::runtime::StateMachineListener;
use crate::types::{GroupRequest, GroupResponse, TypeConfig};

// ---------------------------------------------------------------------------
// LogStore — in-memory replicated log
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LogStoreInner {
    log: BTreeMap<u64, Entry<TypeConfig>>,
    last_purged: Option<LogId<u64>>,
    committed: Option<LogId<u64>>,
    vote: Option<Vote<u64>>,
}

/// Cloneable in-memory log store; clones share state so the reader handle
/// openraft requests sees the same log.
#[derive(Debug, Clone, Default)]
pub struct LogStore {
    inner: Arc<Mutex<LogStoreInner>>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<u64>> {
        let inner = self.inner.lock();
        Ok(inner.log.range(range).map(|(_, e)| e.clone()).collect())
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<u64>> {
        let inner = self.inner.lock();
        let last = inner
            .log
            .iter()
            .next_back()
            .map(|(_, e)| e.log_id)
            .or(inner.last_purged);
        Ok(LogState {
            last_purged_log_id: inner.last_purged,
            last_log_id: last,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(&mut self, vote: &Vote<u64>) -> Result<(), StorageError<u64>> {
        self.inner.lock().vote = Some(vote.clone());
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<u64>>, StorageError<u64>> {
        Ok(self.inner.lock().vote.clone())
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<u64>>,
    ) -> Result<(), StorageError<u64>> {
        self.inner.lock().committed = committed;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<u64>>, StorageError<u64>> {
        Ok(self.inner.lock().committed)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        {
            let mut inner = self.inner.lock();
            for entry in entries {
                inner.log.insert(entry.log_id.index, entry);
            }
        }
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let mut inner = self.inner.lock();
        inner.log.split_off(&log_id.index);
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let mut inner = self.inner.lock();
        inner.last_purged = Some(log_id);
        let keep = inner.log.split_off(&(log_id.index + 1));
        inner.log = keep;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StateMachine — forwards applied commands to the listener
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StateMachineData {
    last_applied: Option<LogId<u64>>,
    last_membership: StoredMembership<u64, BasicNode>,
}

struct StateMachineShared {
    data: Mutex<StateMachineData>,
    listener: Arc<dyn StateMachineListener>,
    applied_tx: watch::Sender<u64>,
}

/// State machine adapter: deterministic application happens in the
/// registered listener; this adapter only tracks applied/membership state
/// and publishes progress. Clones share state (openraft requests a separate
/// snapshot-builder handle).
#[derive(Clone)]
pub struct StateMachine {
    shared: Arc<StateMachineShared>,
}

impl StateMachine {
    /// Returns the state machine and a receiver observing the applied index.
    pub fn new(listener: Arc<dyn StateMachineListener>) -> (Self, watch::Receiver<u64>) {
        let (applied_tx, applied_rx) = watch::channel(0);
        let sm = Self {
            shared: Arc::new(StateMachineShared {
                data: Mutex::new(StateMachineData::default()),
                listener,
                applied_tx,
            }),
        };
        (sm, applied_rx)
    }

    fn apply_one(&self, entry: &Entry<TypeConfig>) -> GroupResponse {
        match &entry.payload {
            EntryPayload::Blank => GroupResponse::Noop,
            EntryPayload::Membership(membership) => {
                let mut data = self.shared.data.lock();
                data.last_membership =
                    StoredMembership::new(Some(entry.log_id), membership.clone());
                GroupResponse::Noop
            }
            EntryPayload::Normal(GroupRequest::Noop) => GroupResponse::Noop,
            EntryPayload::Normal(GroupRequest::Command { data }) => {
                match self.shared.listener.on_apply(entry.log_id.index, data) {
                    Ok(result) => GroupResponse::Applied { data: result },
                    Err(reason) => GroupResponse::Rejected { reason },
                }
            }
        }
    }
}

impl RaftStateMachine<TypeConfig> for StateMachine {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<u64>>, StoredMembership<u64, BasicNode>), StorageError<u64>> {
        let data = self.shared.data.lock();
        Ok((data.last_applied, data.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<GroupResponse>, StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        let mut responses = Vec::new();
        for entry in entries {
            let response = self.apply_one(&entry);
            self.shared.data.lock().last_applied = Some(entry.log_id);
            // Receivers may be gone during shutdown.
            let _ = self.shared.applied_tx.send(entry.log_id.index);
            responses.push(response);
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<u64>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<u64, BasicNode>,
        _snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<u64>> {
        let mut data = self.shared.data.lock();
        data.last_applied = meta.last_log_id;
        data.last_membership = meta.last_membership.clone();
        Ok(())
    }

    async fn get_current_snapshot(&mut self) -> Result<Option<Snapshot<TypeConfig>>, StorageError<u64>> {
        Ok(None)
    }
}

impl RaftSnapshotBuilder<TypeConfig> for StateMachine {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<u64>> {
        let (last_applied, last_membership) = {
            let data = self.shared.data.lock();
            (data.last_applied, data.last_membership.clone())
        };
        let snapshot_id = last_applied
            .map(|id| format!("{}-{}", id.leader_id, id.index))
            .unwrap_or_else(|| "empty".to_string());
        Ok(Snapshot {
            meta: SnapshotMeta {
                last_log_id: last_applied,
                last_membership,
                snapshot_id,
            },
            snapshot: Box::new(Cursor::new(Vec::new())),
        })
    }
}
