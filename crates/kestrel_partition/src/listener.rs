//! Partition state machine.
//!
//! Applies decoded partition commands against in-memory storage: updates
//! stage write intents under their transaction, the finish decision moves
//! the transaction through the validated state machine, and cleanup
//! publishes (or discards) the intents. Everything here must stay
//! deterministic — each replica of the partition replays the same commands
//! in the same order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use kestrel_common::hlc::HybridTimestamp;
use kestrel_common::types::{RowId, TablePartitionId, TxId};
use kestrel_raft::runtime::StateMachineListener;
use kestrel_txn::{TxState, TxStateStore};

use crate::command::{decode_command, PartitionCommand, Row};

/// Result payload returned to the proposer after a command applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// Rows staged or resolved by this command.
    Applied { rows_affected: u64 },
    /// Resulting transaction state after a finish/cleanup command.
    TxStateChanged { state: String },
}

/// A committed row version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedRow {
    pub row: Row,
    pub commit_timestamp: HybridTimestamp,
}

#[derive(Default)]
struct StorageInner {
    committed: BTreeMap<RowId, CommittedRow>,
    /// Staged write intents per transaction; `None` stages a delete.
    intents: HashMap<TxId, BTreeMap<RowId, Option<Row>>>,
}

/// In-memory storage of one partition.
#[derive(Default)]
pub struct PartitionStorage {
    inner: RwLock<StorageInner>,
}

impl PartitionStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Committed state of a row; staged intents are invisible here.
    pub fn get(&self, row_id: RowId) -> Option<CommittedRow> {
        self.inner.read().committed.get(&row_id).cloned()
    }

    pub fn committed_len(&self) -> usize {
        self.inner.read().committed.len()
    }

    /// Transactions with staged, unresolved intents.
    pub fn pending_tx_count(&self) -> usize {
        self.inner.read().intents.len()
    }

    fn stage(&self, tx_id: TxId, rows: impl IntoIterator<Item = (RowId, Option<Row>)>) -> u64 {
        let mut inner = self.inner.write();
        let intents = inner.intents.entry(tx_id).or_default();
        let mut count = 0;
        for (row_id, row) in rows {
            intents.insert(row_id, row);
            count += 1;
        }
        count
    }

    /// Publish (commit) or discard (abort) a transaction's intents.
    fn resolve(&self, tx_id: TxId, commit: bool, commit_timestamp: HybridTimestamp) -> u64 {
        let mut inner = self.inner.write();
        let Some(intents) = inner.intents.remove(&tx_id) else {
            return 0;
        };
        let count = intents.len() as u64;
        if commit {
            for (row_id, row) in intents {
                match row {
                    Some(row) => {
                        inner.committed.insert(row_id, CommittedRow { row, commit_timestamp });
                    }
                    None => {
                        inner.committed.remove(&row_id);
                    }
                }
            }
        }
        count
    }
}

/// State machine listener of one partition's replication group.
pub struct PartitionListener {
    partition: TablePartitionId,
    storage: Arc<PartitionStorage>,
    tx_states: Arc<TxStateStore>,
}

impl PartitionListener {
    pub fn new(
        partition: TablePartitionId,
        storage: Arc<PartitionStorage>,
        tx_states: Arc<TxStateStore>,
    ) -> Arc<Self> {
        Arc::new(Self { partition, storage, tx_states })
    }

    pub fn storage(&self) -> &Arc<PartitionStorage> {
        &self.storage
    }

    pub fn tx_states(&self) -> &Arc<TxStateStore> {
        &self.tx_states
    }

    fn apply_command(&self, command: PartitionCommand) -> Result<CommandOutcome, String> {
        match command {
            PartitionCommand::Update(update) => {
                if update.partition != self.partition {
                    return Err(format!(
                        "command for partition {} applied to {}",
                        update.partition, self.partition
                    ));
                }
                self.tx_states
                    .enlist(update.tx_id, update.partition)
                    .map_err(|e| e.to_string())?;
                let rows = self.storage.stage(update.tx_id, [(update.row_id, update.row)]);
                Ok(CommandOutcome::Applied { rows_affected: rows })
            }
            PartitionCommand::UpdateAll(update) => {
                if update.partition != self.partition {
                    return Err(format!(
                        "command for partition {} applied to {}",
                        update.partition, self.partition
                    ));
                }
                self.tx_states
                    .enlist(update.tx_id, update.partition)
                    .map_err(|e| e.to_string())?;
                let rows = self.storage.stage(update.tx_id, update.rows);
                Ok(CommandOutcome::Applied { rows_affected: rows })
            }
            PartitionCommand::FinishTx(finish) => {
                let state = if finish.commit { TxState::Committed } else { TxState::Aborted };
                let meta = self
                    .tx_states
                    .transition(finish.tx_id, state, |meta| {
                        meta.commit_timestamp = Some(finish.commit_timestamp);
                        for partition in &finish.partitions {
                            if !meta.enlisted.contains(partition) {
                                meta.enlisted.push(*partition);
                            }
                        }
                    })
                    .map_err(|e| e.to_string())?;
                Ok(CommandOutcome::TxStateChanged { state: meta.state.to_string() })
            }
            PartitionCommand::TxCleanup(cleanup) => {
                let state = if cleanup.commit { TxState::Committed } else { TxState::Aborted };
                // Re-affirming the terminal state keeps cleanup retryable; a
                // conflicting decision is rejected before touching storage.
                self.tx_states
                    .transition(cleanup.tx_id, state, |meta| {
                        meta.commit_timestamp = Some(cleanup.commit_timestamp);
                    })
                    .map_err(|e| e.to_string())?;
                let rows =
                    self.storage.resolve(cleanup.tx_id, cleanup.commit, cleanup.commit_timestamp);
                tracing::debug!(partition = %self.partition, tx = %cleanup.tx_id,
                    commit = cleanup.commit, rows, "transaction intents resolved");
                Ok(CommandOutcome::Applied { rows_affected: rows })
            }
        }
    }
}

impl StateMachineListener for PartitionListener {
    fn on_apply(&self, index: u64, command: &[u8]) -> Result<Vec<u8>, String> {
        let command = decode_command(command).map_err(|e| e.to_string())?;
        tracing::trace!(partition = %self.partition, index, tx = %command.tx_id(),
            "applying partition command");
        let outcome = self.apply_command(command)?;
        serde_json::to_vec(&outcome).map_err(|e| e.to_string())
    }
}
