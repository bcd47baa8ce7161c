use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use kestrel_common::error::TxnError;
use kestrel_common::hlc::HybridTimestamp;
use kestrel_common::types::{TablePartitionId, TxId};

use crate::state::{check_transition_correctness, TxState};

/// Volatile metadata for one transaction observed by this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxStateMeta {
    pub tx_id: TxId,
    pub state: TxState,
    /// Partitions enlisted into the transaction, in enlistment order.
    pub enlisted: Vec<TablePartitionId>,
    /// Set once the commit decision is made.
    pub commit_timestamp: Option<HybridTimestamp>,
}

impl TxStateMeta {
    fn new(tx_id: TxId, state: TxState) -> Self {
        Self { tx_id, state, enlisted: Vec::new(), commit_timestamp: None }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TxState::Aborted | TxState::Committed)
    }
}

/// Keyed volatile store of transaction states.
///
/// Every mutation goes through the transition matrix; an illegal transition
/// is reported to the mutator and leaves the stored state untouched.
#[derive(Debug, Default)]
pub struct TxStateStore {
    states: DashMap<TxId, TxStateMeta>,
}

impl TxStateStore {
    pub fn new() -> Self {
        Self { states: DashMap::new() }
    }

    pub fn state(&self, tx_id: TxId) -> Option<TxStateMeta> {
        self.states.get(&tx_id).map(|e| e.value().clone())
    }

    /// Move `tx_id` to `after`, validating against the current (possibly
    /// absent) state. On success the updated metadata is returned; `update`
    /// may adjust the rest of the record under the same map entry.
    pub fn transition(
        &self,
        tx_id: TxId,
        after: TxState,
        update: impl FnOnce(&mut TxStateMeta),
    ) -> Result<TxStateMeta, TxnError> {
        match self.states.entry(tx_id) {
            Entry::Vacant(vacant) => {
                if !check_transition_correctness(None, after) {
                    return Err(TxnError::IllegalTransition(
                        tx_id,
                        "ABSENT".to_string(),
                        after.to_string(),
                    ));
                }
                let mut meta = TxStateMeta::new(tx_id, after);
                update(&mut meta);
                let stored = meta.clone();
                vacant.insert(meta);
                Ok(stored)
            }
            Entry::Occupied(mut occupied) => {
                let before = occupied.get().state;
                if !check_transition_correctness(Some(before), after) {
                    return Err(TxnError::IllegalTransition(
                        tx_id,
                        before.to_string(),
                        after.to_string(),
                    ));
                }
                let meta = occupied.get_mut();
                meta.state = after;
                update(meta);
                Ok(meta.clone())
            }
        }
    }

    /// Enlist a partition, creating the transaction in `PENDING` on first
    /// contact.
    pub fn enlist(
        &self,
        tx_id: TxId,
        partition: TablePartitionId,
    ) -> Result<TxStateMeta, TxnError> {
        self.transition(tx_id, TxState::Pending, |meta| {
            if !meta.enlisted.contains(&partition) {
                meta.enlisted.push(partition);
            }
        })
    }

    /// Drop transactions whose terminal state has been observed; returns how
    /// many were vacuumed.
    pub fn vacuum(&self) -> usize {
        let before = self.states.len();
        self.states.retain(|_, meta| !meta.is_terminal());
        let removed = before - self.states.len();
        if removed > 0 {
            tracing::debug!(removed, "vacuumed terminal transactions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
