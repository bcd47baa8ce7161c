//! Openraft type configuration for KestrelDB replication groups.

use std::io::Cursor;

use openraft::BasicNode;
use serde::{Deserialize, Serialize};

/// Application request data — proposed to the replicated log.
///
/// Variants:
/// - `Command`: an encoded replicated command (opaque bytes at this layer;
///   the group's state machine listener decodes and applies it).
/// - `Noop`: a no-op entry used to confirm leadership without side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupRequest {
    Command { data: Vec<u8> },
    Noop,
}

/// Application response data — returned after applying a log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupResponse {
    /// The command was applied; `data` is the listener's result payload.
    Applied { data: Vec<u8> },
    /// The command was deterministically rejected by the state machine
    /// (every replica computes the same rejection).
    Rejected { reason: String },
    /// Returned for Noop and membership entries.
    Noop,
}

openraft::declare_raft_types!(
    pub TypeConfig:
        D            = GroupRequest,
        R            = GroupResponse,
        NodeId       = u64,
        Node         = BasicNode,
        Entry        = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime,
);
