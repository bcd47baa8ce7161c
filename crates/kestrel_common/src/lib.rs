//! Shared foundation for the KestrelDB coordination core.
//!
//! - `types`: identifiers used as map keys across the cluster layer
//! - `error`: layered error taxonomy with retry/escalation classification
//! - `hlc`: hybrid logical clock (wall time + logical counter)
//! - `config`: coordination config sections with serde defaults
//! - `busy_lock`: stop-guarded entry lock for component lifecycles

pub mod busy_lock;
pub mod config;
pub mod error;
pub mod hlc;
pub mod types;

pub use busy_lock::{BusyGuard, BusyLock, LifecycleState};
pub use config::{
    CoordinationConfig, RaftSection, ReplicationSection, ShutdownSection, WatchSection,
};
pub use error::{
    CoordinationError, ErrorKind, KestrelError, KestrelResult, ProtocolError, ReplicationError,
    TxnError,
};
pub use hlc::{HybridClock, HybridTimestamp};
pub use types::{
    PeerId, PeersAndLearners, RaftNodeId, ReplicationGroupId, Revision, RowId, TablePartitionId,
    TxId,
};
