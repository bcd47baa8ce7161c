use thiserror::Error;

use crate::types::{RaftNodeId, ReplicationGroupId, TxId};

/// Convenience alias for `Result<T, KestrelError>`.
pub type KestrelResult<T> = Result<T, KestrelError>;

/// Error classification for retry/escalation decisions.
///
/// - `Stopping`          — component is shutting down, operation rejected
/// - `Unavailable`       — target replica or group not yet running
/// - `Timeout`           — remote operation exceeded its deadline
/// - `Protocol`          — malformed or semantically invalid command/response
/// - `IllegalTransition` — transaction state machine rejected a mutation
/// - `Internal`          — unexpected failure inside a component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Stopping,
    Unavailable,
    Timeout,
    Protocol,
    IllegalTransition,
    Internal,
}

/// Top-level error type that all crate-specific errors convert into.
///
/// Every variant is `Clone` so that failures can be fanned out to all callers
/// sharing a deduplicated in-flight operation.
#[derive(Error, Debug, Clone)]
pub enum KestrelError {
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),

    #[error("Transaction error: {0}")]
    Txn(#[from] TxnError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Replication-group lifecycle errors.
#[derive(Error, Debug, Clone)]
pub enum CoordinationError {
    /// The coordinator has begun stopping; no new operations are accepted.
    #[error("Node is stopping")]
    NodeStopping,

    /// A (group, peer) pair was started twice on the same node.
    #[error("Raft group on the node is already started [nodeId={0}]")]
    AlreadyStarted(RaftNodeId),

    #[error("Raft node not found [nodeId={0}]")]
    NodeNotFound(RaftNodeId),

    #[error("Replication group not found [group={0}]")]
    GroupNotFound(ReplicationGroupId),

    #[error("Consensus error [group={group}]: {reason}")]
    Consensus {
        group: ReplicationGroupId,
        reason: String,
    },
}

/// Replica request routing errors.
#[derive(Error, Debug, Clone)]
pub enum ReplicationError {
    /// The remote call exceeded its deadline.
    #[error("Replication timeout [group={0}]")]
    Timeout(ReplicationGroupId),

    /// Transport-level failure, wrapping the underlying cause.
    #[error("Failed to process replica request [group={group}]: {cause}")]
    Common {
        group: ReplicationGroupId,
        cause: String,
    },

    /// The target replica has not finished starting its consensus participant.
    #[error("Replica is not yet available [group={0}]")]
    Unavailable(ReplicationGroupId),

    /// Replica-side application error, surfaced unchanged.
    #[error("Replica error [group={group}]: {message}")]
    Replica {
        group: ReplicationGroupId,
        message: String,
    },
}

/// Transaction layer errors.
#[derive(Error, Debug, Clone)]
pub enum TxnError {
    #[error("Transaction {0} illegal state transition: {1} -> {2}")]
    IllegalTransition(TxId, String, String),

    #[error("Transaction {0} not found")]
    NotFound(TxId),
}

/// Wire protocol errors.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Command serialization error: {0}")]
    Encode(String),

    #[error("Command deserialization error: {0}")]
    Decode(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl KestrelError {
    /// Classify this error for retry/escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KestrelError::Coordination(CoordinationError::NodeStopping) => ErrorKind::Stopping,
            KestrelError::Coordination(CoordinationError::NodeNotFound(_)) => {
                ErrorKind::Unavailable
            }
            KestrelError::Coordination(CoordinationError::GroupNotFound(_)) => {
                ErrorKind::Unavailable
            }
            KestrelError::Coordination(_) => ErrorKind::Internal,

            KestrelError::Replication(ReplicationError::Timeout(_)) => ErrorKind::Timeout,
            KestrelError::Replication(ReplicationError::Unavailable(_)) => ErrorKind::Unavailable,
            KestrelError::Replication(_) => ErrorKind::Internal,

            KestrelError::Txn(TxnError::IllegalTransition(_, _, _)) => {
                ErrorKind::IllegalTransition
            }
            KestrelError::Txn(TxnError::NotFound(_)) => ErrorKind::Unavailable,

            KestrelError::Protocol(_) => ErrorKind::Protocol,

            KestrelError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the coordinator or pipeline is shutting down.
    pub fn is_stopping(&self) -> bool {
        matches!(self.kind(), ErrorKind::Stopping)
    }

    /// Returns true if the client may retry this operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable | ErrorKind::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PeerId, ReplicationGroupId};

    #[test]
    fn test_node_stopping_is_stopping() {
        let e: KestrelError = CoordinationError::NodeStopping.into();
        assert_eq!(e.kind(), ErrorKind::Stopping);
        assert!(e.is_stopping());
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_replication_timeout_kind() {
        let e: KestrelError = ReplicationError::Timeout(ReplicationGroupId::MetaStorage).into();
        assert_eq!(e.kind(), ErrorKind::Timeout);
        assert!(e.is_retryable());
    }

    #[test]
    fn test_unavailable_is_retryable() {
        let e: KestrelError =
            ReplicationError::Unavailable(ReplicationGroupId::MetaStorage).into();
        assert_eq!(e.kind(), ErrorKind::Unavailable);
        assert!(e.is_retryable());
    }

    #[test]
    fn test_already_started_is_not_retryable() {
        let node = RaftNodeId::new(ReplicationGroupId::MetaStorage, PeerId(1));
        let e: KestrelError = CoordinationError::AlreadyStarted(node).into();
        assert_eq!(e.kind(), ErrorKind::Internal);
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_illegal_transition_kind() {
        let e: KestrelError =
            TxnError::IllegalTransition(TxId(7), "COMMITTED".into(), "ABORTED".into()).into();
        assert_eq!(e.kind(), ErrorKind::IllegalTransition);
    }

    #[test]
    fn test_protocol_decode_kind() {
        let e: KestrelError = ProtocolError::Decode("missing field `txId`".into()).into();
        assert_eq!(e.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_errors_are_cloneable() {
        let e: KestrelError = ReplicationError::Common {
            group: ReplicationGroupId::MetaStorage,
            cause: "connection reset".into(),
        }
        .into();
        let e2 = e.clone();
        assert_eq!(e.to_string(), e2.to_string());
    }
}
