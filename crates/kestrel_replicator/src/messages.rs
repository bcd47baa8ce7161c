//! Tagged wire messages of the replica boundary.
//!
//! Responses are a tagged union with an explicit success/error variant and
//! an optional clock timestamp, checked by pattern match — never by
//! capability type tests.

use serde::{Deserialize, Serialize};

use kestrel_common::hlc::HybridTimestamp;
use kestrel_common::types::ReplicationGroupId;

/// Request sent to a named replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRequest {
    /// Execute an encoded command against the replica's group.
    Operation {
        group_id: ReplicationGroupId,
        command: Vec<u8>,
    },
    /// Block until the replica's consensus participant for the group has
    /// finished starting.
    AwaitReady { group_id: ReplicationGroupId },
}

impl ReplicaRequest {
    pub fn group_id(&self) -> ReplicationGroupId {
        match self {
            ReplicaRequest::Operation { group_id, .. } => *group_id,
            ReplicaRequest::AwaitReady { group_id } => *group_id,
        }
    }
}

/// Error classes a replica reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaErrorCode {
    /// The target has not finished starting its consensus participant.
    Unavailable,
    /// The target is shutting down.
    Stopping,
    /// Replica-side application failure.
    Internal,
}

/// Response from a replica; either variant may carry a clock timestamp to
/// merge into the caller's hybrid clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaResponse {
    Ok {
        payload: Vec<u8>,
        timestamp: Option<HybridTimestamp>,
    },
    Error {
        code: ReplicaErrorCode,
        message: String,
        timestamp: Option<HybridTimestamp>,
    },
}

impl ReplicaResponse {
    pub fn ok(payload: Vec<u8>, timestamp: Option<HybridTimestamp>) -> Self {
        ReplicaResponse::Ok { payload, timestamp }
    }

    pub fn unavailable(group_id: ReplicationGroupId, timestamp: Option<HybridTimestamp>) -> Self {
        ReplicaResponse::Error {
            code: ReplicaErrorCode::Unavailable,
            message: format!("replica for group {} is not started yet", group_id),
            timestamp,
        }
    }

    pub fn timestamp(&self) -> Option<HybridTimestamp> {
        match self {
            ReplicaResponse::Ok { timestamp, .. } => *timestamp,
            ReplicaResponse::Error { timestamp, .. } => *timestamp,
        }
    }
}
