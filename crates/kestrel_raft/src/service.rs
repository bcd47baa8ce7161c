//! Per-group client handles.
//!
//! A `GroupService` submits application commands to one replication group
//! and answers leadership queries. It does not require a local replica: a
//! client-only handle built by `RaftGroupCoordinator::start_group_service`
//! routes through the runtime to wherever the group is hosted.

use std::sync::Arc;

use async_trait::async_trait;

use kestrel_common::error::{KestrelError, KestrelResult};
use kestrel_common::types::{PeerId, PeersAndLearners, ReplicationGroupId};

use crate::runtime::GroupRuntime;
use crate::types::{GroupRequest, GroupResponse};

/// Client handle bound to one replication group.
pub struct GroupService {
    group_id: ReplicationGroupId,
    peers: PeersAndLearners,
    runtime: Arc<dyn GroupRuntime>,
}

impl std::fmt::Debug for GroupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupService")
            .field("group_id", &self.group_id)
            .field("peers", &self.peers)
            .finish_non_exhaustive()
    }
}

impl GroupService {
    pub fn new(
        group_id: ReplicationGroupId,
        peers: PeersAndLearners,
        runtime: Arc<dyn GroupRuntime>,
    ) -> Arc<Self> {
        Arc::new(Self { group_id, peers, runtime })
    }

    pub fn group_id(&self) -> ReplicationGroupId {
        self.group_id
    }

    pub fn peers(&self) -> &PeersAndLearners {
        &self.peers
    }

    /// Submit an encoded command to the group's log and await the applied
    /// result payload.
    pub async fn run(&self, command: Vec<u8>) -> KestrelResult<Vec<u8>> {
        let response = self
            .runtime
            .propose(&self.group_id, GroupRequest::Command { data: command })
            .await?;
        match response {
            GroupResponse::Applied { data } => Ok(data),
            GroupResponse::Rejected { reason } => Err(KestrelError::Internal(format!(
                "command rejected by group {}: {}",
                self.group_id, reason
            ))),
            GroupResponse::Noop => Ok(Vec::new()),
        }
    }

    /// Propose a no-op entry — confirms leadership without side effects.
    pub async fn run_noop(&self) -> KestrelResult<()> {
        self.runtime.propose(&self.group_id, GroupRequest::Noop).await?;
        Ok(())
    }

    /// Current leader of the group, if known.
    pub async fn leader(&self) -> Option<PeerId> {
        self.runtime.leader(&self.group_id).await
    }
}

/// Builds the client service for a freshly started group, letting callers
/// substitute specialized wrappers without changing the coordinator.
#[async_trait]
pub trait GroupServiceFactory: Send + Sync {
    type Service: Send + Sync;

    async fn start_service(
        &self,
        group_id: ReplicationGroupId,
        peers: PeersAndLearners,
        runtime: Arc<dyn GroupRuntime>,
    ) -> KestrelResult<Self::Service>;
}

/// Default factory: a plain `GroupService`.
pub struct DefaultServiceFactory;

#[async_trait]
impl GroupServiceFactory for DefaultServiceFactory {
    type Service = Arc<GroupService>;

    async fn start_service(
        &self,
        group_id: ReplicationGroupId,
        peers: PeersAndLearners,
        runtime: Arc<dyn GroupRuntime>,
    ) -> KestrelResult<Self::Service> {
        Ok(GroupService::new(group_id, peers, runtime))
    }
}
