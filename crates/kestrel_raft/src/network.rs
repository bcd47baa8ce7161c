//! In-process network layer for replication groups.
//!
//! RPCs are dispatched directly to the target node's `Raft` handle through a
//! shared `RaftRouter` keyed by `(group, peer)`. No sockets — zero latency,
//! deterministic, suitable for tests and single-binary clusters. A
//! networked deployment substitutes its own `RaftNetworkFactory` behind the
//! same `GroupRuntime` trait.

use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use openraft::error::{RPCError, RaftError, ReplicationClosed, StreamingError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, SnapshotResponse, VoteRequest, VoteResponse,
};
use openraft::storage::Snapshot;
use openraft::{BasicNode, Raft, Vote};

use kestrel_common::types::{PeerId, RaftNodeId, ReplicationGroupId};

use crate::types::TypeConfig;

// ---------------------------------------------------------------------------
// RaftRouter — shared registry of all in-process raft nodes
// ---------------------------------------------------------------------------

/// Shared registry mapping (group, peer) → Raft handle.
#[derive(Default)]
pub struct RaftRouter {
    nodes: DashMap<RaftNodeId, Raft<TypeConfig>>,
}

impl RaftRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a node so it can receive in-process RPCs.
    pub fn add_node(&self, id: RaftNodeId, raft: Raft<TypeConfig>) {
        self.nodes.insert(id, raft);
    }

    /// Remove a node (shutdown or simulated failure).
    pub fn remove_node(&self, id: &RaftNodeId) {
        self.nodes.remove(id);
    }

    /// Get a clone of the Raft handle (cheap — Raft is Arc-backed).
    pub fn get_node(&self, id: &RaftNodeId) -> Option<Raft<TypeConfig>> {
        self.nodes.get(id).map(|e| e.value().clone())
    }

    /// All registered nodes of one group.
    pub fn group_nodes(&self, group_id: &ReplicationGroupId) -> Vec<(RaftNodeId, Raft<TypeConfig>)> {
        self.nodes
            .iter()
            .filter(|e| e.key().group_id == *group_id)
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

// ---------------------------------------------------------------------------
// RouterNetworkFactory — group-scoped in-process network
// ---------------------------------------------------------------------------

/// Network factory bound to one replication group; connections resolve
/// targets through the shared router.
pub struct RouterNetworkFactory {
    router: Arc<RaftRouter>,
    group_id: ReplicationGroupId,
}

impl RouterNetworkFactory {
    pub fn new(router: Arc<RaftRouter>, group_id: ReplicationGroupId) -> Self {
        Self { router, group_id }
    }
}

impl RaftNetworkFactory<TypeConfig> for RouterNetworkFactory {
    type Network = RouterConnection;

    async fn new_client(&mut self, target: u64, _node: &BasicNode) -> Self::Network {
        RouterConnection {
            target: RaftNodeId::new(self.group_id, PeerId(target)),
            router: self.router.clone(),
        }
    }
}

/// In-process connection to one replica of one group.
pub struct RouterConnection {
    target: RaftNodeId,
    router: Arc<RaftRouter>,
}

impl RouterConnection {
    #[allow(clippy::result_large_err)]
    fn get_target(&self) -> Result<Raft<TypeConfig>, RPCError<u64, BasicNode, RaftError<u64>>> {
        self.router.get_node(&self.target).ok_or_else(|| {
            RPCError::Unreachable(Unreachable::new(&io::Error::new(
                io::ErrorKind::NotConnected,
                format!("node {} not found in router", self.target),
            )))
        })
    }
}

impl RaftNetwork<TypeConfig> for RouterConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<u64>, RPCError<u64, BasicNode, RaftError<u64>>> {
        let raft = self.get_target()?;
        raft.append_entries(rpc).await.map_err(|e| {
            RPCError::RemoteError(openraft::error::RemoteError::new(self.target.peer_id.0, e))
        })
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<u64>,
        _option: RPCOption,
    ) -> Result<VoteResponse<u64>, RPCError<u64, BasicNode, RaftError<u64>>> {
        let raft = self.get_target()?;
        raft.vote(rpc).await.map_err(|e| {
            RPCError::RemoteError(openraft::error::RemoteError::new(self.target.peer_id.0, e))
        })
    }

    async fn install_snapshot(
        &mut self,
        rpc: openraft::raft::InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        openraft::raft::InstallSnapshotResponse<u64>,
        RPCError<u64, BasicNode, RaftError<u64, openraft::error::InstallSnapshotError>>,
    > {
        let raft = self.router.get_node(&self.target).ok_or_else(|| {
            RPCError::Unreachable(Unreachable::new(&io::Error::new(
                io::ErrorKind::NotConnected,
                format!("node {} not found in router", self.target),
            )))
        })?;
        raft.install_snapshot(rpc).await.map_err(|e| {
            RPCError::RemoteError(openraft::error::RemoteError::new(self.target.peer_id.0, e))
        })
    }

    async fn full_snapshot(
        &mut self,
        _vote: Vote<u64>,
        _snapshot: Snapshot<TypeConfig>,
        _cancel: impl std::future::Future<Output = ReplicationClosed> + Send + 'static,
        _option: RPCOption,
    ) -> Result<SnapshotResponse<u64>, StreamingError<TypeConfig, openraft::error::Fatal<u64>>>
    {
        Err(StreamingError::Unreachable(Unreachable::new(
            &io::Error::new(
                io::ErrorKind::Unsupported,
                "full_snapshot not supported in in-process mode; use install_snapshot",
            ),
        )))
    }
}
