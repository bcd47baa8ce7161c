//! Consensus engine boundary.
//!
//! `GroupRuntime` is what the coordinator consumes: start/stop a named
//! replication group node with a deterministic state-machine listener, query
//! peers and leadership, and submit requests to the group's log.
//! `RaftGroupRuntime` is the openraft-backed in-process implementation: all
//! replicas run in one process and exchange RPCs through the shared router.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use openraft::{BasicNode, Config, Raft, SnapshotPolicy};
use parking_lot::Mutex;
use tokio::sync::watch;

use kestrel_common::config::RaftSection;
use kestrel_common::error::CoordinationError;
use kestrel_common::types::{PeerId, PeersAndLearners, RaftNodeId, ReplicationGroupId, Revision};

use crate::network::{RaftRouter, RouterNetworkFactory};
use crate::store::{LogStore, StateMachine};
use crate::types::{GroupRequest, GroupResponse, TypeConfig};

/// Deterministic state machine of one replication group.
///
/// `on_apply` is invoked once per committed command, in log order, on every
/// replica. It must produce the same result bytes on all of them; a
/// rejection (`Err`) must be equally deterministic.
pub trait StateMachineListener: Send + Sync + 'static {
    fn on_apply(&self, index: u64, command: &[u8]) -> Result<Vec<u8>, String>;
}

/// Group-level events surfaced to the component that started the node.
pub trait GroupEventsListener: Send + Sync + 'static {
    fn on_leader_elected(&self, group_id: ReplicationGroupId, leader: PeerId) {
        let _ = (group_id, leader);
    }
}

/// Events listener that ignores everything.
pub struct NoopEventsListener;

impl GroupEventsListener for NoopEventsListener {}

/// Per-group tuning overrides; unset fields fall back to the runtime's
/// `RaftSection`.
#[derive(Debug, Clone, Default)]
pub struct GroupOptions {
    pub heartbeat_interval_ms: Option<u64>,
    pub election_timeout_min_ms: Option<u64>,
    pub election_timeout_max_ms: Option<u64>,
}

impl GroupOptions {
    pub fn defaults() -> Self {
        Self::default()
    }
}

/// A consensus engine capable of running named replication group nodes.
#[async_trait]
pub trait GroupRuntime: Send + Sync + 'static {
    /// Start one replica of a group. Returns `false` if the (group, peer)
    /// pair is already running on this node.
    async fn start_node(
        &self,
        node_id: RaftNodeId,
        peers: PeersAndLearners,
        events: Arc<dyn GroupEventsListener>,
        listener: Arc<dyn StateMachineListener>,
        options: GroupOptions,
    ) -> Result<bool, CoordinationError>;

    /// Stop one local replica. Returns whether anything was stopped.
    async fn stop_node(&self, node_id: &RaftNodeId) -> Result<bool, CoordinationError>;

    /// Stop all local replicas of a group. Returns whether anything was
    /// stopped.
    async fn stop_nodes(&self, group_id: &ReplicationGroupId) -> Result<bool, CoordinationError>;

    /// Completes once all log entries committed at node start have been
    /// applied to the state machine; resolves to the applied revision.
    async fn node_ready(&self, group_id: &ReplicationGroupId)
        -> Result<Revision, CoordinationError>;

    /// Peers of `group_id` hosted locally.
    fn local_peers(&self, group_id: &ReplicationGroupId) -> Vec<PeerId>;

    /// Current leader of the group, if one is known.
    async fn leader(&self, group_id: &ReplicationGroupId) -> Option<PeerId>;

    /// Submit a request to the group's replicated log and await the applied
    /// result.
    async fn propose(
        &self,
        group_id: &ReplicationGroupId,
        request: GroupRequest,
    ) -> Result<GroupResponse, CoordinationError>;

    /// Stop every node this runtime hosts.
    async fn shutdown(&self) -> Result<(), CoordinationError>;
}

// ---------------------------------------------------------------------------
// RaftGroupRuntime — openraft-backed in-process implementation
// ---------------------------------------------------------------------------

struct NodeHandle {
    raft: Raft<TypeConfig>,
    applied_rx: watch::Receiver<u64>,
    events_task: tokio::task::JoinHandle<()>,
}

/// In-process consensus runtime: every replica of every group lives in this
/// process; RPCs are direct calls through the shared `RaftRouter`.
pub struct RaftGroupRuntime {
    router: Arc<RaftRouter>,
    nodes: DashMap<RaftNodeId, NodeHandle>,
    /// Nodes currently being constructed, so two concurrent starts of the
    /// same (group, peer) cannot both win.
    starting: Mutex<HashSet<RaftNodeId>>,
    config: RaftSection,
}

impl RaftGroupRuntime {
    pub fn new(config: RaftSection) -> Arc<Self> {
        Arc::new(Self {
            router: RaftRouter::new(),
            nodes: DashMap::new(),
            starting: Mutex::new(HashSet::new()),
            config,
        })
    }

    pub fn router(&self) -> Arc<RaftRouter> {
        self.router.clone()
    }

    fn raft_config(
        &self,
        group_id: ReplicationGroupId,
        options: &GroupOptions,
    ) -> Result<Arc<Config>, CoordinationError> {
        let config = Config {
            heartbeat_interval: options
                .heartbeat_interval_ms
                .unwrap_or(self.config.heartbeat_interval_ms),
            election_timeout_min: options
                .election_timeout_min_ms
                .unwrap_or(self.config.election_timeout_min_ms),
            election_timeout_max: options
                .election_timeout_max_ms
                .unwrap_or(self.config.election_timeout_max_ms),
            // Snapshotting belongs to the storage engine boundary.
            snapshot_policy: SnapshotPolicy::Never,
            ..Default::default()
        };
        config.validate().map(Arc::new).map_err(|e| CoordinationError::Consensus {
            group: group_id,
            reason: format!("config: {}", e),
        })
    }

    /// Wait for the group to elect a leader, polling up to `timeout`.
    async fn wait_leader(
        &self,
        group_id: &ReplicationGroupId,
        timeout: Duration,
    ) -> Result<PeerId, CoordinationError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(leader) = self.current_leader(group_id) {
                return Ok(leader);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoordinationError::Consensus {
                    group: *group_id,
                    reason: "leader election timed out".to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn current_leader(&self, group_id: &ReplicationGroupId) -> Option<PeerId> {
        for (_, raft) in self.router.group_nodes(group_id) {
            if let Some(leader) = raft.metrics().borrow().current_leader {
                return Some(PeerId(leader));
            }
        }
        None
    }

    /// Register the group's learners once a leader exists. Run from the
    /// lowest voting peer only, so N replicas produce one registration pass.
    async fn register_learners(
        router: Arc<RaftRouter>,
        group_id: ReplicationGroupId,
        peers: PeersAndLearners,
        leader_wait: Duration,
    ) {
        let deadline = tokio::time::Instant::now() + leader_wait;
        let leader = loop {
            let found = router
                .group_nodes(&group_id)
                .into_iter()
                .find_map(|(_, raft)| raft.metrics().borrow().current_leader);
            if let Some(l) = found {
                break l;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(group = %group_id, "no leader; learners not registered");
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        let Some(raft) = router.get_node(&RaftNodeId::new(group_id, PeerId(leader))) else {
            return;
        };
        for learner in peers.learners() {
            let node = BasicNode::new(learner.to_string());
            if let Err(e) = raft.add_learner(learner.0, node, false).await {
                tracing::warn!(group = %group_id, learner = %learner, error = %e,
                    "failed to register learner");
            }
        }
    }
}

#[async_trait]
impl GroupRuntime for RaftGroupRuntime {
    async fn start_node(
        &self,
        node_id: RaftNodeId,
        peers: PeersAndLearners,
        events: Arc<dyn GroupEventsListener>,
        listener: Arc<dyn StateMachineListener>,
        options: GroupOptions,
    ) -> Result<bool, CoordinationError> {
        {
            let mut starting = self.starting.lock();
            if self.nodes.contains_key(&node_id) || !starting.insert(node_id) {
                return Ok(false);
            }
        }
        let result = self
            .start_node_inner(node_id, peers, events, listener, options)
            .await;
        self.starting.lock().remove(&node_id);
        result.map(|_| true)
    }

    async fn stop_node(&self, node_id: &RaftNodeId) -> Result<bool, CoordinationError> {
        let Some((_, handle)) = self.nodes.remove(node_id) else {
            return Ok(false);
        };
        self.router.remove_node(node_id);
        handle.events_task.abort();
        handle.raft.shutdown().await.map_err(|e| CoordinationError::Consensus {
            group: node_id.group_id,
            reason: format!("shutdown: {}", e),
        })?;
        Ok(true)
    }

    async fn stop_nodes(&self, group_id: &ReplicationGroupId) -> Result<bool, CoordinationError> {
        let ids: Vec<RaftNodeId> = self
            .nodes
            .iter()
            .map(|e| *e.key())
            .filter(|id| id.group_id == *group_id)
            .collect();
        let mut stopped = false;
        for id in ids {
            stopped |= self.stop_node(&id).await?;
        }
        Ok(stopped)
    }

    async fn node_ready(
        &self,
        group_id: &ReplicationGroupId,
    ) -> Result<Revision, CoordinationError> {
        let entry = self
            .nodes
            .iter()
            .find(|e| e.key().group_id == *group_id)
            .map(|e| (e.value().raft.clone(), e.value().applied_rx.clone()));
        let Some((raft, mut applied_rx)) = entry else {
            return Err(CoordinationError::GroupNotFound(*group_id));
        };

        // Every entry present in the log at this point must be applied
        // before the caller may observe the group.
        let target = raft
            .metrics()
            .borrow()
            .last_log_index
            .unwrap_or(0);
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.leader_wait_ms);
        loop {
            let applied = *applied_rx.borrow();
            if applied >= target {
                return Ok(applied);
            }
            let changed = tokio::time::timeout_at(deadline, applied_rx.changed()).await;
            match changed {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    return Err(CoordinationError::Consensus {
                        group: *group_id,
                        reason: "state machine gone while awaiting readiness".to_string(),
                    })
                }
                Err(_) => {
                    return Err(CoordinationError::Consensus {
                        group: *group_id,
                        reason: format!(
                            "timed out awaiting log replay (applied {} of {})",
                            *applied_rx.borrow(),
                            target
                        ),
                    })
                }
            }
        }
    }

    fn local_peers(&self, group_id: &ReplicationGroupId) -> Vec<PeerId> {
        self.nodes
            .iter()
            .map(|e| *e.key())
            .filter(|id| id.group_id == *group_id)
            .map(|id| id.peer_id)
            .collect()
    }

    async fn leader(&self, group_id: &ReplicationGroupId) -> Option<PeerId> {
        self.current_leader(group_id)
    }

    async fn propose(
        &self,
        group_id: &ReplicationGroupId,
        request: GroupRequest,
    ) -> Result<GroupResponse, CoordinationError> {
        self.wait_leader(group_id, Duration::from_millis(self.config.leader_wait_ms))
            .await?;

        let nodes = self.router.group_nodes(group_id);
        if nodes.is_empty() {
            return Err(CoordinationError::GroupNotFound(*group_id));
        }
        let mut last_err = "no nodes available".to_string();
        for (id, raft) in nodes {
            match raft.client_write(request.clone()).await {
                Ok(resp) => return Ok(resp.data),
                Err(e) => last_err = format!("{}: {}", id, e),
            }
        }
        Err(CoordinationError::Consensus { group: *group_id, reason: last_err })
    }

    async fn shutdown(&self) -> Result<(), CoordinationError> {
        let ids: Vec<RaftNodeId> = self.nodes.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.stop_node(&id).await?;
        }
        Ok(())
    }
}

impl RaftGroupRuntime {
    async fn start_node_inner(
        &self,
        node_id: RaftNodeId,
        peers: PeersAndLearners,
        events: Arc<dyn GroupEventsListener>,
        listener: Arc<dyn StateMachineListener>,
        options: GroupOptions,
    ) -> Result<(), CoordinationError> {
        let group_id = node_id.group_id;
        let config = self.raft_config(group_id, &options)?;
        let (state_machine, applied_rx) = StateMachine::new(listener);

        let raft = Raft::new(
            node_id.peer_id.0,
            config,
            RouterNetworkFactory::new(self.router.clone(), group_id),
            LogStore::new(),
            state_machine,
        )
        .await
        .map_err(|e| CoordinationError::Consensus {
            group: group_id,
            reason: format!("init: {}", e),
        })?;

        self.router.add_node(node_id, raft.clone());

        let mut members = BTreeMap::new();
        for peer in peers.peers() {
            members.insert(peer.0, BasicNode::new(peer.to_string()));
        }
        // All fresh voters initialize with the same membership; a node with
        // existing state rejects this, which is fine.
        if let Err(e) = raft.initialize(members).await {
            tracing::debug!(node = %node_id, "initialize skipped: {}", e);
        }

        if !peers.learners().is_empty()
            && peers.peers().iter().next() == Some(&node_id.peer_id)
        {
            tokio::spawn(Self::register_learners(
                self.router.clone(),
                group_id,
                peers.clone(),
                Duration::from_millis(self.config.leader_wait_ms),
            ));
        }

        let events_task = {
            let mut metrics = raft.metrics();
            tokio::spawn(async move {
                let mut last_leader = None;
                loop {
                    let current = metrics.borrow().current_leader;
                    if current != last_leader {
                        if let Some(leader) = current {
                            events.on_leader_elected(group_id, PeerId(leader));
                        }
                        last_leader = current;
                    }
                    if metrics.changed().await.is_err() {
                        break;
                    }
                }
            })
        };

        self.nodes.insert(node_id, NodeHandle { raft, applied_rx, events_task });
        Ok(())
    }
}
