//! Replication group coordinator.
//!
//! Owns the process-wide lifecycle of replication group nodes: every public
//! operation enters the busy lock first, so `stop()` can block new entrants,
//! drain in-flight operations with a bounded timeout, and then tear the
//! runtime down exactly once.

use std::sync::Arc;
use std::time::Duration;

use kestrel_common::busy_lock::{BusyGuard, BusyLock};
use kestrel_common::config::CoordinationConfig;
use kestrel_common::error::{CoordinationError, KestrelResult};
use kestrel_common::types::{PeersAndLearners, RaftNodeId, ReplicationGroupId, Revision};

use crate::runtime::{
    GroupEventsListener, GroupOptions, GroupRuntime, StateMachineListener,
};
use crate::service::{DefaultServiceFactory, GroupService, GroupServiceFactory};

/// Creates, tracks, and tears down replication groups.
pub struct RaftGroupCoordinator {
    runtime: Arc<dyn GroupRuntime>,
    busy: BusyLock,
    config: CoordinationConfig,
}

impl RaftGroupCoordinator {
    pub fn new(runtime: Arc<dyn GroupRuntime>, config: CoordinationConfig) -> Arc<Self> {
        Arc::new(Self { runtime, busy: BusyLock::new(), config })
    }

    fn enter(&self) -> KestrelResult<BusyGuard<'_>> {
        self.busy
            .try_enter()
            .ok_or_else(|| CoordinationError::NodeStopping.into())
    }

    /// Process-wide start. The in-process runtime is usable upon
    /// construction; this logs the effective lifecycle configuration.
    pub fn start(&self) {
        tracing::info!(
            drain_timeout_ms = self.config.shutdown.drain_timeout_ms,
            "raft group coordinator started"
        );
    }

    /// Start one replica of a group and build the default client service for
    /// it.
    ///
    /// Fails with a "node stopping" condition once `stop()` has begun, and
    /// with an "already started" condition if the (group, peer) pair is
    /// running.
    pub async fn start_group(
        &self,
        node_id: RaftNodeId,
        peers: PeersAndLearners,
        listener: Arc<dyn StateMachineListener>,
        events: Arc<dyn GroupEventsListener>,
        options: GroupOptions,
    ) -> KestrelResult<Arc<GroupService>> {
        self.start_group_with_factory(node_id, peers, listener, events, options, &DefaultServiceFactory)
            .await
    }

    /// As `start_group`, but the client service is built by a caller-supplied
    /// factory — supports specialized wrappers without changing the
    /// coordinator.
    pub async fn start_group_with_factory<F: GroupServiceFactory>(
        &self,
        node_id: RaftNodeId,
        peers: PeersAndLearners,
        listener: Arc<dyn StateMachineListener>,
        events: Arc<dyn GroupEventsListener>,
        options: GroupOptions,
        factory: &F,
    ) -> KestrelResult<F::Service> {
        let _guard = self.enter()?;
        self.start_group_node(node_id, peers.clone(), listener, events, options)
            .await?;
        factory
            .start_service(node_id.group_id, peers, self.runtime.clone())
            .await
    }

    /// As `start_group`, but additionally blocks until the node's state
    /// machine has replayed every log entry committed before the start — for
    /// callers that must not observe a group before its history is applied.
    pub async fn start_group_and_wait_ready(
        &self,
        node_id: RaftNodeId,
        peers: PeersAndLearners,
        listener: Arc<dyn StateMachineListener>,
        events: Arc<dyn GroupEventsListener>,
        options: GroupOptions,
    ) -> KestrelResult<(Arc<GroupService>, Revision)> {
        let _guard = self.enter()?;
        self.start_group_node(node_id, peers.clone(), listener, events, options)
            .await?;
        let revision = self.runtime.node_ready(&node_id.group_id).await?;
        let service = DefaultServiceFactory
            .start_service(node_id.group_id, peers, self.runtime.clone())
            .await?;
        Ok((service, revision))
    }

    async fn start_group_node(
        &self,
        node_id: RaftNodeId,
        peers: PeersAndLearners,
        listener: Arc<dyn StateMachineListener>,
        events: Arc<dyn GroupEventsListener>,
        options: GroupOptions,
    ) -> KestrelResult<()> {
        tracing::info!(node = %node_id, peers = ?peers.peers(), learners = ?peers.learners(),
            "starting raft group node");
        let started = self
            .runtime
            .start_node(node_id, peers, events, listener, options)
            .await?;
        if !started {
            return Err(CoordinationError::AlreadyStarted(node_id).into());
        }
        Ok(())
    }

    /// Build a client-only handle to talk to an existing group, without
    /// hosting a replica.
    pub async fn start_group_service(
        &self,
        group_id: ReplicationGroupId,
        peers: PeersAndLearners,
    ) -> KestrelResult<Arc<GroupService>> {
        let _guard = self.enter()?;
        DefaultServiceFactory
            .start_service(group_id, peers, self.runtime.clone())
            .await
    }

    /// Stop one local replica. Returns whether anything was stopped.
    pub async fn stop_group(&self, node_id: RaftNodeId) -> KestrelResult<bool> {
        let _guard = self.enter()?;
        tracing::info!(node = %node_id, "stopping raft group node");
        Ok(self.runtime.stop_node(&node_id).await?)
    }

    /// Stop all local replicas of one group. Returns whether anything was
    /// stopped.
    pub async fn stop_groups(&self, group_id: ReplicationGroupId) -> KestrelResult<bool> {
        let _guard = self.enter()?;
        tracing::info!(group = %group_id, "stopping raft group");
        Ok(self.runtime.stop_nodes(&group_id).await?)
    }

    /// Process-wide stop: idempotent, blocks new operations, drains in-flight
    /// operations bounded by the shutdown timeout, then tears down the
    /// runtime.
    pub async fn stop(&self) {
        if !self.busy.begin_stop() {
            return;
        }
        let drain = Duration::from_millis(self.config.shutdown.drain_timeout_ms);
        if !self.busy.await_drain(drain).await {
            tracing::warn!(timeout_ms = drain.as_millis() as u64,
                "in-flight operations did not drain; forcing coordinator shutdown");
        }
        if let Err(e) = self.runtime.shutdown().await {
            tracing::error!(error = %e, "group runtime shutdown failed");
        }
    }
}
