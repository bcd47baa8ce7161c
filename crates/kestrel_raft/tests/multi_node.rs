//! Multi-replica groups: three replicas share one replicated log, commands
//! apply on every replica, and a client-only service reaches the group
//! without hosting one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;

use kestrel_common::config::CoordinationConfig;
use kestrel_common::types::{PeerId, PeersAndLearners, RaftNodeId, ReplicationGroupId, TablePartitionId};
use kestrel_raft::runtime::StateMachineListener;
use kestrel_raft::{
    GroupEventsListener, GroupOptions, NoopEventsListener, RaftGroupCoordinator, RaftGroupRuntime,
};

struct CountingListener {
    applied: AtomicUsize,
}

impl CountingListener {
    fn new() -> Arc<Self> {
        Arc::new(Self { applied: AtomicUsize::new(0) })
    }
}

impl StateMachineListener for CountingListener {
    fn on_apply(&self, _index: u64, command: &[u8]) -> Result<Vec<u8>, String> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(command.to_vec())
    }
}

#[derive(Default)]
struct LeaderRecorder {
    elected: Mutex<Vec<PeerId>>,
}

impl GroupEventsListener for LeaderRecorder {
    fn on_leader_elected(&self, _group_id: ReplicationGroupId, leader: PeerId) {
        self.elected.lock().push(leader);
    }
}

#[tokio::test]
async fn test_three_replica_group_replicates_commands() -> Result<()> {
    let group = ReplicationGroupId::TablePartition(TablePartitionId::new(7, 0));
    let peers = PeersAndLearners::from_peers([PeerId(1), PeerId(2), PeerId(3)]);

    let config = CoordinationConfig::default();
    let runtime = RaftGroupRuntime::new(config.raft.clone());
    let coordinator = RaftGroupCoordinator::new(runtime, config);

    let recorder = Arc::new(LeaderRecorder::default());
    let mut listeners = Vec::new();
    for peer in [PeerId(1), PeerId(2), PeerId(3)] {
        let listener = CountingListener::new();
        coordinator
            .start_group(
                RaftNodeId::new(group, peer),
                peers.clone(),
                listener.clone(),
                recorder.clone(),
                GroupOptions::defaults(),
            )
            .await?;
        listeners.push(listener);
    }

    // Client-only handle: no local replica required to submit commands.
    let service = coordinator.start_group_service(group, peers.clone()).await?;
    for i in 0..5u32 {
        let echoed = service.run(i.to_le_bytes().to_vec()).await?;
        assert_eq!(echoed, i.to_le_bytes());
    }

    // Commands reach every replica's state machine.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if listeners.iter().all(|l| l.applied.load(Ordering::SeqCst) >= 5) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "replicas applied {:?} of 5 commands",
            listeners.iter().map(|l| l.applied.load(Ordering::SeqCst)).collect::<Vec<_>>()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let leader = service.leader().await.expect("a leader must be known");
    assert!(peers.contains(leader));
    assert!(!recorder.elected.lock().is_empty(), "leader election event must fire");

    assert!(coordinator.stop_groups(group).await?);
    coordinator.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_noop_confirms_leadership() -> Result<()> {
    let group = ReplicationGroupId::TablePartition(TablePartitionId::new(8, 0));
    let peers = PeersAndLearners::from_peers([PeerId(1)]);

    let config = CoordinationConfig::default();
    let runtime = RaftGroupRuntime::new(config.raft.clone());
    let coordinator = RaftGroupCoordinator::new(runtime, config);

    let service = coordinator
        .start_group(
            RaftNodeId::new(group, PeerId(1)),
            peers,
            CountingListener::new(),
            Arc::new(NoopEventsListener),
            GroupOptions::defaults(),
        )
        .await?;

    service.run_noop().await?;
    coordinator.stop().await;
    Ok(())
}
