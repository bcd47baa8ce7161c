//! End-to-end replica routing: a partition command invoked against a
//! replica whose group has not started yet waits on the readiness probe,
//! retries, and lands in the partition state machine.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;

use kestrel_common::config::CoordinationConfig;
use kestrel_common::hlc::HybridClock;
use kestrel_common::types::{
    PeerId, PeersAndLearners, RaftNodeId, ReplicationGroupId, RowId, TablePartitionId, TxId,
};
use kestrel_partition::{
    encode_command, PartitionCommand, PartitionListener, PartitionStorage, Row, UpdateCommand,
};
use kestrel_raft::{
    GroupOptions, GroupService, NoopEventsListener, RaftGroupCoordinator, RaftGroupRuntime,
};
use kestrel_replicator::{
    ChannelMessaging, ReplicaInvoker, ReplicaRequest, ReplicaResponse,
};
use kestrel_txn::TxStateStore;

const PARTITION: TablePartitionId = TablePartitionId { table_id: 1, partition_index: 0 };

/// Serve replica requests for one node: operations run against the group
/// service once it exists, and report "not yet available" before that.
fn register_replica_handler(
    messaging: &ChannelMessaging,
    target: &str,
    service_slot: Arc<RwLock<Option<Arc<GroupService>>>>,
    clock: Arc<HybridClock>,
) {
    messaging.register(
        target,
        Arc::new(move |request: ReplicaRequest| {
            let service_slot = service_slot.clone();
            let clock = clock.clone();
            async move {
                match request {
                    ReplicaRequest::Operation { group_id, command } => {
                        let service = service_slot.read().clone();
                        match service {
                            None => ReplicaResponse::unavailable(group_id, Some(clock.now())),
                            Some(service) => match service.run(command).await {
                                Ok(payload) => ReplicaResponse::ok(payload, Some(clock.now())),
                                Err(e) => ReplicaResponse::Error {
                                    code: kestrel_replicator::ReplicaErrorCode::Internal,
                                    message: e.to_string(),
                                    timestamp: Some(clock.now()),
                                },
                            },
                        }
                    }
                    ReplicaRequest::AwaitReady { .. } => {
                        // Resolve once the local replica has started.
                        loop {
                            if service_slot.read().is_some() {
                                return ReplicaResponse::ok(Vec::new(), Some(clock.now()));
                            }
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            }
            .boxed()
        }),
    );
}

#[tokio::test]
async fn test_cold_replica_served_after_group_start() {
    let config = CoordinationConfig::default();
    let runtime = RaftGroupRuntime::new(config.raft.clone());
    let coordinator = RaftGroupCoordinator::new(runtime, config.clone());

    let clock = Arc::new(HybridClock::new());
    let messaging = ChannelMessaging::new();
    let service_slot: Arc<RwLock<Option<Arc<GroupService>>>> = Arc::new(RwLock::new(None));
    register_replica_handler(&messaging, "node-1", service_slot.clone(), clock.clone());

    let invoker = ReplicaInvoker::new(messaging, clock.clone(), &config.replication);

    // Start the replica only after a short delay, so the first operation
    // observes "not yet available".
    let listener = PartitionListener::new(PARTITION, PartitionStorage::new(), Arc::new(TxStateStore::new()));
    {
        let coordinator = coordinator.clone();
        let listener = listener.clone();
        let service_slot = service_slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let service = coordinator
                .start_group(
                    RaftNodeId::new(ReplicationGroupId::TablePartition(PARTITION), PeerId(1)),
                    PeersAndLearners::from_peers([PeerId(1)]),
                    listener,
                    Arc::new(NoopEventsListener),
                    GroupOptions::defaults(),
                )
                .await
                .unwrap();
            *service_slot.write() = Some(service);
        });
    }

    let update = PartitionCommand::Update(UpdateCommand {
        partition: PARTITION,
        row_id: RowId(42),
        row: Some(Row::new(1, vec![0xCA, 0xFE])),
        tx_id: TxId(1),
        coordinator: "node-1".to_string(),
    });
    let request = ReplicaRequest::Operation {
        group_id: ReplicationGroupId::TablePartition(PARTITION),
        command: encode_command(&update).unwrap(),
    };

    let before = clock.now();
    let payload = invoker.invoke("node-1", request).await.unwrap();
    assert!(!payload.is_empty(), "the applied command returns its outcome");

    // The staged intent reached the partition state machine.
    assert_eq!(listener.storage().pending_tx_count(), 1);
    // Response timestamps were merged into the caller clock.
    assert!(clock.now() > before);
    assert_eq!(invoker.pending_probe_count(), 0);

    coordinator.stop().await;
}
