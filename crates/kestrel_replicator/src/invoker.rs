//! Replica invoker.
//!
//! Sends application requests to a named replica with a fixed per-attempt
//! timeout. A replica addressed before its consensus participant has
//! finished starting answers "not yet available"; rather than fail fast,
//! the invoker installs at most one shared readiness probe per target —
//! N concurrent callers against a cold replica produce one await-ready
//! round-trip — and re-invokes the original request once the probe
//! resolves. Response timestamps are merged into the local hybrid clock on
//! every exchange.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use kestrel_common::config::ReplicationSection;
use kestrel_common::error::{KestrelError, KestrelResult, ReplicationError};
use kestrel_common::hlc::HybridClock;
use kestrel_common::types::ReplicationGroupId;

use crate::messages::{ReplicaErrorCode, ReplicaRequest, ReplicaResponse};
use crate::messaging::{Messaging, TransportError};

type SharedProbe = Shared<BoxFuture<'static, KestrelResult<ReplicaResponse>>>;

/// Sends requests to replicas, awaiting readiness of not-yet-started
/// targets.
pub struct ReplicaInvoker {
    messaging: Arc<dyn Messaging>,
    clock: Arc<HybridClock>,
    rpc_timeout: Duration,
    /// At most one in-flight readiness probe per target, shared by all
    /// concurrent callers waiting on that target.
    pending_probes: DashMap<String, SharedProbe>,
}

impl ReplicaInvoker {
    pub fn new(
        messaging: Arc<dyn Messaging>,
        clock: Arc<HybridClock>,
        config: &ReplicationSection,
    ) -> Arc<Self> {
        Arc::new(Self {
            messaging,
            clock,
            rpc_timeout: Duration::from_millis(config.rpc_timeout_ms),
            pending_probes: DashMap::new(),
        })
    }

    /// Send `request` to the replica hosted by `target`, resolving with the
    /// replica's success payload.
    pub async fn invoke(
        self: &Arc<Self>,
        target: impl Into<String>,
        request: ReplicaRequest,
    ) -> KestrelResult<Vec<u8>> {
        self.clone().send_to_replica(target.into(), request).await
    }

    fn send_to_replica(
        self: Arc<Self>,
        target: String,
        request: ReplicaRequest,
    ) -> BoxFuture<'static, KestrelResult<Vec<u8>>> {
        async move {
            let group_id = request.group_id();
            let response = self
                .messaging
                .invoke(&target, request.clone(), self.rpc_timeout)
                .await
                .map_err(|e| transport_error(e, group_id))?;

            if let Some(ts) = response.timestamp() {
                self.clock.update(ts);
            }

            match response {
                ReplicaResponse::Ok { payload, .. } => Ok(payload),
                ReplicaResponse::Error { code: ReplicaErrorCode::Unavailable, .. } => {
                    let probe = self.readiness_probe(&target, group_id);
                    let outcome = probe.clone().await;
                    // Removal is conditional on identity, so only the probe
                    // that was installed is ever removed.
                    self.pending_probes.remove_if(&target, |_, installed| installed.ptr_eq(&probe));

                    match outcome {
                        Ok(_) => self.clone().send_to_replica(target, request).await,
                        Err(probe_failure) => Err(probe_failure),
                    }
                }
                ReplicaResponse::Error { code, message, .. } => {
                    Err(ReplicationError::Replica {
                        group: group_id,
                        message: format!("{:?}: {}", code, message),
                    }
                    .into())
                }
            }
        }
        .boxed()
    }

    /// Install-or-join the readiness probe for `target`. Compare-and-insert
    /// through the map entry guarantees at most one in-flight probe per
    /// target.
    fn readiness_probe(&self, target: &str, group_id: ReplicationGroupId) -> SharedProbe {
        self.pending_probes
            .entry(target.to_string())
            .or_insert_with(|| {
                tracing::debug!(target, group = %group_id, "awaiting replica readiness");
                let messaging = self.messaging.clone();
                let clock = self.clock.clone();
                let timeout = self.rpc_timeout;
                let target = target.to_string();
                async move {
                    let response = messaging
                        .invoke(&target, ReplicaRequest::AwaitReady { group_id }, timeout)
                        .await
                        .map_err(|e| transport_error(e, group_id))?;
                    if let Some(ts) = response.timestamp() {
                        clock.update(ts);
                    }
                    match response {
                        ReplicaResponse::Ok { .. } => Ok(response),
                        ReplicaResponse::Error { code, message, .. } => {
                            Err(ReplicationError::Replica {
                                group: group_id,
                                message: format!("{:?}: {}", code, message),
                            }
                            .into())
                        }
                    }
                }
                .boxed()
                .shared()
            })
            .clone()
    }

    /// Number of in-flight readiness probes (diagnostics).
    pub fn pending_probe_count(&self) -> usize {
        self.pending_probes.len()
    }
}

fn transport_error(e: TransportError, group_id: ReplicationGroupId) -> KestrelError {
    match e {
        TransportError::Timeout => ReplicationError::Timeout(group_id).into(),
        TransportError::Failed(cause) => {
            ReplicationError::Common { group: group_id, cause }.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use kestrel_common::error::ErrorKind;
    use kestrel_common::hlc::HybridTimestamp;

    use super::*;

    const GROUP: ReplicationGroupId = ReplicationGroupId::MetaStorage;

    /// Replica that reports "not available" until the readiness probe has
    /// completed, then serves operations.
    struct ColdReplica {
        ready: AtomicBool,
        operations: AtomicUsize,
        probes: AtomicUsize,
        fail_probe: bool,
    }

    impl ColdReplica {
        fn new(fail_probe: bool) -> Arc<Self> {
            Arc::new(Self {
                ready: AtomicBool::new(false),
                operations: AtomicUsize::new(0),
                probes: AtomicUsize::new(0),
                fail_probe,
            })
        }
    }

    #[async_trait]
    impl Messaging for ColdReplica {
        async fn invoke(
            &self,
            _target: &str,
            request: ReplicaRequest,
            _timeout: Duration,
        ) -> Result<ReplicaResponse, TransportError> {
            match request {
                ReplicaRequest::Operation { command, group_id } => {
                    self.operations.fetch_add(1, Ordering::SeqCst);
                    if self.ready.load(Ordering::SeqCst) {
                        Ok(ReplicaResponse::ok(command, None))
                    } else {
                        Ok(ReplicaResponse::unavailable(group_id, None))
                    }
                }
                ReplicaRequest::AwaitReady { group_id } => {
                    self.probes.fetch_add(1, Ordering::SeqCst);
                    // Give every concurrent caller time to join the probe.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if self.fail_probe {
                        Ok(ReplicaResponse::Error {
                            code: ReplicaErrorCode::Internal,
                            message: "probe failed".into(),
                            timestamp: None,
                        })
                    } else {
                        self.ready.store(true, Ordering::SeqCst);
                        let _ = group_id;
                        Ok(ReplicaResponse::ok(vec![], None))
                    }
                }
            }
        }
    }

    fn invoker(messaging: Arc<dyn Messaging>) -> Arc<ReplicaInvoker> {
        ReplicaInvoker::new(messaging, Arc::new(HybridClock::new()), &ReplicationSection::default())
    }

    fn operation(bytes: &[u8]) -> ReplicaRequest {
        ReplicaRequest::Operation { group_id: GROUP, command: bytes.to_vec() }
    }

    #[tokio::test]
    async fn test_success_resolves_payload() {
        let replica = ColdReplica::new(false);
        replica.ready.store(true, Ordering::SeqCst);
        let invoker = invoker(replica.clone());

        let payload = invoker.invoke("node-1", operation(b"op")).await.unwrap();
        assert_eq!(payload, b"op");
        assert_eq!(replica.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cold_replica_single_caller_retries_after_probe() {
        let replica = ColdReplica::new(false);
        let invoker = invoker(replica.clone());

        let payload = invoker.invoke("node-1", operation(b"op")).await.unwrap();
        assert_eq!(payload, b"op");
        assert_eq!(replica.probes.load(Ordering::SeqCst), 1);
        // Initial attempt + one retry after readiness.
        assert_eq!(replica.operations.load(Ordering::SeqCst), 2);
        assert_eq!(invoker.pending_probe_count(), 0);
    }

    #[tokio::test]
    async fn test_five_concurrent_callers_share_one_probe() {
        let replica = ColdReplica::new(false);
        let invoker = invoker(replica.clone());

        let mut tasks = Vec::new();
        for i in 0..5u8 {
            let invoker = invoker.clone();
            tasks.push(tokio::spawn(async move {
                invoker.invoke("node-1", operation(&[i])).await
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            let payload = task.await.unwrap().unwrap();
            assert_eq!(payload, vec![i as u8]);
        }
        assert_eq!(replica.probes.load(Ordering::SeqCst), 1, "exactly one readiness probe");
        assert_eq!(invoker.pending_probe_count(), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_surfaces_to_all_callers() {
        let replica = ColdReplica::new(true);
        let invoker = invoker(replica.clone());

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let invoker = invoker.clone();
            tasks.push(tokio::spawn(async move {
                invoker.invoke("node-1", operation(b"op")).await
            }));
        }
        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(err.to_string().contains("probe failed"), "got: {err}");
        }
        assert_eq!(replica.probes.load(Ordering::SeqCst), 1);
        assert_eq!(invoker.pending_probe_count(), 0, "failed probe entry must be removed");
    }

    struct SilentReplica;

    #[async_trait]
    impl Messaging for SilentReplica {
        async fn invoke(
            &self,
            _target: &str,
            _request: ReplicaRequest,
            _timeout: Duration,
        ) -> Result<ReplicaResponse, TransportError> {
            Err(TransportError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_transport_timeout_is_distinct() {
        let invoker = invoker(Arc::new(SilentReplica));
        let err = invoker.invoke("node-1", operation(b"op")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("metastorage"), "timeout must carry the group id");
    }

    struct BrokenTransport;

    #[async_trait]
    impl Messaging for BrokenTransport {
        async fn invoke(
            &self,
            _target: &str,
            _request: ReplicaRequest,
            _timeout: Duration,
        ) -> Result<ReplicaResponse, TransportError> {
            Err(TransportError::Failed("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_transport_error_wraps_cause() {
        let invoker = invoker(Arc::new(BrokenTransport));
        let err = invoker.invoke("node-1", operation(b"op")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("connection reset"));
    }

    struct FailingReplica;

    #[async_trait]
    impl Messaging for FailingReplica {
        async fn invoke(
            &self,
            _target: &str,
            _request: ReplicaRequest,
            _timeout: Duration,
        ) -> Result<ReplicaResponse, TransportError> {
            Ok(ReplicaResponse::Error {
                code: ReplicaErrorCode::Internal,
                message: "constraint violated".into(),
                timestamp: None,
            })
        }
    }

    #[tokio::test]
    async fn test_other_replica_errors_are_not_retried() {
        let invoker = invoker(Arc::new(FailingReplica));
        let err = invoker.invoke("node-1", operation(b"op")).await.unwrap_err();
        assert!(err.to_string().contains("constraint violated"));
        assert_eq!(invoker.pending_probe_count(), 0);
    }

    struct TimestampingReplica {
        ts: HybridTimestamp,
    }

    #[async_trait]
    impl Messaging for TimestampingReplica {
        async fn invoke(
            &self,
            _target: &str,
            _request: ReplicaRequest,
            _timeout: Duration,
        ) -> Result<ReplicaResponse, TransportError> {
            Ok(ReplicaResponse::ok(vec![], Some(self.ts)))
        }
    }

    #[tokio::test]
    async fn test_response_timestamp_merges_into_clock() {
        let far_future = HybridTimestamp::new(1 << 40, 0);
        let clock = Arc::new(HybridClock::new());
        let invoker = ReplicaInvoker::new(
            Arc::new(TimestampingReplica { ts: far_future }),
            clock.clone(),
            &ReplicationSection::default(),
        );

        invoker.invoke("node-1", operation(b"op")).await.unwrap();
        assert!(clock.now() > far_future, "clock must advance past the observed timestamp");
    }
}
