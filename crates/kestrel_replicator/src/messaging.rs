//! Transport boundary of the replica layer.
//!
//! The coordination core assumes a message-passing service with
//! request/response and timeout support. `ChannelMessaging` is the
//! in-process implementation: targets register an async handler, callers
//! invoke by name.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::messages::{ReplicaRequest, ReplicaResponse};

/// Transport-level failure, distinct from replica-reported errors.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Failed(String),
}

/// Request/response messaging with a per-call timeout.
#[async_trait]
pub trait Messaging: Send + Sync + 'static {
    async fn invoke(
        &self,
        target: &str,
        request: ReplicaRequest,
        timeout: Duration,
    ) -> Result<ReplicaResponse, TransportError>;
}

/// Async handler a target registers to serve replica requests.
pub type ReplicaHandler =
    Arc<dyn Fn(ReplicaRequest) -> BoxFuture<'static, ReplicaResponse> + Send + Sync>;

/// In-process messaging: direct dispatch to registered handlers.
#[derive(Default)]
pub struct ChannelMessaging {
    handlers: DashMap<String, ReplicaHandler>,
}

impl ChannelMessaging {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register (or replace) the handler serving `target`.
    pub fn register(&self, target: impl Into<String>, handler: ReplicaHandler) {
        self.handlers.insert(target.into(), handler);
    }

    pub fn unregister(&self, target: &str) {
        self.handlers.remove(target);
    }
}

#[async_trait]
impl Messaging for ChannelMessaging {
    async fn invoke(
        &self,
        target: &str,
        request: ReplicaRequest,
        timeout: Duration,
    ) -> Result<ReplicaResponse, TransportError> {
        let handler = self
            .handlers
            .get(target)
            .map(|e| e.value().clone())
            .ok_or_else(|| TransportError::Failed(format!("unknown target [{}]", target)))?;
        tokio::time::timeout(timeout, handler(request))
            .await
            .map_err(|_| TransportError::Timeout)
    }
}
