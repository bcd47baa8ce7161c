use std::sync::Arc;

use async_trait::async_trait;

use kestrel_common::error::KestrelError;
use kestrel_common::hlc::HybridTimestamp;
use kestrel_common::types::Revision;

use crate::entry::WatchEvent;

/// Listener side of a watch.
#[async_trait]
pub trait WatchListener: Send + Sync + 'static {
    /// Process one revision's events for this watch. Failures are isolated
    /// to this watch: they are logged, reported to `on_error`, and never
    /// affect other watches or the revision chain.
    async fn on_update(&self, event: WatchEvent) -> Result<(), KestrelError>;

    /// Called when `on_update` failed or panicked.
    fn on_error(&self, error: &KestrelError) {
        let _ = error;
    }
}

/// Invoked for every committed revision, regardless of whether any watch
/// matched.
#[async_trait]
pub trait RevisionUpdateListener: Send + Sync + 'static {
    async fn on_updated(&self, revision: Revision);
}

/// Downstream callback pair driven once per chain step, after all watches
/// and revision listeners have settled.
#[async_trait]
pub trait RevisionCallback: Send + Sync + 'static {
    /// No log entry can appear below `timestamp` anymore.
    fn on_safe_time_advanced(&self, timestamp: HybridTimestamp);

    /// One revision has been fully processed; `event` holds the entries
    /// accepted by at least one watch. Failures are logged and swallowed.
    async fn on_revision_applied(&self, event: WatchEvent) -> Result<(), KestrelError>;
}

/// Key predicate of a watch.
pub type KeyPredicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// A registered watch: key predicate, start revision, and listener.
///
/// The start revision gates matching, so a freshly added watch only sees
/// revisions at or after it.
#[derive(Clone)]
pub struct Watch {
    predicate: KeyPredicate,
    start_revision: Revision,
    listener: Arc<dyn WatchListener>,
}

impl Watch {
    pub fn new(
        predicate: KeyPredicate,
        start_revision: Revision,
        listener: Arc<dyn WatchListener>,
    ) -> Self {
        Self { predicate, start_revision, listener }
    }

    /// Watch a single exact key.
    pub fn exact(key: Vec<u8>, start_revision: Revision, listener: Arc<dyn WatchListener>) -> Self {
        Self::new(Arc::new(move |k: &[u8]| k == key.as_slice()), start_revision, listener)
    }

    /// Watch every key under a prefix.
    pub fn prefix(
        prefix: Vec<u8>,
        start_revision: Revision,
        listener: Arc<dyn WatchListener>,
    ) -> Self {
        Self::new(
            Arc::new(move |k: &[u8]| k.starts_with(prefix.as_slice())),
            start_revision,
            listener,
        )
    }

    pub fn matches(&self, key: &[u8], revision: Revision) -> bool {
        revision >= self.start_revision && (self.predicate)(key)
    }

    pub fn start_revision(&self) -> Revision {
        self.start_revision
    }

    pub fn listener(&self) -> &Arc<dyn WatchListener> {
        &self.listener
    }

    /// Identity token of the listener, used to remove a watch.
    pub(crate) fn listener_token(&self) -> usize {
        listener_token(&self.listener)
    }
}

pub(crate) fn listener_token(listener: &Arc<dyn WatchListener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}
