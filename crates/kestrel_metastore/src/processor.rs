//! Watch notification pipeline.
//!
//! A single worker task owns the watch set, the revision-listener set, and
//! the revision chain; every mutation and every notification arrives as a
//! message. Because the worker processes one notification to completion
//! before taking the next, revision R+1 can never start before revision R's
//! full callback chain has resolved, while per-watch notifications inside
//! one revision still run concurrently (bounded by a small semaphore).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;

use kestrel_common::config::WatchSection;
use kestrel_common::error::KestrelError;
use kestrel_common::hlc::HybridTimestamp;
use kestrel_common::types::Revision;

use crate::entry::{Entry, EntryEvent, EntryReader, WatchEvent};
use crate::watch::{listener_token, RevisionCallback, RevisionUpdateListener, Watch, WatchListener};

enum ProcessorMsg {
    Notify { entries: Vec<Entry>, timestamp: HybridTimestamp },
    AdvanceSafeTime { timestamp: HybridTimestamp },
    AddWatch { watch: Watch },
    RemoveWatch { listener: usize },
    RegisterRevisionListener { listener: Arc<dyn RevisionUpdateListener> },
    UnregisterRevisionListener { listener: usize },
    SetRevisionCallback { callback: Arc<dyn RevisionCallback> },
    MinWatchRevision { reply: oneshot::Sender<Option<Revision>> },
    Close,
}

/// Causally-ordered, revision-linearized notification of watches over the
/// replicated metadata log.
pub struct WatchProcessor {
    tx: mpsc::UnboundedSender<ProcessorMsg>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
    callback_set: AtomicBool,
    drain: Duration,
}

impl WatchProcessor {
    pub fn new(entry_reader: Arc<dyn EntryReader>, config: &WatchSection) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            entry_reader,
            watches: Vec::new(),
            revision_listeners: Vec::new(),
            revision_callback: None,
            semaphore: Arc::new(Semaphore::new(config.workers.max(1))),
            closed: closed.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));
        Arc::new(Self {
            tx,
            worker: Mutex::new(Some(handle)),
            closed,
            callback_set: AtomicBool::new(false),
            drain: Duration::from_millis(config.close_drain_ms),
        })
    }

    fn send(&self, msg: ProcessorMsg) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("watch processor is closed; message dropped");
            return;
        }
        if self.tx.send(msg).is_err() {
            tracing::warn!("watch processor worker is gone; message dropped");
        }
    }

    /// Append one committed revision to the notification chain. All entries
    /// must share one revision. Non-blocking: processing happens on the
    /// worker, strictly after every earlier chain step.
    pub fn notify(&self, entries: Vec<Entry>, timestamp: HybridTimestamp) {
        if entries.is_empty() {
            return;
        }
        self.send(ProcessorMsg::Notify { entries, timestamp });
    }

    /// Append a safe-time-only step to the chain (no new revision, e.g. a
    /// heartbeat), preserving ordering relative to real revisions.
    pub fn advance_safe_time(&self, timestamp: HybridTimestamp) {
        self.send(ProcessorMsg::AdvanceSafeTime { timestamp });
    }

    pub fn add_watch(&self, watch: Watch) {
        self.send(ProcessorMsg::AddWatch { watch });
    }

    /// Remove the watch(es) registered with this listener. Safe to call
    /// concurrently with in-flight notification.
    pub fn remove_watch(&self, listener: &Arc<dyn WatchListener>) {
        self.send(ProcessorMsg::RemoveWatch { listener: listener_token(listener) });
    }

    pub fn register_revision_listener(&self, listener: Arc<dyn RevisionUpdateListener>) {
        self.send(ProcessorMsg::RegisterRevisionListener { listener });
    }

    pub fn unregister_revision_listener(&self, listener: &Arc<dyn RevisionUpdateListener>) {
        self.send(ProcessorMsg::UnregisterRevisionListener {
            listener: Arc::as_ptr(listener) as *const () as usize,
        });
    }

    /// Set the safe-time/revision-applied callback pair. Set-once.
    pub fn set_revision_callback(&self, callback: Arc<dyn RevisionCallback>) {
        assert!(
            !self.callback_set.swap(true, Ordering::SeqCst),
            "revision callback must only be set once"
        );
        self.send(ProcessorMsg::SetRevisionCallback { callback });
    }

    /// Minimum start revision across all registered watches — how far back
    /// log compaction must preserve history. `None` when no watches are
    /// registered or the processor is closed.
    pub async fn min_watch_revision(&self) -> Option<Revision> {
        let (reply, rx) = oneshot::channel();
        self.send(ProcessorMsg::MinWatchRevision { reply });
        rx.await.ok().flatten()
    }

    /// Stop accepting notifications, cancel the pending chain, and drain the
    /// worker with a bounded wait. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // The worker discards everything still queued behind this message.
        let _ = self.tx.send(ProcessorMsg::Close);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.drain, handle).await.is_err() {
                tracing::warn!(timeout_ms = self.drain.as_millis() as u64,
                    "watch processor did not drain in time; aborting");
                abort.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker — exclusively owns the watch set and the chain
// ---------------------------------------------------------------------------

struct Worker {
    entry_reader: Arc<dyn EntryReader>,
    watches: Vec<Watch>,
    revision_listeners: Vec<Arc<dyn RevisionUpdateListener>>,
    revision_callback: Option<Arc<dyn RevisionCallback>>,
    semaphore: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ProcessorMsg>) {
        while let Some(msg) = rx.recv().await {
            // A close cancels whatever is still queued.
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            match msg {
                ProcessorMsg::Notify { entries, timestamp } => {
                    self.process_revision(entries, timestamp).await;
                }
                ProcessorMsg::AdvanceSafeTime { timestamp } => {
                    if let Some(callback) = &self.revision_callback {
                        callback.on_safe_time_advanced(timestamp);
                    }
                }
                ProcessorMsg::AddWatch { watch } => self.watches.push(watch),
                ProcessorMsg::RemoveWatch { listener } => {
                    self.watches.retain(|w| w.listener_token() != listener);
                }
                ProcessorMsg::RegisterRevisionListener { listener } => {
                    self.revision_listeners.push(listener);
                }
                ProcessorMsg::UnregisterRevisionListener { listener } => {
                    self.revision_listeners
                        .retain(|l| Arc::as_ptr(l) as *const () as usize != listener);
                }
                ProcessorMsg::SetRevisionCallback { callback } => {
                    self.revision_callback = Some(callback);
                }
                ProcessorMsg::MinWatchRevision { reply } => {
                    let min = self.watches.iter().map(Watch::start_revision).min();
                    let _ = reply.send(min);
                }
                ProcessorMsg::Close => break,
            }
        }
    }

    /// One chain step: collect per-watch events, notify matching watches and
    /// revision listeners concurrently, then drive the callback pair.
    async fn process_revision(&mut self, entries: Vec<Entry>, timestamp: HybridTimestamp) {
        let revision = entries[0].revision;
        debug_assert!(
            entries.iter().all(|e| e.revision == revision),
            "all entries of one notification must share one revision"
        );

        // Every watch appears in the result set, possibly with an empty
        // event list (skipped for notification, still part of bookkeeping).
        let mut watches_and_events: Vec<(Watch, Vec<EntryEvent>)> =
            Vec::with_capacity(self.watches.len());
        for watch in &self.watches {
            let mut events = Vec::new();
            for entry in &entries {
                if watch.matches(&entry.key, revision) {
                    let old = self.entry_reader.get(&entry.key, revision.saturating_sub(1));
                    events.push(EntryEvent::new(old, entry.clone()));
                }
            }
            watches_and_events.push((watch.clone(), events));
        }

        let mut tasks = JoinSet::new();
        for (watch, events) in &watches_and_events {
            if events.is_empty() {
                continue;
            }
            let event = WatchEvent::new(events.clone(), revision, timestamp);
            let listener = watch.listener().clone();
            let semaphore = self.semaphore.clone();
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome =
                    std::panic::AssertUnwindSafe(listener.on_update(event)).catch_unwind().await;
                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e),
                    Err(_) => Some(KestrelError::Internal(
                        "watch handler panicked".to_string(),
                    )),
                };
                if let Some(error) = failure {
                    tracing::error!(revision, error = %error,
                        "error occurred when processing a watch event");
                    listener.on_error(&error);
                }
            });
        }
        // Revision listeners run concurrently with the watches.
        for listener in &self.revision_listeners {
            let listener = listener.clone();
            tasks.spawn(async move {
                listener.on_updated(revision).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(revision, "watch notification task failed: {}", e);
            }
        }

        // Entries accepted by at least one watch, in first-acceptance order.
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for (_, events) in &watches_and_events {
            for event in events {
                if seen.insert(event.clone()) {
                    accepted.push(event.clone());
                }
            }
        }

        let Some(callback) = &self.revision_callback else {
            tracing::debug!(revision, "no revision callback set; chain step complete");
            return;
        };
        callback.on_safe_time_advanced(timestamp);
        let applied = WatchEvent::new(accepted, revision, timestamp);
        if let Err(e) = callback.on_revision_applied(applied).await {
            tracing::error!(revision, error = %e, "revision-applied callback failed");
        }
    }
}
