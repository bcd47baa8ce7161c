//! Stop-guarded entry lock for component lifecycles.
//!
//! Every public operation of a stoppable component enters the lock first; a
//! component that has begun stopping rejects new entrants while in-flight
//! operations drain. The drain is bounded: callers that outlive the timeout
//! are abandoned and the component reports a forced termination.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Lifecycle of a stoppable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Stopping,
    Stopped,
}

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const STOPPED: u8 = 2;

/// Entry lock combining a lifecycle flag with an in-flight operation counter.
///
/// `try_enter` is wait-free; `begin_stop` + `await_drain` implement the
/// stop side: block new entrants, let in-flight operations finish, bounded
/// by a timeout.
#[derive(Debug)]
pub struct BusyLock {
    state: AtomicU8,
    in_flight: AtomicU64,
    drained: Notify,
}

impl BusyLock {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            in_flight: AtomicU64::new(0),
            drained: Notify::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => LifecycleState::Running,
            STOPPING => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }

    /// Enter the lock. Returns `None` once stopping has begun.
    pub fn try_enter(&self) -> Option<BusyGuard<'_>> {
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        // Re-check: begin_stop may have won the race after the first load.
        if self.state.load(Ordering::SeqCst) != RUNNING {
            self.exit();
            return None;
        }
        Some(BusyGuard { lock: self })
    }

    fn exit(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Transition `Running -> Stopping`, blocking new entrants.
    ///
    /// Returns `false` if stopping had already begun, making the caller's
    /// stop path a no-op (idempotent stop).
    pub fn begin_stop(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Wait until all in-flight operations have drained, bounded by
    /// `timeout`. Returns `true` on a clean drain, `false` if the timeout
    /// elapsed and the component must force-terminate.
    ///
    /// Must be called after `begin_stop`. The lock ends up `Stopped` either
    /// way.
    pub async fn await_drain(&self, timeout: Duration) -> bool {
        debug_assert_ne!(self.state.load(Ordering::SeqCst), RUNNING);

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                self.state.store(STOPPED, Ordering::SeqCst);
                return true;
            }
            let notified = self.drained.notified();
            // Re-check after registering so a concurrent exit() is not missed.
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                self.state.store(STOPPED, Ordering::SeqCst);
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.state.store(STOPPED, Ordering::SeqCst);
                return false;
            }
        }
    }

    /// Number of operations currently inside the lock.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for BusyLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight operation.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    lock: &'a BusyLock,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.lock.exit();
    }
}
