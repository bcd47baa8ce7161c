//! Hybrid logical clock.
//!
//! A `HybridTimestamp` packs 48 bits of wall-clock milliseconds and a 16-bit
//! logical counter into one `u64`, so comparison is a plain integer compare.
//! The clock is merged across nodes on every message exchange: observing a
//! remote timestamp can only move the local clock forward.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const LOGICAL_BITS: u32 = 16;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// A point in hybrid time: (physical milliseconds, logical counter).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct HybridTimestamp(u64);

impl HybridTimestamp {
    pub fn new(physical_ms: u64, logical: u16) -> Self {
        Self((physical_ms << LOGICAL_BITS) | u64::from(logical))
    }

    /// Raw packed representation, usable as a wire value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub fn physical_ms(self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    pub fn logical(self) -> u16 {
        (self.0 & LOGICAL_MASK) as u16
    }

    /// The next hybrid instant: bumps the logical counter, rolling over into
    /// physical time on overflow.
    pub fn tick(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for HybridTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.physical_ms(), self.logical())
    }
}

/// Monotonic hybrid logical clock.
///
/// `now()` never returns the same or an earlier timestamp twice; `update()`
/// merges an observed remote timestamp so that the next local timestamp is
/// causally after it.
#[derive(Debug)]
pub struct HybridClock {
    latest: AtomicU64,
}

impl HybridClock {
    pub fn new() -> Self {
        Self { latest: AtomicU64::new(0) }
    }

    fn physical_now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Current hybrid time, strictly greater than any previously returned
    /// or observed timestamp.
    pub fn now(&self) -> HybridTimestamp {
        let wall = HybridTimestamp::new(Self::physical_now_ms(), 0).as_u64();
        loop {
            let seen = self.latest.load(Ordering::SeqCst);
            let next = if wall > seen { wall } else { seen + 1 };
            if self
                .latest
                .compare_exchange(seen, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return HybridTimestamp::from_u64(next);
            }
        }
    }

    /// Merge an observed remote timestamp: the clock advances to
    /// max(local, observed) plus a causality bump.
    pub fn update(&self, observed: HybridTimestamp) -> HybridTimestamp {
        let wall = HybridTimestamp::new(Self::physical_now_ms(), 0).as_u64();
        loop {
            let seen = self.latest.load(Ordering::SeqCst);
            let next = wall.max(seen).max(observed.as_u64()) + 1;
            if self
                .latest
                .compare_exchange(seen, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return HybridTimestamp::from_u64(next);
            }
        }
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_packing() {
        let ts = HybridTimestamp::new(12345, 42);
        assert_eq!(ts.physical_ms(), 12345);
        assert_eq!(ts.logical(), 42);
        assert_eq!(HybridTimestamp::from_u64(ts.as_u64()), ts);
    }

    #[test]
    fn test_timestamp_ordering_is_packed_ordering() {
        let a = HybridTimestamp::new(100, 5);
        let b = HybridTimestamp::new(100, 6);
        let c = HybridTimestamp::new(101, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_now_is_strictly_monotonic() {
        let clock = HybridClock::new();
        let mut prev = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > prev, "clock went backwards: {} -> {}", prev, next);
            prev = next;
        }
    }

    #[test]
    fn test_update_moves_clock_past_observed() {
        let clock = HybridClock::new();
        let far_future = HybridTimestamp::new(u64::MAX >> 17, 0);
        let merged = clock.update(far_future);
        assert!(merged > far_future);
        assert!(clock.now() > merged);
    }

    #[test]
    fn test_update_never_moves_backwards() {
        let clock = HybridClock::new();
        let local = clock.now();
        let stale = HybridTimestamp::new(1, 0);
        let merged = clock.update(stale);
        assert!(merged > local);
    }

    #[test]
    fn test_tick_rolls_into_physical() {
        let ts = HybridTimestamp::new(10, u16::MAX);
        let next = ts.tick();
        assert_eq!(next.physical_ms(), 11);
        assert_eq!(next.logical(), 0);
    }

    #[test]
    fn test_concurrent_now_no_duplicates() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let clock = Arc::new(HybridClock::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let clock = clock.clone();
            handles.push(std::thread::spawn(move || {
                (0..5_000).map(|_| clock.now().as_u64()).collect::<Vec<_>>()
            }));
        }
        let mut all = HashSet::new();
        for h in handles {
            for ts in h.join().unwrap() {
                assert!(all.insert(ts), "duplicate timestamp {}", ts);
            }
        }
    }
}
