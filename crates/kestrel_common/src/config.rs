use serde::{Deserialize, Serialize};

/// Top-level coordination configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoordinationConfig {
    #[serde(default)]
    pub raft: RaftSection,
    #[serde(default)]
    pub replication: ReplicationSection,
    #[serde(default)]
    pub watch: WatchSection,
    #[serde(default)]
    pub shutdown: ShutdownSection,
}

/// Raft group tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftSection {
    /// Leader heartbeat interval in milliseconds (default: 50).
    pub heartbeat_interval_ms: u64,
    /// Election timeout lower bound in milliseconds (default: 150).
    pub election_timeout_min_ms: u64,
    /// Election timeout upper bound in milliseconds (default: 300).
    pub election_timeout_max_ms: u64,
    /// How long to wait for a leader when routing a proposal (default: 5000).
    pub leader_wait_ms: u64,
}

impl Default for RaftSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 50,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            leader_wait_ms: 5_000,
        }
    }
}

/// Replica request routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSection {
    /// Per-attempt RPC timeout in milliseconds, including the readiness
    /// probe (default: 3000).
    pub rpc_timeout_ms: u64,
}

impl Default for ReplicationSection {
    fn default() -> Self {
        Self { rpc_timeout_ms: 3_000 }
    }
}

/// Watch notification pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSection {
    /// Max concurrent watch notifications within one revision (default: 4).
    /// Watch callbacks are expected to be fast or to hand off their own
    /// heavy work asynchronously.
    pub workers: usize,
    /// Bounded drain on close, in milliseconds (default: 10000).
    pub close_drain_ms: u64,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self { workers: 4, close_drain_ms: 10_000 }
    }
}

/// Component shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownSection {
    /// How long in-flight operations may drain before the component is
    /// forced to terminate, in milliseconds (default: 10000).
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self { drain_timeout_ms: 10_000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CoordinationConfig::default();
        assert_eq!(cfg.replication.rpc_timeout_ms, 3_000);
        assert_eq!(cfg.watch.workers, 4);
        assert_eq!(cfg.shutdown.drain_timeout_ms, 10_000);
        assert!(cfg.raft.election_timeout_min_ms < cfg.raft.election_timeout_max_ms);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let cfg: CoordinationConfig =
            serde_json::from_str(r#"{"replication": {"rpc_timeout_ms": 500}}"#).unwrap();
        assert_eq!(cfg.replication.rpc_timeout_ms, 500);
        assert_eq!(cfg.watch.workers, 4);
    }
}
