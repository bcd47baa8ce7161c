//! Cluster-wide identifiers.
//!
//! All ids are small, cheap-to-clone newtypes so they can be used as map keys
//! without allocation. Wire-visible ids derive serde.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonically increasing sequence number assigned to each committed batch
/// of log entries.
pub type Revision = u64;

/// Identifier of one voting or learning member of a replication group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Transaction identifier, assigned by the coordinating node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Identifier of one row within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub u64);

/// One partition of one table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TablePartitionId {
    pub table_id: u32,
    pub partition_index: u32,
}

impl TablePartitionId {
    pub fn new(table_id: u32, partition_index: u32) -> Self {
        Self { table_id, partition_index }
    }
}

impl fmt::Display for TablePartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_part_{}", self.table_id, self.partition_index)
    }
}

/// Identifier of a replication group: either the cluster-wide metadata store
/// or one table partition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ReplicationGroupId {
    MetaStorage,
    TablePartition(TablePartitionId),
}

impl fmt::Display for ReplicationGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationGroupId::MetaStorage => write!(f, "metastorage"),
            ReplicationGroupId::TablePartition(p) => write!(f, "{}", p),
        }
    }
}

/// One physical replica of a replication group: (group, peer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RaftNodeId {
    pub group_id: ReplicationGroupId,
    pub peer_id: PeerId,
}

impl RaftNodeId {
    pub fn new(group_id: ReplicationGroupId, peer_id: PeerId) -> Self {
        Self { group_id, peer_id }
    }
}

impl fmt::Display for RaftNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_id, self.peer_id)
    }
}

/// Immutable snapshot of the voting peers and non-voting learners of a group
/// at creation time. Membership changes are handled by the consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeersAndLearners {
    peers: BTreeSet<PeerId>,
    learners: BTreeSet<PeerId>,
}

impl PeersAndLearners {
    pub fn new(
        peers: impl IntoIterator<Item = PeerId>,
        learners: impl IntoIterator<Item = PeerId>,
    ) -> Self {
        Self {
            peers: peers.into_iter().collect(),
            learners: learners.into_iter().collect(),
        }
    }

    /// Configuration with voting peers only.
    pub fn from_peers(peers: impl IntoIterator<Item = PeerId>) -> Self {
        Self::new(peers, std::iter::empty())
    }

    pub fn peers(&self) -> &BTreeSet<PeerId> {
        &self.peers
    }

    pub fn learners(&self) -> &BTreeSet<PeerId> {
        &self.learners
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.peers.contains(&peer) || self.learners.contains(&peer)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty() && self.learners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_id_display() {
        assert_eq!(ReplicationGroupId::MetaStorage.to_string(), "metastorage");
        let part = ReplicationGroupId::TablePartition(TablePartitionId::new(7, 3));
        assert_eq!(part.to_string(), "7_part_3");
    }

    #[test]
    fn test_raft_node_id_display() {
        let id = RaftNodeId::new(ReplicationGroupId::MetaStorage, PeerId(2));
        assert_eq!(id.to_string(), "metastorage/peer-2");
    }

    #[test]
    fn test_peers_and_learners_membership() {
        let cfg = PeersAndLearners::new([PeerId(1), PeerId(2)], [PeerId(3)]);
        assert!(cfg.contains(PeerId(1)));
        assert!(cfg.contains(PeerId(3)));
        assert!(!cfg.contains(PeerId(4)));
        assert_eq!(cfg.peers().len(), 2);
        assert_eq!(cfg.learners().len(), 1);
    }

    #[test]
    fn test_peers_and_learners_from_peers() {
        let cfg = PeersAndLearners::from_peers([PeerId(1)]);
        assert!(cfg.learners().is_empty());
        assert!(!cfg.is_empty());
    }

    #[test]
    fn test_group_ids_are_map_keys() {
        use std::collections::BTreeMap;
        let mut m = BTreeMap::new();
        m.insert(ReplicationGroupId::MetaStorage, 1);
        m.insert(ReplicationGroupId::TablePartition(TablePartitionId::new(1, 0)), 2);
        assert_eq!(m.len(), 2);
    }
}
