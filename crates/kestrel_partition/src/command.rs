//! Replicated partition commands.
//!
//! Every command is self-describing: applying it needs nothing beyond the
//! command and the receiving partition's current storage state, so any
//! replica can replay it deterministically. The wire format is a tagged
//! JSON record — the Rust types are the source of truth, JSON is the
//! envelope — and decoding rejects unknown or missing fields outright.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use kestrel_common::error::ProtocolError;
use kestrel_common::hlc::HybridTimestamp;
use kestrel_common::types::{RowId, TablePartitionId, TxId};

/// A schema-versioned row payload. The coordination core treats the tuple
/// bytes as opaque; the schema layer owns their meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Row {
    pub schema_version: u32,
    pub tuple: Vec<u8>,
}

impl Row {
    pub fn new(schema_version: u32, tuple: Vec<u8>) -> Self {
        Self { schema_version, tuple }
    }
}

/// Write (or delete) one row under a transaction. `row = None` is an
/// explicit delete marker — distinct from any row payload, empty included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCommand {
    pub partition: TablePartitionId,
    pub row_id: RowId,
    pub row: Option<Row>,
    pub tx_id: TxId,
    pub coordinator: String,
}

/// Write (or delete) a batch of rows under one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAllCommand {
    pub partition: TablePartitionId,
    pub rows: BTreeMap<RowId, Option<Row>>,
    pub tx_id: TxId,
    pub coordinator: String,
}

/// Record the commit/abort decision for a transaction across its enlisted
/// partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinishTxCommand {
    pub tx_id: TxId,
    pub commit: bool,
    pub commit_timestamp: HybridTimestamp,
    pub partitions: Vec<TablePartitionId>,
    pub coordinator: String,
}

/// Resolve a finished transaction's write intents on one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxCleanupCommand {
    pub tx_id: TxId,
    pub commit: bool,
    pub commit_timestamp: HybridTimestamp,
    pub coordinator: String,
}

/// The tagged command set a partition's consensus state machine applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionCommand {
    Update(UpdateCommand),
    UpdateAll(UpdateAllCommand),
    FinishTx(FinishTxCommand),
    TxCleanup(TxCleanupCommand),
}

impl PartitionCommand {
    pub fn tx_id(&self) -> TxId {
        match self {
            PartitionCommand::Update(c) => c.tx_id,
            PartitionCommand::UpdateAll(c) => c.tx_id,
            PartitionCommand::FinishTx(c) => c.tx_id,
            PartitionCommand::TxCleanup(c) => c.tx_id,
        }
    }

    pub fn coordinator(&self) -> &str {
        match self {
            PartitionCommand::Update(c) => &c.coordinator,
            PartitionCommand::UpdateAll(c) => &c.coordinator,
            PartitionCommand::FinishTx(c) => &c.coordinator,
            PartitionCommand::TxCleanup(c) => &c.coordinator,
        }
    }
}

pub fn encode_command(command: &PartitionCommand) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(command).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a command, failing fast on unknown tags, unknown fields, and
/// missing required fields — never defaulting silently.
pub fn decode_command(bytes: &[u8]) -> Result<PartitionCommand, ProtocolError> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> TablePartitionId {
        TablePartitionId::new(1, 1)
    }

    fn round_trip(command: PartitionCommand) -> PartitionCommand {
        let bytes = encode_command(&command).unwrap();
        decode_command(&bytes).unwrap()
    }

    #[test]
    fn test_update_command_round_trip() {
        let command = PartitionCommand::Update(UpdateCommand {
            partition: partition(),
            row_id: RowId(10),
            row: Some(Row::new(1, vec![1, 2, 3])),
            tx_id: TxId(77),
            coordinator: "node-1".to_string(),
        });
        assert_eq!(round_trip(command.clone()), command);
    }

    #[test]
    fn test_remove_round_trips_as_absent_row() {
        let command = PartitionCommand::Update(UpdateCommand {
            partition: partition(),
            row_id: RowId(10),
            row: None,
            tx_id: TxId(77),
            coordinator: "node-1".to_string(),
        });
        let decoded = round_trip(command.clone());
        assert_eq!(decoded, command);
        let PartitionCommand::Update(update) = decoded else { panic!("wrong variant") };
        assert!(update.row.is_none());
    }

    #[test]
    fn test_absent_row_is_distinct_from_empty_row() {
        let delete = PartitionCommand::Update(UpdateCommand {
            partition: partition(),
            row_id: RowId(1),
            row: None,
            tx_id: TxId(1),
            coordinator: "node-1".to_string(),
        });
        let empty = PartitionCommand::Update(UpdateCommand {
            partition: partition(),
            row_id: RowId(1),
            row: Some(Row::new(1, Vec::new())),
            tx_id: TxId(1),
            coordinator: "node-1".to_string(),
        });
        assert_ne!(round_trip(delete.clone()), round_trip(empty.clone()));
        assert_eq!(round_trip(delete.clone()), delete);
        assert_eq!(round_trip(empty.clone()), empty);
    }

    #[test]
    fn test_update_all_round_trip_with_mixed_deletes() {
        let mut rows = BTreeMap::new();
        for i in 0..10u64 {
            let row = if i % 2 == 0 { Some(Row::new(1, vec![i as u8])) } else { None };
            rows.insert(RowId(i), row);
        }
        let command = PartitionCommand::UpdateAll(UpdateAllCommand {
            partition: partition(),
            rows,
            tx_id: TxId(5),
            coordinator: "node-2".to_string(),
        });
        let decoded = round_trip(command.clone());
        assert_eq!(decoded, command);
        let PartitionCommand::UpdateAll(all) = decoded else { panic!("wrong variant") };
        assert!(all.rows[&RowId(1)].is_none());
        assert!(all.rows[&RowId(2)].is_some());
    }

    #[test]
    fn test_finish_tx_round_trip() {
        let command = PartitionCommand::FinishTx(FinishTxCommand {
            tx_id: TxId(9),
            commit: true,
            commit_timestamp: HybridTimestamp::new(1234, 5),
            partitions: (0..10).map(|i| TablePartitionId::new(1, i)).collect(),
            coordinator: "node-3".to_string(),
        });
        assert_eq!(round_trip(command.clone()), command);
    }

    #[test]
    fn test_tx_cleanup_round_trip() {
        let command = PartitionCommand::TxCleanup(TxCleanupCommand {
            tx_id: TxId(9),
            commit: false,
            commit_timestamp: HybridTimestamp::new(1234, 5),
            coordinator: "node-3".to_string(),
        });
        assert_eq!(round_trip(command.clone()), command);
    }

    #[test]
    fn test_decode_rejects_unknown_variant() {
        let err = decode_command(br#"{"DropTable": {"tx_id": 1}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_unknown_field() {
        let bytes = br#"{"TxCleanup": {"tx_id": 1, "commit": true, "commit_timestamp": 1,
            "coordinator": "n", "surprise": 42}}"#;
        let err = decode_command(bytes).unwrap_err();
        assert!(err.to_string().contains("surprise"), "got: {err}");
    }

    #[test]
    fn test_decode_rejects_missing_required_field() {
        // No coordinator.
        let bytes = br#"{"TxCleanup": {"tx_id": 1, "commit": true, "commit_timestamp": 1}}"#;
        assert!(decode_command(bytes).is_err());
    }
}
