//! Replicated partition commands and the state machine that applies them.
//!
//! - `command`: the tagged command set a partition's consensus state machine
//!   applies deterministically, with a strict self-describing wire codec
//! - `listener`: per-partition state machine — write intents, commit/abort
//!   resolution, transaction-state bookkeeping

pub mod command;
pub mod listener;

pub use command::{
    decode_command, encode_command, FinishTxCommand, PartitionCommand, Row, TxCleanupCommand,
    UpdateAllCommand, UpdateCommand,
};
pub use listener::{PartitionListener, PartitionStorage};
