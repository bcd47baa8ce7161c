//! Transaction state machine for KestrelDB.
//!
//! - `TxState`: the four transaction states and the fixed transition matrix
//! - `TxStateStore`: volatile per-transaction metadata with validated,
//!   compare-and-transition mutation

pub mod state;
pub mod store;

pub use state::{check_transition_correctness, TxState};
pub use store::{TxStateMeta, TxStateStore};
