use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction state.
///
/// `PENDING` is the initial state, `ABORTED` and `COMMITTED` are terminal.
/// A replica may observe a finish decision before it has seen the
/// transaction start, so the absent state (modelled as `None`) may move
/// directly to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxState {
    Pending,
    Finishing,
    Aborted,
    Committed,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Pending => write!(f, "PENDING"),
            TxState::Finishing => write!(f, "FINISHING"),
            TxState::Aborted => write!(f, "ABORTED"),
            TxState::Committed => write!(f, "COMMITTED"),
        }
    }
}

/// Rows/columns: [absent, PENDING, FINISHING, ABORTED, COMMITTED].
///
/// No transition re-enters PENDING once left; terminal states permit only
/// their own self-loop (idempotent retries), so COMMITTED -> ABORTED and
/// ABORTED -> COMMITTED are both forbidden.
const TRANSITION_MATRIX: [[bool; 5]; 5] = [
    [false, true, false, true, true],
    [false, true, true, true, true],
    [false, false, true, true, true],
    [false, false, false, true, false],
    [false, false, false, false, true],
];

fn ordinal(state: Option<TxState>) -> usize {
    match state {
        None => 0,
        Some(TxState::Pending) => 1,
        Some(TxState::Finishing) => 2,
        Some(TxState::Aborted) => 3,
        Some(TxState::Committed) => 4,
    }
}

/// Checks the correctness of a transition between transaction states.
///
/// `before = None` models a transaction that has not yet been observed.
pub fn check_transition_correctness(before: Option<TxState>, after: TxState) -> bool {
    TRANSITION_MATRIX[ordinal(before)][ordinal(Some(after))]
}
