use pharmachain_types::{NetworkId, SubmissionRef};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// RPC or network failure. Safe to retry.
    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("item already registered on the ledger")]
    DuplicateItem,

    #[error("submitter is not the current owner of the item")]
    NotCurrentOwner,

    #[error("item has been recalled")]
    Recalled,

    #[error("submitter is not authorized for this operation")]
    Unauthorized,

    #[error("no open handoff for this item")]
    NoOpenHandoff,

    #[error("item is not registered on the ledger")]
    NotRegistered,

    /// Any other business-rule rejection.
    #[error("ledger reverted: {0}")]
    Revert(String),

    #[error("wait for {submission} timed out after {waited:?}")]
    Timeout {
        submission: SubmissionRef,
        waited: Duration,
    },

    #[error("wait for {0} was cancelled")]
    Cancelled(SubmissionRef),

    #[error("connected to chain {actual}, expected {expected} ({network})")]
    ChainMismatch {
        network: NetworkId,
        expected: u64,
        actual: u64,
    },

    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

impl LedgerError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the ledger itself rejected the operation.
    pub fn is_revert(&self) -> bool {
        matches!(
            self,
            Self::DuplicateItem
                | Self::NotCurrentOwner
                | Self::Recalled
                | Self::Unauthorized
                | Self::NoOpenHandoff
                | Self::NotRegistered
                | Self::Revert(_)
        )
    }
}
