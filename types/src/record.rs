//! Transaction records, their status state machine, and the custody pointer.

use serde::{Deserialize, Serialize};

use crate::{Address, BlockRef, Commitment, ItemKey, ModelError, NetworkId, SubmissionRef, Timestamp};

/// Which protocol produced a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxKind {
    Register,
    Transfer,
}

/// Lifecycle of a single record.
///
/// ```text
/// PENDING -> CONFIRMED -> FINALIZED -> COMPLETED -> REVOKED
///    \           \
///     +-----------+--> FAILED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxStatus {
    /// Submitted to the ledger, not yet included in a block.
    Pending,
    /// Included in a block, not yet final.
    Confirmed,
    /// Final; this record is the item's active custody record.
    Finalized,
    /// Superseded by a later finalized transfer.
    Completed,
    /// The ledger never accepted the operation.
    Failed,
    /// Superseded history invalidated by a recall.
    Revoked,
}

impl TxStatus {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Finalized)
                | (Finalized, Completed)
                | (Pending, Failed)
                | (Confirmed, Failed)
                | (Completed, Revoked)
        )
    }

    /// Still waiting on the ledger.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Whether `later` is reachable from `self` through one or more legal
    /// transitions.
    pub fn precedes(self, later: TxStatus) -> bool {
        use TxStatus::*;
        [Confirmed, Finalized, Completed, Failed, Revoked]
            .into_iter()
            .any(|next| self.can_transition_to(next) && (next == later || next.precedes(later)))
    }
}

/// One register or transfer operation, as projected off-chain.
///
/// The record is keyed by its [`Commitment`], which is unique per operation
/// because every payload is sealed under a fresh key and nonce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub item: ItemKey,
    pub kind: TxKind,
    pub shipper: Address,
    pub receiver: Address,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub wrapped_key_shipper: Vec<u8>,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub wrapped_key_receiver: Vec<u8>,
    pub commitment: Commitment,
    /// The register operation, or the transfer's handoff (create) operation.
    pub ledger_tx: SubmissionRef,
    /// The receiver's completion operation (transfers only).
    #[serde(default)]
    pub completion_tx: Option<SubmissionRef>,
    /// Block that made the record final.
    #[serde(default)]
    pub block: Option<BlockRef>,
    /// Resource cost reported by the ledger (gas).
    #[serde(default)]
    pub cost: Option<u64>,
    pub status: TxStatus,
    pub network: NetworkId,
    /// Timestamp bound into the commitment.
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub failure: Option<String>,
}

impl TransactionRecord {
    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: TxStatus, at: Timestamp) -> Result<(), ModelError> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    pub fn involves(&self, address: &Address) -> bool {
        &self.shipper == address || &self.receiver == address
    }
}

/// The current custody pointer of an item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyEntry {
    pub item: ItemKey,
    pub owner: Address,
    /// The manufacturer that registered the item.
    pub registrant: Address,
    /// Record that established the current owner.
    pub record: Commitment,
    #[serde(default)]
    pub recalled: bool,
    pub updated_at: Timestamp,
}
