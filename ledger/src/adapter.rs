//! The ledger seam.

use async_trait::async_trait;
use pharmachain_types::{
    Address, BlockRef, Commitment, ItemKey, NetworkId, NetworkPolicy, SubmissionRef,
};
use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// Proof that a submission was recorded in a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionReceipt {
    pub submission: SubmissionRef,
    pub block: BlockRef,
    /// Resource cost charged by the ledger (gas).
    pub cost: u64,
}

/// An inclusion receipt with enough blocks built on top to be final.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReceipt {
    pub inclusion: InclusionReceipt,
    /// Chain head when finality was observed.
    pub head: u64,
    /// Blocks on top of the inclusion block at that head.
    pub confirmations: u64,
}

/// Operations the engine needs from the custody ledger.
///
/// Implementations own their connection and are shared across tasks, so every
/// method takes `&self`. Business-rule rejections come back as the matching
/// typed [`LedgerError`]; only [`LedgerError::Transport`] is worth retrying.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Open the connection and check it reaches the configured network.
    async fn connect(&self) -> Result<(), LedgerError>;

    async fn close(&self) -> Result<(), LedgerError>;

    fn network(&self) -> NetworkId;

    /// Confirmation count and block interval in force for this ledger.
    fn policy(&self) -> NetworkPolicy;

    /// Record a new item owned by `owner`. Rejected with
    /// [`LedgerError::DuplicateItem`] if the ledger already knows the item.
    async fn submit_register(
        &self,
        item: &ItemKey,
        owner: &Address,
        commitment: &Commitment,
    ) -> Result<SubmissionRef, LedgerError>;

    /// Open a handoff from `shipper` (who must be the ledger owner) to
    /// `new_owner`. Ownership moves only when the handoff is completed.
    async fn submit_transfer(
        &self,
        item: &ItemKey,
        shipper: &Address,
        new_owner: &Address,
        commitment: &Commitment,
    ) -> Result<SubmissionRef, LedgerError>;

    /// Accept the open handoff `handoff` as its receiver.
    async fn submit_completion(
        &self,
        item: &ItemKey,
        receiver: &Address,
        handoff: &SubmissionRef,
    ) -> Result<SubmissionRef, LedgerError>;

    /// Flag the item recalled. Only its registrant may do this.
    async fn submit_recall(&self, item: &ItemKey, by: &Address)
        -> Result<SubmissionRef, LedgerError>;

    /// `Ok(None)` while the submission is not in a block (or unknown).
    async fn receipt(
        &self,
        submission: &SubmissionRef,
    ) -> Result<Option<InclusionReceipt>, LedgerError>;

    async fn block_height(&self) -> Result<u64, LedgerError>;

    /// Point-in-time owner, `None` for unregistered items.
    async fn current_owner_of(&self, item: &ItemKey) -> Result<Option<Address>, LedgerError>;

    async fn is_registered(&self, item: &ItemKey) -> Result<bool, LedgerError>;

    async fn is_recalled(&self, item: &ItemKey) -> Result<bool, LedgerError>;
}
