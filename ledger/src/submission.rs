//! Deterministic submission references.
//!
//! A reference is a Blake2b hash of the operation tag, the item key and the
//! operation's binding value, so resubmitting the same operation after a lost
//! response resolves to the same ledger entry instead of a second one.

use pharmachain_types::{Address, Commitment, ItemKey, SubmissionRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    Register,
    Transfer,
    Complete,
    Recall,
}

impl LedgerOp {
    pub fn tag(self) -> &'static [u8] {
        match self {
            Self::Register => b"pharmachain/op/register",
            Self::Transfer => b"pharmachain/op/transfer",
            Self::Complete => b"pharmachain/op/complete",
            Self::Recall => b"pharmachain/op/recall",
        }
    }
}

/// Reference of `op` on `item`, bound to `binding`.
pub fn submission_ref(op: LedgerOp, item: &ItemKey, binding: &[u8]) -> SubmissionRef {
    SubmissionRef::new(pharmachain_crypto::blake2b_256_multi(&[
        op.tag(),
        item.as_bytes(),
        binding,
    ]))
}

pub fn register_ref(item: &ItemKey, commitment: &Commitment) -> SubmissionRef {
    submission_ref(LedgerOp::Register, item, commitment.as_bytes())
}

pub fn transfer_ref(item: &ItemKey, commitment: &Commitment) -> SubmissionRef {
    submission_ref(LedgerOp::Transfer, item, commitment.as_bytes())
}

pub fn completion_ref(item: &ItemKey, handoff: &SubmissionRef) -> SubmissionRef {
    submission_ref(LedgerOp::Complete, item, handoff.as_bytes())
}

pub fn recall_ref(item: &ItemKey, by: &Address) -> SubmissionRef {
    submission_ref(LedgerOp::Recall, item, &by.to_bytes())
}
