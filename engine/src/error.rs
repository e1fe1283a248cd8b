use pharmachain_crypto::CryptoError;
use pharmachain_store::StoreError;
use pharmachain_types::{Address, ItemKey, ModelError, SubmissionRef};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or missing input. Never reaches the ledger.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("item {0} is already registered")]
    DuplicateItem(ItemKey),

    #[error("{claimed} is not the current owner of {item}")]
    NotCurrentOwner { item: ItemKey, claimed: Address },

    /// Lost a race for the item to a concurrent or external writer.
    #[error("ownership of {item} changed concurrently: {detail}")]
    OwnershipConflict { item: ItemKey, detail: String },

    #[error("recipient {0} is not a known, active party")]
    UnknownRecipient(Address),

    #[error("item {0} has been recalled")]
    RecalledItem(ItemKey),

    #[error("integrity check failed")]
    Integrity,

    #[error("access denied")]
    AccessDenied,

    /// Transient ledger failure that outlived the retry budget.
    #[error("ledger submission failed: {0}")]
    ChainSubmission(String),

    /// Business-rule rejection by the ledger.
    #[error("ledger rejected the operation: {0}")]
    ChainRevert(String),

    /// The operation may still complete; check back later.
    #[error("finality not observed for {submission} within {waited:?}")]
    FinalityTimeout {
        submission: SubmissionRef,
        waited: Duration,
    },

    /// Ledger and projection diverged in a way that needs an operator.
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("malformed cryptographic input: {0}")]
    Crypto(CryptoError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("config error: {0}")]
    Config(String),
}

impl From<CryptoError> for EngineError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Integrity => Self::Integrity,
            CryptoError::AccessDenied => Self::AccessDenied,
            other => Self::Crypto(other),
        }
    }
}
