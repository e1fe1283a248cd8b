//! Errors raised while constructing or mutating model values.

use thiserror::Error;

use crate::record::TxStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid hex value: {0}")]
    InvalidHex(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalTransition { from: TxStatus, to: TxStatus },
}
