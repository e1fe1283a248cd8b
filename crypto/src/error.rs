use thiserror::Error;

/// Failures of the decryption side; sealing never fails on well-formed input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Authentication tag mismatch: the blob was altered or the key is wrong.
    #[error("integrity check failed")]
    Integrity,

    /// The blob is structurally invalid (truncated, unknown version, ...).
    #[error("malformed blob: {0}")]
    Format(String),

    /// A wrapped key cannot be opened with the presented private key.
    #[error("access denied: key does not match this envelope")]
    AccessDenied,

    #[error("invalid key: {0}")]
    InvalidKey(String),
}
