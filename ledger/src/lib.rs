//! Access to the external custody ledger.
//!
//! The ledger is the source of truth for ownership. This crate defines the
//! [`LedgerAdapter`] seam the engine talks to, the polling waits for inclusion
//! and finality, the retry policy for transient transport failures, and a
//! JSON-RPC implementation over HTTP.

pub mod adapter;
pub mod error;
pub mod health;
pub mod retry;
pub mod rpc;
pub mod submission;
pub mod wait;

pub use adapter::{FinalReceipt, InclusionReceipt, LedgerAdapter};
pub use error::LedgerError;
pub use health::{network_health, NetworkHealth};
pub use retry::RetryPolicy;
pub use rpc::RpcLedger;
pub use submission::{submission_ref, LedgerOp};
pub use wait::{await_finality, await_inclusion, CancelToken, WaitOptions};
