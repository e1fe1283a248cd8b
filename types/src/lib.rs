//! Fundamental types for the PharmaChain custody engine.
//!
//! This crate defines the values shared across every other crate in the workspace:
//! addresses, item keys, commitments, ledger references, timestamps, network
//! policies, parties, and the transaction record with its status state machine.

pub mod address;
pub mod block;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod keys;
pub mod network;
pub mod party;
pub mod record;
pub mod time;

pub use address::Address;
pub use block::BlockRef;
pub use error::ModelError;
pub use hash::{Commitment, ItemKey, SubmissionRef};
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use network::{NetworkId, NetworkPolicy};
pub use party::{Party, Product, Role};
pub use record::{CustodyEntry, TransactionRecord, TxKind, TxStatus};
pub use time::{Clock, SystemClock, Timestamp};
