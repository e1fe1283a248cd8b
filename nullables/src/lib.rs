//! Nullable infrastructure for deterministic testing.
//!
//! Every external collaborator of the engine (ledger, projection store, party
//! directory, product catalog, clock) sits behind a trait. This crate provides
//! in-memory implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically (mining, time, injected faults)
//! - Never touch the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod clock;
pub mod directory;
pub mod ledger;
pub mod store;

pub use clock::NullClock;
pub use directory::{NullPartyDirectory, NullProductCatalog};
pub use ledger::{MiningMode, NullLedger};
pub use store::NullProjectionStore;
