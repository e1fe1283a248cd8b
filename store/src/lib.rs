//! Storage traits for the off-chain projection of ledger state.
//!
//! The engine depends only on these traits. A relational or key-value backend
//! implements them in the hosting application; `pharmachain-nullables` provides
//! in-memory versions for tests.

pub mod directory;
pub mod error;
pub mod projection;

pub use directory::{PartyDirectory, ProductCatalog};
pub use error::StoreError;
pub use projection::{ProjectionBatch, ProjectionStore};
