//! PharmaChain custody engine: confidential chain-of-custody transactions.
//!
//! The engine:
//! - Seals each shipment payload so only its shipper and receiver can read it
//! - Binds the ciphertext to a public commitment recorded on the ledger
//! - Drives the register, transfer and recall protocols to ledger finality
//! - Serializes operations per item and keeps the off-chain projection
//!   consistent with the ledger through background reconciliation

pub mod config;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod item_lock;
pub mod logging;
pub mod metrics;
pub mod reconciler;
pub mod repair;
pub mod settle;
pub mod shutdown;
pub mod tracing_spans;

pub use config::{EngineConfig, ReconcileConfig, RetryConfig};
pub use coordinator::{
    Collaborators, CoordinatorSettings, Outcome, RecallRequest, RegisterRequest,
    TransactionCoordinator, TransferRequest,
};
pub use envelope::SealedPayload;
pub use error::EngineError;
pub use identity::{IdentityProof, ProofAction};
pub use item_lock::{ItemGuard, ItemLocks};
pub use logging::{init_logging, LogFormat};
pub use metrics::EngineMetrics;
pub use reconciler::{Divergence, ReconcileReport, ReconcileSettings, Reconciler};
pub use repair::RepairQueue;
pub use shutdown::ShutdownController;

use std::sync::Arc;

/// A coordinator and reconciler wired to the same collaborators, item locks,
/// repair queue and metrics.
pub struct Engine {
    pub coordinator: Arc<TransactionCoordinator>,
    pub reconciler: Arc<Reconciler>,
    pub metrics: Arc<EngineMetrics>,
}

impl Engine {
    pub fn new(config: &EngineConfig, parts: Collaborators) -> Self {
        let locks = ItemLocks::new();
        let repairs = Arc::new(RepairQueue::new());
        let metrics = Arc::new(EngineMetrics::new());
        let coordinator = Arc::new(TransactionCoordinator::new(
            parts.clone(),
            locks.clone(),
            Arc::clone(&repairs),
            Arc::clone(&metrics),
            CoordinatorSettings::from_config(config),
        ));
        let reconciler = Arc::new(Reconciler::new(
            parts,
            locks,
            repairs,
            Arc::clone(&metrics),
            ReconcileSettings::from_config(config),
        ));
        Self {
            coordinator,
            reconciler,
            metrics,
        }
    }

    /// Start the background reconciler; it stops when `shutdown` fires.
    pub fn spawn_reconciler(&self, shutdown: &ShutdownController) -> tokio::task::JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        tokio::spawn(reconciler.run(shutdown.subscribe()))
    }
}
