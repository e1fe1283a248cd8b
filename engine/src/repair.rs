//! Work the reconciler picks up after the request path gave up on it.

use pharmachain_store::{ProjectionBatch, ProjectionStore};
use pharmachain_types::ItemKey;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::EngineMetrics;

/// Projection writes that failed after the ledger accepted the operation,
/// plus items whose projection needs a full audit.
///
/// Held in memory only. After a restart the reconciler rebuilds the same
/// state from the in-flight records still in the store.
#[derive(Debug, Default)]
pub struct RepairQueue {
    deferred: Mutex<VecDeque<ProjectionBatch>>,
    audits: Mutex<BTreeSet<ItemKey>>,
}

impl RepairQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&self, batch: ProjectionBatch) {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(batch);
    }

    /// Drain deferred writes, oldest first.
    pub fn take_deferred(&self) -> Vec<ProjectionBatch> {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn mark_for_audit(&self, item: ItemKey) {
        self.audits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item);
    }

    pub fn take_audits(&self) -> Vec<ItemKey> {
        std::mem::take(&mut *self.audits.lock().unwrap_or_else(PoisonError::into_inner))
            .into_iter()
            .collect()
    }
}

/// Apply `batch`, or queue it for the reconciler if the store refuses it.
///
/// Used only after the ledger has accepted an operation, so a store failure
/// must never lose the write. Returns whether the batch landed now.
pub(crate) async fn write_or_defer(
    store: &dyn ProjectionStore,
    repairs: &RepairQueue,
    metrics: &EngineMetrics,
    batch: ProjectionBatch,
) -> bool {
    match store.apply_batch(batch.clone()).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                error = %e,
                records = batch.records.len(),
                "projection write failed, deferring to reconciliation"
            );
            metrics.deferred_writes.inc();
            repairs.defer(batch);
            false
        }
    }
}
