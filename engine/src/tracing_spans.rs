//! Pre-built [`tracing::Span`] constructors for engine operations.
//!
//! Every span carries the item key so one item's register, transfers, recall
//! and reconciliation can be correlated across log lines.

use pharmachain_types::{Address, Commitment, ItemKey};
use tracing::{info_span, Span};

pub fn register_span(item: &ItemKey, manufacturer: &Address) -> Span {
    info_span!("register", item = %item, manufacturer = %manufacturer)
}

pub fn transfer_span(item: &ItemKey, from: &Address, to: &Address) -> Span {
    info_span!("transfer", item = %item, from = %from, to = %to)
}

pub fn recall_span(item: &ItemKey, by: &Address) -> Span {
    info_span!("recall", item = %item, by = %by)
}

/// One reconciliation pass.
pub fn reconcile_span() -> Span {
    info_span!("reconcile")
}

/// Reconciliation of a single stuck record.
pub fn reconcile_record_span(item: &ItemKey, commitment: &Commitment) -> Span {
    info_span!("reconcile_record", item = %item, commitment = %commitment)
}
