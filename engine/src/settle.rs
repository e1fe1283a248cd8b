//! Projection writes that finish an operation once the ledger made it final.

use pharmachain_store::ProjectionBatch;
use pharmachain_types::{
    Address, BlockRef, CustodyEntry, Timestamp, TransactionRecord, TxKind, TxStatus,
};

use crate::EngineError;

/// Registrant of an item, from its custody entry or else its register record.
pub fn registrant_of(
    history: &[TransactionRecord],
    custody: Option<&CustodyEntry>,
) -> Option<Address> {
    custody.map(|c| c.registrant.clone()).or_else(|| {
        history
            .iter()
            .find(|r| r.kind == TxKind::Register && r.status != TxStatus::Failed)
            .map(|r| r.shipper.clone())
    })
}

/// Finalize `record` and move custody to its receiver, superseding every
/// other active record of the item. All of it lands as one batch.
///
/// `history` is the item's stored chain; `record` may or may not be in it.
pub fn finalize(
    mut record: TransactionRecord,
    block: BlockRef,
    cost: u64,
    history: &[TransactionRecord],
    custody: Option<&CustodyEntry>,
    at: Timestamp,
) -> Result<ProjectionBatch, EngineError> {
    if record.status != TxStatus::Finalized {
        record.transition(TxStatus::Finalized, at)?;
    }
    record.block = Some(block);
    record.cost = Some(cost);

    let registrant = match record.kind {
        TxKind::Register => record.shipper.clone(),
        TxKind::Transfer => registrant_of(history, custody).ok_or_else(|| {
            EngineError::Consistency(format!(
                "transfer {} of {} has no registration on record",
                record.commitment, record.item
            ))
        })?,
    };
    let entry = CustodyEntry {
        item: record.item,
        owner: record.receiver.clone(),
        registrant,
        record: record.commitment,
        recalled: custody.is_some_and(|c| c.recalled),
        updated_at: at,
    };

    let mut batch = ProjectionBatch::new();
    for prior in history {
        if prior.commitment != record.commitment && prior.status == TxStatus::Finalized {
            let mut prior = prior.clone();
            prior.transition(TxStatus::Completed, at)?;
            batch = batch.record(prior);
        }
    }
    Ok(batch.record(record).custody(entry))
}

/// Move every superseded record of a recalled item to `REVOKED`.
pub fn revoke_history(history: &[TransactionRecord], at: Timestamp) -> Vec<TransactionRecord> {
    history
        .iter()
        .filter(|r| r.status == TxStatus::Completed)
        .filter_map(|r| {
            let mut r = r.clone();
            r.transition(TxStatus::Revoked, at).ok().map(|_| r)
        })
        .collect()
}

/// Mark an in-flight record `FAILED` with a reason.
pub fn fail(
    mut record: TransactionRecord,
    reason: impl Into<String>,
    at: Timestamp,
) -> Result<TransactionRecord, EngineError> {
    record.transition(TxStatus::Failed, at)?;
    record.failure = Some(reason.into());
    Ok(record)
}
