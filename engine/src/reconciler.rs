//! Background repair of the projection against ledger truth.
//!
//! A pass has three steps:
//! 1. retry projection writes the request path had to defer,
//! 2. drive records stuck in `PENDING`/`CONFIRMED` past the grace period
//!    forward from what the ledger reports,
//! 3. audit every item touched above (plus any queued for audit).
//!
//! Items whose lock is held by a running orchestration are skipped and
//! picked up by a later pass. Running a pass over a consistent projection
//! changes nothing.

use pharmachain_ledger::submission::completion_ref;
use pharmachain_ledger::{InclusionReceipt, LedgerError, RetryPolicy};
use pharmachain_store::ProjectionBatch;
use pharmachain_types::{
    Commitment, CustodyEntry, ItemKey, SubmissionRef, Timestamp, TransactionRecord, TxKind,
    TxStatus,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

use crate::coordinator::{ledger_error, Collaborators};
use crate::item_lock::ItemLocks;
use crate::repair::{write_or_defer, RepairQueue};
use crate::settle;
use crate::tracing_spans::{reconcile_record_span, reconcile_span};
use crate::{EngineConfig, EngineError, EngineMetrics};

#[derive(Clone, Debug)]
pub struct ReconcileSettings {
    pub grace_period: Duration,
    pub retry_window: Duration,
    pub interval: Duration,
    pub retry: RetryPolicy,
}

impl ReconcileSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            grace_period: Duration::from_secs(config.reconcile.grace_period_secs),
            retry_window: Duration::from_secs(config.reconcile.retry_window_secs),
            interval: Duration::from_secs(config.reconcile.interval_secs),
            retry: config.retry_policy(),
        }
    }
}

/// Ledger and projection disagree in a way only an operator can settle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Divergence {
    pub item: ItemKey,
    pub commitment: Option<Commitment>,
    pub detail: String,
}

impl From<&Divergence> for EngineError {
    fn from(d: &Divergence) -> Self {
        EngineError::Consistency(format!("item {}: {}", d.item, d.detail))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Deferred writes that landed this pass.
    pub flushed: usize,
    /// `PENDING` records now `CONFIRMED`.
    pub advanced: usize,
    pub finalized: usize,
    pub failed: usize,
    /// Records and custody entries corrected by the audit.
    pub repaired: usize,
    /// In-flight records the ledger has not settled yet.
    pub waiting: usize,
    /// Items skipped because an orchestration held their lock.
    pub skipped: usize,
    pub divergences: Vec<Divergence>,
}

impl ReconcileReport {
    /// Whether the pass changed nothing and found nothing to report.
    pub fn is_quiet(&self) -> bool {
        *self
            == Self {
                waiting: self.waiting,
                ..Self::default()
            }
    }

    /// Divergences as engine errors, for surfacing to an operator.
    pub fn consistency_errors(&self) -> Vec<EngineError> {
        self.divergences.iter().map(EngineError::from).collect()
    }
}

pub struct Reconciler {
    parts: Collaborators,
    locks: ItemLocks,
    repairs: Arc<RepairQueue>,
    metrics: Arc<EngineMetrics>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        parts: Collaborators,
        locks: ItemLocks,
        repairs: Arc<RepairQueue>,
        metrics: Arc<EngineMetrics>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            parts,
            locks,
            repairs,
            metrics,
            settings,
        }
    }

    /// Run passes every `interval` until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.settings.interval.as_secs(), "reconciler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if !report.is_quiet() => info!(?report, "reconciliation pass"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "reconciliation pass failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("reconciler stopping");
                    break;
                }
            }
        }
    }

    pub async fn run_once(&self) -> Result<ReconcileReport, EngineError> {
        self.pass().instrument(reconcile_span()).await
    }

    /// Audit one item now, waiting for its lock.
    pub async fn audit_item(&self, item: &ItemKey) -> Result<ReconcileReport, EngineError> {
        let mut report = ReconcileReport::default();
        let (_guard, _) = self.locks.acquire(item).await;
        self.audit(item, &mut report).await?;
        self.record_metrics(&report);
        Ok(report)
    }

    async fn pass(&self) -> Result<ReconcileReport, EngineError> {
        let mut report = ReconcileReport::default();
        let mut touched = BTreeSet::new();
        self.flush_deferred(&mut report, &mut touched).await;

        let cutoff = self.parts.clock.now().saturating_sub(self.settings.grace_period);
        let stuck = self.parts.store.stuck_records(cutoff).await?;
        debug!(count = stuck.len(), "stuck records");
        for record in stuck {
            let Some(_guard) = self.locks.try_acquire(&record.item) else {
                report.skipped += 1;
                continue;
            };
            touched.insert(record.item);
            let span = reconcile_record_span(&record.item, &record.commitment);
            let result = self
                .reconcile_record(&record.commitment, &mut report)
                .instrument(span)
                .await;
            if let Err(e) = result {
                warn!(
                    item = %record.item,
                    commitment = %record.commitment,
                    error = %e,
                    "could not reconcile record"
                );
                report.waiting += 1;
            }
        }

        touched.extend(self.repairs.take_audits());
        for item in touched {
            let Some(_guard) = self.locks.try_acquire(&item) else {
                self.repairs.mark_for_audit(item);
                report.skipped += 1;
                continue;
            };
            if let Err(e) = self.audit(&item, &mut report).await {
                warn!(item = %item, error = %e, "could not audit item");
                self.repairs.mark_for_audit(item);
            }
        }

        self.record_metrics(&report);
        Ok(report)
    }

    fn record_metrics(&self, report: &ReconcileReport) {
        let m = &self.metrics;
        m.reconcile_advanced.inc_by(report.advanced as u64);
        m.reconcile_finalized.inc_by(report.finalized as u64);
        m.reconcile_failed.inc_by(report.failed as u64);
        m.reconcile_repaired.inc_by((report.repaired + report.flushed) as u64);
        m.divergences.inc_by(report.divergences.len() as u64);
        for d in &report.divergences {
            warn!(
                item = %d.item,
                commitment = ?d.commitment,
                detail = %d.detail,
                "ledger and projection diverge"
            );
        }
    }

    async fn write(&self, batch: ProjectionBatch) {
        write_or_defer(&*self.parts.store, &self.repairs, &self.metrics, batch).await;
    }

    fn past_window(&self, record: &TransactionRecord, now: Timestamp) -> bool {
        record.created_at.elapsed_since(now) >= self.settings.grace_period + self.settings.retry_window
    }

    // ── Step 1: deferred writes ─────────────────────────────────────────

    async fn flush_deferred(&self, report: &mut ReconcileReport, touched: &mut BTreeSet<ItemKey>) {
        for batch in self.repairs.take_deferred() {
            let Some(item) = batch
                .custody
                .as_ref()
                .map(|c| c.item)
                .or_else(|| batch.records.first().map(|r| r.item))
            else {
                continue;
            };
            let Some(_guard) = self.locks.try_acquire(&item) else {
                self.repairs.defer(batch);
                report.skipped += 1;
                continue;
            };
            let fresh = match self.without_stale_parts(batch.clone()).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(item = %item, error = %e, "could not read projection for deferred write");
                    self.repairs.defer(batch);
                    continue;
                }
            };
            touched.insert(item);
            if fresh.is_empty() {
                continue;
            }
            match self.parts.store.apply_batch(fresh.clone()).await {
                Ok(()) => report.flushed += 1,
                Err(e) => {
                    warn!(item = %item, error = %e, "deferred write failed again");
                    self.repairs.defer(fresh);
                }
            }
        }
    }

    /// Drop the parts of a deferred batch that newer writes already overtook.
    async fn without_stale_parts(&self, batch: ProjectionBatch) -> Result<ProjectionBatch, EngineError> {
        let store = &self.parts.store;
        let mut fresh = ProjectionBatch::new();
        for record in batch.records {
            let keep = match store.get_record(&record.commitment).await? {
                None => true,
                Some(stored) if stored.status.precedes(record.status) => true,
                Some(stored) => {
                    stored.status == record.status
                        && stored.updated_at <= record.updated_at
                        && stored != record
                }
            };
            if keep {
                fresh = fresh.record(record);
            }
        }
        if let Some(entry) = batch.custody {
            let keep = match store.custody_of(&entry.item).await? {
                None => true,
                Some(stored) => stored.updated_at <= entry.updated_at && stored != entry,
            };
            if keep {
                fresh = fresh.custody(entry);
            }
        }
        Ok(fresh)
    }

    // ── Step 2: stuck records ───────────────────────────────────────────

    async fn receipt(
        &self,
        submission: &SubmissionRef,
    ) -> Result<Option<InclusionReceipt>, LedgerError> {
        let ledger = &*self.parts.ledger;
        self.settings.retry.run("receipt", || ledger.receipt(submission)).await
    }

    async fn reconcile_record(
        &self,
        commitment: &Commitment,
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let Some(mut record) = self.parts.store.get_record(commitment).await? else {
            return Ok(());
        };
        if !record.status.is_in_flight() {
            return Ok(());
        }
        let item = record.item;
        let now = self.parts.clock.now();

        let Some(inclusion) = self
            .receipt(&record.ledger_tx)
            .await
            .map_err(|e| ledger_error(e, &item))?
        else {
            if self.past_window(&record, now) {
                let failed = settle::fail(record, "no ledger entry within the retry window", now)?;
                info!(commitment = %failed.commitment, "record failed");
                self.write(ProjectionBatch::new().record(failed)).await;
                report.failed += 1;
            } else {
                report.waiting += 1;
            }
            return Ok(());
        };

        if record.status == TxStatus::Pending {
            record.transition(TxStatus::Confirmed, now)?;
            record.block = Some(inclusion.block);
            record.cost = Some(inclusion.cost);
            self.write(ProjectionBatch::new().record(record.clone())).await;
            info!(commitment = %record.commitment, block = %inclusion.block, "record confirmed");
            report.advanced += 1;
        }

        let (settling, cost) = match record.kind {
            TxKind::Register => (inclusion.clone(), inclusion.cost),
            TxKind::Transfer => {
                let completion = record
                    .completion_tx
                    .unwrap_or_else(|| completion_ref(&item, &record.ledger_tx));
                match self.receipt(&completion).await.map_err(|e| ledger_error(e, &item))? {
                    Some(done) => {
                        record.completion_tx = Some(completion);
                        let cost = record.cost.unwrap_or(inclusion.cost) + done.cost;
                        (done, cost)
                    }
                    None => {
                        self.complete_handoff(&mut record, report).await?;
                        return Ok(());
                    }
                }
            }
        };

        let ledger = &*self.parts.ledger;
        let head = self
            .settings
            .retry
            .run("block_height", || ledger.block_height())
            .await
            .map_err(|e| ledger_error(e, &item))?;
        let required = ledger.policy().required_confirmations;
        if settling.block.confirmations_at(head) < required {
            report.waiting += 1;
            return Ok(());
        }

        let history = self.parts.store.records_for_item(&item).await?;
        let custody = self.parts.store.custody_of(&item).await?;
        let batch = settle::finalize(record, settling.block, cost, &history, custody.as_ref(), now)?;
        self.write(batch).await;
        info!(commitment = %commitment, "record finalized by reconciliation");
        report.finalized += 1;
        Ok(())
    }

    /// (Re)submit the completion of a transfer whose handoff is on the ledger.
    ///
    /// Completion references are deterministic, so a completion the ledger
    /// already holds is acknowledged without being applied twice. Only a
    /// completion the ledger rejects is reported.
    async fn complete_handoff(
        &self,
        record: &mut TransactionRecord,
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let ledger = &*self.parts.ledger;
        let item = record.item;
        let handoff = record.ledger_tx;
        let receiver = record.receiver.clone();
        let submitted = self
            .settings
            .retry
            .run("complete_transfer", || ledger.submit_completion(&item, &receiver, &handoff))
            .await;
        match submitted {
            Ok(completion) => {
                if record.completion_tx != Some(completion) {
                    record.completion_tx = Some(completion);
                    self.write(ProjectionBatch::new().record(record.clone())).await;
                }
                debug!(%completion, "completion submitted by reconciliation");
                report.waiting += 1;
                Ok(())
            }
            Err(e) if e.is_revert() => {
                report.divergences.push(Divergence {
                    item,
                    commitment: Some(record.commitment),
                    detail: format!(
                        "handoff {handoff} is on the ledger but its completion was rejected: {e}"
                    ),
                });
                Ok(())
            }
            Err(e) => Err(ledger_error(e, &item)),
        }
    }

    // ── Step 3: custody audit ───────────────────────────────────────────

    /// Repair the item's chain and custody pointer. Caller holds the item lock.
    async fn audit(&self, item: &ItemKey, report: &mut ReconcileReport) -> Result<(), EngineError> {
        let store = &self.parts.store;
        let ledger = &*self.parts.ledger;
        let retry = &self.settings.retry;
        let mut chain = store.records_for_item(item).await?;
        let custody = store.custody_of(item).await?;
        if chain.is_empty() && custody.is_none() {
            return Ok(());
        }
        let now = self.parts.clock.now();
        let mut changed: BTreeSet<Commitment> = BTreeSet::new();

        // At most one active record: the latest finalized one.
        let active: Vec<usize> = chain
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == TxStatus::Finalized)
            .map(|(i, _)| i)
            .collect();
        let latest = active.last().map(|&i| chain[i].clone());
        if let Some((_, older)) = active.split_last() {
            for &i in older {
                chain[i].transition(TxStatus::Completed, now)?;
                changed.insert(chain[i].commitment);
            }
        }

        let mut entry = custody.clone();
        if let Some(latest) = &latest {
            let points_at_latest = custody
                .as_ref()
                .is_some_and(|c| c.owner == latest.receiver && c.record == latest.commitment);
            if !points_at_latest {
                let registrant = settle::registrant_of(&chain, custody.as_ref())
                    .unwrap_or_else(|| latest.shipper.clone());
                entry = Some(CustodyEntry {
                    item: *item,
                    owner: latest.receiver.clone(),
                    registrant,
                    record: latest.commitment,
                    recalled: custody.as_ref().is_some_and(|c| c.recalled),
                    updated_at: now,
                });
            }
        }

        let recalled = retry
            .run("is_recalled", || ledger.is_recalled(item))
            .await
            .map_err(|e| ledger_error(e, item))?;
        if let Some(e) = entry.as_mut() {
            if e.recalled != recalled {
                e.recalled = recalled;
                e.updated_at = now;
            }
        }
        if recalled {
            for r in chain.iter_mut().filter(|r| r.status == TxStatus::Completed) {
                r.transition(TxStatus::Revoked, now)?;
                changed.insert(r.commitment);
            }
        }

        if let Some(e) = &entry {
            if !chain.iter().any(|r| r.status.is_in_flight()) {
                let owner = retry
                    .run("current_owner_of", || ledger.current_owner_of(item))
                    .await
                    .map_err(|e| ledger_error(e, item))?;
                if owner.as_ref() != Some(&e.owner) {
                    report.divergences.push(Divergence {
                        item: *item,
                        commitment: Some(e.record),
                        detail: format!(
                            "ledger owner is {}, projection says {}",
                            owner.map_or_else(|| "nobody".to_string(), |o| o.to_string()),
                            e.owner
                        ),
                    });
                }
            }
        }

        let custody_changed = entry != custody;
        let mut batch = ProjectionBatch::new();
        batch.records = chain
            .into_iter()
            .filter(|r| changed.contains(&r.commitment))
            .collect();
        if custody_changed {
            batch.custody = entry;
        }
        if batch.is_empty() {
            return Ok(());
        }
        report.repaired += batch.records.len() + usize::from(custody_changed);
        info!(
            item = %item,
            records = batch.records.len(),
            custody = custody_changed,
            "projection repaired"
        );
        self.write(batch).await;
        Ok(())
    }
}
