//! Orchestration of the register, transfer and recall protocols.
//!
//! Every operation follows the same shape: validate and authenticate with no
//! side effects, take the item lock, re-check state against the ledger,
//! submit, persist a `PENDING` record, then wait for inclusion and finality
//! and settle the projection in one batch. A wait that ends early returns
//! [`Outcome::Pending`]; the record stays in flight for the reconciler.

use pharmachain_crypto::serial_hash;
use pharmachain_ledger::{
    await_finality, await_inclusion, InclusionReceipt, LedgerAdapter, LedgerError, RetryPolicy,
    WaitOptions,
};
use pharmachain_store::{PartyDirectory, ProductCatalog, ProjectionBatch, ProjectionStore};
use pharmachain_types::{
    Address, Clock, Commitment, CustodyEntry, ItemKey, Party, PrivateKey, Role, SubmissionRef,
    Timestamp, TransactionRecord, TxKind, TxStatus,
};
use prometheus::IntGauge;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::envelope::{self, SealedPayload};
use crate::identity::{IdentityProof, ProofAction};
use crate::item_lock::ItemLocks;
use crate::repair::{write_or_defer, RepairQueue};
use crate::settle;
use crate::tracing_spans::{recall_span, register_span, transfer_span};
use crate::{EngineConfig, EngineError, EngineMetrics};

const MAX_ID_LEN: usize = 128;

/// The external systems the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn LedgerAdapter>,
    pub store: Arc<dyn ProjectionStore>,
    pub parties: Arc<dyn PartyDirectory>,
    pub products: Arc<dyn ProductCatalog>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone, Debug)]
pub struct CoordinatorSettings {
    pub retry: RetryPolicy,
    /// Applied when a request brings no timeout of its own.
    pub wait_timeout: Option<Duration>,
    pub max_payload_bytes: usize,
    pub proof_max_age: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            wait_timeout: config.wait_timeout(),
            max_payload_bytes: config.max_payload_bytes,
            proof_max_age: config.proof_max_age(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegisterRequest {
    pub product_id: String,
    pub serial_number: String,
    /// Opaque shipment detail, sealed before it leaves the engine.
    pub payload: Vec<u8>,
    /// The manufacturer's `register` proof.
    pub proof: IdentityProof,
    pub wait: WaitOptions,
}

#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub item: ItemKey,
    pub to: Address,
    pub payload: Vec<u8>,
    /// The current owner's `transfer` proof naming `to`.
    pub sender_proof: IdentityProof,
    /// The receiver's `accept` proof naming the sender.
    pub acceptance: IdentityProof,
    pub wait: WaitOptions,
}

#[derive(Clone, Debug)]
pub struct RecallRequest {
    pub item: ItemKey,
    /// The registrant's `recall` proof.
    pub proof: IdentityProof,
    pub wait: WaitOptions,
}

/// Result of a register or transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Finalized(TransactionRecord),
    /// Submitted, but finality was not observed before the wait ended.
    /// The operation may still complete; poll [`TransactionCoordinator::record`].
    Pending(TransactionRecord),
}

impl Outcome {
    pub fn record(&self) -> &TransactionRecord {
        match self {
            Self::Finalized(r) | Self::Pending(r) => r,
        }
    }

    pub fn into_record(self) -> TransactionRecord {
        match self {
            Self::Finalized(r) | Self::Pending(r) => r,
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized(_))
    }
}

struct InFlight<'a>(&'a IntGauge);

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Whether a wait ended without a verdict from the ledger.
fn gave_up(e: &LedgerError) -> bool {
    matches!(
        e,
        LedgerError::Timeout { .. } | LedgerError::Cancelled(_) | LedgerError::Transport(_)
    )
}

/// Translate a ledger failure on `item` into the engine taxonomy.
pub(crate) fn ledger_error(e: LedgerError, item: &ItemKey) -> EngineError {
    match e {
        LedgerError::Transport(m) => EngineError::ChainSubmission(m),
        LedgerError::DuplicateItem => EngineError::DuplicateItem(*item),
        LedgerError::Recalled => EngineError::RecalledItem(*item),
        LedgerError::Unauthorized => EngineError::Authorization(e.to_string()),
        LedgerError::NotRegistered => {
            EngineError::NotFound(format!("item {item} is not registered on the ledger"))
        }
        LedgerError::Timeout { submission, waited } => {
            EngineError::FinalityTimeout { submission, waited }
        }
        LedgerError::Cancelled(submission) => EngineError::FinalityTimeout {
            submission,
            waited: Duration::ZERO,
        },
        LedgerError::ChainMismatch { .. } | LedgerError::Malformed(_) => {
            EngineError::ChainSubmission(e.to_string())
        }
        LedgerError::NotCurrentOwner | LedgerError::NoOpenHandoff | LedgerError::Revert(_) => {
            EngineError::ChainRevert(e.to_string())
        }
    }
}

/// `opts` with its timeout reduced by the time spent since `since`.
fn remaining(opts: &WaitOptions, since: Instant) -> WaitOptions {
    WaitOptions {
        timeout: opts.timeout.map(|t| t.saturating_sub(since.elapsed())),
        cancel: opts.cancel.clone(),
    }
}

fn check_id(what: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{what} is empty")));
    }
    if value.len() > MAX_ID_LEN || value.chars().any(char::is_control) {
        return Err(EngineError::Validation(format!(
            "{what} must be at most {MAX_ID_LEN} printable characters"
        )));
    }
    Ok(())
}

pub struct TransactionCoordinator {
    parts: Collaborators,
    locks: ItemLocks,
    repairs: Arc<RepairQueue>,
    metrics: Arc<EngineMetrics>,
    settings: CoordinatorSettings,
}

impl TransactionCoordinator {
    pub fn new(
        parts: Collaborators,
        locks: ItemLocks,
        repairs: Arc<RepairQueue>,
        metrics: Arc<EngineMetrics>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            parts,
            locks,
            repairs,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    // ── Register ────────────────────────────────────────────────────────

    /// Register a new item for the manufacturer named in `req.proof`.
    pub async fn register(&self, req: RegisterRequest) -> Result<Outcome, EngineError> {
        check_id("product id", &req.product_id)?;
        check_id("serial number", &req.serial_number)?;
        self.check_payload(&req.payload)?;
        let item = serial_hash(&req.product_id, &req.serial_number);
        let span = register_span(&item, &req.proof.address);
        self.observe(self.register_item(item, req)).instrument(span).await
    }

    async fn register_item(
        &self,
        item: ItemKey,
        req: RegisterRequest,
    ) -> Result<Outcome, EngineError> {
        let manufacturer = self.authenticate(&req.proof, ProofAction::Register, &item, None).await?;
        if manufacturer.role != Role::Manufacturer {
            return Err(EngineError::Authorization(format!(
                "{} is a {:?}, not a manufacturer",
                manufacturer.address, manufacturer.role
            )));
        }
        let product = self
            .parts
            .products
            .product(&req.product_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("product {}", req.product_id)))?;
        if !product.active || product.manufacturer != manufacturer.address {
            return Err(EngineError::Authorization(format!(
                "{} is not authorized to register product {}",
                manufacturer.address, product.product_id
            )));
        }

        let (_guard, _) = self.locks.acquire(&item).await;
        if self.parts.store.item_known(&item).await? {
            return Err(EngineError::DuplicateItem(item));
        }

        let sealed = envelope::seal(&req.payload, &manufacturer, &manufacturer, self.now())?;
        let started = Instant::now();
        let submission = self
            .settings
            .retry
            .run("register", || {
                self.parts
                    .ledger
                    .submit_register(&item, &manufacturer.address, &sealed.commitment)
            })
            .await
            .map_err(|e| ledger_error(e, &item))?;

        let record = self.new_record(
            item,
            TxKind::Register,
            &manufacturer,
            &manufacturer,
            sealed,
            submission,
        );
        info!(commitment = %record.commitment, %submission, "registration submitted");
        self.persist(ProjectionBatch::new().record(record.clone())).await;

        let wait = self.wait_options(&req.wait);
        let outcome = self.settle(record, submission, &wait, started).await?;
        if outcome.is_finalized() {
            self.metrics.registrations.inc();
        }
        Ok(outcome)
    }

    // ── Transfer ────────────────────────────────────────────────────────

    /// Hand an item from the owner named in `req.sender_proof` to `req.to`.
    ///
    /// The ledger handoff is opened, then completed on the receiver's behalf
    /// with its acceptance; custody moves when the completion is final.
    pub async fn transfer(&self, req: TransferRequest) -> Result<Outcome, EngineError> {
        self.check_payload(&req.payload)?;
        if req.sender_proof.address == req.to {
            return Err(EngineError::Validation(
                "sender and receiver are the same party".into(),
            ));
        }
        let span = transfer_span(&req.item, &req.sender_proof.address, &req.to);
        self.observe(self.transfer_item(req)).instrument(span).await
    }

    async fn transfer_item(&self, req: TransferRequest) -> Result<Outcome, EngineError> {
        let item = req.item;
        let from = req.sender_proof.address.clone();
        let shipper = self
            .authenticate(&req.sender_proof, ProofAction::Transfer, &item, Some(&req.to))
            .await?;
        let receiver = match self.parts.parties.party(&req.to).await? {
            Some(p) if p.active => p,
            _ => return Err(EngineError::UnknownRecipient(req.to)),
        };
        if req.acceptance.address != receiver.address {
            return Err(EngineError::Authorization(format!(
                "acceptance is signed by {}, not the receiver {}",
                req.acceptance.address, receiver.address
            )));
        }
        req.acceptance.verify(
            &receiver,
            ProofAction::Accept,
            &item,
            Some(&from),
            self.now(),
            self.settings.proof_max_age,
        )?;

        let (_guard, contended) = self.locks.acquire(&item).await;
        let custody = self
            .parts
            .store
            .custody_of(&item)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("item {item}")))?;
        if custody.recalled {
            return Err(EngineError::RecalledItem(item));
        }
        let history = self.parts.store.records_for_item(&item).await?;
        if let Some(busy) = history.iter().find(|r| r.status.is_in_flight()) {
            return Err(EngineError::OwnershipConflict {
                item,
                detail: format!("record {} is still {:?}", busy.commitment, busy.status),
            });
        }

        let ledger_owner = self
            .settings
            .retry
            .run("current_owner_of", || self.parts.ledger.current_owner_of(&item))
            .await
            .map_err(|e| ledger_error(e, &item))?
            .ok_or_else(|| {
                EngineError::NotFound(format!("item {item} is not registered on the ledger"))
            })?;
        if ledger_owner != from {
            return Err(if contended {
                EngineError::OwnershipConflict {
                    item,
                    detail: format!("owner changed to {ledger_owner} while waiting"),
                }
            } else {
                EngineError::NotCurrentOwner {
                    item,
                    claimed: from,
                }
            });
        }
        if custody.owner != ledger_owner {
            warn!(
                projected = %custody.owner,
                ledger = %ledger_owner,
                "custody pointer disagrees with the ledger"
            );
            self.repairs.mark_for_audit(item);
        }

        let sealed = envelope::seal(&req.payload, &shipper, &receiver, self.now())?;
        let started = Instant::now();
        let handoff = self
            .settings
            .retry
            .run("transfer", || {
                self.parts
                    .ledger
                    .submit_transfer(&item, &from, &receiver.address, &sealed.commitment)
            })
            .await
            .map_err(|e| match e {
                LedgerError::NotCurrentOwner => EngineError::OwnershipConflict {
                    item,
                    detail: "ledger owner changed before submission".into(),
                },
                other => ledger_error(other, &item),
            })?;

        let mut record =
            self.new_record(item, TxKind::Transfer, &shipper, &receiver, sealed, handoff);
        info!(commitment = %record.commitment, %handoff, "handoff submitted");
        self.persist(ProjectionBatch::new().record(record.clone())).await;

        let wait = self.wait_options(&req.wait);
        let opts = remaining(&wait, started);
        let ledger = &*self.parts.ledger;
        let inclusion = match await_inclusion(ledger, &handoff, &self.settings.retry, &opts).await {
            Ok(r) => r,
            Err(e) if gave_up(&e) => return Ok(self.pending(record, e)),
            Err(e) => return Err(ledger_error(e, &item)),
        };
        self.confirm(&mut record, &inclusion)?;

        let completion = match self
            .settings
            .retry
            .run("complete_transfer", || {
                self.parts
                    .ledger
                    .submit_completion(&item, &receiver.address, &handoff)
            })
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_revert() => {
                let failed = settle::fail(record, e.to_string(), self.now())?;
                self.persist(ProjectionBatch::new().record(failed)).await;
                return Err(ledger_error(e, &item));
            }
            Err(e) => {
                self.persist(ProjectionBatch::new().record(record)).await;
                return Err(ledger_error(e, &item));
            }
        };
        record.completion_tx = Some(completion);
        debug!(%completion, "completion submitted");
        self.persist(ProjectionBatch::new().record(record.clone())).await;

        let outcome = self.settle(record, completion, &wait, started).await?;
        if outcome.is_finalized() {
            self.metrics.transfers.inc();
        }
        Ok(outcome)
    }

    // ── Recall ──────────────────────────────────────────────────────────

    /// Flag an item recalled. Only its registrant may do this; the wait is
    /// not optional, a timeout surfaces as [`EngineError::FinalityTimeout`].
    pub async fn recall(&self, req: RecallRequest) -> Result<CustodyEntry, EngineError> {
        let span = recall_span(&req.item, &req.proof.address);
        self.observe(self.recall_item(req)).instrument(span).await
    }

    async fn recall_item(&self, req: RecallRequest) -> Result<CustodyEntry, EngineError> {
        let item = req.item;
        let party = self.authenticate(&req.proof, ProofAction::Recall, &item, None).await?;

        let (_guard, _) = self.locks.acquire(&item).await;
        let mut custody = self
            .parts
            .store
            .custody_of(&item)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("item {item}")))?;
        if custody.recalled {
            return Err(EngineError::RecalledItem(item));
        }
        if custody.registrant != party.address {
            return Err(EngineError::Authorization(format!(
                "only the registrant {} may recall {item}",
                custody.registrant
            )));
        }

        let started = Instant::now();
        let submission = self
            .settings
            .retry
            .run("recall", || self.parts.ledger.submit_recall(&item, &party.address))
            .await
            .map_err(|e| ledger_error(e, &item))?;
        info!(%submission, "recall submitted");

        let wait = self.wait_options(&req.wait);
        let abandon = |e: LedgerError| {
            self.repairs.mark_for_audit(item);
            match e {
                LedgerError::Cancelled(submission) => EngineError::FinalityTimeout {
                    submission,
                    waited: started.elapsed(),
                },
                other => ledger_error(other, &item),
            }
        };
        let inclusion = await_inclusion(
            &*self.parts.ledger,
            &submission,
            &self.settings.retry,
            &remaining(&wait, started),
        )
        .await
        .map_err(abandon)?;
        let required = self.parts.ledger.policy().required_confirmations;
        await_finality(
            &*self.parts.ledger,
            &inclusion,
            required,
            &self.settings.retry,
            &remaining(&wait, started),
        )
        .await
        .map_err(abandon)?;

        let now = self.now();
        let history = self.parts.store.records_for_item(&item).await?;
        custody.recalled = true;
        custody.updated_at = now;
        let mut batch = ProjectionBatch::new().custody(custody.clone());
        batch.records = settle::revoke_history(&history, now);
        self.persist(batch).await;
        self.metrics.recalls.inc();
        info!("item recalled");
        Ok(custody)
    }

    // ── Read path ───────────────────────────────────────────────────────

    /// Every record of an item, oldest first, in any status.
    pub async fn history(&self, item: &ItemKey) -> Result<Vec<TransactionRecord>, EngineError> {
        Ok(self.parts.store.records_for_item(item).await?)
    }

    pub async fn records_for_party(
        &self,
        address: &Address,
    ) -> Result<Vec<TransactionRecord>, EngineError> {
        Ok(self.parts.store.records_for_party(address).await?)
    }

    pub async fn custody_of(&self, item: &ItemKey) -> Result<Option<CustodyEntry>, EngineError> {
        Ok(self.parts.store.custody_of(item).await?)
    }

    pub async fn record(&self, commitment: &Commitment) -> Result<TransactionRecord, EngineError> {
        self.parts
            .store
            .get_record(commitment)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("record {commitment}")))
    }

    /// Recompute a record's commitment from its stored fields.
    pub fn verify_record(&self, record: &TransactionRecord) -> bool {
        envelope::verify(record)
    }

    /// Decrypt a record's payload for whichever party owns `private_key`.
    pub async fn open_record(
        &self,
        commitment: &Commitment,
        private_key: &PrivateKey,
    ) -> Result<Vec<u8>, EngineError> {
        let record = self.record(commitment).await?;
        envelope::open(&record, private_key)
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn now(&self) -> Timestamp {
        self.parts.clock.now()
    }

    async fn observe<T>(
        &self,
        op: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        let _in_flight = InFlight::enter(&self.metrics.in_flight);
        let result = op.await;
        if let Err(e) = &result {
            self.metrics.failures.inc();
            warn!(error = %e, "operation failed");
        }
        result
    }

    fn check_payload(&self, payload: &[u8]) -> Result<(), EngineError> {
        if payload.len() > self.settings.max_payload_bytes {
            return Err(EngineError::Validation(format!(
                "payload is {} bytes, limit is {}",
                payload.len(),
                self.settings.max_payload_bytes
            )));
        }
        Ok(())
    }

    fn wait_options(&self, requested: &WaitOptions) -> WaitOptions {
        WaitOptions {
            timeout: requested.timeout.or(self.settings.wait_timeout),
            cancel: requested.cancel.clone(),
        }
    }

    /// Look up the signer of `proof` and check it for this action.
    async fn authenticate(
        &self,
        proof: &IdentityProof,
        action: ProofAction,
        item: &ItemKey,
        counterpart: Option<&Address>,
    ) -> Result<Party, EngineError> {
        let party = self
            .parts
            .parties
            .party(&proof.address)
            .await?
            .ok_or_else(|| {
                EngineError::Authorization(format!("{} is not a registered party", proof.address))
            })?;
        proof.verify(
            &party,
            action,
            item,
            counterpart,
            self.now(),
            self.settings.proof_max_age,
        )?;
        Ok(party)
    }

    fn new_record(
        &self,
        item: ItemKey,
        kind: TxKind,
        shipper: &Party,
        receiver: &Party,
        sealed: SealedPayload,
        ledger_tx: SubmissionRef,
    ) -> TransactionRecord {
        TransactionRecord {
            item,
            kind,
            shipper: shipper.address.clone(),
            receiver: receiver.address.clone(),
            ciphertext: sealed.ciphertext,
            wrapped_key_shipper: sealed.wrapped_key_shipper,
            wrapped_key_receiver: sealed.wrapped_key_receiver,
            commitment: sealed.commitment,
            ledger_tx,
            completion_tx: None,
            block: None,
            cost: None,
            status: TxStatus::Pending,
            network: self.parts.ledger.network(),
            created_at: sealed.sealed_at,
            updated_at: sealed.sealed_at,
            failure: None,
        }
    }

    async fn persist(&self, batch: ProjectionBatch) {
        write_or_defer(&*self.parts.store, &self.repairs, &self.metrics, batch).await;
    }

    fn pending(&self, record: TransactionRecord, why: impl fmt::Display) -> Outcome {
        self.metrics.pending_outcomes.inc();
        info!(
            commitment = %record.commitment,
            status = ?record.status,
            reason = %why,
            "finality not observed, leaving record for reconciliation"
        );
        Outcome::Pending(record)
    }

    /// Move a freshly included record to `CONFIRMED`.
    fn confirm(
        &self,
        record: &mut TransactionRecord,
        inclusion: &InclusionReceipt,
    ) -> Result<(), EngineError> {
        record.transition(TxStatus::Confirmed, self.now())?;
        record.block = Some(inclusion.block);
        record.cost = Some(inclusion.cost);
        info!(commitment = %record.commitment, block = %inclusion.block, "record confirmed");
        Ok(())
    }

    /// Wait for `watch` to be included and final, then settle `record`.
    ///
    /// `watch` is the record's own submission for registers and the
    /// completion for transfers.
    async fn settle(
        &self,
        mut record: TransactionRecord,
        watch: SubmissionRef,
        wait: &WaitOptions,
        started: Instant,
    ) -> Result<Outcome, EngineError> {
        let ledger = &*self.parts.ledger;
        let retry = &self.settings.retry;
        let inclusion = match await_inclusion(ledger, &watch, retry, &remaining(wait, started)).await {
            Ok(r) => r,
            Err(e) if gave_up(&e) => return Ok(self.pending(record, e)),
            Err(e) => return Err(ledger_error(e, &record.item)),
        };
        let mut cost = inclusion.cost;
        if record.status == TxStatus::Pending {
            self.confirm(&mut record, &inclusion)?;
            self.persist(ProjectionBatch::new().record(record.clone())).await;
        } else {
            cost += record.cost.unwrap_or(0);
        }

        let required = ledger.policy().required_confirmations;
        let receipt =
            match await_finality(ledger, &inclusion, required, retry, &remaining(wait, started)).await {
                Ok(r) => r,
                Err(e) if gave_up(&e) => return Ok(self.pending(record, e)),
                Err(e) => return Err(ledger_error(e, &record.item)),
            };

        let (history, custody) = match self.current_chain(&record.item).await {
            Ok(chain) => chain,
            Err(e) => {
                warn!(error = %e, "could not read the item's chain to settle it");
                return Ok(self.pending(record, e));
            }
        };
        let batch = settle::finalize(
            record,
            inclusion.block,
            cost,
            &history,
            custody.as_ref(),
            self.now(),
        )?;
        let finalized = batch
            .records
            .last()
            .cloned()
            .ok_or_else(|| EngineError::Consistency("settlement produced no record".into()))?;
        self.persist(batch).await;
        self.metrics
            .finality_latency_ms
            .observe(started.elapsed().as_millis() as f64);
        info!(
            commitment = %finalized.commitment,
            confirmations = receipt.confirmations,
            owner = %finalized.receiver,
            "record finalized"
        );
        Ok(Outcome::Finalized(finalized))
    }

    async fn current_chain(
        &self,
        item: &ItemKey,
    ) -> Result<(Vec<TransactionRecord>, Option<CustodyEntry>), EngineError> {
        let history = self.parts.store.records_for_item(item).await?;
        let custody = self.parts.store.custody_of(item).await?;
        Ok((history, custody))
    }
}
