//! Nullable ledger: an in-memory custody contract with controllable mining.
//!
//! Contract rules are checked and applied when an operation is submitted;
//! blocks only decide when a submission becomes visible through `receipt`.
//! Every pending submission is included in the next mined block.

use async_trait::async_trait;
use pharmachain_ledger::submission::{completion_ref, recall_ref, register_ref, transfer_ref};
use pharmachain_ledger::{InclusionReceipt, LedgerAdapter, LedgerError};
use pharmachain_types::{
    Address, BlockRef, Commitment, ItemKey, NetworkId, NetworkPolicy, SubmissionRef,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const REGISTER_GAS: u64 = 120_000;
const TRANSFER_GAS: u64 = 95_000;
const COMPLETE_GAS: u64 = 60_000;
const RECALL_GAS: u64 = 45_000;

/// When new blocks appear.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MiningMode {
    /// Only on [`NullLedger::mine`] (or a spawned miner).
    Manual,
    /// One block before answering every `receipt` or `block_height` query.
    OnQuery,
}

#[derive(Clone, Debug)]
struct Handoff {
    submission: SubmissionRef,
    receiver: Address,
}

#[derive(Clone, Debug)]
struct ItemState {
    owner: Address,
    registrant: Address,
    recalled: bool,
    handoff: Option<Handoff>,
}

struct Inner {
    height: u64,
    items: HashMap<ItemKey, ItemState>,
    accepted: HashSet<SubmissionRef>,
    mempool: Vec<(SubmissionRef, u64)>,
    included: HashMap<SubmissionRef, InclusionReceipt>,
    manufacturers: Option<HashSet<Address>>,
    connected: bool,
    fail_transient: u32,
    lose_responses: u32,
    drop_submissions: u32,
    external_transfer: Option<(ItemKey, Address)>,
    submissions: u32,
    owner_queries: u32,
}

impl Inner {
    fn mine_one(&mut self) {
        self.height += 1;
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&self.height.to_be_bytes());
        let block = BlockRef::new(self.height, pharmachain_crypto::blake2b_256(&hash));
        for (submission, cost) in self.mempool.drain(..) {
            self.included.insert(
                submission,
                InclusionReceipt {
                    submission,
                    block,
                    cost,
                },
            );
        }
    }

    fn item(&self, item: &ItemKey) -> Result<&ItemState, LedgerError> {
        self.items.get(item).ok_or(LedgerError::NotRegistered)
    }
}

/// A deterministic in-memory ledger with fault injection.
pub struct NullLedger {
    network: NetworkId,
    policy: NetworkPolicy,
    mode: MiningMode,
    inner: Mutex<Inner>,
}

impl NullLedger {
    pub fn new(network: NetworkId, mode: MiningMode) -> Self {
        Self::with_policy(network, network.default_policy(), mode)
    }

    pub fn with_policy(network: NetworkId, policy: NetworkPolicy, mode: MiningMode) -> Self {
        Self {
            network,
            policy,
            mode,
            inner: Mutex::new(Inner {
                height: 0,
                items: HashMap::new(),
                accepted: HashSet::new(),
                mempool: Vec::new(),
                included: HashMap::new(),
                manufacturers: None,
                connected: true,
                fail_transient: 0,
                lose_responses: 0,
                drop_submissions: 0,
                external_transfer: None,
                submissions: 0,
                owner_queries: 0,
            }),
        }
    }

    /// Mine `n` blocks.
    pub fn mine(&self, n: u64) {
        let mut inner = self.inner.lock().unwrap();
        for _ in 0..n {
            inner.mine_one();
        }
    }

    /// Mine one block every `interval` until the handle is aborted.
    pub fn spawn_miner(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                ledger.mine(1);
            }
        })
    }

    pub fn height(&self) -> u64 {
        self.inner.lock().unwrap().height
    }

    /// Restrict registration to these addresses. Unrestricted by default.
    pub fn authorize_manufacturer(&self, address: &Address) {
        self.inner
            .lock()
            .unwrap()
            .manufacturers
            .get_or_insert_with(HashSet::new)
            .insert(address.clone());
    }

    /// The next `n` calls of any kind fail with a transport error before
    /// reaching the contract.
    pub fn fail_next_calls(&self, n: u32) {
        self.inner.lock().unwrap().fail_transient = n;
    }

    /// The next `n` submissions are applied, but the caller sees a transport
    /// error instead of the reference.
    pub fn lose_next_responses(&self, n: u32) {
        self.inner.lock().unwrap().lose_responses = n;
    }

    /// The next `n` submissions are acknowledged but silently discarded: no
    /// state change and never included.
    pub fn drop_next_submissions(&self, n: u32) {
        self.inner.lock().unwrap().drop_submissions = n;
    }

    /// Right after the next `current_owner_of` answer, another writer moves
    /// `item` to `new_owner`.
    pub fn transfer_after_next_owner_query(&self, item: ItemKey, new_owner: Address) {
        self.inner.lock().unwrap().external_transfer = Some((item, new_owner));
    }

    /// Set ledger state directly, as another writer would.
    pub fn force_owner(&self, item: &ItemKey, owner: &Address) {
        if let Some(state) = self.inner.lock().unwrap().items.get_mut(item) {
            state.owner = owner.clone();
            state.handoff = None;
        }
    }

    pub fn force_recall(&self, item: &ItemKey) {
        if let Some(state) = self.inner.lock().unwrap().items.get_mut(item) {
            state.recalled = true;
        }
    }

    pub fn owner(&self, item: &ItemKey) -> Option<Address> {
        self.inner
            .lock()
            .unwrap()
            .items
            .get(item)
            .map(|s| s.owner.clone())
    }

    /// Submissions that reached the contract (including idempotent repeats).
    pub fn submission_count(&self) -> u32 {
        self.inner.lock().unwrap().submissions
    }

    pub fn owner_query_count(&self) -> u32 {
        self.inner.lock().unwrap().owner_queries
    }

    fn transport_fault(inner: &mut Inner) -> Result<(), LedgerError> {
        if !inner.connected {
            return Err(LedgerError::Transport("ledger adapter is not connected".into()));
        }
        if inner.fail_transient > 0 {
            inner.fail_transient -= 1;
            return Err(LedgerError::Transport("injected transport failure".into()));
        }
        Ok(())
    }

    /// Common submission path: fault injection, idempotency, then `apply`.
    fn submit(
        &self,
        submission: SubmissionRef,
        cost: u64,
        apply: impl FnOnce(&mut Inner) -> Result<(), LedgerError>,
    ) -> Result<SubmissionRef, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        Self::transport_fault(&mut inner)?;
        inner.submissions += 1;
        if inner.accepted.contains(&submission) {
            return Ok(submission);
        }
        if inner.drop_submissions > 0 {
            inner.drop_submissions -= 1;
            return Ok(submission);
        }
        apply(&mut inner)?;
        inner.accepted.insert(submission);
        inner.mempool.push((submission, cost));
        if inner.lose_responses > 0 {
            inner.lose_responses -= 1;
            return Err(LedgerError::Transport("response lost".into()));
        }
        Ok(submission)
    }

    fn query(&self) -> Result<std::sync::MutexGuard<'_, Inner>, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        Self::transport_fault(&mut inner)?;
        Ok(inner)
    }
}

#[async_trait]
impl LedgerAdapter for NullLedger {
    async fn connect(&self) -> Result<(), LedgerError> {
        self.inner.lock().unwrap().connected = true;
        Ok(())
    }

    async fn close(&self) -> Result<(), LedgerError> {
        self.inner.lock().unwrap().connected = false;
        Ok(())
    }

    fn network(&self) -> NetworkId {
        self.network
    }

    fn policy(&self) -> NetworkPolicy {
        self.policy.clone()
    }

    async fn submit_register(
        &self,
        item: &ItemKey,
        owner: &Address,
        commitment: &Commitment,
    ) -> Result<SubmissionRef, LedgerError> {
        self.submit(register_ref(item, commitment), REGISTER_GAS, |inner| {
            if let Some(allowed) = &inner.manufacturers {
                if !allowed.contains(owner) {
                    return Err(LedgerError::Unauthorized);
                }
            }
            if inner.items.contains_key(item) {
                return Err(LedgerError::DuplicateItem);
            }
            inner.items.insert(
                *item,
                ItemState {
                    owner: owner.clone(),
                    registrant: owner.clone(),
                    recalled: false,
                    handoff: None,
                },
            );
            Ok(())
        })
    }

    async fn submit_transfer(
        &self,
        item: &ItemKey,
        shipper: &Address,
        new_owner: &Address,
        commitment: &Commitment,
    ) -> Result<SubmissionRef, LedgerError> {
        let submission = transfer_ref(item, commitment);
        self.submit(submission, TRANSFER_GAS, |inner| {
            let state = inner.items.get_mut(item).ok_or(LedgerError::NotRegistered)?;
            if state.recalled {
                return Err(LedgerError::Recalled);
            }
            if &state.owner != shipper {
                return Err(LedgerError::NotCurrentOwner);
            }
            state.handoff = Some(Handoff {
                submission,
                receiver: new_owner.clone(),
            });
            Ok(())
        })
    }

    async fn submit_completion(
        &self,
        item: &ItemKey,
        receiver: &Address,
        handoff: &SubmissionRef,
    ) -> Result<SubmissionRef, LedgerError> {
        self.submit(completion_ref(item, handoff), COMPLETE_GAS, |inner| {
            let state = inner.items.get_mut(item).ok_or(LedgerError::NotRegistered)?;
            if state.recalled {
                return Err(LedgerError::Recalled);
            }
            let open = state
                .handoff
                .as_ref()
                .filter(|h| &h.submission == handoff)
                .ok_or(LedgerError::NoOpenHandoff)?;
            if &open.receiver != receiver {
                return Err(LedgerError::Unauthorized);
            }
            state.owner = receiver.clone();
            state.handoff = None;
            Ok(())
        })
    }

    async fn submit_recall(
        &self,
        item: &ItemKey,
        by: &Address,
    ) -> Result<SubmissionRef, LedgerError> {
        self.submit(recall_ref(item, by), RECALL_GAS, |inner| {
            let state = inner.items.get_mut(item).ok_or(LedgerError::NotRegistered)?;
            if &state.registrant != by {
                return Err(LedgerError::Unauthorized);
            }
            if state.recalled {
                return Err(LedgerError::Recalled);
            }
            state.recalled = true;
            state.handoff = None;
            Ok(())
        })
    }

    async fn receipt(
        &self,
        submission: &SubmissionRef,
    ) -> Result<Option<InclusionReceipt>, LedgerError> {
        let mut inner = self.query()?;
        if self.mode == MiningMode::OnQuery {
            inner.mine_one();
        }
        Ok(inner.included.get(submission).cloned())
    }

    async fn block_height(&self) -> Result<u64, LedgerError> {
        let mut inner = self.query()?;
        if self.mode == MiningMode::OnQuery {
            inner.mine_one();
        }
        Ok(inner.height)
    }

    async fn current_owner_of(&self, item: &ItemKey) -> Result<Option<Address>, LedgerError> {
        let mut inner = self.query()?;
        inner.owner_queries += 1;
        let owner = inner.items.get(item).map(|s| s.owner.clone());
        if inner.external_transfer.as_ref().is_some_and(|(i, _)| i == item) {
            if let Some((_, to)) = inner.external_transfer.take() {
                if let Some(state) = inner.items.get_mut(item) {
                    state.owner = to;
                    state.handoff = None;
                }
            }
        }
        Ok(owner)
    }

    async fn is_registered(&self, item: &ItemKey) -> Result<bool, LedgerError> {
        Ok(self.query()?.items.contains_key(item))
    }

    async fn is_recalled(&self, item: &ItemKey) -> Result<bool, LedgerError> {
        Ok(self.query()?.item(item).map(|s| s.recalled).unwrap_or(false))
    }
}
