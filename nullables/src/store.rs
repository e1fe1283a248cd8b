//! In-memory projection store with write-fault injection.

use async_trait::async_trait;
use pharmachain_store::{ProjectionBatch, ProjectionStore, StoreError};
use pharmachain_types::{
    Address, Commitment, CustodyEntry, ItemKey, Timestamp, TransactionRecord, TxStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    records: HashMap<Commitment, TransactionRecord>,
    /// Insertion order, used to break `created_at` ties.
    order: Vec<Commitment>,
    custody: HashMap<ItemKey, CustodyEntry>,
}

impl Inner {
    fn ordered<'a>(
        &'a self,
        keep: impl Fn(&TransactionRecord) -> bool + 'a,
    ) -> Vec<TransactionRecord> {
        let mut out: Vec<(usize, TransactionRecord)> = self
            .order
            .iter()
            .enumerate()
            .filter_map(|(i, c)| self.records.get(c).map(|r| (i, r)))
            .filter(|(_, r)| keep(r))
            .map(|(i, r)| (i, r.clone()))
            .collect();
        out.sort_by_key(|(i, r)| (r.created_at, *i));
        out.into_iter().map(|(_, r)| r).collect()
    }

    fn upsert(&mut self, record: TransactionRecord) {
        if !self.records.contains_key(&record.commitment) {
            self.order.push(record.commitment);
        }
        self.records.insert(record.commitment, record);
    }
}

/// An in-memory projection with write-failure injection.
#[derive(Default)]
pub struct NullProjectionStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicU32,
    writes: AtomicU32,
}

impl NullProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with a backend error, leaving state untouched.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn all_records(&self) -> Vec<TransactionRecord> {
        self.inner.lock().unwrap().ordered(|_| true)
    }

    /// Overwrite state directly, bypassing fault injection. For arranging
    /// inconsistent projections in tests.
    pub fn force_record(&self, record: TransactionRecord) {
        self.inner.lock().unwrap().upsert(record);
    }

    pub fn force_custody(&self, entry: CustodyEntry) {
        self.inner
            .lock()
            .unwrap()
            .custody
            .insert(entry.item, entry);
    }

    fn take_fault(&self) -> Result<(), StoreError> {
        let injected = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(StoreError::Backend("injected write failure".into()))
        } else {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[async_trait]
impl ProjectionStore for NullProjectionStore {
    async fn insert_record(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.records.contains_key(&record.commitment) {
            return Err(StoreError::Duplicate(record.commitment.to_string()));
        }
        self.take_fault()?;
        inner.upsert(record.clone());
        Ok(())
    }

    async fn update_record(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.records.contains_key(&record.commitment) {
            return Err(StoreError::NotFound(record.commitment.to_string()));
        }
        self.take_fault()?;
        inner.upsert(record.clone());
        Ok(())
    }

    async fn get_record(
        &self,
        commitment: &Commitment,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().records.get(commitment).cloned())
    }

    async fn records_for_item(&self, item: &ItemKey) -> Result<Vec<TransactionRecord>, StoreError> {
        let item = *item;
        Ok(self.inner.lock().unwrap().ordered(move |r| r.item == item))
    }

    async fn records_for_party(
        &self,
        address: &Address,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let address = address.clone();
        Ok(self
            .inner
            .lock()
            .unwrap()
            .ordered(move |r| r.involves(&address)))
    }

    async fn item_known(&self, item: &ItemKey) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.custody.contains_key(item)
            || inner
                .records
                .values()
                .any(|r| r.item == *item && r.status != TxStatus::Failed))
    }

    async fn custody_of(&self, item: &ItemKey) -> Result<Option<CustodyEntry>, StoreError> {
        Ok(self.inner.lock().unwrap().custody.get(item).cloned())
    }

    async fn stuck_records(
        &self,
        older_than: Timestamp,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .ordered(move |r| r.status.is_in_flight() && r.updated_at <= older_than))
    }

    async fn apply_batch(&self, batch: ProjectionBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        self.take_fault()?;
        for record in batch.records {
            inner.upsert(record);
        }
        if let Some(entry) = batch.custody {
            inner.custody.insert(entry.item, entry);
        }
        Ok(())
    }
}
