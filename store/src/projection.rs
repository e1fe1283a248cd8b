//! The durable off-chain projection: transaction records and custody pointers.

use async_trait::async_trait;
use pharmachain_types::{Address, Commitment, CustodyEntry, ItemKey, Timestamp, TransactionRecord};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// A set of writes that must land together or not at all.
///
/// Records are upserted by commitment. Used for the finalization step of a
/// transfer, where the new record, the superseded record and the custody
/// pointer change as one unit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionBatch {
    pub records: Vec<TransactionRecord>,
    pub custody: Option<CustodyEntry>,
}

impl ProjectionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(mut self, record: TransactionRecord) -> Self {
        self.records.push(record);
        self
    }

    pub fn custody(mut self, entry: CustodyEntry) -> Self {
        self.custody = Some(entry);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.custody.is_none()
    }
}

#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Insert a new record. Fails with [`StoreError::Duplicate`] if a record
    /// with the same commitment exists.
    async fn insert_record(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    /// Replace an existing record. Fails with [`StoreError::NotFound`] if absent.
    async fn update_record(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    async fn get_record(&self, commitment: &Commitment)
        -> Result<Option<TransactionRecord>, StoreError>;

    /// All records of an item, oldest first.
    async fn records_for_item(&self, item: &ItemKey) -> Result<Vec<TransactionRecord>, StoreError>;

    /// All records where `address` is shipper or receiver, oldest first.
    async fn records_for_party(
        &self,
        address: &Address,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Whether `item` has a custody entry or any record that has not `FAILED`.
    async fn item_known(&self, item: &ItemKey) -> Result<bool, StoreError>;

    async fn custody_of(&self, item: &ItemKey) -> Result<Option<CustodyEntry>, StoreError>;

    /// Records still `PENDING` or `CONFIRMED` whose last update is at or
    /// before `older_than`, oldest first.
    async fn stuck_records(&self, older_than: Timestamp)
        -> Result<Vec<TransactionRecord>, StoreError>;

    /// Apply every write in `batch` atomically.
    async fn apply_batch(&self, batch: ProjectionBatch) -> Result<(), StoreError>;
}
