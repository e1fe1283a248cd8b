//! Read-only lookups of parties and product lines.
//!
//! Parties and products are registered out of band; the engine only reads them.

use async_trait::async_trait;
use pharmachain_types::{Address, Party, Product};

use crate::StoreError;

#[async_trait]
pub trait PartyDirectory: Send + Sync {
    /// Look up a party by address. `Ok(None)` when the address is unknown.
    async fn party(&self, address: &Address) -> Result<Option<Party>, StoreError>;
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Look up a product line by its product id.
    async fn product(&self, product_id: &str) -> Result<Option<Product>, StoreError>;
}
