//! Nullable party directory and product catalog.

use async_trait::async_trait;
use pharmachain_store::{PartyDirectory, ProductCatalog, StoreError};
use pharmachain_types::{Address, Party, Product};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct NullPartyDirectory {
    parties: Mutex<HashMap<Address, Party>>,
    lookups: AtomicU32,
}

impl NullPartyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, party: Party) {
        self.parties
            .lock()
            .unwrap()
            .insert(party.address.clone(), party);
    }

    pub fn deactivate(&self, address: &Address) {
        if let Some(p) = self.parties.lock().unwrap().get_mut(address) {
            p.active = false;
        }
    }

    /// Number of lookups served so far.
    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PartyDirectory for NullPartyDirectory {
    async fn party(&self, address: &Address) -> Result<Option<Party>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.parties.lock().unwrap().get(address).cloned())
    }
}

#[derive(Default)]
pub struct NullProductCatalog {
    products: Mutex<HashMap<String, Product>>,
}

impl NullProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: Product) {
        self.products
            .lock()
            .unwrap()
            .insert(product.product_id.clone(), product);
    }
}

#[async_trait]
impl ProductCatalog for NullProductCatalog {
    async fn product(&self, product_id: &str) -> Result<Option<Product>, StoreError> {
        Ok(self.products.lock().unwrap().get(product_id).cloned())
    }
}
