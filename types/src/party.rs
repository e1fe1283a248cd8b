//! Supply-chain participants and the products they are authorised for.

use serde::{Deserialize, Serialize};

use crate::{Address, PublicKey};

/// Role of a party in the supply chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Manufacturer,
    Distributor,
    Dispenser,
    Hospital,
    Pharmacy,
}

/// A registered participant. Registered out-of-band; the engine only reads it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub address: Address,
    pub name: String,
    pub role: Role,
    /// Identity key: verifies the party's signed proofs and receives wrapped keys.
    pub public_key: PublicKey,
    pub active: bool,
}

/// A product line (e.g. one GTIN) and the manufacturer allowed to register its items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub name: String,
    pub manufacturer: Address,
    pub active: bool,
}
