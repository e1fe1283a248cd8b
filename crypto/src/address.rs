//! Ledger address derivation from party public keys.
//!
//! Address format: `0x` + hex of the last 20 bytes of Blake2b-256(public_key).

use pharmachain_types::{Address, PublicKey};

/// Derive the ledger address that belongs to `public_key`.
pub fn derive_address(public_key: &PublicKey) -> Address {
    let hash = crate::blake2b_256(public_key.as_bytes());
    let mut tail = [0u8; Address::BYTE_LEN];
    tail.copy_from_slice(&hash[32 - Address::BYTE_LEN..]);
    Address::from_bytes(&tail)
}
