//! Blake2b hashing for item keys and commitments.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use pharmachain_types::ItemKey;

type Blake2b256 = Blake2b<U32>;

const SERIAL_TAG: &[u8] = b"pharmachain/serial/v1";

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
///
/// Parts are fed back to back with no separators; callers that need an
/// unambiguous encoding use [`update_field`].
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Feed `field` as `u32 big-endian length ‖ bytes`.
pub(crate) fn update_field(hasher: &mut Blake2b256, field: &[u8]) {
    hasher.update((field.len() as u32).to_be_bytes());
    hasher.update(field);
}

pub(crate) fn tagged_hasher(tag: &[u8]) -> Blake2b256 {
    let mut hasher = Blake2b256::new();
    update_field(&mut hasher, tag);
    hasher
}

pub(crate) fn finish(hasher: Blake2b256) -> [u8; 32] {
    hasher.finalize().into()
}

/// Derive the `serialHash` of an item from its product id and serial number.
pub fn serial_hash(product_id: &str, serial_number: &str) -> ItemKey {
    let mut hasher = tagged_hasher(SERIAL_TAG);
    update_field(&mut hasher, product_id.as_bytes());
    update_field(&mut hasher, serial_number.as_bytes());
    ItemKey::new(finish(hasher))
}
