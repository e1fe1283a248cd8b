//! Commitment binding a ciphertext to its parties and time.
//!
//! `Blake2b-256(tag ‖ len‖ciphertext ‖ len‖shipper ‖ len‖receiver ‖ u64be(ms))`.
//! Every variable-length field is length-prefixed so no two distinct tuples
//! share an encoding.

use pharmachain_types::{Address, Commitment, Timestamp};

use crate::hash::{finish, tagged_hasher, update_field};

const COMMIT_TAG: &[u8] = b"pharmachain/commit/v1";

pub fn commit(
    ciphertext: &[u8],
    shipper: &Address,
    receiver: &Address,
    timestamp: Timestamp,
) -> Commitment {
    let mut hasher = tagged_hasher(COMMIT_TAG);
    update_field(&mut hasher, ciphertext);
    update_field(&mut hasher, &shipper.to_bytes());
    update_field(&mut hasher, &receiver.to_bytes());
    blake2::Digest::update(&mut hasher, timestamp.as_millis().to_be_bytes());
    Commitment::new(finish(hasher))
}

/// Recompute the commitment and compare it to `expected`.
pub fn verify_commitment(
    expected: &Commitment,
    ciphertext: &[u8],
    shipper: &Address,
    receiver: &Address,
    timestamp: Timestamp,
) -> bool {
    commit(ciphertext, shipper, receiver, timestamp) == *expected
}
