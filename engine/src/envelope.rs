//! Sealing payloads for exactly two readers.
//!
//! A payload is encrypted once under a fresh symmetric key; that key is then
//! wrapped separately for the shipper and the receiver. The commitment binds
//! the ciphertext to both addresses and the sealing time.

use pharmachain_crypto::{commit, decrypt_payload, encrypt_payload, unwrap_key, verify_commitment, wrap_key};
use pharmachain_types::{Commitment, Party, PrivateKey, Timestamp, TransactionRecord};

use crate::EngineError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedPayload {
    pub ciphertext: Vec<u8>,
    pub wrapped_key_shipper: Vec<u8>,
    pub wrapped_key_receiver: Vec<u8>,
    pub commitment: Commitment,
    pub sealed_at: Timestamp,
}

/// Encrypt `payload` so only `shipper` and `receiver` can read it.
pub fn seal(
    payload: &[u8],
    shipper: &Party,
    receiver: &Party,
    at: Timestamp,
) -> Result<SealedPayload, EngineError> {
    let (ciphertext, key) = encrypt_payload(payload);
    let wrapped_key_shipper = wrap_key(&key, &shipper.public_key)?;
    let wrapped_key_receiver = wrap_key(&key, &receiver.public_key)?;
    let commitment = commit(&ciphertext, &shipper.address, &receiver.address, at);
    Ok(SealedPayload {
        ciphertext,
        wrapped_key_shipper,
        wrapped_key_receiver,
        commitment,
        sealed_at: at,
    })
}

/// Whether the stored ciphertext still matches the record's commitment.
pub fn verify(record: &TransactionRecord) -> bool {
    verify_commitment(
        &record.commitment,
        &record.ciphertext,
        &record.shipper,
        &record.receiver,
        record.created_at,
    )
}

/// Decrypt a record's payload with one party's identity key.
///
/// The commitment is checked before any decryption is attempted.
pub fn open(record: &TransactionRecord, private_key: &PrivateKey) -> Result<Vec<u8>, EngineError> {
    if !verify(record) {
        return Err(EngineError::Integrity);
    }
    let key = [&record.wrapped_key_shipper, &record.wrapped_key_receiver]
        .into_iter()
        .find_map(|wrapped| unwrap_key(wrapped, private_key).ok())
        .ok_or(EngineError::AccessDenied)?;
    Ok(decrypt_payload(&record.ciphertext, &key)?)
}
