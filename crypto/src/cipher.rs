//! Payload sealing with AES-256-GCM.
//!
//! Every call generates a fresh 32-byte key and a random 96-bit nonce. The
//! output blob is `nonce(12) ‖ ciphertext ‖ tag(16)`, so one opaque value
//! carries everything `decrypt_payload` needs besides the key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// AES-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;
/// Poly/GHASH tag length in bytes.
pub const TAG_LEN: usize = 16;
/// Symmetric key length in bytes.
pub const KEY_LEN: usize = 32;

/// A per-transaction symmetric key. Zeroized on drop; never logged.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Draw a fresh key from the OS RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Seal `payload` under a fresh key. Returns the blob and the key.
pub fn encrypt_payload(payload: &[u8]) -> (Vec<u8>, SymmetricKey) {
    let key = SymmetricKey::generate();
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, payload)
        .expect("AES-GCM encryption of an in-memory buffer cannot fail");

    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&sealed);
    (blob, key)
}

/// Open a blob produced by [`encrypt_payload`].
///
/// Fails closed: a wrong key or any altered byte yields [`CryptoError::Integrity`].
pub fn decrypt_payload(blob: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Format(format!(
            "payload blob is {} bytes, need at least {}",
            blob.len(),
            NONCE_LEN + TAG_LEN
        )));
    }
    let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| CryptoError::Integrity)
}
