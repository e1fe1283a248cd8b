//! Per-recipient wrapping of a transaction's symmetric key.
//!
//! Each party publishes one Ed25519 identity key. To wrap for a recipient the
//! key is converted to X25519, combined with a fresh ephemeral secret, and the
//! shared secret is stretched through Blake2b into a ChaCha20-Poly1305 key.
//!
//! Wire format (93 bytes):
//!
//! ```text
//! version(1) ‖ ephemeral_public(32) ‖ nonce(12) ‖ sealed_key(32 + 16)
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use pharmachain_types::{PrivateKey, PublicKey};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::cipher::{SymmetricKey, KEY_LEN};
use crate::keys::{ed25519_private_to_x25519, ed25519_public_to_x25519};
use crate::CryptoError;

pub const WRAP_VERSION: u8 = 1;
const WRAP_NONCE_LEN: usize = 12;
const SEALED_LEN: usize = KEY_LEN + 16;
/// Total length of a wrapped key blob.
pub const WRAPPED_LEN: usize = 1 + 32 + WRAP_NONCE_LEN + SEALED_LEN;

const KDF_TAG: &[u8] = b"pharmachain/keywrap/v1";

fn wrapping_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    crate::hash::blake2b_256_multi(&[KDF_TAG, shared, ephemeral, recipient])
}

/// Wrap `key` so that only the holder of `recipient`'s private key can recover it.
pub fn wrap_key(key: &SymmetricKey, recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let recipient_x = ed25519_public_to_x25519(recipient)
        .ok_or_else(|| CryptoError::InvalidKey("recipient key is not a valid curve point".into()))?;
    let recipient_pub = X25519Public::from(recipient_x);

    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_pub = X25519Public::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient_pub);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey(
            "recipient key has low order".into(),
        ));
    }

    let mut sym = wrapping_key(shared.as_bytes(), ephemeral_pub.as_bytes(), &recipient_x);
    let cipher = ChaCha20Poly1305::new((&sym).into());
    sym.zeroize();

    let mut nonce_bytes = [0u8; WRAP_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), key.as_bytes().as_ref())
        .expect("ChaCha20-Poly1305 encryption of 32 bytes cannot fail");

    let mut blob = Vec::with_capacity(WRAPPED_LEN);
    blob.push(WRAP_VERSION);
    blob.extend_from_slice(ephemeral_pub.as_bytes());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Recover the symmetric key from a blob produced by [`wrap_key`].
///
/// A private key that does not belong to the intended recipient yields
/// [`CryptoError::AccessDenied`], never a garbage key.
pub fn unwrap_key(wrapped: &[u8], private_key: &PrivateKey) -> Result<SymmetricKey, CryptoError> {
    if wrapped.len() != WRAPPED_LEN {
        return Err(CryptoError::Format(format!(
            "wrapped key is {} bytes, expected {WRAPPED_LEN}",
            wrapped.len()
        )));
    }
    if wrapped[0] != WRAP_VERSION {
        return Err(CryptoError::Format(format!(
            "unsupported key wrap version {}",
            wrapped[0]
        )));
    }
    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&wrapped[1..33]);
    let nonce_bytes = &wrapped[33..33 + WRAP_NONCE_LEN];
    let sealed = &wrapped[33 + WRAP_NONCE_LEN..];

    let mut scalar = ed25519_private_to_x25519(private_key);
    let secret = StaticSecret::from(scalar);
    scalar.zeroize();
    let own_pub = X25519Public::from(&secret);
    let shared = secret.diffie_hellman(&X25519Public::from(ephemeral_bytes));
    if !shared.was_contributory() {
        return Err(CryptoError::AccessDenied);
    }

    let mut sym = wrapping_key(shared.as_bytes(), &ephemeral_bytes, own_pub.as_bytes());
    let cipher = ChaCha20Poly1305::new((&sym).into());
    sym.zeroize();

    let mut plain = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| CryptoError::AccessDenied)?;
    if plain.len() != KEY_LEN {
        plain.zeroize();
        return Err(CryptoError::AccessDenied);
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&plain);
    plain.zeroize();
    Ok(SymmetricKey::from_bytes(key))
}
