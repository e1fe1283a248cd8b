//! Cryptographic building blocks of the custody engine.
//!
//! - **AES-256-GCM** seals transaction payloads under a fresh key per transaction
//! - **X25519 + ChaCha20-Poly1305** wraps that key for each party (ECIES-style)
//! - **Blake2b** for item keys and on-chain commitments
//! - **Ed25519** for party identity proofs
//! - Address derivation (`0x` + 20 bytes)

pub mod address;
pub mod cipher;
pub mod commit;
pub mod error;
pub mod hash;
pub mod keys;
pub mod keywrap;
pub mod sign;

pub use address::derive_address;
pub use cipher::{decrypt_payload, encrypt_payload, SymmetricKey};
pub use commit::{commit, verify_commitment};
pub use error::CryptoError;
pub use hash::{blake2b_256, blake2b_256_multi, serial_hash};
pub use keys::{
    ed25519_private_to_x25519, ed25519_public_to_x25519, generate_keypair, keypair_from_private,
    keypair_from_seed, public_from_private,
};
pub use keywrap::{unwrap_key, wrap_key};
pub use sign::{sign_message, verify_signature};
