//! 32-byte fingerprints: item keys, commitments and ledger submission references.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::ModelError;

macro_rules! digest_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const ZERO: Self = Self([0u8; 32]);

            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}\u{2026})", stringify!($name), hex::encode(&self.0[..4]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let decoded = hex::decode(s.trim().trim_start_matches("0x"))
                    .map_err(|e| ModelError::InvalidHex(e.to_string()))?;
                let bytes: [u8; 32] = decoded
                    .try_into()
                    .map_err(|v: Vec<u8>| ModelError::InvalidHex(format!("expected 32 bytes, got {}", v.len())))?;
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                crate::encoding::hex_32::serialize(&self.0, serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                crate::encoding::hex_32::deserialize(deserializer).map(Self)
            }
        }
    };
}

digest_type!(
    /// The `serialHash` of one physical item: a fingerprint of (product id, serial number).
    ItemKey
);

digest_type!(
    /// Public commitment binding a ciphertext to its parties and timestamp.
    Commitment
);

digest_type!(
    /// Reference to an operation submitted to the ledger (its transaction hash).
    SubmissionRef
);
