//! Reference to a block on the backing ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the block that included a ledger operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block height (number).
    pub number: u64,
    /// Block hash.
    #[serde(with = "crate::encoding::hex_32")]
    pub hash: [u8; 32],
}

impl BlockRef {
    pub fn new(number: u64, hash: [u8; 32]) -> Self {
        Self { number, hash }
    }

    /// Blocks built on top of this one when the chain head is at `head`.
    pub fn confirmations_at(&self, head: u64) -> u64 {
        head.saturating_sub(self.number)
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} (0x{})", self.number, hex::encode(&self.hash[..4]))
    }
}
