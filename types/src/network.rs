//! Backing-network identifiers and their finality policies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::ModelError;

/// Identifies which ledger network the engine is writing to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// Ethereum mainnet (proof-of-stake).
    Ethereum,
    /// Polygon PoS with checkpointing.
    Polygon,
    /// Local development chain.
    Localhost,
}

impl NetworkId {
    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Localhost => "localhost",
        }
    }

    /// Built-in finality policy for this network.
    pub fn default_policy(&self) -> NetworkPolicy {
        match self {
            Self::Ethereum => NetworkPolicy {
                chain_id: 1,
                consensus: "proof-of-stake".into(),
                required_confirmations: 2,
                block_interval_ms: 12_000,
            },
            Self::Polygon => NetworkPolicy {
                chain_id: 137,
                consensus: "pos-with-checkpointing".into(),
                required_confirmations: 10,
                block_interval_ms: 2_000,
            },
            Self::Localhost => NetworkPolicy {
                chain_id: 31_337,
                consensus: "development".into(),
                required_confirmations: 1,
                block_interval_ms: 1_000,
            },
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" => Ok(Self::Ethereum),
            "polygon" => Ok(Self::Polygon),
            "localhost" | "local" | "dev" => Ok(Self::Localhost),
            other => Err(ModelError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Consensus-latency parameters of one backing network.
///
/// These are lookup parameters rather than constants: the same engine runs
/// against networks with very different finality latencies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub chain_id: u64,
    pub consensus: String,
    /// Blocks that must be built on top of the inclusion block.
    pub required_confirmations: u64,
    /// Nominal block-production interval, used as the polling period.
    pub block_interval_ms: u64,
}

impl NetworkPolicy {
    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.block_interval_ms.max(1))
    }
}
