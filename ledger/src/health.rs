use pharmachain_types::NetworkId;
use serde::{Deserialize, Serialize};

use crate::LedgerAdapter;

/// Point-in-time view of the backing network, for operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHealth {
    pub network: NetworkId,
    pub consensus: String,
    pub chain_id: u64,
    pub required_confirmations: u64,
    pub block_interval_ms: u64,
    pub block_height: Option<u64>,
    pub healthy: bool,
    pub error: Option<String>,
}

/// Probe the ledger. Never fails: an unreachable ledger reports `healthy: false`.
pub async fn network_health<L: LedgerAdapter + ?Sized>(ledger: &L) -> NetworkHealth {
    let policy = ledger.policy();
    let (block_height, error) = match ledger.block_height().await {
        Ok(h) => (Some(h), None),
        Err(e) => (None, Some(e.to_string())),
    };
    NetworkHealth {
        network: ledger.network(),
        consensus: policy.consensus,
        chain_id: policy.chain_id,
        required_confirmations: policy.required_confirmations,
        block_interval_ms: policy.block_interval_ms,
        healthy: error.is_none(),
        block_height,
        error,
    }
}
