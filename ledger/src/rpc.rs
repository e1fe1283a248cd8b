//! JSON-RPC ledger adapter over HTTP.
//!
//! Requests are JSON objects carrying an `action` plus named parameters; the
//! gateway answers with `{"result": …}` or `{"error": "…"}`. Contract
//! rejections arrive as `execution reverted: <reason>` and are mapped onto
//! typed errors by [`map_revert`].

use async_trait::async_trait;
use pharmachain_types::{
    Address, BlockRef, Commitment, ItemKey, NetworkId, NetworkPolicy, SubmissionRef,
};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::{InclusionReceipt, LedgerAdapter, LedgerError};

const REVERT_PREFIX: &str = "execution reverted";

/// HTTP client for a ledger gateway.
pub struct RpcLedger {
    http: reqwest::Client,
    url: String,
    network: NetworkId,
    policy: NetworkPolicy,
    connected: AtomicBool,
}

impl RpcLedger {
    /// Create a client for `url`. No request is made until [`LedgerAdapter::connect`].
    pub fn new(
        url: impl Into<String>,
        network: NetworkId,
        policy: NetworkPolicy,
        request_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
            network,
            policy,
            connected: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn ensure_connected(&self) -> Result<(), LedgerError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(LedgerError::Transport("ledger adapter is not connected".into()))
        }
    }

    async fn call(
        &self,
        action: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, LedgerError> {
        let mut body = params;
        body.as_object_mut()
            .ok_or_else(|| LedgerError::Malformed("params must be a JSON object".into()))?
            .insert("action".to_string(), serde_json::json!(action));

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LedgerError::Transport(format!("gateway returned HTTP {status}")));
        }
        if !status.is_success() {
            return Err(LedgerError::Malformed(format!("gateway returned HTTP {status}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LedgerError::Transport(format!("invalid JSON response: {e}")))?;
        decode_response(json)
    }

    async fn submit(
        &self,
        action: &str,
        params: serde_json::Value,
    ) -> Result<SubmissionRef, LedgerError> {
        self.ensure_connected()?;
        let value = self.call(action, params).await?;
        parse_submission(&value)
    }
}

/// Split a gateway response into its result or a typed error.
fn decode_response(json: serde_json::Value) -> Result<serde_json::Value, LedgerError> {
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        if let Some(reason) = err.strip_prefix(REVERT_PREFIX) {
            return Err(map_revert(reason.trim_start_matches(':').trim()));
        }
        return Err(LedgerError::Transport(format!("gateway error: {err}")));
    }
    Ok(json.get("result").cloned().unwrap_or(serde_json::Value::Null))
}

/// Translate a contract revert reason into the matching typed error.
pub fn map_revert(reason: &str) -> LedgerError {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("already registered") {
        LedgerError::DuplicateItem
    } else if lower.contains("not the current owner") {
        LedgerError::NotCurrentOwner
    } else if lower.contains("recalled") {
        LedgerError::Recalled
    } else if lower.contains("not registered") {
        LedgerError::NotRegistered
    } else if lower.contains("no open") || lower.contains("no pending") {
        LedgerError::NoOpenHandoff
    } else if lower.starts_with("only ") || lower.contains("not authorized") {
        LedgerError::Unauthorized
    } else {
        LedgerError::Revert(reason.to_string())
    }
}

fn parse_submission(value: &serde_json::Value) -> Result<SubmissionRef, LedgerError> {
    value
        .as_str()
        .ok_or_else(|| LedgerError::Malformed(format!("expected submission ref, got {value}")))?
        .parse()
        .map_err(|e| LedgerError::Malformed(format!("bad submission ref: {e}")))
}

fn parse_u64(value: &serde_json::Value) -> Result<u64, LedgerError> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        _ => None,
    }
    .ok_or_else(|| LedgerError::Malformed(format!("expected integer, got {value}")))
}

fn parse_bool(value: &serde_json::Value) -> Result<bool, LedgerError> {
    value
        .as_bool()
        .ok_or_else(|| LedgerError::Malformed(format!("expected bool, got {value}")))
}

#[derive(Deserialize)]
struct ReceiptResult {
    block_number: u64,
    block_hash: String,
    #[serde(default)]
    gas_used: u64,
}

fn parse_receipt(
    submission: &SubmissionRef,
    value: serde_json::Value,
) -> Result<Option<InclusionReceipt>, LedgerError> {
    if value.is_null() {
        return Ok(None);
    }
    let raw: ReceiptResult = serde_json::from_value(value)
        .map_err(|e| LedgerError::Malformed(format!("bad receipt: {e}")))?;
    let hash_bytes = hex::decode(raw.block_hash.trim_start_matches("0x"))
        .map_err(|e| LedgerError::Malformed(format!("bad block hash: {e}")))?;
    let hash: [u8; 32] = hash_bytes
        .try_into()
        .map_err(|_| LedgerError::Malformed("block hash must be 32 bytes".into()))?;
    Ok(Some(InclusionReceipt {
        submission: *submission,
        block: BlockRef::new(raw.block_number, hash),
        cost: raw.gas_used,
    }))
}

#[async_trait]
impl LedgerAdapter for RpcLedger {
    async fn connect(&self) -> Result<(), LedgerError> {
        let chain_id = parse_u64(&self.call("chain_id", serde_json::json!({})).await?)?;
        if chain_id != self.policy.chain_id {
            return Err(LedgerError::ChainMismatch {
                network: self.network,
                expected: self.policy.chain_id,
                actual: chain_id,
            });
        }
        self.connected.store(true, Ordering::Release);
        tracing::info!(url = %self.url, network = %self.network, chain_id, "ledger connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), LedgerError> {
        self.connected.store(false, Ordering::Release);
        tracing::info!(url = %self.url, "ledger connection closed");
        Ok(())
    }

    fn network(&self) -> NetworkId {
        self.network
    }

    fn policy(&self) -> NetworkPolicy {
        self.policy.clone()
    }

    async fn submit_register(
        &self,
        item: &ItemKey,
        owner: &Address,
        commitment: &Commitment,
    ) -> Result<SubmissionRef, LedgerError> {
        self.submit(
            "register",
            serde_json::json!({
                "item": item.to_string(),
                "owner": owner.as_str(),
                "commitment": commitment.to_string(),
            }),
        )
        .await
    }

    async fn submit_transfer(
        &self,
        item: &ItemKey,
        shipper: &Address,
        new_owner: &Address,
        commitment: &Commitment,
    ) -> Result<SubmissionRef, LedgerError> {
        self.submit(
            "create_transfer",
            serde_json::json!({
                "item": item.to_string(),
                "shipper": shipper.as_str(),
                "receiver": new_owner.as_str(),
                "commitment": commitment.to_string(),
            }),
        )
        .await
    }

    async fn submit_completion(
        &self,
        item: &ItemKey,
        receiver: &Address,
        handoff: &SubmissionRef,
    ) -> Result<SubmissionRef, LedgerError> {
        self.submit(
            "complete_transfer",
            serde_json::json!({
                "item": item.to_string(),
                "receiver": receiver.as_str(),
                "handoff": handoff.to_string(),
            }),
        )
        .await
    }

    async fn submit_recall(
        &self,
        item: &ItemKey,
        by: &Address,
    ) -> Result<SubmissionRef, LedgerError> {
        self.submit(
            "recall",
            serde_json::json!({ "item": item.to_string(), "by": by.as_str() }),
        )
        .await
    }

    async fn receipt(
        &self,
        submission: &SubmissionRef,
    ) -> Result<Option<InclusionReceipt>, LedgerError> {
        self.ensure_connected()?;
        let value = self
            .call(
                "receipt",
                serde_json::json!({ "submission": submission.to_string() }),
            )
            .await?;
        parse_receipt(submission, value)
    }

    async fn block_height(&self) -> Result<u64, LedgerError> {
        self.ensure_connected()?;
        parse_u64(&self.call("block_number", serde_json::json!({})).await?)
    }

    async fn current_owner_of(&self, item: &ItemKey) -> Result<Option<Address>, LedgerError> {
        self.ensure_connected()?;
        let value = self
            .call("owner_of", serde_json::json!({ "item": item.to_string() }))
            .await?;
        match value.as_str() {
            None if value.is_null() => Ok(None),
            None => Err(LedgerError::Malformed(format!("expected address, got {value}"))),
            Some(raw) => {
                let owner = Address::parse(raw)
                    .map_err(|e| LedgerError::Malformed(format!("bad owner address: {e}")))?;
                // The zero address is how contracts report "no owner".
                if owner.to_bytes() == [0u8; 20] {
                    Ok(None)
                } else {
                    Ok(Some(owner))
                }
            }
        }
    }

    async fn is_registered(&self, item: &ItemKey) -> Result<bool, LedgerError> {
        self.ensure_connected()?;
        parse_bool(
            &self
                .call("is_registered", serde_json::json!({ "item": item.to_string() }))
                .await?,
        )
    }

    async fn is_recalled(&self, item: &ItemKey) -> Result<bool, LedgerError> {
        self.ensure_connected()?;
        parse_bool(
            &self
                .call("is_recalled", serde_json::json!({ "item": item.to_string() }))
                .await?,
        )
    }
}
