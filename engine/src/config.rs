//! Engine configuration with TOML file support.

use pharmachain_ledger::RetryPolicy;
use pharmachain_types::{NetworkId, NetworkPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::logging::LogFormat;
use crate::EngineError;

/// Configuration for the custody engine.
///
/// Can be loaded from a TOML file via [`EngineConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Which backing network the ledger adapter talks to.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Ledger gateway JSON-RPC endpoint.
    #[serde(default = "default_ledger_url")]
    pub ledger_url: String,

    /// Overrides the network's built-in confirmation count.
    #[serde(default)]
    pub required_confirmations: Option<u64>,

    /// Overrides the network's built-in block interval.
    #[serde(default)]
    pub block_interval_ms: Option<u64>,

    /// Per-request HTTP timeout for ledger calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Default bound on inclusion + finality waits. 0 waits indefinitely.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    /// Upper bound on a transaction payload before encryption.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Identity proofs older (or further in the future) than this are rejected.
    #[serde(default = "default_proof_max_age_secs")]
    pub proof_max_age_secs: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Bounded exponential backoff for transient ledger failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// How long a record may sit in flight before reconciliation looks at it.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Extra time after the grace period before a record with no ledger entry is failed.
    #[serde(default = "default_retry_window_secs")]
    pub retry_window_secs: u64,
    /// Pause between background passes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Localhost
}

fn default_ledger_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_wait_timeout_secs() -> u64 {
    600
}

fn default_max_payload_bytes() -> usize {
    64 * 1024
}

fn default_proof_max_age_secs() -> u64 {
    300
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_grace_period_secs() -> u64 {
    120
}

fn default_retry_window_secs() -> u64 {
    900
}

fn default_interval_secs() -> u64 {
    60
}

// ── Impl ───────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(EngineError::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(EngineError::Config("max_payload_bytes must be positive".into()));
        }
        if self.block_interval_ms == Some(0) {
            return Err(EngineError::Config("block_interval_ms must be positive".into()));
        }
        if self.reconcile.interval_secs == 0 {
            return Err(EngineError::Config("reconcile.interval_secs must be positive".into()));
        }
        self.log_format()?;
        Ok(())
    }

    /// The network's built-in policy with any configured overrides applied.
    pub fn policy(&self) -> NetworkPolicy {
        let mut policy = self.network.default_policy();
        if let Some(n) = self.required_confirmations {
            policy.required_confirmations = n;
        }
        if let Some(ms) = self.block_interval_ms {
            policy.block_interval_ms = ms;
        }
        policy
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_secs > 0).then(|| Duration::from_secs(self.wait_timeout_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn proof_max_age(&self) -> Duration {
        Duration::from_secs(self.proof_max_age_secs)
    }

    pub fn log_format(&self) -> Result<LogFormat, EngineError> {
        self.log_format.parse()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            ledger_url: default_ledger_url(),
            required_confirmations: None,
            block_interval_ms: None,
            request_timeout_secs: default_request_timeout_secs(),
            wait_timeout_secs: default_wait_timeout_secs(),
            retry: RetryConfig::default(),
            max_payload_bytes: default_max_payload_bytes(),
            proof_max_age_secs: default_proof_max_age_secs(),
            reconcile: ReconcileConfig::default(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            retry_window_secs: default_retry_window_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = EngineConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = EngineConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.network, NetworkId::Localhost);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.reconcile.grace_period_secs, 120);
        assert_eq!(config.log_format, "human");
    }

    #[test]
    fn network_policy_comes_from_network_with_overrides() {
        let config = EngineConfig::from_toml_str(r#"network = "polygon""#).unwrap();
        assert_eq!(config.policy().required_confirmations, 10);
        assert_eq!(config.policy().block_interval_ms, 2_000);
        assert_eq!(config.policy().chain_id, 137);

        let config = EngineConfig::from_toml_str(
            r#"
            network = "ethereum"
            required_confirmations = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.policy().required_confirmations, 6);
        assert_eq!(config.policy().block_interval_ms, 12_000);
    }

    #[test]
    fn partial_nested_tables_keep_defaults() {
        let toml = r#"
            [retry]
            max_attempts = 2

            [reconcile]
            interval_secs = 5
        "#;
        let config = EngineConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_delay_ms, 5_000);
        assert_eq!(config.reconcile.interval_secs, 5);
        assert_eq!(config.reconcile.retry_window_secs, 900);
        assert_eq!(config.retry_policy().max_attempts, 2);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for bad in [
            "[retry]\nmax_attempts = 0",
            "max_payload_bytes = 0",
            "block_interval_ms = 0",
            "log_format = \"xml\"",
            "network = \"solana\"",
        ] {
            assert!(
                matches!(EngineConfig::from_toml_str(bad), Err(EngineError::Config(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn zero_wait_timeout_means_unbounded() {
        let config = EngineConfig::from_toml_str("wait_timeout_secs = 0").unwrap();
        assert_eq!(config.wait_timeout(), None);
        assert_eq!(
            EngineConfig::default().wait_timeout(),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ledger_url = \"http://ledger.internal:8545\"").unwrap();
        writeln!(file, "proof_max_age_secs = 60").unwrap();
        let config = EngineConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.ledger_url, "http://ledger.internal:8545");
        assert_eq!(config.proof_max_age(), Duration::from_secs(60));
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = EngineConfig::from_toml_file("/nonexistent/pharmachain.toml");
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
