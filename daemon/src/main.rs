//! PharmaChain operator CLI.

use anyhow::{bail, Context};
use clap::Parser;
use pharmachain_crypto::{derive_address, generate_keypair, keypair_from_private, serial_hash};
use pharmachain_engine::{envelope, init_logging, EngineConfig, IdentityProof, LogFormat, ProofAction};
use pharmachain_ledger::{network_health, LedgerAdapter, RpcLedger};
use pharmachain_types::{Address, ItemKey, NetworkId, PrivateKey, Timestamp, TransactionRecord};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pharmachain", about = "PharmaChain custody engine tools")]
struct Cli {
    /// Backing network: "ethereum", "polygon" or "localhost".
    /// When a config file is provided, defaults to the file's network value.
    #[arg(long, env = "PHARMACHAIN_NETWORK")]
    network: Option<String>,

    /// Ledger gateway JSON-RPC endpoint.
    #[arg(long, env = "PHARMACHAIN_LEDGER_URL")]
    ledger_url: Option<String>,

    /// Required confirmations before a transaction counts as final.
    #[arg(long, env = "PHARMACHAIN_CONFIRMATIONS")]
    confirmations: Option<u64>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "PHARMACHAIN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "PHARMACHAIN_LOG_FORMAT")]
    log_format: Option<String>,

    /// Path to a TOML configuration file. File settings are the base;
    /// CLI flags and env vars override them.
    #[arg(long, env = "PHARMACHAIN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Generate an identity key pair and print it with its address.
    Keygen {
        /// Derive from this hex private key instead of generating one.
        #[arg(long)]
        private_key: Option<String>,
    },
    /// Print the item key for a product id and serial number.
    ItemKey {
        #[arg(long)]
        product: String,
        #[arg(long)]
        serial: String,
    },
    /// Sign an identity proof for one action on one item.
    SignProof {
        /// Hex private key of the signer.
        #[arg(long, env = "PHARMACHAIN_PRIVATE_KEY", hide_env_values = true)]
        private_key: String,
        /// "register", "transfer", "accept" or "recall".
        #[arg(long)]
        action: ProofAction,
        /// Item key (hex).
        #[arg(long)]
        item: ItemKey,
        /// The other party: the receiver of a transfer or the shipper of an acceptance.
        #[arg(long)]
        counterpart: Option<Address>,
        /// Issue time in unix milliseconds; defaults to now.
        #[arg(long)]
        issued_at: Option<u64>,
    },
    /// Check that a stored record's ciphertext still matches its commitment.
    VerifyRecord {
        /// Transaction record as JSON.
        file: PathBuf,
    },
    /// Decrypt a stored record's payload with a party's identity key.
    OpenRecord {
        /// Transaction record as JSON.
        file: PathBuf,
        #[arg(long, env = "PHARMACHAIN_PRIVATE_KEY", hide_env_values = true)]
        private_key: String,
    },
    /// Ledger queries.
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand)]
enum LedgerAction {
    /// Network policy, chain height and reachability.
    Status,
    /// Current owner and recall state of an item.
    Owner {
        /// Item key (hex).
        item: ItemKey,
    },
}

#[derive(clap::Subcommand)]
enum ConfigAction {
    /// Validate the effective configuration and print it.
    Check,
    /// Print the built-in defaults as TOML.
    Defaults,
}

/// File config (or defaults) with CLI flags and env vars on top.
fn effective_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(network) = &cli.network {
        config.network = network.parse::<NetworkId>()?;
    }
    if let Some(url) = &cli.ledger_url {
        config.ledger_url = url.clone();
    }
    if let Some(n) = cli.confirmations {
        config.required_confirmations = Some(n);
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }
    config.validate()?;
    Ok(config)
}

fn parse_private_key(hex_key: &str) -> anyhow::Result<PrivateKey> {
    let bytes = hex::decode(hex_key.trim().trim_start_matches("0x")).context("private key is not hex")?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("private key must be 32 bytes, got {}", b.len()))?;
    Ok(PrivateKey(bytes))
}

fn read_record(path: &Path) -> anyhow::Result<TransactionRecord> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a transaction record", path.display()))
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connect(config: &EngineConfig) -> anyhow::Result<RpcLedger> {
    let ledger = RpcLedger::new(
        config.ledger_url.clone(),
        config.network,
        config.policy(),
        config.request_timeout(),
    )?;
    ledger
        .connect()
        .await
        .with_context(|| format!("connecting to {}", ledger.url()))?;
    tracing::info!(url = ledger.url(), network = %config.network, "connected to ledger");
    Ok(ledger)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = effective_config(&cli)?;
    let format: LogFormat = config.log_format()?;
    init_logging(format, &config.log_level)?;
    if let Some(path) = &cli.config {
        tracing::debug!("loaded config from {}", path.display());
    }

    match cli.command {
        Command::Keygen { private_key } => {
            let keys = match private_key {
                Some(hex_key) => keypair_from_private(parse_private_key(&hex_key)?),
                None => generate_keypair(),
            };
            print_json(&serde_json::json!({
                "address": derive_address(&keys.public),
                "public_key": hex::encode(keys.public.as_bytes()),
                "private_key": hex::encode(keys.private.0),
            }))?;
        }
        Command::ItemKey { product, serial } => {
            if product.is_empty() || serial.is_empty() {
                bail!("product and serial must both be non-empty");
            }
            println!("{}", serial_hash(&product, &serial));
        }
        Command::SignProof {
            private_key,
            action,
            item,
            counterpart,
            issued_at,
        } => {
            let keys = keypair_from_private(parse_private_key(&private_key)?);
            let issued_at = issued_at.map_or_else(Timestamp::now, Timestamp::from_millis);
            let proof = IdentityProof::sign(
                derive_address(&keys.public),
                action,
                &item,
                counterpart.as_ref(),
                issued_at,
                &keys.private,
            );
            println!("{}", serde_json::to_string_pretty(&proof)?);
        }
        Command::VerifyRecord { file } => {
            let record = read_record(&file)?;
            let intact = envelope::verify(&record);
            print_json(&serde_json::json!({
                "commitment": record.commitment,
                "item": record.item,
                "status": record.status,
                "intact": intact,
            }))?;
            if !intact {
                bail!("record {} does not match its commitment", record.commitment);
            }
        }
        Command::OpenRecord { file, private_key } => {
            let record = read_record(&file)?;
            let plaintext = envelope::open(&record, &parse_private_key(&private_key)?)?;
            match String::from_utf8(plaintext) {
                Ok(text) => println!("{text}"),
                Err(e) => println!("{}", hex::encode(e.as_bytes())),
            }
        }
        Command::Ledger { action } => {
            let ledger = connect(&config).await?;
            match action {
                LedgerAction::Status => {
                    let health = network_health(&ledger).await;
                    println!("{}", serde_json::to_string_pretty(&health)?);
                }
                LedgerAction::Owner { item } => {
                    let owner = ledger.current_owner_of(&item).await?;
                    let recalled = match owner {
                        Some(_) => ledger.is_recalled(&item).await?,
                        None => false,
                    };
                    print_json(&serde_json::json!({
                        "item": item,
                        "owner": owner,
                        "recalled": recalled,
                    }))?;
                }
            }
            ledger.close().await?;
        }
        Command::Config { action } => match action {
            ConfigAction::Check => {
                let policy = config.policy();
                tracing::info!(
                    network = %config.network,
                    confirmations = policy.required_confirmations,
                    grace_period_secs = config.reconcile.grace_period_secs,
                    retry_window_secs = config.reconcile.retry_window_secs,
                    interval_secs = config.reconcile.interval_secs,
                    "configuration is valid"
                );
                print!("{}", config.to_toml_string()?);
            }
            ConfigAction::Defaults => print!("{}", EngineConfig::default().to_toml_string()?),
        },
    }

    Ok(())
}
