mod simulate;

use alloy_primitives::{Address, B256};
use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use fss_adapters::JsonRpcChain;
use fss_core::config::FssConfig;
use fss_core::error::FssError;
use fss_core::eth;
use fss_core::policy::{PolicyDraft, PolicyKind, ToolPolicy};
use fss_core::registry::{HashSigner, PolicyRegistryClient, RegisteredPolicy};
use fss_core::tools::{StaticToolRegistry, ToolRegistry};
use fss_core::types::{ActionRef, ThresholdSignature};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "fss", version, about = "Delegated-key policy tooling")]
struct Cli {
    /// TOML configuration file; defaults apply when it is missing.
    #[arg(long, default_value = "fss.toml", env = "FSS_CONFIG")]
    config: PathBuf,
    /// Overrides registry.rpc_url.
    #[arg(long, env = "FSS_RPC_URL")]
    rpc_url: Option<String>,
    /// Overrides registry.contract_address.
    #[arg(long, env = "FSS_REGISTRY_ADDRESS")]
    registry: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encode, decode and read on-chain policies.
    #[command(subcommand)]
    Policy(PolicyCommand),
    /// Print the built-in tool catalog.
    Tools,
    /// Run one transfer through the full flow on the local deployment.
    Simulate {
        #[arg(long)]
        token: String,
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        amount: String,
        #[arg(long, default_value = "84532")]
        chain_id: String,
        #[arg(long, default_value = "https://sepolia.base.org")]
        target_rpc_url: String,
        /// Answer the permission prompt with "no".
        #[arg(long, default_value_t = false)]
        decline: bool,
        /// Register a spend policy with this maximum, in base units.
        #[arg(long)]
        max_amount: Option<String>,
        #[arg(long = "allow-token")]
        allowed_tokens: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum PolicyCommand {
    /// ABI-encode a policy JSON document (`{"type": "SendERC20", ...}`).
    Encode {
        #[arg(long)]
        file: PathBuf,
    },
    /// Decode hex policy bytes back to JSON.
    Decode {
        #[arg(long)]
        hex: String,
        #[arg(long, default_value = "SendERC20")]
        kind: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Read one policy from the registry.
    Get {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        action: String,
        #[arg(long, default_value = "SendERC20")]
        kind: String,
    },
    /// List every policy an owner registered.
    List {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "SendERC20")]
        kind: String,
    },
}

/// Registry reads never sign; writes through this signer fail.
struct ReadOnly;

#[async_trait]
impl HashSigner for ReadOnly {
    async fn signer_address(&self) -> Result<Address, FssError> {
        Err(FssError::KeyNotInitialized)
    }

    async fn sign_hash(&self, _digest: &B256) -> Result<ThresholdSignature, FssError> {
        Err(FssError::KeyNotInitialized)
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<FssConfig> {
    let mut config = FssConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(rpc_url) = &cli.rpc_url {
        config.registry.rpc_url = rpc_url.clone();
    }
    if let Some(registry) = &cli.registry {
        config.registry.contract_address = registry.clone();
    }
    Ok(config)
}

fn registry_client(config: &FssConfig) -> anyhow::Result<PolicyRegistryClient> {
    let timeout = config.timeouts.network();
    let chain = JsonRpcChain::with_request_timeout(config.registry.rpc_url.clone(), timeout)?;
    let contract = eth::parse_address(&config.registry.contract_address)
        .map_err(|err| anyhow::anyhow!("registry.contract_address: {}", err))?;
    Ok(PolicyRegistryClient::new(
        Arc::new(chain),
        Arc::new(ReadOnly),
        contract,
        timeout,
    ))
}

fn describe(record: &RegisteredPolicy, kind: PolicyKind) -> serde_json::Value {
    match record.decode(kind) {
        Ok(policy) => json!({
            "action": record.action,
            "version": record.version,
            "policy": policy.to_draft(),
        }),
        Err(err) => json!({
            "action": record.action,
            "version": record.version,
            "raw": format!("0x{}", hex::encode(&record.policy)),
            "error": err.to_string(),
        }),
    }
}

async fn run_policy(config: &FssConfig, command: PolicyCommand) -> anyhow::Result<()> {
    match command {
        PolicyCommand::Encode { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let draft: PolicyDraft = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", file.display()))?;
            println!("0x{}", hex::encode(draft.encode()?));
        }
        PolicyCommand::Decode { hex, kind, version } => {
            let kind: PolicyKind = kind.parse()?;
            let bytes = hex::decode(hex.trim().trim_start_matches("0x"))
                .context("policy bytes are not hex")?;
            let version = version.unwrap_or_else(|| config.policy.default_version.clone());
            let policy = ToolPolicy::decode(kind, &bytes, &version)?;
            println!("{}", serde_json::to_string_pretty(&policy.to_draft())?);
        }
        PolicyCommand::Get {
            owner,
            action,
            kind,
        } => {
            let kind: PolicyKind = kind.parse()?;
            let owner = eth::parse_address(&owner).map_err(|err| anyhow::anyhow!("owner: {}", err))?;
            let client = registry_client(config)?;
            match client.get_policy_for(owner, &ActionRef::new(action)).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&describe(&record, kind))?),
                None => println!("null"),
            }
        }
        PolicyCommand::List { owner, kind } => {
            let kind: PolicyKind = kind.parse()?;
            let owner = eth::parse_address(&owner).map_err(|err| anyhow::anyhow!("owner: {}", err))?;
            let client = registry_client(config)?;
            let records = client.get_all_policies_for(owner).await?;
            info!(owner = %eth::checksum(&owner), count = records.len(), "listed policies");
            let described: Vec<_> = records.iter().map(|record| describe(record, kind)).collect();
            println!("{}", serde_json::to_string_pretty(&described)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "fss=info,info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Policy(command) => run_policy(&config, command).await?,
        Command::Tools => {
            let tools = StaticToolRegistry::with_builtin_tools().list_available_tools();
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Command::Simulate {
            token,
            recipient,
            amount,
            chain_id,
            target_rpc_url,
            decline,
            max_amount,
            allowed_tokens,
        } => {
            let params = BTreeMap::from([
                ("tokenIn".to_string(), token),
                ("recipientAddress".to_string(), recipient),
                ("amountIn".to_string(), amount),
                ("chainId".to_string(), chain_id),
                ("rpcUrl".to_string(), target_rpc_url),
            ]);
            let outcome = simulate::run(
                config,
                simulate::SimulationInput {
                    grant: !decline,
                    max_amount,
                    allowed_tokens,
                    params,
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }
    Ok(())
}
