//! Runtime configuration, loadable from TOML.

use crate::error::FssError;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REGISTRY_RPC_URL: &str = "https://yellowstone-rpc.litprotocol.com/";
pub const DEFAULT_REGISTRY_ADDRESS: &str = "0xD78e1C1183A29794A092dDA7dB526A91FdE36020";
/// 0.01 ether.
pub const DEFAULT_MIN_AUTH_BALANCE_WEI: &str = "10000000000000000";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FssConfig {
    /// Threshold network selection
    #[serde(default)]
    pub network: NetworkConfig,

    /// Capacity quota minting
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Policy registry contract
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Session credential lifetime
    #[serde(default)]
    pub session: SessionConfig,

    /// Network call deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Startup gates
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Persistence of key identity and quota id
    #[serde(default)]
    pub storage: StorageConfig,

    /// Policy defaults
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl FssConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, FssError> {
        let config: Self = toml::from_str(raw).map_err(|err| FssError::Config(err.to_string()))?;
        config.session.ttl()?;
        Ok(config)
    }

    /// Loads a TOML file; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FssError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|err| FssError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_toml_str(&raw)
    }
}

/// Threshold network selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name, e.g. `datil-dev`
    #[serde(default = "default_network_name")]
    pub name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: default_network_name(),
        }
    }
}

/// Capacity quota minting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Networks that meter requests and need a quota token
    #[serde(default = "default_required_networks")]
    pub required_networks: BTreeSet<String>,

    #[serde(default = "default_requests_per_kilosecond")]
    pub requests_per_kilosecond: u64,

    #[serde(default = "default_quota_days")]
    pub days_until_utc_midnight_expiration: u32,

    /// Uses granted per capacity delegation
    #[serde(default = "default_delegation_uses")]
    pub delegation_uses: String,
}

impl QuotaConfig {
    pub fn requires_quota(&self, network: &str) -> bool {
        self.required_networks.contains(network)
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            required_networks: default_required_networks(),
            requests_per_kilosecond: default_requests_per_kilosecond(),
            days_until_utc_midnight_expiration: default_quota_days(),
            delegation_uses: default_delegation_uses(),
        }
    }
}

/// Policy registry contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    #[serde(default = "default_registry_address")]
    pub contract_address: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            contract_address: default_registry_address(),
        }
    }
}

/// Session credential lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

impl SessionConfig {
    /// Fails when the lifetime cannot be added to the current time.
    pub fn ttl(&self) -> Result<chrono::Duration, FssError> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .filter(|ttl| chrono::Utc::now().checked_add_signed(*ttl).is_some())
            .ok_or_else(|| {
                FssError::Config(format!("session.ttl_secs out of range: {}", self.ttl_secs))
            })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
        }
    }
}

/// Network call deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_network_timeout")]
    pub network_secs: u64,
}

impl TimeoutConfig {
    pub fn network(&self) -> Duration {
        Duration::from_secs(self.network_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            network_secs: default_network_timeout(),
        }
    }
}

/// Startup gates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Minimum Actor balance, in wei
    #[serde(default = "default_min_balance")]
    pub min_auth_balance_wei: String,
}

impl BootstrapConfig {
    pub fn min_auth_balance(&self) -> Result<U256, FssError> {
        crate::eth::parse_uint(&self.min_auth_balance_wei)
            .map_err(|err| FssError::Config(format!("bootstrap.min_auth_balance_wei: {}", err)))
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            min_auth_balance_wei: default_min_balance(),
        }
    }
}

/// Persistence backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local, lost on exit
    Memory,

    /// JSON file
    File { path: PathBuf },
}

impl StorageConfig {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from(".fss-storage/store.json"),
        }
    }
}

/// Policy defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_policy_version")]
    pub default_version: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_version: default_policy_version(),
        }
    }
}

fn default_network_name() -> String {
    "datil-dev".to_string()
}

fn default_required_networks() -> BTreeSet<String> {
    ["datil", "datil-test"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_requests_per_kilosecond() -> u64 {
    10
}

fn default_quota_days() -> u32 {
    1
}

fn default_delegation_uses() -> String {
    "1".to_string()
}

fn default_rpc_url() -> String {
    DEFAULT_REGISTRY_RPC_URL.to_string()
}

fn default_registry_address() -> String {
    DEFAULT_REGISTRY_ADDRESS.to_string()
}

fn default_session_ttl() -> u64 {
    600
}

fn default_network_timeout() -> u64 {
    30
}

fn default_min_balance() -> String {
    DEFAULT_MIN_AUTH_BALANCE_WEI.to_string()
}

fn default_policy_version() -> String {
    crate::policy::DEFAULT_POLICY_VERSION.to_string()
}
