//! Adapters for fss-core ports: HTTP JSON-RPC chain access, file-backed storage, and a
//! deterministic local deployment of the threshold network, key contracts and registry chain.

#![deny(unsafe_code)]

pub mod file_store;
pub mod local_chain;
pub mod local_network;
pub mod rpc;

pub use file_store::FileStore;
pub use local_chain::{LocalChain, MinedTransaction, LOCAL_CHAIN_ID};
pub use local_network::{
    ActionHandler, LocalKeyContracts, LocalKeyVault, LocalThresholdNetwork, QuotaToken,
    SimulatedErc20Transfer,
};
pub use rpc::JsonRpcChain;

use alloy_primitives::Address;
use fss_core::config::StorageConfig;
use fss_core::error::FssError;
use fss_core::store::{MemoryStore, Store};
use fss_core::types::ActionRef;
use std::sync::Arc;

/// Opens the store selected by configuration.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn Store>, FssError> {
    let store: Arc<dyn Store> = match config {
        StorageConfig::Memory => Arc::new(MemoryStore::new()),
        StorageConfig::File { path } => Arc::new(FileStore::load(path.clone())?),
    };
    tracing::debug!(storage = config.label(), "opened store");
    Ok(store)
}

/// Network, contracts and chain sharing one key vault.
#[derive(Clone)]
pub struct LocalDeployment {
    pub vault: LocalKeyVault,
    pub network: Arc<LocalThresholdNetwork>,
    pub contracts: Arc<LocalKeyContracts>,
    pub chain: Arc<LocalChain>,
}

impl LocalDeployment {
    pub fn new(network_name: &str, metered: bool, registry: Address) -> Self {
        let vault = LocalKeyVault::new(network_name);
        Self {
            network: Arc::new(
                LocalThresholdNetwork::new(network_name, vault.clone()).metered(metered),
            ),
            contracts: Arc::new(LocalKeyContracts::new(vault.clone())),
            chain: Arc::new(LocalChain::new(registry)),
            vault,
        }
    }

    /// Installs the simulated transfer under `action`.
    pub fn with_send_erc20(self, action: &ActionRef) -> Result<Self, FssError> {
        self.network
            .register_action(action, Arc::new(SimulatedErc20Transfer))?;
        Ok(self)
    }
}
