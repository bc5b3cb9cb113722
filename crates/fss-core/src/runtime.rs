use crate::chain::ChainRpc;
use crate::config::FssConfig;
use crate::credentials::{CredentialBroker, QuotaOptions};
use crate::error::FssError;
use crate::eth;
use crate::identity::ActorIdentity;
use crate::key_manager::DelegatedKeyManager;
use crate::network::{with_timeout, KeyContracts, ThresholdNetwork};
use crate::orchestrator::AuthorizationOrchestrator;
use crate::registry::PolicyRegistryClient;
use crate::store::Store;
use crate::tools::ToolRegistry;
use alloy_primitives::U256;
use std::sync::Arc;

/// External systems the runtime is wired against.
pub struct FssDependencies {
    pub actor: Arc<ActorIdentity>,
    pub network: Arc<dyn ThresholdNetwork>,
    pub contracts: Arc<dyn KeyContracts>,
    pub chain: Arc<dyn ChainRpc>,
    pub store: Arc<dyn Store>,
    pub tools: Arc<dyn ToolRegistry>,
}

/// Fully bootstrapped delegated-signing runtime.
pub struct FssRuntime {
    config: FssConfig,
    network: Arc<dyn ThresholdNetwork>,
    chain: Arc<dyn ChainRpc>,
    broker: Arc<CredentialBroker>,
    keys: Arc<DelegatedKeyManager>,
    registry: Arc<PolicyRegistryClient>,
    orchestrator: AuthorizationOrchestrator,
}

impl FssRuntime {
    /// Connects, gates on the Actor's balance, probes the registry and ensures a key and quota exist.
    pub async fn bootstrap(config: FssConfig, deps: FssDependencies) -> Result<Self, FssError> {
        let timeout = config.timeouts.network();
        let network_name = deps.network.network_name().to_string();

        with_timeout("connect", timeout, deps.network.connect())
            .await
            .map_err(|err| {
                FssError::InitializationFailed(format!("connect to {}: {}", network_name, err))
            })?;

        let actor_address = deps.actor.address();
        let required = config.bootstrap.min_auth_balance()?;
        let balance = with_timeout("balance", timeout, deps.chain.balance(actor_address))
            .await
            .map_err(|err| FssError::InitializationFailed(format!("actor balance: {}", err)))?;
        if balance < required {
            return Err(FssError::InsufficientBalance {
                address: eth::checksum(&actor_address),
                balance: balance.to_string(),
                required: required.to_string(),
            });
        }

        let broker = Arc::new(CredentialBroker::new(
            deps.actor.clone(),
            deps.network.clone(),
            deps.contracts.clone(),
            deps.store.clone(),
            &config,
        )?);
        let keys = Arc::new(DelegatedKeyManager::new(
            deps.network.clone(),
            deps.contracts,
            broker.clone(),
            deps.store,
            timeout,
        )?);
        let contract = eth::parse_address(&config.registry.contract_address)
            .map_err(|err| FssError::Config(format!("registry.contract_address: {}", err)))?;
        let registry = Arc::new(PolicyRegistryClient::new(
            deps.chain.clone(),
            keys.clone(),
            contract,
            timeout,
        ));
        registry.probe().await?;

        if keys.key().await.is_none() {
            keys.create_key().await.map_err(|err| match err {
                FssError::KeyCreationFailed(_) => err,
                other => FssError::KeyCreationFailed(other.to_string()),
            })?;
        }
        broker
            .mint_quota(QuotaOptions::from(&config.quota))
            .await
            .map_err(|err| FssError::KeyCreationFailed(format!("capacity quota: {}", err)))?;

        let key = keys.require_key().await?;
        tracing::info!(
            network = %network_name,
            actor = %eth::checksum(&actor_address),
            key = %key.eth_address,
            registry = %eth::checksum(&contract),
            storage = config.storage.label(),
            "runtime bootstrapped"
        );

        let orchestrator =
            AuthorizationOrchestrator::new(deps.tools, keys.clone(), registry.clone());
        Ok(Self {
            config,
            network: deps.network,
            chain: deps.chain,
            broker,
            keys,
            registry,
            orchestrator,
        })
    }

    pub fn config(&self) -> &FssConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<CredentialBroker> {
        &self.broker
    }

    pub fn keys(&self) -> &Arc<DelegatedKeyManager> {
        &self.keys
    }

    pub fn registry(&self) -> &Arc<PolicyRegistryClient> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &AuthorizationOrchestrator {
        &self.orchestrator
    }

    /// Native balance of the delegated key.
    pub async fn key_balance(&self) -> Result<U256, FssError> {
        let address = self.keys.key_address().await?;
        with_timeout(
            "balance",
            self.config.timeouts.network(),
            self.chain.balance(address),
        )
        .await
    }

    pub async fn shutdown(&self) -> Result<(), FssError> {
        with_timeout(
            "disconnect",
            self.config.timeouts.network(),
            self.network.disconnect(),
        )
        .await?;
        tracing::info!(network = %self.network.network_name(), "runtime shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, KEY_IDENTITY, KEY_QUOTA_ID};
    use crate::testing::{test_actor, FakeChain, FakeContracts, FakeNetwork};
    use crate::tools::StaticToolRegistry;

    struct Wiring {
        network: Arc<FakeNetwork>,
        contracts: Arc<FakeContracts>,
        chain: Arc<FakeChain>,
        store: Arc<MemoryStore>,
    }

    impl Wiring {
        fn new(network: &str) -> Self {
            let chain = Arc::new(FakeChain::default());
            chain.set_balance(U256::from(10u64).pow(U256::from(18u64)));
            Self {
                network: Arc::new(FakeNetwork::named(network)),
                contracts: Arc::new(FakeContracts::default()),
                chain,
                store: Arc::new(MemoryStore::new()),
            }
        }

        fn deps(&self) -> FssDependencies {
            FssDependencies {
                actor: Arc::new(test_actor()),
                network: self.network.clone(),
                contracts: self.contracts.clone(),
                chain: self.chain.clone(),
                store: self.store.clone(),
                tools: Arc::new(StaticToolRegistry::with_builtin_tools()),
            }
        }
    }

    #[tokio::test]
    async fn bootstrap_mints_key_and_quota_once() {
        let wiring = Wiring::new("datil");

        let runtime = FssRuntime::bootstrap(FssConfig::default(), wiring.deps())
            .await
            .unwrap();
        assert!(runtime.keys().key().await.is_some());
        assert_eq!(runtime.broker().quota_id().await.as_deref(), Some("100"));
        assert!(wiring.store.get(KEY_IDENTITY).unwrap().is_some());
        assert_eq!(wiring.store.get(KEY_QUOTA_ID).unwrap().as_deref(), Some("100"));

        FssRuntime::bootstrap(FssConfig::default(), wiring.deps())
            .await
            .unwrap();
        assert_eq!(wiring.contracts.key_mints(), 1);
        assert_eq!(wiring.contracts.quota_mints(), 1);
    }

    #[tokio::test]
    async fn unmetered_network_skips_quota() {
        let wiring = Wiring::new("datil-dev");
        let runtime = FssRuntime::bootstrap(FssConfig::default(), wiring.deps())
            .await
            .unwrap();
        assert!(runtime.broker().quota_id().await.is_none());
        assert_eq!(wiring.contracts.quota_mints(), 0);
    }

    #[tokio::test]
    async fn low_actor_balance_stops_bootstrap() {
        let wiring = Wiring::new("datil-dev");
        wiring.chain.set_balance(U256::from(1u64));

        match FssRuntime::bootstrap(FssConfig::default(), wiring.deps()).await {
            Err(FssError::InsufficientBalance { balance, .. }) => assert_eq!(balance, "1"),
            Err(other) => panic!("expected InsufficientBalance, got {:?}", other),
            Ok(_) => panic!("bootstrap should fail"),
        }
        assert_eq!(wiring.contracts.key_mints(), 0);
    }

    #[tokio::test]
    async fn key_balance_and_shutdown() {
        let wiring = Wiring::new("datil-dev");
        let runtime = FssRuntime::bootstrap(FssConfig::default(), wiring.deps())
            .await
            .unwrap();
        assert_eq!(
            runtime.key_balance().await.unwrap(),
            U256::from(10u64).pow(U256::from(18u64))
        );
        runtime.shutdown().await.unwrap();
    }
}
