use crate::credentials::CredentialBroker;
use crate::error::FssError;
use crate::eth;
use crate::network::{with_timeout, KeyContracts, ThresholdNetwork};
use crate::registry::HashSigner;
use crate::store::{Store, KEY_IDENTITY};
use crate::types::{
    Ability, ActionRef, AuthMethodScope, DelegatedKey, ExecutionRequest, ExecutionResponse,
    ExecutionTarget, KeyContext, MintedKey, SessionCredential, ThresholdSignature,
};
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Owns the delegated key identity and every operation that needs a session credential.
pub struct DelegatedKeyManager {
    network: Arc<dyn ThresholdNetwork>,
    contracts: Arc<dyn KeyContracts>,
    broker: Arc<CredentialBroker>,
    store: Arc<dyn Store>,
    timeout: Duration,
    key: RwLock<Option<DelegatedKey>>,
}

impl DelegatedKeyManager {
    /// Builds the manager, loading a previously minted key from `store`.
    pub fn new(
        network: Arc<dyn ThresholdNetwork>,
        contracts: Arc<dyn KeyContracts>,
        broker: Arc<CredentialBroker>,
        store: Arc<dyn Store>,
        timeout: Duration,
    ) -> Result<Self, FssError> {
        let key = match store.get(KEY_IDENTITY)? {
            Some(raw) => Some(serde_json::from_str::<DelegatedKey>(&raw).map_err(|err| {
                FssError::Storage(format!("stored delegated key is corrupt: {}", err))
            })?),
            None => None,
        };
        Ok(Self {
            network,
            contracts,
            broker,
            store,
            timeout,
            key: RwLock::new(key),
        })
    }

    pub async fn key(&self) -> Option<DelegatedKey> {
        self.key.read().await.clone()
    }

    pub async fn require_key(&self) -> Result<DelegatedKey, FssError> {
        self.key().await.ok_or(FssError::KeyNotInitialized)
    }

    pub async fn key_address(&self) -> Result<Address, FssError> {
        let key = self.require_key().await?;
        eth::parse_address(&key.eth_address)
            .map_err(|err| FssError::Storage(format!("delegated key address: {}", err)))
    }

    /// Mints a new delegated key and persists its identity.
    pub async fn create_key(&self) -> Result<MintedKey, FssError> {
        let mut slot = self.key.write().await;
        if let Some(existing) = slot.as_ref() {
            return Err(FssError::KeyAlreadyExists(existing.eth_address.clone()));
        }

        let minted = with_timeout("mint_key", self.timeout, self.contracts.mint_key())
            .await
            .map_err(|err| FssError::KeyCreationFailed(err.to_string()))?;

        let derived = eth::address_from_public_key(&minted.key.public_key)
            .map_err(FssError::KeyCreationFailed)?;
        let claimed =
            eth::parse_address(&minted.key.eth_address).map_err(FssError::KeyCreationFailed)?;
        if derived != claimed {
            return Err(FssError::KeyCreationFailed(format!(
                "minted key address {} does not match its public key ({})",
                minted.key.eth_address,
                eth::checksum(&derived)
            )));
        }

        let raw = serde_json::to_string(&minted.key)?;
        self.store
            .set(KEY_IDENTITY, &raw)
            .map_err(|err| FssError::KeyCreationFailed(err.to_string()))?;
        tracing::info!(
            token_id = %minted.key.token_id,
            address = %minted.key.eth_address,
            tx_hash = %minted.tx_hash,
            "minted delegated key"
        );
        *slot = Some(minted.key.clone());
        Ok(minted)
    }

    /// Grants `action` the right to use the key; defaults to [`AuthMethodScope::SignAnything`].
    pub async fn permit_action(
        &self,
        action: &ActionRef,
        scopes: Option<&[AuthMethodScope]>,
    ) -> Result<String, FssError> {
        let key = self.require_key().await?;
        let scopes = scopes.unwrap_or(&[AuthMethodScope::SignAnything]);
        let tx_hash = with_timeout(
            "add_permitted_action",
            self.timeout,
            self.contracts
                .add_permitted_action(&key.token_id, action, scopes),
        )
        .await?;
        tracing::info!(action = %action, tx_hash = %tx_hash, "permitted action");
        Ok(tx_hash)
    }

    pub async fn list_permitted_actions(&self) -> Result<Vec<ActionRef>, FssError> {
        let key = self.require_key().await?;
        with_timeout(
            "permitted_actions",
            self.timeout,
            self.contracts.permitted_actions(&key.token_id),
        )
        .await
    }

    /// Whether `action` is permitted, comparing encoding-normalized references.
    pub async fn is_permitted(&self, action: &ActionRef) -> Result<bool, FssError> {
        Ok(self
            .list_permitted_actions()
            .await?
            .iter()
            .any(|permitted| permitted == action))
    }

    pub async fn sign(&self, to_sign: &[u8]) -> Result<ThresholdSignature, FssError> {
        let key = self.require_key().await?;
        let credential = self.fresh_credential(&key, Ability::KeySigning).await?;
        with_timeout(
            "threshold_sign",
            self.timeout,
            self.network.sign(&key.public_key, to_sign, &credential),
        )
        .await
    }

    /// Runs `target` remotely with `params` plus the key's `{ethAddress, publicKey}`.
    pub async fn execute_remote(
        &self,
        target: ExecutionTarget,
        params: BTreeMap<String, String>,
    ) -> Result<ExecutionResponse, FssError> {
        let key = self.require_key().await?;
        let credential = self.fresh_credential(&key, Ability::ActionExecution).await?;
        let request = ExecutionRequest {
            target,
            params,
            key_context: KeyContext {
                eth_address: key.eth_address.clone(),
                public_key: key.public_key.clone(),
            },
        };
        tracing::info!(execution = %request.target, "executing remote action");
        with_timeout(
            "execute_action",
            self.timeout,
            self.network.execute(&request, &credential),
        )
        .await
    }

    async fn fresh_credential(
        &self,
        key: &DelegatedKey,
        ability: Ability,
    ) -> Result<SessionCredential, FssError> {
        let address = eth::parse_address(&key.eth_address).map_err(FssError::Storage)?;
        let credential = self.broker.credentials_for(address).await?;
        if credential.is_expired_at(Utc::now()) {
            return Err(FssError::CredentialExpired(credential.expires_at.to_rfc3339()));
        }
        if !credential.allows(ability) {
            return Err(FssError::Network(format!(
                "session credential does not grant {}",
                ability.as_str()
            )));
        }
        Ok(credential)
    }
}

#[async_trait]
impl HashSigner for DelegatedKeyManager {
    async fn signer_address(&self) -> Result<Address, FssError> {
        self.key_address().await
    }

    async fn sign_hash(&self, digest: &B256) -> Result<ThresholdSignature, FssError> {
        self.sign(digest.as_slice()).await
    }
}
