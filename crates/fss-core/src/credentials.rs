use crate::config::{FssConfig, QuotaConfig};
use crate::error::FssError;
use crate::eth;
use crate::identity::ActorIdentity;
use crate::network::{with_timeout, ChallengeSigner, KeyContracts, ThresholdNetwork};
use crate::siwe::{Recap, SiweMessage};
use crate::store::{Store, KEY_QUOTA_ID};
use crate::types::{
    Ability, AuthChallenge, AuthSig, CapacityDelegation, ResourceAbility, SessionCredential,
    SessionRequest,
};
use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const DELEGATION_URI: &str = "lit:capability:delegation";
pub const ANY_ACTION_RESOURCE: &str = "lit-litaction://*";
pub const ANY_KEY_RESOURCE: &str = "lit-pkp://*";
pub const QUOTA_RESOURCE_PREFIX: &str = "lit-ratelimitincrease://";
const SESSION_CHAIN: &str = "ethereum";

/// Rate-limit quota minting options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaOptions {
    pub requests_per_kilosecond: u64,
    pub days_until_utc_midnight_expiration: u32,
}

impl Default for QuotaOptions {
    fn default() -> Self {
        Self {
            requests_per_kilosecond: 10,
            days_until_utc_midnight_expiration: 1,
        }
    }
}

impl From<&QuotaConfig> for QuotaOptions {
    fn from(config: &QuotaConfig) -> Self {
        Self {
            requests_per_kilosecond: config.requests_per_kilosecond,
            days_until_utc_midnight_expiration: config.days_until_utc_midnight_expiration,
        }
    }
}

/// Resources every session credential is scoped to.
pub fn session_capabilities() -> Vec<ResourceAbility> {
    vec![
        ResourceAbility::new(ANY_ACTION_RESOURCE, Ability::ActionExecution),
        ResourceAbility::new(ANY_KEY_RESOURCE, Ability::KeySigning),
    ]
}

/// Issues quota delegations and short-lived session credentials signed by the Actor.
///
/// Credentials are minted per call and never cached; only the quota token id is persisted.
pub struct CredentialBroker {
    actor: Arc<ActorIdentity>,
    network: Arc<dyn ThresholdNetwork>,
    contracts: Arc<dyn KeyContracts>,
    store: Arc<dyn Store>,
    quota: QuotaConfig,
    session_ttl: chrono::Duration,
    timeout: Duration,
    quota_id: RwLock<Option<String>>,
}

impl CredentialBroker {
    pub fn new(
        actor: Arc<ActorIdentity>,
        network: Arc<dyn ThresholdNetwork>,
        contracts: Arc<dyn KeyContracts>,
        store: Arc<dyn Store>,
        config: &FssConfig,
    ) -> Result<Self, FssError> {
        let quota_id = store.get(KEY_QUOTA_ID)?;
        Ok(Self {
            actor,
            network,
            contracts,
            store,
            quota: config.quota.clone(),
            session_ttl: config.session.ttl()?,
            timeout: config.timeouts.network(),
            quota_id: RwLock::new(quota_id),
        })
    }

    fn ttl_expiration(&self) -> Result<DateTime<Utc>, FssError> {
        Utc::now()
            .checked_add_signed(self.session_ttl)
            .ok_or_else(|| FssError::Config("session expiration overflows".to_string()))
    }

    pub fn actor(&self) -> &ActorIdentity {
        &self.actor
    }

    pub fn requires_quota(&self, network: &str) -> bool {
        self.quota.requires_quota(network)
    }

    pub async fn quota_id(&self) -> Option<String> {
        self.quota_id.read().await.clone()
    }

    /// Mints the quota token once for metered networks; later calls return the stored id.
    pub async fn mint_quota(&self, options: QuotaOptions) -> Result<Option<String>, FssError> {
        let network = self.network.network_name().to_string();
        if !self.requires_quota(&network) {
            return Ok(None);
        }

        let mut quota_id = self.quota_id.write().await;
        if let Some(existing) = quota_id.as_ref() {
            return Ok(Some(existing.clone()));
        }

        let minted = with_timeout(
            "mint_capacity_credit",
            self.timeout,
            self.contracts.mint_capacity_credit(
                options.requests_per_kilosecond,
                options.days_until_utc_midnight_expiration,
            ),
        )
        .await?;
        self.store.set(KEY_QUOTA_ID, &minted)?;
        tracing::info!(network = %network, quota_id = %minted, "minted capacity quota");
        *quota_id = Some(minted.clone());
        Ok(Some(minted))
    }

    /// Authorizes `delegatees` to spend `quota_id`.
    pub async fn capacity_delegation(
        &self,
        quota_id: &str,
        delegatees: &[Address],
        uses: Option<&str>,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<CapacityDelegation, FssError> {
        let uses = uses
            .unwrap_or(self.quota.delegation_uses.as_str())
            .to_string();
        let expiration = match expiration {
            Some(expiration) => expiration,
            None => self.ttl_expiration()?,
        };
        let delegate_to: Vec<String> = delegatees
            .iter()
            .map(|address| hex::encode(address.as_slice()))
            .collect();

        let nonce = with_timeout(
            "latest_blockhash",
            self.timeout,
            self.network.latest_blockhash(),
        )
        .await?;

        let resource = format!("{}{}", QUOTA_RESOURCE_PREFIX, quota_id);
        let recap = Recap::new().grant(
            &resource,
            "Auth/Auth",
            json!({
                "nft_id": [quota_id],
                "uses": uses,
                "delegate_to": delegate_to,
            }),
        );
        let message = SiweMessage::new(self.actor.checksum_address(), DELEGATION_URI, nonce)
            .with_statement(format!(
                "I further authorize the stated URI to perform the following actions on my behalf: (1) 'Auth': 'Auth' for '{}'.",
                resource
            ))
            .with_expiration(expiration)
            .with_resource(recap.to_urn())
            .render();

        Ok(CapacityDelegation {
            auth_sig: self.actor.personal_sign(&message)?,
            quota_id: quota_id.to_string(),
            delegatees: delegatees.iter().map(eth::checksum).collect(),
            uses,
            expiration,
        })
    }

    /// Mints a fresh session credential scoped to action execution and key signing.
    pub async fn session_credential(
        &self,
        delegation: Option<&CapacityDelegation>,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<SessionCredential, FssError> {
        let expiration = match expiration {
            Some(expiration) => expiration,
            None => self.ttl_expiration()?,
        };
        let request = SessionRequest {
            chain: SESSION_CHAIN.to_string(),
            expiration,
            resource_abilities: session_capabilities(),
            capability_auth_sigs: delegation
                .map(|delegation| vec![delegation.auth_sig.clone()])
                .unwrap_or_default(),
        };

        let credential = with_timeout(
            "issue_session_credential",
            self.timeout,
            self.network.issue_session_credential(&request, self),
        )
        .await?;
        tracing::debug!(expires_at = %credential.expires_at, "issued session credential");
        Ok(credential)
    }

    /// Per-call credential flow for `delegatee`: quota delegation when metered, then a session.
    pub async fn credentials_for(&self, delegatee: Address) -> Result<SessionCredential, FssError> {
        let network = self.network.network_name().to_string();
        let delegation = if self.requires_quota(&network) {
            let quota_id = self
                .quota_id()
                .await
                .ok_or_else(|| FssError::QuotaMissing(network.clone()))?;
            Some(
                self.capacity_delegation(&quota_id, &[delegatee], None, None)
                    .await?,
            )
        } else {
            None
        };
        self.session_credential(delegation.as_ref(), None).await
    }
}

#[async_trait]
impl ChallengeSigner for CredentialBroker {
    async fn sign_challenge(&self, challenge: &AuthChallenge) -> Result<AuthSig, FssError> {
        let recap = challenge
            .resource_abilities
            .iter()
            .fold(Recap::new(), |recap, grant| {
                recap.grant(&grant.resource, grant.ability.recap_ability(), json!({}))
            });
        let message = SiweMessage::new(
            self.actor.checksum_address(),
            challenge.uri.clone(),
            challenge.nonce.clone(),
        )
        .with_statement("Authorize session credentials for the delegated key.")
        .with_expiration(challenge.expiration)
        .with_resource(recap.to_urn())
        .render();
        self.actor.personal_sign(&message)
    }
}
