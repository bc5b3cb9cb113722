//! Ports to the threshold-signing network and its on-chain key contracts.

use crate::error::FssError;
use crate::types::{
    ActionRef, AuthChallenge, AuthMethodScope, AuthSig, ExecutionRequest, ExecutionResponse,
    MintedKey, SessionCredential, SessionRequest, ThresholdSignature,
};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Answers the network's sign-in challenge while a session credential is issued.
#[async_trait]
pub trait ChallengeSigner: Send + Sync {
    async fn sign_challenge(&self, challenge: &AuthChallenge) -> Result<AuthSig, FssError>;
}

/// Threshold-signing network client.
#[async_trait]
pub trait ThresholdNetwork: Send + Sync {
    fn network_name(&self) -> &str;

    async fn connect(&self) -> Result<(), FssError>;

    async fn disconnect(&self) -> Result<(), FssError>;

    /// Fresh nonce source for sign-in messages.
    async fn latest_blockhash(&self) -> Result<String, FssError>;

    async fn issue_session_credential(
        &self,
        request: &SessionRequest,
        signer: &dyn ChallengeSigner,
    ) -> Result<SessionCredential, FssError>;

    /// Signs `to_sign` with the delegated key identified by `public_key`.
    async fn sign(
        &self,
        public_key: &str,
        to_sign: &[u8],
        credential: &SessionCredential,
    ) -> Result<ThresholdSignature, FssError>;

    async fn execute(
        &self,
        request: &ExecutionRequest,
        credential: &SessionCredential,
    ) -> Result<ExecutionResponse, FssError>;
}

/// On-chain contracts that mint delegated keys, hold their permissions and meter usage.
#[async_trait]
pub trait KeyContracts: Send + Sync {
    async fn mint_key(&self) -> Result<MintedKey, FssError>;

    /// Returns the transaction hash of the permission grant.
    async fn add_permitted_action(
        &self,
        token_id: &str,
        action: &ActionRef,
        scopes: &[AuthMethodScope],
    ) -> Result<String, FssError>;

    async fn permitted_actions(&self, token_id: &str) -> Result<Vec<ActionRef>, FssError>;

    /// Mints a capacity quota token and returns its id.
    async fn mint_capacity_credit(
        &self,
        requests_per_kilosecond: u64,
        days_until_utc_midnight_expiration: u32,
    ) -> Result<String, FssError>;
}

/// Bounds a network future with a deadline.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Duration,
    future: F,
) -> Result<T, FssError>
where
    F: Future<Output = Result<T, FssError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_secs = limit.as_secs(), "network call timed out");
            Err(FssError::Timeout {
                operation,
                after: limit,
            })
        }
    }
}
