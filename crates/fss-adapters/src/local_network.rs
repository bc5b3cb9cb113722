//! Deterministic in-process threshold network and key contracts.
//!
//! Delegated keys are derived from a seed and held in a shared [`LocalKeyVault`], so the network
//! and the contracts agree on which key exists and what it may run.

use alloy_primitives::{keccak256, B256};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fss_core::credentials::QUOTA_RESOURCE_PREFIX;
use fss_core::error::FssError;
use fss_core::eth;
use fss_core::identity::verify_auth_sig;
use fss_core::network::{ChallengeSigner, KeyContracts, ThresholdNetwork};
use fss_core::siwe::{resources_of, Recap};
use fss_core::types::{
    Ability, ActionRef, AuthChallenge, AuthMethodScope, AuthSig, DelegatedKey, ExecutionRequest,
    ExecutionResponse, ExecutionTarget, MintedKey, SessionCredential, SessionRequest,
    ThresholdSignature,
};
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

const LOCAL_NODES: usize = 3;

struct LocalKey {
    signing: SigningKey,
    identity: DelegatedKey,
    permitted: Vec<(ActionRef, Vec<AuthMethodScope>)>,
}

#[derive(Debug, Clone)]
pub struct QuotaToken {
    pub id: String,
    pub requests_per_kilosecond: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct VaultState {
    keys: BTreeMap<String, LocalKey>,
    quotas: BTreeMap<String, QuotaToken>,
    next_token: u64,
    next_quota: u64,
}

/// Key material and contract state shared by the local network and contracts.
#[derive(Clone)]
pub struct LocalKeyVault {
    seed: String,
    state: Arc<Mutex<VaultState>>,
}

impl LocalKeyVault {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            state: Arc::new(Mutex::new(VaultState::default())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, VaultState>, FssError> {
        self.state
            .lock()
            .map_err(|_| FssError::Network("local key vault lock poisoned".to_string()))
    }

    pub fn key_count(&self) -> usize {
        self.lock().map(|state| state.keys.len()).unwrap_or_default()
    }

    pub fn quota(&self, id: &str) -> Option<QuotaToken> {
        self.lock().ok()?.quotas.get(id).cloned()
    }

    fn derive_key(&self, token_id: u64) -> Result<SigningKey, FssError> {
        let secret = keccak256(format!("{}:delegated-key:{}", self.seed, token_id));
        SigningKey::from_slice(secret.as_slice())
            .map_err(|err| FssError::Network(format!("derive key {}: {}", token_id, err)))
    }

    fn with_key_by_public<T>(
        &self,
        public_key: &str,
        f: impl FnOnce(&LocalKey) -> Result<T, FssError>,
    ) -> Result<T, FssError> {
        let wanted = public_key.trim_start_matches("0x").to_ascii_lowercase();
        let state = self.lock()?;
        let key = state
            .keys
            .values()
            .find(|key| key.identity.public_key.trim_start_matches("0x") == wanted)
            .ok_or_else(|| FssError::Network(format!("unknown delegated key {}", public_key)))?;
        f(key)
    }
}

/// Handles one registered action.
pub trait ActionHandler: Send + Sync {
    /// `js_params` is `{params, pkp: {ethAddress, publicKey}}`.
    fn run(&self, js_params: &Value) -> ExecutionResponse;
}

impl<F> ActionHandler for F
where
    F: Fn(&Value) -> ExecutionResponse + Send + Sync,
{
    fn run(&self, js_params: &Value) -> ExecutionResponse {
        self(js_params)
    }
}

/// ERC-20 transfer stand-in: checks its inputs and reports a deterministic transfer hash.
#[derive(Debug, Clone, Default)]
pub struct SimulatedErc20Transfer;

impl ActionHandler for SimulatedErc20Transfer {
    fn run(&self, js_params: &Value) -> ExecutionResponse {
        let params = &js_params["params"];
        let field = |name: &str| params[name].as_str().unwrap_or_default().to_string();
        let (token, recipient, amount) =
            (field("tokenIn"), field("recipientAddress"), field("amountIn"));

        let checked = eth::parse_address(&token)
            .map_err(|err| format!("tokenIn: {}", err))
            .and_then(|_| {
                eth::parse_address(&recipient).map_err(|err| format!("recipientAddress: {}", err))
            })
            .and_then(|_| {
                eth::parse_units(&amount, eth::DEFAULT_TOKEN_DECIMALS)
                    .map_err(|err| format!("amountIn: {}", err))
            });
        match checked {
            Ok(units) if units.is_zero() => ExecutionResponse {
                logs: String::new(),
                response: Some(json!({
                    "status": "error",
                    "error": "Transfer failed",
                    "reason": "amount must be greater than zero",
                })),
            },
            Ok(units) => {
                let sender = js_params["pkp"]["ethAddress"].as_str().unwrap_or_default();
                let transfer_hash =
                    keccak256(format!("{}:{}:{}:{}", sender, token, recipient, units));
                ExecutionResponse {
                    logs: format!("transfer of {} base units to {} submitted\n", units, recipient),
                    response: Some(json!({
                        "status": "success",
                        "transferHash": transfer_hash.to_string(),
                    })),
                }
            }
            Err(reason) => ExecutionResponse {
                logs: format!("Error: {}\n", reason),
                response: None,
            },
        }
    }
}

/// In-process threshold network backed by a [`LocalKeyVault`].
pub struct LocalThresholdNetwork {
    name: String,
    vault: LocalKeyVault,
    metered: bool,
    connected: AtomicBool,
    block: AtomicU64,
    handlers: RwLock<BTreeMap<String, Arc<dyn ActionHandler>>>,
}

impl LocalThresholdNetwork {
    pub fn new(name: impl Into<String>, vault: LocalKeyVault) -> Self {
        Self {
            name: name.into(),
            vault,
            metered: false,
            connected: AtomicBool::new(false),
            block: AtomicU64::new(1),
            handlers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Requires a capacity delegation on every session request.
    pub fn metered(mut self, metered: bool) -> Self {
        self.metered = metered;
        self
    }

    pub fn register_action(
        &self,
        action: &ActionRef,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<(), FssError> {
        self.handlers
            .write()
            .map_err(|_| FssError::Network("handler table lock poisoned".to_string()))?
            .insert(action.canonical(), handler);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn require_connected(&self) -> Result<(), FssError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(FssError::Network(format!("not connected to {}", self.name)))
        }
    }

    fn check_delegation(&self, sigs: &[AuthSig]) -> Result<(), FssError> {
        for sig in sigs {
            verify_auth_sig(sig)?;
            let granted = resources_of(&sig.signed_message)
                .iter()
                .filter_map(|urn| Recap::decode_urn(urn))
                .filter_map(|recap| recap["att"].as_object().cloned())
                .flat_map(|att| att.keys().cloned().collect::<Vec<_>>())
                .filter_map(|resource| {
                    resource
                        .strip_prefix(QUOTA_RESOURCE_PREFIX)
                        .map(str::to_string)
                })
                .any(|quota_id| {
                    self.vault
                        .quota(&quota_id)
                        .map(|quota| quota.expires_at > Utc::now())
                        .unwrap_or(false)
                });
            if granted {
                return Ok(());
            }
        }
        Err(FssError::Network(format!(
            "{} requires a capacity delegation for a live quota",
            self.name
        )))
    }

    fn check_credential(
        &self,
        credential: &SessionCredential,
        ability: Ability,
    ) -> Result<(), FssError> {
        self.require_connected()?;
        if credential.is_expired_at(Utc::now()) {
            return Err(FssError::CredentialExpired(credential.expires_at.to_rfc3339()));
        }
        if !credential.allows(ability) {
            return Err(FssError::Network(format!(
                "session credential does not grant {}",
                ability.as_str()
            )));
        }
        verify_auth_sig(&credential.proof)?;
        Ok(())
    }
}

#[async_trait]
impl ThresholdNetwork for LocalThresholdNetwork {
    fn network_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), FssError> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(network = %self.name, "local network connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), FssError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn latest_blockhash(&self) -> Result<String, FssError> {
        self.require_connected()?;
        let height = self.block.fetch_add(1, Ordering::SeqCst);
        Ok(keccak256(format!("{}:block:{}", self.name, height)).to_string())
    }

    async fn issue_session_credential(
        &self,
        request: &SessionRequest,
        signer: &dyn ChallengeSigner,
    ) -> Result<SessionCredential, FssError> {
        self.require_connected()?;
        if request.expiration <= Utc::now() {
            return Err(FssError::CredentialExpired(request.expiration.to_rfc3339()));
        }
        if self.metered {
            self.check_delegation(&request.capability_auth_sigs)?;
        }

        let challenge = AuthChallenge {
            uri: format!("lit:session:{}", uuid::Uuid::new_v4()),
            nonce: self.latest_blockhash().await?,
            expiration: request.expiration,
            resource_abilities: request.resource_abilities.clone(),
        };
        let proof = signer.sign_challenge(&challenge).await?;
        verify_auth_sig(&proof)?;
        if !proof.signed_message.contains(&challenge.nonce) {
            return Err(FssError::Network(
                "session proof does not answer the challenge nonce".to_string(),
            ));
        }

        let node_signatures = (0..LOCAL_NODES)
            .map(|node| {
                (
                    format!("node-{}", node),
                    keccak256(format!("{}:{}", proof.sig, node)).to_string(),
                )
            })
            .collect();
        Ok(SessionCredential {
            proof,
            capabilities: request.resource_abilities.clone(),
            expires_at: request.expiration,
            node_signatures,
        })
    }

    async fn sign(
        &self,
        public_key: &str,
        to_sign: &[u8],
        credential: &SessionCredential,
    ) -> Result<ThresholdSignature, FssError> {
        self.check_credential(credential, Ability::KeySigning)?;
        if to_sign.len() != 32 {
            return Err(FssError::Network(format!(
                "expected a 32-byte digest, got {} bytes",
                to_sign.len()
            )));
        }
        let digest = B256::from_slice(to_sign);
        self.vault.with_key_by_public(public_key, |key| {
            let (r, s, parity) =
                eth::sign_digest(&key.signing, &digest).map_err(FssError::Network)?;
            Ok(ThresholdSignature {
                r,
                s,
                v: Some(parity),
            })
        })
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        credential: &SessionCredential,
    ) -> Result<ExecutionResponse, FssError> {
        self.check_credential(credential, Ability::ActionExecution)?;
        let ExecutionTarget::Action(action) = &request.target else {
            return Err(FssError::Network(
                "the local network only runs registered actions".to_string(),
            ));
        };

        let permitted = self
            .vault
            .with_key_by_public(&request.key_context.public_key, |key| {
                Ok(key.permitted.iter().any(|(allowed, _)| allowed == action))
            })?;
        if !permitted {
            return Err(FssError::Network(format!(
                "action {} is not permitted to use {}",
                action, request.key_context.eth_address
            )));
        }

        let handler = self
            .handlers
            .read()
            .map_err(|_| FssError::Network("handler table lock poisoned".to_string()))?
            .get(&action.canonical())
            .cloned()
            .ok_or_else(|| FssError::Network(format!("no code stored for action {}", action)))?;
        Ok(handler.run(&request.js_params()))
    }
}

/// Key minting, permission and quota contracts over a [`LocalKeyVault`].
#[derive(Clone)]
pub struct LocalKeyContracts {
    vault: LocalKeyVault,
}

impl LocalKeyContracts {
    pub fn new(vault: LocalKeyVault) -> Self {
        Self { vault }
    }
}

fn local_tx_hash(kind: &str, id: &str) -> String {
    keccak256(format!("{}:{}", kind, id)).to_string()
}

#[async_trait]
impl KeyContracts for LocalKeyContracts {
    async fn mint_key(&self) -> Result<MintedKey, FssError> {
        let token_id = {
            let mut state = self.vault.lock()?;
            state.next_token += 1;
            state.next_token
        };
        let signing = self.vault.derive_key(token_id)?;
        let point = signing.verifying_key().to_encoded_point(false);
        let identity = DelegatedKey {
            token_id: token_id.to_string(),
            public_key: format!("0x{}", hex::encode(point.as_bytes())),
            eth_address: eth::checksum(&eth::address_from_verifying_key(signing.verifying_key())),
        };

        self.vault.lock()?.keys.insert(
            identity.token_id.clone(),
            LocalKey {
                signing,
                identity: identity.clone(),
                permitted: Vec::new(),
            },
        );
        let tx_hash = local_tx_hash("mint", &identity.token_id);
        Ok(MintedKey {
            receipt: json!({"status": 1, "transactionHash": tx_hash, "tokenId": identity.token_id}),
            key: identity,
            tx_hash,
        })
    }

    async fn add_permitted_action(
        &self,
        token_id: &str,
        action: &ActionRef,
        scopes: &[AuthMethodScope],
    ) -> Result<String, FssError> {
        let mut state = self.vault.lock()?;
        let key = state
            .keys
            .get_mut(token_id)
            .ok_or_else(|| FssError::Network(format!("unknown key token {}", token_id)))?;
        let stored = ActionRef::new(action.to_hex());
        key.permitted.retain(|(existing, _)| existing != &stored);
        key.permitted.push((stored, scopes.to_vec()));
        Ok(local_tx_hash(
            "permit",
            &format!("{}:{}", token_id, action.canonical()),
        ))
    }

    async fn permitted_actions(&self, token_id: &str) -> Result<Vec<ActionRef>, FssError> {
        let state = self.vault.lock()?;
        let key = state
            .keys
            .get(token_id)
            .ok_or_else(|| FssError::Network(format!("unknown key token {}", token_id)))?;
        Ok(key.permitted.iter().map(|(action, _)| action.clone()).collect())
    }

    async fn mint_capacity_credit(
        &self,
        requests_per_kilosecond: u64,
        days_until_utc_midnight_expiration: u32,
    ) -> Result<String, FssError> {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|start| start.and_utc())
            .ok_or_else(|| FssError::Network("cannot compute UTC midnight".to_string()))?;
        let expires_at = ChronoDuration::try_days(i64::from(days_until_utc_midnight_expiration) + 1)
            .and_then(|days| midnight.checked_add_signed(days))
            .ok_or_else(|| {
                FssError::Network(format!(
                    "quota expiry out of range: {} days",
                    days_until_utc_midnight_expiration
                ))
            })?;

        let mut state = self.vault.lock()?;
        state.next_quota += 1;
        let id = state.next_quota.to_string();
        state.quotas.insert(
            id.clone(),
            QuotaToken {
                id: id.clone(),
                requests_per_kilosecond,
                expires_at,
            },
        );
        Ok(id)
    }
}
