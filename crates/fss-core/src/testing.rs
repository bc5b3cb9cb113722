//! In-crate fakes for unit tests.

use crate::abi::{self, ParamType, Token};
use crate::chain::{CallRequest, ChainRpc};
use crate::error::FssError;
use crate::eth;
use crate::identity::ActorIdentity;
use crate::network::{ChallengeSigner, KeyContracts, ThresholdNetwork};
use crate::registry::{HashSigner, GET_POLICY_SIGNATURE, GET_REGISTERED_SIGNATURE};
use crate::types::{
    ActionRef, AuthChallenge, AuthMethodScope, DelegatedKey, ExecutionRequest, ExecutionResponse,
    MintedKey, SessionCredential, SessionRequest, ThresholdSignature,
};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn test_actor() -> ActorIdentity {
    ActorIdentity::from_signing_key(SigningKey::from_slice(&[0x42; 32]).unwrap())
}

pub fn delegated_signing_key() -> SigningKey {
    SigningKey::from_slice(&[0x24; 32]).unwrap()
}

pub fn delegated_key() -> DelegatedKey {
    let key = delegated_signing_key();
    let point = key.verifying_key().to_encoded_point(false);
    DelegatedKey {
        token_id: "1".to_string(),
        public_key: format!("0x{}", hex::encode(point.as_bytes())),
        eth_address: eth::checksum(&eth::address_from_verifying_key(key.verifying_key())),
    }
}

fn signature_with(key: &SigningKey, digest: &[u8]) -> Result<ThresholdSignature, FssError> {
    if digest.len() != 32 {
        return Err(FssError::Network("expected a 32-byte digest".to_string()));
    }
    let (r, s, parity) =
        eth::sign_digest(key, &B256::from_slice(digest)).map_err(FssError::Network)?;
    Ok(ThresholdSignature { r, s, v: Some(parity) })
}

pub struct FakeNetwork {
    name: String,
    issued: AtomicUsize,
    executions: Mutex<Vec<ExecutionRequest>>,
    response: Mutex<ExecutionResponse>,
}

impl FakeNetwork {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            issued: AtomicUsize::new(0),
            executions: Mutex::new(Vec::new()),
            response: Mutex::new(ExecutionResponse {
                logs: String::new(),
                response: Some(serde_json::json!({"status": "success"})),
            }),
        }
    }

    pub fn respond_with(&self, response: ExecutionResponse) {
        *self.response.lock().unwrap() = response;
    }

    pub fn executions(&self) -> usize {
        self.executions.lock().unwrap().len()
    }

    pub fn credentials_issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn last_execution(&self) -> Option<ExecutionRequest> {
        self.executions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ThresholdNetwork for FakeNetwork {
    fn network_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), FssError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), FssError> {
        Ok(())
    }

    async fn latest_blockhash(&self) -> Result<String, FssError> {
        Ok(format!("0x{}", "ab".repeat(32)))
    }

    async fn issue_session_credential(
        &self,
        request: &SessionRequest,
        signer: &dyn ChallengeSigner,
    ) -> Result<SessionCredential, FssError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let challenge = AuthChallenge {
            uri: format!("lit:session:{}", n),
            nonce: format!("0x{:064x}", n),
            expiration: request.expiration,
            resource_abilities: request.resource_abilities.clone(),
        };
        let proof = signer.sign_challenge(&challenge).await?;
        Ok(SessionCredential {
            proof,
            capabilities: request.resource_abilities.clone(),
            expires_at: request.expiration,
            node_signatures: BTreeMap::from([
                ("node-0".to_string(), format!("sig-{}", n)),
                (
                    "delegations".to_string(),
                    request.capability_auth_sigs.len().to_string(),
                ),
            ]),
        })
    }

    async fn sign(
        &self,
        _public_key: &str,
        to_sign: &[u8],
        _credential: &SessionCredential,
    ) -> Result<ThresholdSignature, FssError> {
        signature_with(&delegated_signing_key(), to_sign)
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        _credential: &SessionCredential,
    ) -> Result<ExecutionResponse, FssError> {
        self.executions.lock().unwrap().push(request.clone());
        Ok(self.response.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeContracts {
    key_mints: AtomicUsize,
    quota_mints: AtomicUsize,
    permitted: Mutex<Vec<ActionRef>>,
    scopes: Mutex<Vec<AuthMethodScope>>,
}

impl FakeContracts {
    pub fn key_mints(&self) -> usize {
        self.key_mints.load(Ordering::SeqCst)
    }

    pub fn quota_mints(&self) -> usize {
        self.quota_mints.load(Ordering::SeqCst)
    }

    pub fn last_scopes(&self) -> Vec<AuthMethodScope> {
        self.scopes.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeyContracts for FakeContracts {
    async fn mint_key(&self) -> Result<MintedKey, FssError> {
        self.key_mints.fetch_add(1, Ordering::SeqCst);
        Ok(MintedKey {
            key: delegated_key(),
            tx_hash: format!("0x{}", "01".repeat(32)),
            receipt: serde_json::json!({"status": 1}),
        })
    }

    async fn add_permitted_action(
        &self,
        _token_id: &str,
        action: &ActionRef,
        scopes: &[AuthMethodScope],
    ) -> Result<String, FssError> {
        self.permitted
            .lock()
            .unwrap()
            .push(ActionRef::new(action.to_hex()));
        *self.scopes.lock().unwrap() = scopes.to_vec();
        Ok(format!("0x{}", "02".repeat(32)))
    }

    async fn permitted_actions(&self, _token_id: &str) -> Result<Vec<ActionRef>, FssError> {
        Ok(self.permitted.lock().unwrap().clone())
    }

    async fn mint_capacity_credit(
        &self,
        _requests_per_kilosecond: u64,
        _days_until_utc_midnight_expiration: u32,
    ) -> Result<String, FssError> {
        let n = self.quota_mints.fetch_add(1, Ordering::SeqCst);
        Ok((100 + n).to_string())
    }
}

/// Signs digests locally; the impostor claims the delegated address but signs with another key.
pub struct LocalHashSigner {
    claimed: Address,
    key: SigningKey,
}

impl LocalHashSigner {
    pub fn honest() -> Self {
        let key = delegated_signing_key();
        Self {
            claimed: eth::address_from_verifying_key(key.verifying_key()),
            key,
        }
    }

    pub fn impostor() -> Self {
        Self {
            claimed: Self::honest().claimed,
            key: SigningKey::from_slice(&[0x99; 32]).unwrap(),
        }
    }

    pub fn address(&self) -> Address {
        self.claimed
    }
}

#[async_trait]
impl HashSigner for LocalHashSigner {
    async fn signer_address(&self) -> Result<Address, FssError> {
        Ok(self.claimed)
    }

    async fn sign_hash(&self, digest: &B256) -> Result<ThresholdSignature, FssError> {
        signature_with(&self.key, digest.as_slice())
    }
}

type PolicyKey = (Address, String);

#[derive(Default)]
pub struct FakeChain {
    estimate: Mutex<Option<U256>>,
    estimate_error: Mutex<Option<String>>,
    last_estimate: Mutex<Option<CallRequest>>,
    sent: Mutex<Vec<Vec<u8>>>,
    policies: Mutex<BTreeMap<PolicyKey, (Vec<u8>, String)>>,
    balance: Mutex<U256>,
    base_fee: Mutex<Option<Option<U256>>>,
}

impl FakeChain {
    pub fn set_base_fee(&self, base_fee: Option<U256>) {
        *self.base_fee.lock().unwrap() = Some(base_fee);
    }

    pub fn set_estimate(&self, estimate: U256) {
        *self.estimate.lock().unwrap() = Some(estimate);
    }

    pub fn fail_estimates(&self, message: &str) {
        *self.estimate_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_balance(&self, balance: U256) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn last_estimate(&self) -> Option<CallRequest> {
        self.last_estimate.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn seed_policy(&self, owner: Address, action: &str, policy: Vec<u8>, version: &str) {
        self.policies
            .lock()
            .unwrap()
            .insert((owner, action.to_string()), (policy, version.to_string()));
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn chain_id(&self) -> Result<u64, FssError> {
        Ok(175188)
    }

    async fn balance(&self, _address: Address) -> Result<U256, FssError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64, FssError> {
        Ok(self.sent.lock().unwrap().len() as u64)
    }

    async fn gas_price(&self) -> Result<U256, FssError> {
        Ok(U256::from(40u64))
    }

    async fn latest_base_fee(&self) -> Result<Option<U256>, FssError> {
        Ok(self
            .base_fee
            .lock()
            .unwrap()
            .unwrap_or(Some(U256::from(10u64))))
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, FssError> {
        *self.last_estimate.lock().unwrap() = Some(request.clone());
        if let Some(message) = self.estimate_error.lock().unwrap().clone() {
            return Err(FssError::Chain(message));
        }
        Ok(self
            .estimate
            .lock()
            .unwrap()
            .unwrap_or(U256::from(50_000u64)))
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, FssError> {
        let (selector, args) = request.data.split_at(4);
        let policies = self.policies.lock().unwrap();
        if selector == abi::selector(GET_POLICY_SIGNATURE) {
            let tokens = abi::decode(&[ParamType::Address, ParamType::String], args)
                .map_err(FssError::Chain)?;
            let (Token::Address(owner), Token::String(action)) = (&tokens[0], &tokens[1]) else {
                return Err(FssError::Chain("bad getActionPolicy args".to_string()));
            };
            let (policy, version) = policies
                .get(&(*owner, action.clone()))
                .cloned()
                .unwrap_or_default();
            return Ok(Bytes::from(abi::encode(&[
                Token::Bytes(policy),
                Token::String(version),
            ])));
        }
        if selector == abi::selector(GET_REGISTERED_SIGNATURE) {
            let tokens = abi::decode(&[ParamType::Address], args).map_err(FssError::Chain)?;
            let Token::Address(owner) = &tokens[0] else {
                return Err(FssError::Chain("bad getRegisteredActions args".to_string()));
            };
            let owned: Vec<_> = policies
                .iter()
                .filter(|((holder, _), _)| holder == owner)
                .collect();
            return Ok(Bytes::from(abi::encode(&[
                Token::Array(
                    owned
                        .iter()
                        .map(|((_, action), _)| Token::String(action.clone()))
                        .collect(),
                ),
                Token::Array(
                    owned
                        .iter()
                        .map(|(_, (policy, _))| Token::Bytes(policy.clone()))
                        .collect(),
                ),
                Token::Array(
                    owned
                        .iter()
                        .map(|(_, (_, version))| Token::String(version.clone()))
                        .collect(),
                ),
            ])));
        }
        Err(FssError::Chain("unknown selector".to_string()))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, FssError> {
        self.sent.lock().unwrap().push(raw.to_vec());
        Ok(keccak256(raw))
    }
}
