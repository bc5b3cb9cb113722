use crate::abi::{self, ParamType, Token};
use crate::chain::{CallRequest, ChainRpc};
use crate::error::{FssError, RegistrationStage};
use crate::eth;
use crate::network::with_timeout;
use crate::policy::{PolicyDraft, PolicyKind, ToolPolicy};
use crate::tx::{gas_limit_with_headroom, Eip1559Transaction, FeeQuote};
use crate::types::{ActionRef, ThresholdSignature};
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const SET_POLICY_SIGNATURE: &str = "setActionPolicy(string,bytes,string)";
pub const REMOVE_POLICY_SIGNATURE: &str = "removeActionPolicy(string)";
pub const GET_POLICY_SIGNATURE: &str = "getActionPolicy(address,string)";
pub const GET_REGISTERED_SIGNATURE: &str = "getRegisteredActions(address)";

/// Action id used to check that the registry contract answers reads.
const PROBE_ACTION: &str = "QmProbeRegistryAvailability";

/// Signs transaction digests on behalf of the policy owner.
#[async_trait]
pub trait HashSigner: Send + Sync {
    async fn signer_address(&self) -> Result<Address, FssError>;

    async fn sign_hash(&self, digest: &B256) -> Result<ThresholdSignature, FssError>;
}

/// Raw policy record as stored on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredPolicy {
    pub action: ActionRef,
    pub policy: Bytes,
    pub version: String,
}

impl RegisteredPolicy {
    pub fn decode(&self, kind: PolicyKind) -> Result<ToolPolicy, FssError> {
        ToolPolicy::decode(kind, &self.policy, &self.version)
    }
}

/// Picks the recovery parity whose public key matches `expected`.
pub fn recover_parity(
    digest: &B256,
    signature: &ThresholdSignature,
    expected: Address,
) -> Result<u8, FssError> {
    for parity in [0u8, 1u8] {
        match eth::recover_address(digest, &signature.r, &signature.s, parity) {
            Ok(address) if address == expected => return Ok(parity),
            Ok(_) => {}
            Err(err) => tracing::debug!(parity, error = %err, "recovery candidate rejected"),
        }
    }
    Err(FssError::SignatureRecoveryFailed {
        expected: eth::checksum(&expected),
    })
}

/// Reads and writes per-owner action policies on the registry contract.
pub struct PolicyRegistryClient {
    chain: Arc<dyn ChainRpc>,
    signer: Arc<dyn HashSigner>,
    contract: Address,
    timeout: Duration,
}

impl PolicyRegistryClient {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        signer: Arc<dyn HashSigner>,
        contract: Address,
        timeout: Duration,
    ) -> Self {
        Self {
            chain,
            signer,
            contract,
            timeout,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub async fn set_policy(
        &self,
        action: &ActionRef,
        policy: &PolicyDraft,
    ) -> Result<B256, FssError> {
        let encoded = policy.encode().map_err(|err| {
            FssError::registration(RegistrationStage::Encode, action.as_str(), Some(policy), err)
        })?;
        let data = abi::encode_call(
            SET_POLICY_SIGNATURE,
            &[
                Token::String(action.as_str().to_string()),
                Token::Bytes(encoded),
                Token::String(policy.version().to_string()),
            ],
        );
        let tx_hash = self.submit(action, Some(policy), data).await?;
        tracing::info!(action = %action, version = %policy.version(), tx_hash = %tx_hash, "registered policy");
        Ok(tx_hash)
    }

    pub async fn remove_policy(&self, action: &ActionRef) -> Result<B256, FssError> {
        let data = abi::encode_call(
            REMOVE_POLICY_SIGNATURE,
            &[Token::String(action.as_str().to_string())],
        );
        let tx_hash = self.submit(action, None, data).await?;
        tracing::info!(action = %action, tx_hash = %tx_hash, "removed policy");
        Ok(tx_hash)
    }

    /// Policy of the signing key for `action`, or `None` when nothing is registered.
    pub async fn get_policy(&self, action: &ActionRef) -> Result<Option<RegisteredPolicy>, FssError> {
        let owner = self.signer.signer_address().await?;
        self.get_policy_for(owner, action).await
    }

    pub async fn get_policy_for(
        &self,
        owner: Address,
        action: &ActionRef,
    ) -> Result<Option<RegisteredPolicy>, FssError> {
        let data = abi::encode_call(
            GET_POLICY_SIGNATURE,
            &[
                Token::Address(owner),
                Token::String(action.as_str().to_string()),
            ],
        );
        let output = self.read(data).await?;
        let tokens = abi::decode(&[ParamType::Bytes, ParamType::String], &output)
            .map_err(|err| FssError::Chain(format!("getActionPolicy output: {}", err)))?;

        match tokens.as_slice() {
            [Token::Bytes(policy), Token::String(version)] => {
                if policy.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(RegisteredPolicy {
                        action: action.clone(),
                        policy: Bytes::from(policy.clone()),
                        version: version.clone(),
                    }))
                }
            }
            _ => Err(FssError::Chain(
                "getActionPolicy returned unexpected types".to_string(),
            )),
        }
    }

    pub async fn get_all_policies(&self) -> Result<Vec<RegisteredPolicy>, FssError> {
        let owner = self.signer.signer_address().await?;
        self.get_all_policies_for(owner).await
    }

    pub async fn get_all_policies_for(
        &self,
        owner: Address,
    ) -> Result<Vec<RegisteredPolicy>, FssError> {
        let data = abi::encode_call(GET_REGISTERED_SIGNATURE, &[Token::Address(owner)]);
        let output = self.read(data).await?;
        let list = |item: ParamType| ParamType::Array(Box::new(item));
        let tokens = abi::decode(
            &[
                list(ParamType::String),
                list(ParamType::Bytes),
                list(ParamType::String),
            ],
            &output,
        )
        .map_err(|err| FssError::Chain(format!("getRegisteredActions output: {}", err)))?;

        let [Token::Array(actions), Token::Array(policies), Token::Array(versions)] =
            tokens.as_slice()
        else {
            return Err(FssError::Chain(
                "getRegisteredActions returned unexpected types".to_string(),
            ));
        };
        if actions.len() != policies.len() || actions.len() != versions.len() {
            return Err(FssError::Chain(format!(
                "getRegisteredActions returned ragged arrays ({}, {}, {})",
                actions.len(),
                policies.len(),
                versions.len()
            )));
        }

        actions
            .iter()
            .zip(policies)
            .zip(versions)
            .map(|((action, policy), version)| match (action, policy, version) {
                (Token::String(action), Token::Bytes(policy), Token::String(version)) => {
                    Ok(RegisteredPolicy {
                        action: ActionRef::new(action.clone()),
                        policy: Bytes::from(policy.clone()),
                        version: version.clone(),
                    })
                }
                _ => Err(FssError::Chain(
                    "getRegisteredActions entry has unexpected types".to_string(),
                )),
            })
            .collect()
    }

    /// Confirms the contract answers a policy read.
    pub async fn probe(&self) -> Result<(), FssError> {
        self.get_policy_for(Address::ZERO, &ActionRef::new(PROBE_ACTION))
            .await
            .map(|_| ())
            .map_err(|err| {
                FssError::InitializationFailed(format!(
                    "policy registry {} is unreachable: {}",
                    eth::checksum(&self.contract),
                    err
                ))
            })
    }

    async fn read(&self, data: Vec<u8>) -> Result<Bytes, FssError> {
        let request = CallRequest::new(self.contract, data);
        with_timeout("eth_call", self.timeout, self.chain.call(&request)).await
    }

    async fn submit(
        &self,
        action: &ActionRef,
        policy: Option<&PolicyDraft>,
        data: Vec<u8>,
    ) -> Result<B256, FssError> {
        let fail = move |stage: RegistrationStage| {
            move |err: FssError| FssError::registration(stage, action.as_str(), policy, err)
        };

        let from = self
            .signer
            .signer_address()
            .await
            .map_err(fail(RegistrationStage::Sign))?;
        let request = CallRequest::new(self.contract, data).with_from(from);

        let estimate = with_timeout(
            "estimate_gas",
            self.timeout,
            self.chain.estimate_gas(&request),
        )
        .await
        .map_err(fail(RegistrationStage::EstimateGas))?;
        let gas_limit =
            gas_limit_with_headroom(estimate).map_err(fail(RegistrationStage::EstimateGas))?;

        let gas_price = with_timeout("gas_price", self.timeout, self.chain.gas_price())
            .await
            .map_err(fail(RegistrationStage::FeeQuote))?;
        let base_fee = with_timeout("latest_base_fee", self.timeout, self.chain.latest_base_fee())
            .await
            .map_err(fail(RegistrationStage::FeeQuote))?;
        let fees = FeeQuote::compute(gas_price, base_fee).map_err(fail(RegistrationStage::FeeQuote))?;

        let chain_id = with_timeout("chain_id", self.timeout, self.chain.chain_id())
            .await
            .map_err(fail(RegistrationStage::Nonce))?;
        let nonce = with_timeout(
            "transaction_count",
            self.timeout,
            self.chain.transaction_count(from),
        )
        .await
        .map_err(fail(RegistrationStage::Nonce))?;

        let tx = Eip1559Transaction::new(chain_id, nonce, self.contract, request.data, gas_limit, fees);
        let digest = tx.signing_hash();
        tracing::debug!(
            action = %action,
            nonce,
            gas_limit = %gas_limit,
            max_fee = %fees.max_fee_per_gas,
            "signing registry transaction"
        );

        let signature = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(fail(RegistrationStage::Sign))?;
        let parity =
            recover_parity(&digest, &signature, from).map_err(fail(RegistrationStage::Recover))?;

        let raw = tx.encode_signed(parity, &signature.r, &signature.s);
        with_timeout(
            "send_raw_transaction",
            self.timeout,
            self.chain.send_raw_transaction(&raw),
        )
        .await
        .map_err(fail(RegistrationStage::Broadcast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChain, LocalHashSigner};
    use alloy_primitives::U256;

    const ACTION: &str = "QmQwNvbP9YAY4B4wYgFoD6cNnX3udNDBjWC7RqN48GdpmN";

    fn draft() -> PolicyDraft {
        PolicyDraft::send_erc20(
            "1.0.0",
            "1000",
            vec!["0x52908400098527886e0f7030069857d2e4169ee7".to_string()],
            vec![],
        )
    }

    fn client(chain: Arc<FakeChain>, signer: LocalHashSigner) -> PolicyRegistryClient {
        PolicyRegistryClient::new(
            chain,
            Arc::new(signer),
            Address::repeat_byte(0x77),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn set_policy_builds_signed_type2_transaction() {
        let chain = Arc::new(FakeChain::default());
        let registry = client(chain.clone(), LocalHashSigner::honest());

        registry.set_policy(&ActionRef::new(ACTION), &draft()).await.unwrap();

        let raw = chain.sent();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0][0], 0x02);
        let estimate = chain.last_estimate().unwrap();
        assert_eq!(estimate.from, Some(LocalHashSigner::honest().address()));
        assert_eq!(&estimate.data[..4], &abi::selector(SET_POLICY_SIGNATURE));
    }

    #[tokio::test]
    async fn signature_for_other_key_fails_closed() {
        let chain = Arc::new(FakeChain::default());
        let registry = client(chain.clone(), LocalHashSigner::impostor());

        let err = registry
            .set_policy(&ActionRef::new(ACTION), &draft())
            .await
            .unwrap_err();

        match &err {
            FssError::PolicyRegistrationFailed { stage, policy, .. } => {
                assert_eq!(*stage, RegistrationStage::Recover);
                assert_eq!(policy.as_deref(), Some(&draft()));
            }
            other => panic!("expected registration failure, got {:?}", other),
        }
        assert!(matches!(
            err.root_cause(),
            FssError::SignatureRecoveryFailed { .. }
        ));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn estimate_failure_carries_stage_and_cause() {
        let chain = Arc::new(FakeChain::default());
        chain.fail_estimates("execution reverted");
        let registry = client(chain, LocalHashSigner::honest());

        let err = registry.remove_policy(&ActionRef::new(ACTION)).await.unwrap_err();
        match err {
            FssError::PolicyRegistrationFailed {
                stage,
                policy,
                source,
                ..
            } => {
                assert_eq!(stage, RegistrationStage::EstimateGas);
                assert!(policy.is_none());
                assert!(source.to_string().contains("execution reverted"));
            }
            other => panic!("expected registration failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn hostile_fee_quote_fails_before_signing() {
        let chain = Arc::new(FakeChain::default());
        chain.set_base_fee(Some(U256::MAX));
        let registry = client(chain.clone(), LocalHashSigner::honest());

        let err = registry.set_policy(&ActionRef::new(ACTION), &draft()).await.unwrap_err();
        match err {
            FssError::PolicyRegistrationFailed { stage, policy, .. } => {
                assert_eq!(stage, RegistrationStage::FeeQuote);
                assert_eq!(policy.as_deref(), Some(&draft()));
            }
            other => panic!("expected registration failure, got {:?}", other),
        }

        chain.set_base_fee(Some(U256::from(10u64)));
        chain.set_estimate(U256::MAX);
        let err = registry.remove_policy(&ActionRef::new(ACTION)).await.unwrap_err();
        assert!(matches!(
            err,
            FssError::PolicyRegistrationFailed {
                stage: RegistrationStage::EstimateGas,
                ..
            }
        ));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn invalid_policy_fails_before_any_network_call() {
        let chain = Arc::new(FakeChain::default());
        let registry = client(chain.clone(), LocalHashSigner::honest());
        let bad = PolicyDraft::send_erc20("1.0.0", "-1", vec![], vec![]);

        let err = registry.set_policy(&ActionRef::new(ACTION), &bad).await.unwrap_err();
        assert!(matches!(
            err,
            FssError::PolicyRegistrationFailed {
                stage: RegistrationStage::Encode,
                ..
            }
        ));
        assert!(chain.last_estimate().is_none());
    }

    #[tokio::test]
    async fn reads_decode_registered_policies() {
        let chain = Arc::new(FakeChain::default());
        let signer = LocalHashSigner::honest();
        let owner = signer.address();
        let encoded = draft().encode().unwrap();
        chain.seed_policy(owner, ACTION, encoded.clone(), "1.0.0");
        let registry = client(chain, signer);

        let record = registry
            .get_policy(&ActionRef::new(ACTION))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.policy.to_vec(), encoded);
        let decoded = record.decode(PolicyKind::SendErc20).unwrap();
        assert_eq!(decoded, draft().normalize().unwrap());

        assert!(registry
            .get_policy(&ActionRef::new("QmMissing"))
            .await
            .unwrap()
            .is_none());

        let all = registry.get_all_policies().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].action, ActionRef::new(ACTION));
        assert_eq!(all[0].version, "1.0.0");
    }
}
