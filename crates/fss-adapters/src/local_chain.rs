//! In-process EVM chain hosting the policy registry contract.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use fss_core::abi::{self, ParamType, Token};
use fss_core::chain::{CallRequest, ChainRpc};
use fss_core::error::FssError;
use fss_core::eth;
use fss_core::registry::{
    GET_POLICY_SIGNATURE, GET_REGISTERED_SIGNATURE, REMOVE_POLICY_SIGNATURE, SET_POLICY_SIGNATURE,
};
use fss_core::tx::SignedTransaction;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

pub const LOCAL_CHAIN_ID: u64 = 175188;
const BASE_GAS: u64 = 21_000;
const STORAGE_GAS: u64 = 20_000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredPolicy {
    policy: Vec<u8>,
    version: String,
}

/// Transaction accepted by the local chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinedTransaction {
    pub hash: B256,
    pub sender: Address,
    pub nonce: u64,
}

#[derive(Default)]
struct ChainState {
    balances: BTreeMap<Address, U256>,
    nonces: BTreeMap<Address, u64>,
    policies: BTreeMap<Address, BTreeMap<String, StoredPolicy>>,
    transactions: Vec<MinedTransaction>,
}

/// Registry write decoded from calldata.
enum RegistryWrite {
    Set {
        action: String,
        policy: Vec<u8>,
        version: String,
    },
    Remove {
        action: String,
    },
}

/// Single-node chain that executes registry calls and checks every signed envelope.
pub struct LocalChain {
    chain_id: u64,
    registry: Address,
    gas_price: U256,
    base_fee: Option<U256>,
    state: Mutex<ChainState>,
}

impl LocalChain {
    pub fn new(registry: Address) -> Self {
        Self {
            chain_id: LOCAL_CHAIN_ID,
            registry,
            gas_price: U256::from(1_000_000_000u64),
            base_fee: Some(U256::from(500_000_000u64)),
            state: Mutex::new(ChainState::default()),
        }
    }

    pub fn with_fees(mut self, gas_price: U256, base_fee: Option<U256>) -> Self {
        self.gas_price = gas_price;
        self.base_fee = base_fee;
        self
    }

    pub fn registry(&self) -> Address {
        self.registry
    }

    pub fn fund(&self, address: Address, amount: U256) -> Result<(), FssError> {
        let mut state = self.lock()?;
        let balance = state.balances.entry(address).or_default();
        *balance += amount;
        Ok(())
    }

    pub fn transactions(&self) -> Vec<MinedTransaction> {
        self.lock()
            .map(|state| state.transactions.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChainState>, FssError> {
        self.state
            .lock()
            .map_err(|_| FssError::Chain("local chain lock poisoned".to_string()))
    }

    fn decode_write(data: &[u8]) -> Result<RegistryWrite, FssError> {
        if data.len() < 4 {
            return Err(revert("calldata shorter than a selector"));
        }
        let (selector, args) = data.split_at(4);
        if selector == abi::selector(SET_POLICY_SIGNATURE) {
            let tokens = abi::decode(
                &[ParamType::String, ParamType::Bytes, ParamType::String],
                args,
            )
            .map_err(|err| revert(&err))?;
            return match <[Token; 3]>::try_from(tokens) {
                Ok([Token::String(action), Token::Bytes(policy), Token::String(version)]) => {
                    Ok(RegistryWrite::Set {
                        action,
                        policy,
                        version,
                    })
                }
                _ => Err(revert("bad setActionPolicy arguments")),
            };
        }
        if selector == abi::selector(REMOVE_POLICY_SIGNATURE) {
            let tokens = abi::decode(&[ParamType::String], args).map_err(|err| revert(&err))?;
            return match <[Token; 1]>::try_from(tokens) {
                Ok([Token::String(action)]) => Ok(RegistryWrite::Remove { action }),
                _ => Err(revert("bad removeActionPolicy arguments")),
            };
        }
        Err(revert("unknown function selector"))
    }

    fn apply(state: &mut ChainState, sender: Address, write: RegistryWrite) {
        let owned = state.policies.entry(sender).or_default();
        match write {
            RegistryWrite::Set {
                action,
                policy,
                version,
            } => {
                tracing::debug!(owner = %eth::checksum(&sender), action = %action, "registry set");
                owned.insert(action, StoredPolicy { policy, version });
            }
            RegistryWrite::Remove { action } => {
                tracing::debug!(owner = %eth::checksum(&sender), action = %action, "registry remove");
                owned.remove(&action);
            }
        }
    }

    fn read(&self, data: &[u8]) -> Result<Vec<u8>, FssError> {
        if data.len() < 4 {
            return Err(revert("calldata shorter than a selector"));
        }
        let (selector, args) = data.split_at(4);
        let state = self.lock()?;

        if selector == abi::selector(GET_POLICY_SIGNATURE) {
            let tokens = abi::decode(&[ParamType::Address, ParamType::String], args)
                .map_err(|err| revert(&err))?;
            let (Some(Token::Address(owner)), Some(Token::String(action))) =
                (tokens.first(), tokens.get(1))
            else {
                return Err(revert("bad getActionPolicy arguments"));
            };
            let stored = state
                .policies
                .get(owner)
                .and_then(|owned| owned.get(action))
                .cloned()
                .unwrap_or(StoredPolicy {
                    policy: Vec::new(),
                    version: String::new(),
                });
            return Ok(abi::encode(&[
                Token::Bytes(stored.policy),
                Token::String(stored.version),
            ]));
        }

        if selector == abi::selector(GET_REGISTERED_SIGNATURE) {
            let tokens = abi::decode(&[ParamType::Address], args).map_err(|err| revert(&err))?;
            let Some(Token::Address(owner)) = tokens.first() else {
                return Err(revert("bad getRegisteredActions arguments"));
            };
            let owned = state.policies.get(owner).cloned().unwrap_or_default();
            let mut actions = Vec::new();
            let mut policies = Vec::new();
            let mut versions = Vec::new();
            for (action, stored) in owned {
                actions.push(Token::String(action));
                policies.push(Token::Bytes(stored.policy));
                versions.push(Token::String(stored.version));
            }
            return Ok(abi::encode(&[
                Token::Array(actions),
                Token::Array(policies),
                Token::Array(versions),
            ]));
        }

        Err(revert("unknown function selector"))
    }
}

fn revert(reason: &str) -> FssError {
    FssError::Chain(format!("execution reverted: {}", reason))
}

#[async_trait]
impl ChainRpc for LocalChain {
    async fn chain_id(&self) -> Result<u64, FssError> {
        Ok(self.chain_id)
    }

    async fn balance(&self, address: Address) -> Result<U256, FssError> {
        Ok(self
            .lock()?
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, FssError> {
        Ok(self.lock()?.nonces.get(&address).copied().unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<U256, FssError> {
        Ok(self.gas_price)
    }

    async fn latest_base_fee(&self) -> Result<Option<U256>, FssError> {
        Ok(self.base_fee)
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, FssError> {
        if request.to != self.registry {
            return Err(revert("no contract at target address"));
        }
        if request.from.is_none() {
            return Err(revert("registry writes need a sender"));
        }
        Self::decode_write(&request.data)?;
        let calldata_gas: u64 = request
            .data
            .iter()
            .map(|byte| if *byte == 0 { 4 } else { 16 })
            .sum();
        Ok(U256::from(BASE_GAS + STORAGE_GAS + calldata_gas))
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, FssError> {
        if request.to != self.registry {
            return Ok(Bytes::new());
        }
        self.read(&request.data).map(Bytes::from)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, FssError> {
        let signed = SignedTransaction::decode(raw).map_err(FssError::Chain)?;
        let tx = &signed.tx;
        if tx.chain_id != self.chain_id {
            return Err(FssError::Chain(format!(
                "wrong chain id {}; expected {}",
                tx.chain_id, self.chain_id
            )));
        }
        if let Some(base_fee) = self.base_fee {
            if tx.max_fee_per_gas < base_fee {
                return Err(FssError::Chain(
                    "max fee per gas below block base fee".to_string(),
                ));
            }
        }
        if tx.to != self.registry {
            return Err(revert("no contract at target address"));
        }
        let sender = signed.sender().map_err(FssError::Chain)?;
        let write = Self::decode_write(&tx.data)?;

        let mut state = self.lock()?;
        let expected_nonce = state.nonces.get(&sender).copied().unwrap_or_default();
        if tx.nonce != expected_nonce {
            return Err(FssError::Chain(format!(
                "nonce {} for {}; expected {}",
                tx.nonce,
                eth::checksum(&sender),
                expected_nonce
            )));
        }
        Self::apply(&mut state, sender, write);
        state.nonces.insert(sender, expected_nonce + 1);

        let tx_hash = keccak256(raw);
        state.transactions.push(MinedTransaction {
            hash: tx_hash,
            sender,
            nonce: tx.nonce,
        });
        tracing::info!(
            sender = %eth::checksum(&sender),
            nonce = tx.nonce,
            tx_hash = %tx_hash,
            "local chain mined transaction"
        );
        Ok(tx_hash)
    }
}
