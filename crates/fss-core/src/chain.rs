use crate::error::FssError;
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

/// Call fields shared by `eth_call` and `eth_estimateGas`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

impl CallRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from: None,
            to,
            data: data.into(),
        }
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

/// EVM JSON-RPC surface used by the policy registry client and bootstrap checks.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, FssError>;

    async fn balance(&self, address: Address) -> Result<U256, FssError>;

    /// Pending transaction count of `address`.
    async fn transaction_count(&self, address: Address) -> Result<u64, FssError>;

    async fn gas_price(&self) -> Result<U256, FssError>;

    /// Base fee of the latest block, if the chain has EIP-1559 enabled.
    async fn latest_base_fee(&self) -> Result<Option<U256>, FssError>;

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, FssError>;

    async fn call(&self, request: &CallRequest) -> Result<Bytes, FssError>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, FssError>;
}
