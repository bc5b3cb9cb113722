//! JSON-RPC 2.0 client for EVM chains.

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use fss_core::chain::{CallRequest, ChainRpc};
use fss_core::error::FssError;
use fss_core::eth;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockFees {
    #[serde(default)]
    base_fee_per_gas: Option<U256>,
}

/// [`ChainRpc`] over HTTP JSON-RPC.
pub struct JsonRpcChain {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcChain {
    pub fn new(url: impl Into<String>) -> Result<Self, FssError> {
        Self::with_request_timeout(url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FssError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FssError::Chain(format!("http client: {}", err)))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, FssError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(method, id, "json-rpc request");

        let response = self
            .client
            .post(&self.url)
            .json(&RpcRequest {
                jsonrpc: JSONRPC_VERSION,
                id,
                method,
                params,
            })
            .send()
            .await
            .map_err(|err| FssError::Chain(format!("{}: {}", method, err)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FssError::Chain(format!("{}: HTTP {}", method, status)));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|err| FssError::Chain(format!("{}: malformed response: {}", method, err)))?;
        if let Some(error) = body.error {
            let detail = match error.data {
                Some(Value::String(data)) => format!(" ({})", data),
                Some(other) if !other.is_null() => format!(" ({})", other),
                _ => String::new(),
            };
            return Err(FssError::Chain(format!(
                "{}: {} [code {}]{}",
                method, error.message, error.code, detail
            )));
        }

        serde_json::from_value(body.result.unwrap_or(Value::Null))
            .map_err(|err| FssError::Chain(format!("{}: unexpected result: {}", method, err)))
    }
}

fn call_object(request: &CallRequest) -> Value {
    let mut call = json!({
        "to": eth::checksum(&request.to),
        "data": format!("0x{}", hex::encode(&request.data)),
    });
    if let Some(from) = request.from {
        call["from"] = Value::String(eth::checksum(&from));
    }
    call
}

impl fmt::Debug for JsonRpcChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRpcChain").field("url", &self.url).finish()
    }
}

#[async_trait]
impl ChainRpc for JsonRpcChain {
    async fn chain_id(&self) -> Result<u64, FssError> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    async fn balance(&self, address: Address) -> Result<U256, FssError> {
        self.request(
            "eth_getBalance",
            json!([eth::checksum(&address), "latest"]),
        )
        .await
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, FssError> {
        let count: U64 = self
            .request(
                "eth_getTransactionCount",
                json!([eth::checksum(&address), "pending"]),
            )
            .await?;
        Ok(count.to::<u64>())
    }

    async fn gas_price(&self) -> Result<U256, FssError> {
        self.request("eth_gasPrice", json!([])).await
    }

    async fn latest_base_fee(&self) -> Result<Option<U256>, FssError> {
        let block: Option<BlockFees> = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        Ok(block.and_then(|block| block.base_fee_per_gas))
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, FssError> {
        self.request("eth_estimateGas", json!([call_object(request)]))
            .await
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, FssError> {
        self.request("eth_call", json!([call_object(request), "latest"]))
            .await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, FssError> {
        let tx_hash: B256 = self
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        tracing::info!(tx_hash = %tx_hash, "broadcast raw transaction");
        Ok(tx_hash)
    }
}
