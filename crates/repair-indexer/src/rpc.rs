use alloy::primitives::{Bytes, U256, U64};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use async_trait::async_trait;
use repair_common::RepairError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Wire types. Nodes disagree on which fields they send (Parity adds `creates`,
// some omit `status`), so everything not needed to identify a record is optional
// and addresses stay exactly as received.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub number: U64,
    pub hash: String,
    #[serde(default)]
    pub parent_hash: String,
    pub timestamp: U64,
    #[serde(default)]
    pub miner: String,
    #[serde(default)]
    pub gas_used: U64,
    #[serde(default)]
    pub gas_limit: U64,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

impl RawBlock {
    pub fn number(&self) -> u64 {
        self.number.to::<u64>()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.to::<u64>()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: String,
    pub block_hash: Option<String>,
    pub block_number: Option<U64>,
    pub from: String,
    pub to: Option<String>,
    /// Created contract address, only sent by Parity-style nodes
    pub creates: Option<String>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub nonce: U64,
    #[serde(default)]
    pub gas: U64,
    pub gas_price: Option<U256>,
    #[serde(default)]
    pub input: String,
    pub r: Option<String>,
    pub s: Option<String>,
    pub v: Option<String>,
    pub transaction_index: Option<U64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    pub transaction_hash: Option<String>,
    /// Left untyped: some nodes send garbage here and the record falls back to 0
    pub gas_used: Option<serde_json::Value>,
    pub status: Option<U64>,
    pub contract_address: Option<String>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLog {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

/// Read access to a node, just the calls the repair pipeline makes.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn is_listening(&self) -> bool;

    /// Block with full transaction bodies; `None` if the node has no such block
    async fn get_block(&self, number: u64) -> Result<Option<RawBlock>, RepairError>;

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<RawReceipt>, RepairError>;

    /// Deployed bytecode as a 0x-prefixed hex string
    async fn get_code(&self, address: &str) -> Result<String, RepairError>;

    /// Read-only call at the latest block. An empty result means the
    /// address has no code answering that selector.
    async fn call(&self, to: &str, data: &[u8]) -> Result<Bytes, RepairError>;
}

/// JSON-RPC over HTTP
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: &str) -> Result<Self, RepairError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RepairError::Rpc(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Send one request. A null `result` comes back as `None`.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, RepairError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RepairError::Rpc(format!("HTTP request failed: {}", e)))?;

        let resp: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RepairError::Rpc(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = resp.get("error") {
            return Err(RepairError::Rpc(format!("{} failed: {}", method, error)));
        }

        match resp.get("result") {
            None => Err(RepairError::Rpc(format!("No result in {} response", method))),
            Some(result) if result.is_null() => Ok(None),
            Some(result) => serde_json::from_value(result.clone())
                .map(Some)
                .map_err(|e| RepairError::Decode(format!("Failed to parse {} result: {}", method, e))),
        }
    }
}

#[async_trait]
impl NodeClient for JsonRpcClient {
    async fn is_listening(&self) -> bool {
        match self.request::<bool>("net_listening", serde_json::json!([])).await {
            Ok(listening) => listening.unwrap_or(false),
            Err(e) => {
                tracing::debug!("net_listening failed: {}", e);
                false
            }
        }
    }

    async fn get_block(&self, number: u64) -> Result<Option<RawBlock>, RepairError> {
        self.request(
            "eth_getBlockByNumber",
            serde_json::json!([format!("0x{:x}", number), true]),
        )
        .await
    }

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<RawReceipt>, RepairError> {
        self.request("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await
    }

    async fn get_code(&self, address: &str) -> Result<String, RepairError> {
        let code: Option<String> = self
            .request("eth_getCode", serde_json::json!([address, "latest"]))
            .await?;
        Ok(code.unwrap_or_else(|| "0x".to_string()))
    }

    async fn call(&self, to: &str, data: &[u8]) -> Result<Bytes, RepairError> {
        let output: Option<Bytes> = self
            .request(
                "eth_call",
                serde_json::json!([{ "to": to, "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;
        Ok(output.unwrap_or_default())
    }
}

/// Node transport, picked from the URL scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Http(String),
    Ws(String),
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, RepairError> {
        let scheme = url.split_once("://").map(|(scheme, _)| scheme.to_ascii_lowercase());
        match scheme.as_deref() {
            Some("http") | Some("https") => Ok(Endpoint::Http(url.to_string())),
            Some("ws") | Some("wss") => Ok(Endpoint::Ws(url.to_string())),
            _ => Err(RepairError::Config(format!(
                "Unsupported node URL {}, expected http(s):// or ws(s)://",
                url
            ))),
        }
    }
}

/// Open a client for `url`. WebSocket endpoints connect eagerly, so an
/// unreachable node fails here rather than on the first request.
pub async fn connect(url: &str) -> Result<Arc<dyn NodeClient>, RepairError> {
    match Endpoint::parse(url)? {
        Endpoint::Http(url) => Ok(Arc::new(JsonRpcClient::new(&url)?)),
        Endpoint::Ws(url) => Ok(Arc::new(WsClient::connect(&url).await?)),
    }
}

/// JSON-RPC over a WebSocket, through an alloy provider
pub struct WsClient {
    provider: DynProvider,
}

impl WsClient {
    pub async fn connect(url: &str) -> Result<Self, RepairError> {
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(url))
            .await
            .map_err(|e| RepairError::Rpc(format!("WebSocket connect to {} failed: {}", url, e)))?;

        tracing::info!("Connected to node over WebSocket at {}", url);
        Ok(Self {
            provider: provider.erased(),
        })
    }
}

fn ws_error(method: &str, e: impl std::fmt::Display) -> RepairError {
    RepairError::Rpc(format!("{} failed: {}", method, e))
}

#[async_trait]
impl NodeClient for WsClient {
    async fn is_listening(&self) -> bool {
        match self
            .provider
            .raw_request::<_, bool>("net_listening".into(), serde_json::json!([]))
            .await
        {
            Ok(listening) => listening,
            Err(e) => {
                tracing::debug!("net_listening failed: {}", e);
                false
            }
        }
    }

    async fn get_block(&self, number: u64) -> Result<Option<RawBlock>, RepairError> {
        self.provider
            .raw_request::<_, Option<RawBlock>>(
                "eth_getBlockByNumber".into(),
                serde_json::json!([format!("0x{:x}", number), true]),
            )
            .await
            .map_err(|e| ws_error("eth_getBlockByNumber", e))
    }

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<RawReceipt>, RepairError> {
        self.provider
            .raw_request::<_, Option<RawReceipt>>(
                "eth_getTransactionReceipt".into(),
                serde_json::json!([hash]),
            )
            .await
            .map_err(|e| ws_error("eth_getTransactionReceipt", e))
    }

    async fn get_code(&self, address: &str) -> Result<String, RepairError> {
        let code = self
            .provider
            .raw_request::<_, Option<String>>("eth_getCode".into(), serde_json::json!([address, "latest"]))
            .await
            .map_err(|e| ws_error("eth_getCode", e))?;
        Ok(code.unwrap_or_else(|| "0x".to_string()))
    }

    async fn call(&self, to: &str, data: &[u8]) -> Result<Bytes, RepairError> {
        let output = self
            .provider
            .raw_request::<_, Option<Bytes>>(
                "eth_call".into(),
                serde_json::json!([{ "to": to, "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await
            .map_err(|e| ws_error("eth_call", e))?;
        Ok(output.unwrap_or_default())
    }
}
