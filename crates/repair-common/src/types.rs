use alloy::primitives::U256;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::RepairError;

/// Block data as written to the blocks collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub miner: String,
    pub gas_used: u64,
    pub gas_limit: u64,
    /// Hashes of the included transactions, in block order
    pub transactions: Vec<String>,
}

/// Where a transaction went: an existing address, or a contract it created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    To(String),
    Creates(String),
}

impl Destination {
    pub fn to(&self) -> Option<&str> {
        match self {
            Destination::To(addr) => Some(addr),
            Destination::Creates(_) => None,
        }
    }

    pub fn creates(&self) -> Option<&str> {
        match self {
            Destination::To(_) => None,
            Destination::Creates(addr) => Some(addr),
        }
    }
}

/// Canonical transaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    pub block_hash: String,
    pub block_number: u64,
    pub from: String,
    pub destination: Destination,
    /// Value in ether, exact
    pub value: BigDecimal,
    pub nonce: u64,
    pub r: String,
    pub s: String,
    pub v: String,
    pub gas: u64,
    /// Decimal wei string
    pub gas_price: String,
    pub gas_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
    pub input: String,
    pub transaction_index: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Address,
    Contract,
}

impl AccountType {
    pub fn code(&self) -> i16 {
        match self {
            AccountType::Address => 0,
            AccountType::Contract => 1,
        }
    }
}

/// Account touched by a transaction or a block reward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub address: String,
    pub block_number: u64,
    #[serde(rename = "type")]
    pub account_type: AccountType,
}

impl AccountRecord {
    pub fn observed(address: String, block_number: u64) -> Self {
        Self {
            address,
            block_number,
            account_type: AccountType::Address,
        }
    }
}

/// ERC classification stored on a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErcKind {
    Plain,
    Token,
}

impl ErcKind {
    pub fn code(&self) -> i16 {
        match self {
            ErcKind::Plain => 0,
            ErcKind::Token => 2,
        }
    }
}

/// ERC-20 metadata read from a token-like contract.
/// Either all four fields were read successfully or none are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub token_name: String,
    pub decimals: u8,
    pub symbol: String,
    pub total_supply: U256,
}

/// Contract created by a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    pub address: String,
    pub owner: String,
    pub block_number: u64,
    pub creation_transaction: String,
    pub byte_code: String,
    #[serde(flatten)]
    pub token: Option<TokenMetadata>,
}

impl ContractRecord {
    pub fn erc(&self) -> ErcKind {
        if self.token.is_some() {
            ErcKind::Token
        } else {
            ErcKind::Plain
        }
    }
}

/// Token transfer decoded from a transaction's calldata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransferRecord {
    pub hash: String,
    pub block_number: u64,
    pub from: String,
    pub to: String,
    /// Called contract, kept exactly as the node reported it
    pub contract: String,
    /// Raw token units, not scaled by decimals
    pub value: U256,
    pub method: String,
    pub timestamp: u64,
}

fn default_node_addr() -> String {
    "localhost".to_string()
}
fn default_ws_port() -> u16 {
    8546
}
fn default_bulk_size() -> usize {
    100
}

/// Durable repair cursor plus node settings, persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    #[serde(default = "default_node_addr")]
    pub node_addr: String,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    /// Floor of the whole repair range
    pub start_block: u64,
    /// Upper edge of the next window to repair
    pub sync_block: u64,
    pub repair_patch: u64,
    #[serde(default)]
    pub quiet: bool,
    /// Keys this tool does not read, carried through rewrites untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProgressState {
    pub fn validate(&self) -> Result<(), RepairError> {
        if self.bulk_size == 0 {
            return Err(RepairError::Config("bulkSize must be at least 1".to_string()));
        }
        if self.repair_patch == 0 {
            return Err(RepairError::Config("repairPatch must be at least 1".to_string()));
        }
        if self.sync_block < self.start_block {
            return Err(RepairError::Config(format!(
                "syncBlock {} is below startBlock {}",
                self.sync_block, self.start_block
            )));
        }
        Ok(())
    }

    /// WebSocket endpoint of the node, from `nodeAddr` and `wsPort`
    pub fn node_url(&self) -> String {
        format!("ws://{}:{}", self.node_addr, self.ws_port)
    }
}

/// Convert an unsigned 256-bit integer to an exact decimal
pub fn u256_to_decimal(value: U256) -> Result<BigDecimal, RepairError> {
    BigDecimal::from_str(&value.to_string()).map_err(|e| RepairError::Decode(e.to_string()))
}

/// Convert a wei amount to ether without rounding
pub fn wei_to_ether(wei: U256) -> Result<BigDecimal, RepairError> {
    BigDecimal::from_str(&format!("{}e-18", wei))
        .map(|d| d.normalized())
        .map_err(|e| RepairError::Decode(e.to_string()))
}
