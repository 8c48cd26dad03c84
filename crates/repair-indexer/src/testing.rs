//! Builders and in-memory fakes shared by the unit tests

use alloy::primitives::Bytes;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use repair_common::{
    AccountRecord, BlockRecord, ContractRecord, Destination, ProgressState, RepairError,
    TokenTransferRecord, TransactionRecord,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::progress::ProgressStore;
use crate::rpc::{NodeClient, RawBlock, RawReceipt, RawTransaction};
use crate::store::RepairStore;

const MINER: &str = "0x00000000000000000000000000000000000000Fe";

fn merge(mut base: Value, overrides: Value) -> Value {
    if let (Some(base), Value::Object(overrides)) = (base.as_object_mut(), overrides) {
        for (key, value) in overrides {
            base.insert(key, value);
        }
    }
    base
}

fn tx_json(overrides: Value) -> Value {
    merge(
        json!({
            "hash": "0x00000000000000000000000000000000000000000000000000000000000000f1",
            "from": "0x00000000000000000000000000000000000000aa",
            "to": "0x00000000000000000000000000000000000000bb",
            "input": "0x",
            "nonce": "0x0",
            "value": "0x0",
            "gas": "0x5208"
        }),
        overrides,
    )
}

pub fn raw_tx(overrides: Value) -> RawTransaction {
    serde_json::from_value(tx_json(overrides)).unwrap()
}

pub fn raw_receipt(overrides: Value) -> RawReceipt {
    serde_json::from_value(merge(json!({ "logs": [] }), overrides)).unwrap()
}

pub fn raw_block(number: u64, transactions: Vec<Value>) -> RawBlock {
    let hash = format!("0x{:064x}", number);
    let transactions: Vec<Value> = transactions
        .into_iter()
        .map(|tx| merge(tx_json(json!({ "blockHash": hash, "blockNumber": format!("0x{:x}", number) })), tx))
        .collect();

    serde_json::from_value(json!({
        "number": format!("0x{:x}", number),
        "hash": hash,
        "parentHash": format!("0x{:064x}", number.saturating_sub(1)),
        "timestamp": format!("0x{:x}", 1_600_000_000 + number * 12),
        "miner": MINER,
        "gasUsed": "0x0",
        "gasLimit": "0x1c9c380",
        "transactions": transactions
    }))
    .unwrap()
}

pub fn block_rec(number: u64) -> BlockRecord {
    BlockRecord {
        number,
        hash: format!("0x{:064x}", number),
        parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
        timestamp: 1_600_000_000 + number * 12,
        miner: format!("0xm{}", number),
        gas_used: 0,
        gas_limit: 30_000_000,
        transactions: Vec::new(),
    }
}

pub fn tx_rec(hash: &str, block_number: u64, from: &str, to: Option<&str>) -> TransactionRecord {
    TransactionRecord {
        hash: hash.to_string(),
        block_hash: format!("0x{:064x}", block_number),
        block_number,
        from: from.to_string(),
        destination: match to {
            Some(to) => Destination::To(to.to_string()),
            None => Destination::Creates(format!("0xc{}", hash.trim_start_matches("0x"))),
        },
        value: BigDecimal::from(0),
        nonce: 0,
        r: "0x1".to_string(),
        s: "0x2".to_string(),
        v: "0x1b".to_string(),
        gas: 21000,
        gas_price: "1000000000".to_string(),
        gas_used: 21000,
        status: Some(true),
        input: "0x".to_string(),
        transaction_index: 0,
        timestamp: 1_600_000_000 + block_number * 12,
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

struct NodeState {
    listening: bool,
    blocks: HashMap<u64, RawBlock>,
    failing_blocks: HashSet<u64>,
    receipts: HashMap<String, RawReceipt>,
    failing_receipts: HashSet<String>,
    code: HashMap<String, String>,
    calls: HashMap<(String, Vec<u8>), Result<Vec<u8>, String>>,
    requested_blocks: Vec<u64>,
}

/// Scripted node. Unknown blocks and receipts are `None`,
/// unknown calls fail like a reverted `eth_call`.
pub struct FakeNode {
    state: Mutex<NodeState>,
}

impl Default for FakeNode {
    fn default() -> Self {
        Self {
            state: Mutex::new(NodeState {
                listening: true,
                blocks: HashMap::new(),
                failing_blocks: HashSet::new(),
                receipts: HashMap::new(),
                failing_receipts: HashSet::new(),
                code: HashMap::new(),
                calls: HashMap::new(),
                requested_blocks: Vec::new(),
            }),
        }
    }
}

impl FakeNode {
    pub fn set_listening(&self, listening: bool) {
        self.state.lock().unwrap().listening = listening;
    }

    pub fn add_block(&self, block: RawBlock) {
        self.state.lock().unwrap().blocks.insert(block.number(), block);
    }

    pub fn fail_block(&self, number: u64) {
        self.state.lock().unwrap().failing_blocks.insert(number);
    }

    pub fn set_receipt(&self, hash: &str, overrides: Value) {
        let receipt = raw_receipt(overrides);
        self.state.lock().unwrap().receipts.insert(hash.to_string(), receipt);
    }

    pub fn fail_receipt(&self, hash: &str) {
        self.state.lock().unwrap().failing_receipts.insert(hash.to_string());
    }

    pub fn set_code(&self, address: &str, code: &str) {
        self.state
            .lock()
            .unwrap()
            .code
            .insert(address.to_lowercase(), code.to_string());
    }

    pub fn set_call(&self, address: &str, data: Vec<u8>, answer: Result<Vec<u8>, String>) {
        self.state
            .lock()
            .unwrap()
            .calls
            .insert((address.to_lowercase(), data), answer);
    }

    pub fn requested_blocks(&self) -> Vec<u64> {
        self.state.lock().unwrap().requested_blocks.clone()
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn is_listening(&self) -> bool {
        self.state.lock().unwrap().listening
    }

    async fn get_block(&self, number: u64) -> Result<Option<RawBlock>, RepairError> {
        let mut state = self.state.lock().unwrap();
        state.requested_blocks.push(number);
        if state.failing_blocks.contains(&number) {
            return Err(RepairError::Rpc(format!("block {} unavailable", number)));
        }
        Ok(state.blocks.get(&number).cloned())
    }

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<RawReceipt>, RepairError> {
        let state = self.state.lock().unwrap();
        if state.failing_receipts.contains(hash) {
            return Err(RepairError::Rpc(format!("receipt {} unavailable", hash)));
        }
        Ok(state.receipts.get(hash).cloned())
    }

    async fn get_code(&self, address: &str) -> Result<String, RepairError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .code
            .get(&address.to_lowercase())
            .cloned()
            .unwrap_or_else(|| "0x".to_string()))
    }

    async fn call(&self, to: &str, data: &[u8]) -> Result<Bytes, RepairError> {
        let state = self.state.lock().unwrap();
        match state.calls.get(&(to.to_lowercase(), data.to_vec())) {
            Some(Ok(output)) => Ok(Bytes::from(output.clone())),
            Some(Err(e)) => Err(RepairError::Rpc(e.clone())),
            None => Err(RepairError::Rpc("execution reverted".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    fail: bool,
    blocks: BTreeMap<u64, BlockRecord>,
    block_insert_calls: usize,
    transactions: HashMap<String, TransactionRecord>,
    transaction_upserts: usize,
    accounts: HashMap<String, AccountRecord>,
    account_upserts: usize,
    contracts: BTreeMap<String, ContractRecord>,
    transfers: BTreeMap<String, TokenTransferRecord>,
}

/// Keyed collections behaving like the Postgres tables
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

fn write_failure() -> RepairError {
    RepairError::Database(sqlx::Error::PoolTimedOut)
}

impl MemoryStore {
    /// Every later write fails with a non-duplicate database error
    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail = true;
    }

    pub fn block_numbers(&self) -> Vec<u64> {
        self.state.lock().unwrap().blocks.keys().copied().collect()
    }

    pub fn block_insert_calls(&self) -> usize {
        self.state.lock().unwrap().block_insert_calls
    }

    pub fn transaction_count(&self) -> usize {
        self.state.lock().unwrap().transactions.len()
    }

    pub fn transaction_upserts(&self) -> usize {
        self.state.lock().unwrap().transaction_upserts
    }

    pub fn transaction(&self, hash: &str) -> Option<TransactionRecord> {
        self.state.lock().unwrap().transactions.get(hash).cloned()
    }

    pub fn account_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> =
            self.state.lock().unwrap().accounts.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn account_upserts(&self) -> usize {
        self.state.lock().unwrap().account_upserts
    }

    pub fn contracts(&self) -> Vec<ContractRecord> {
        self.state.lock().unwrap().contracts.values().cloned().collect()
    }

    pub fn token_transfers(&self) -> Vec<TokenTransferRecord> {
        self.state.lock().unwrap().transfers.values().cloned().collect()
    }
}

#[async_trait]
impl RepairStore for MemoryStore {
    async fn insert_blocks(&self, blocks: &[BlockRecord]) -> Result<u64, RepairError> {
        let mut state = self.state.lock().unwrap();
        state.block_insert_calls += 1;
        if state.fail {
            return Err(write_failure());
        }

        // All or nothing, like a single multi-row INSERT
        let mut seen = HashSet::new();
        for block in blocks {
            if state.blocks.contains_key(&block.number) || !seen.insert(block.number) {
                return Err(RepairError::DuplicateKey(format!(
                    "duplicate key value violates unique constraint \"blocks_pkey\" ({})",
                    block.number
                )));
            }
        }
        for block in blocks {
            state.blocks.insert(block.number, block.clone());
        }
        Ok(blocks.len() as u64)
    }

    async fn upsert_transaction(&self, tx: &TransactionRecord) -> Result<(), RepairError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(write_failure());
        }
        state.transaction_upserts += 1;
        state.transactions.insert(tx.hash.clone(), tx.clone());
        Ok(())
    }

    async fn upsert_account(&self, account: &AccountRecord) -> Result<(), RepairError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(write_failure());
        }
        state.account_upserts += 1;
        let mut record = account.clone();
        if let Some(existing) = state.accounts.get(&account.address) {
            record.block_number = record.block_number.min(existing.block_number);
        }
        state.accounts.insert(record.address.clone(), record);
        Ok(())
    }

    async fn upsert_contract(&self, contract: &ContractRecord) -> Result<(), RepairError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(write_failure());
        }
        state.contracts.insert(contract.address.clone(), contract.clone());
        Ok(())
    }

    async fn upsert_token_transfer(&self, transfer: &TokenTransferRecord) -> Result<(), RepairError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(write_failure());
        }
        state.transfers.insert(transfer.hash.clone(), transfer.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryProgressStore {
    saved: Mutex<Vec<ProgressState>>,
}

impl MemoryProgressStore {
    pub fn last_saved(&self) -> Option<ProgressState> {
        self.saved.lock().unwrap().last().cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self) -> Result<ProgressState, RepairError> {
        self.last_saved()
            .ok_or_else(|| RepairError::Config("no progress saved".to_string()))
    }

    async fn save(&self, state: &ProgressState) -> Result<(), RepairError> {
        self.saved.lock().unwrap().push(state.clone());
        Ok(())
    }
}
