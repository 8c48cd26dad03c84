use alloy::primitives::{Address, U256};
use bigdecimal::BigDecimal;
use repair_common::{wei_to_ether, BlockRecord, Destination, TransactionRecord};
use std::str::FromStr;

use crate::rpc::{RawBlock, RawReceipt, RawTransaction};

/// Build the block record written to the blocks collection
pub fn block_record(block: &RawBlock) -> BlockRecord {
    BlockRecord {
        number: block.number(),
        hash: block.hash.clone(),
        parent_hash: block.parent_hash.clone(),
        timestamp: block.timestamp(),
        miner: block.miner.to_lowercase(),
        gas_used: block.gas_used.to::<u64>(),
        gas_limit: block.gas_limit.to::<u64>(),
        transactions: block.transactions.iter().map(|tx| tx.hash.to_lowercase()).collect(),
    }
}

/// Address created by a transaction that has no `to`.
///
/// Parity-style nodes put it on the transaction as `creates`, Geth only on the
/// receipt. If neither is available it is derived from sender and nonce.
pub fn created_address(tx: &RawTransaction, receipt: Option<&RawReceipt>) -> String {
    if let Some(creates) = &tx.creates {
        return creates.to_lowercase();
    }
    if let Some(addr) = receipt.and_then(|r| r.contract_address.as_ref()) {
        return addr.to_lowercase();
    }

    tracing::warn!(tx = %tx.hash, "No contract address from node, deriving from sender and nonce");
    let sender = Address::from_str(&tx.from).unwrap_or(Address::ZERO);
    let created = sender.create(tx.nonce.to::<u64>());
    format!("0x{}", hex::encode(created.as_slice()))
}

/// Turn a node transaction, its receipt and its block into the canonical record.
/// Never fails: every field that can be missing or malformed has a fallback.
pub fn normalize(
    tx: &RawTransaction,
    receipt: Option<&RawReceipt>,
    block: &RawBlock,
) -> TransactionRecord {
    let block_number = tx
        .block_number
        .map(|n| n.to::<u64>())
        .unwrap_or_else(|| block.number());

    let value = wei_to_ether(tx.value).unwrap_or_else(|e| {
        tracing::warn!(block = block_number, tx = %tx.hash, "Bad value {}: {}", tx.value, e);
        BigDecimal::from(0)
    });

    let gas_used = match receipt_gas_used(receipt) {
        Ok(gas_used) => gas_used,
        Err(reason) => {
            tracing::warn!(block = block_number, tx = %tx.hash, "gasUsed unavailable ({}), using 0", reason);
            0
        }
    };

    let destination = match &tx.to {
        Some(to) => Destination::To(to.to_lowercase()),
        None => Destination::Creates(created_address(tx, receipt)),
    };

    TransactionRecord {
        hash: tx.hash.to_lowercase(),
        block_hash: tx.block_hash.clone().unwrap_or_else(|| block.hash.clone()),
        block_number,
        from: tx.from.to_lowercase(),
        destination,
        value,
        nonce: tx.nonce.to::<u64>(),
        r: tx.r.clone().unwrap_or_default(),
        s: tx.s.clone().unwrap_or_default(),
        v: tx.v.clone().unwrap_or_default(),
        gas: tx.gas.to::<u64>(),
        gas_price: tx.gas_price.unwrap_or(U256::ZERO).to_string(),
        gas_used,
        status: receipt.and_then(|r| r.status).map(|s| !s.is_zero()),
        input: tx.input.clone(),
        transaction_index: tx.transaction_index.map(|i| i.to::<u64>()).unwrap_or(0),
        timestamp: block.timestamp(),
    }
}

fn receipt_gas_used(receipt: Option<&RawReceipt>) -> Result<u64, String> {
    let receipt = receipt.ok_or("no receipt")?;
    match receipt.gas_used.as_ref() {
        None | Some(serde_json::Value::Null) => Err("missing".to_string()),
        Some(serde_json::Value::Number(n)) => n.as_u64().ok_or_else(|| format!("not a u64: {}", n)),
        Some(serde_json::Value::String(s)) => parse_quantity(s),
        Some(other) => Err(format!("unexpected type: {}", other)),
    }
}

/// Parse a JSON-RPC quantity ("0x5208"), tolerating plain decimal strings
fn parse_quantity(s: &str) -> Result<u64, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).map_err(|e| format!("{}: {}", s, e)),
        None => s.parse().map_err(|e| format!("{}: {}", s, e)),
    }
}
