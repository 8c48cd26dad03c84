use alloy::primitives::U256;
use alloy::sol;
use alloy::sol_types::SolType;
use repair_common::TokenTransferRecord;

use crate::rpc::{RawBlock, RawReceipt, RawTransaction};

/// Length of `0x` plus a 4-byte selector, in hex characters
pub const SELECTOR_HEX_LEN: usize = 10;

// Argument slots in the calldata string, in hex characters.
// Each slot is 64 chars; an address is the low 40 of those.
const FIRST_ADDRESS: (usize, usize) = (34, 74);
const SECOND_ADDRESS: (usize, usize) = (74, 114);

sol! {
    /// Data of the second log emitted by a payout call
    struct PayoutLog {
        uint256 totalPayout;
        uint256 cumulativePayout;
        uint256 callerPayout;
    }
}

/// Recognized token-moving methods, keyed by calldata selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    /// `transfer(address,uint256)`
    Transfer,
    /// `transferFrom(address,address,uint256)`
    TransferFrom,
    /// Chain-specific payout; the amount comes from the receipt logs
    Payout,
    Unrecognized,
}

impl TransferMethod {
    pub fn from_selector(selector: &str) -> Self {
        match selector.to_ascii_lowercase().as_str() {
            "0xa9059cbb" => TransferMethod::Transfer,
            "0xa978501e" => TransferMethod::TransferFrom,
            "0x0d5f2659" => TransferMethod::Payout,
            _ => TransferMethod::Unrecognized,
        }
    }

    pub fn from_input(input: &str) -> Self {
        match input.get(..SELECTOR_HEX_LEN) {
            Some(selector) => Self::from_selector(selector),
            None => TransferMethod::Unrecognized,
        }
    }

    /// Name stored in the `method` field
    pub fn name(&self) -> Option<&'static str> {
        match self {
            TransferMethod::Transfer => Some("transfer"),
            TransferMethod::TransferFrom => Some("transferFrom"),
            TransferMethod::Payout => Some("gbzzTransfer"),
            TransferMethod::Unrecognized => None,
        }
    }
}

/// Decode a token transfer from a call transaction's calldata.
/// Returns `None` when the selector is not one we know.
pub fn decode_transfer(
    tx: &RawTransaction,
    receipt: Option<&RawReceipt>,
    block: &RawBlock,
) -> Option<TokenTransferRecord> {
    let contract = tx.to.clone()?;
    let input = tx.input.as_str();
    let method = TransferMethod::from_input(input);

    let (from, to, value) = match method {
        TransferMethod::Transfer => (
            tx.from.to_lowercase(),
            slot_address(input, FIRST_ADDRESS),
            hex_value(input, FIRST_ADDRESS.1, &tx.hash),
        ),
        TransferMethod::TransferFrom => (
            slot_address(input, FIRST_ADDRESS),
            slot_address(input, SECOND_ADDRESS),
            hex_value(input, SECOND_ADDRESS.1, &tx.hash),
        ),
        TransferMethod::Payout => (
            tx.from.to_lowercase(),
            slot_address(input, FIRST_ADDRESS),
            payout_value(receipt, block.number(), &tx.hash),
        ),
        TransferMethod::Unrecognized => return None,
    };

    Some(TokenTransferRecord {
        hash: tx.hash.clone(),
        block_number: block.number(),
        from,
        to,
        contract,
        value,
        method: method.name()?.to_string(),
        timestamp: block.timestamp(),
    })
}

/// Substring by character offsets, clamped to the input like JS `substring`
fn hex_slice(input: &str, start: usize, end: Option<usize>) -> &str {
    let end = end.unwrap_or(input.len()).min(input.len());
    let start = start.min(end);
    input.get(start..end).unwrap_or("")
}

fn slot_address(input: &str, (start, end): (usize, usize)) -> String {
    format!("0x{}", hex_slice(input, start, Some(end))).to_lowercase()
}

/// Everything after `start`, read as one unsigned integer.
/// Amounts wider than 256 bits do not fit the column and are stored as 0.
fn hex_value(input: &str, start: usize, tx_hash: &str) -> U256 {
    let digits = hex_slice(input, start, None);
    if digits.is_empty() {
        return U256::ZERO;
    }
    U256::from_str_radix(digits, 16).unwrap_or_else(|e| {
        tracing::warn!(tx = %tx_hash, "Unreadable transfer amount {}: {}", digits, e);
        U256::ZERO
    })
}

/// `totalPayout` from the second receipt log
fn payout_value(receipt: Option<&RawReceipt>, block_number: u64, tx_hash: &str) -> U256 {
    let decoded = receipt
        .and_then(|r| r.logs.get(1))
        .ok_or_else(|| "receipt has no second log".to_string())
        .and_then(|log| {
            hex::decode(log.data.trim_start_matches("0x")).map_err(|e| e.to_string())
        })
        .and_then(|data| PayoutLog::abi_decode(&data).map_err(|e| e.to_string()));

    match decoded {
        Ok(payout) => payout.totalPayout,
        Err(e) => {
            tracing::warn!(block = block_number, tx = %tx_hash, "Payout log decode failed, using 0: {}", e);
            U256::ZERO
        }
    }
}
