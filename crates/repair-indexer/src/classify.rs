use alloy::sol;
use alloy::sol_types::SolCall;
use repair_common::{ContractRecord, RepairError, TokenMetadata};

use crate::normalize::created_address;
use crate::rpc::{NodeClient, RawBlock, RawReceipt, RawTransaction};

// ERC-20 interface
sol! {
    interface IERC20Metadata {
        function name() external view returns (string memory);
        function symbol() external view returns (string memory);
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
    }
}

/// Classify the contract created by `tx` and read its token metadata if it has any.
///
/// Only called for transactions without a `to`. RPC failures never escape:
/// anything that goes wrong while probing just means "not a token".
pub async fn classify(
    node: &dyn NodeClient,
    tx: &RawTransaction,
    receipt: Option<&RawReceipt>,
    block: &RawBlock,
) -> ContractRecord {
    let address = created_address(tx, receipt);

    let token = probe_token(node, &address).await;

    let byte_code = match node.get_code(&address).await {
        Ok(code) => code,
        Err(e) => {
            tracing::warn!(block = block.number(), address = %address, "Failed to fetch bytecode: {}", e);
            "0x".to_string()
        }
    };

    ContractRecord {
        address,
        owner: tx.from.clone(),
        block_number: block.number(),
        creation_transaction: tx.hash.clone(),
        byte_code,
        token,
    }
}

/// `totalSupply()` probe first; an empty answer means no token interface.
/// Otherwise all four metadata calls must succeed or nothing is kept.
async fn probe_token(node: &dyn NodeClient, address: &str) -> Option<TokenMetadata> {
    let probe = IERC20Metadata::totalSupplyCall {}.abi_encode();
    match node.call(address, &probe).await {
        Ok(output) if output.is_empty() => {
            tracing::debug!(address, "totalSupply() returned nothing, plain contract");
            return None;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::debug!(address, "totalSupply() probe failed, plain contract: {}", e);
            return None;
        }
    }

    match fetch_token_metadata(node, address).await {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            tracing::debug!(address, "Token metadata incomplete, plain contract: {}", e);
            None
        }
    }
}

async fn fetch_token_metadata(node: &dyn NodeClient, address: &str) -> Result<TokenMetadata, RepairError> {
    let token_name = call_method(node, address, IERC20Metadata::nameCall {}).await?;
    let decimals = call_method(node, address, IERC20Metadata::decimalsCall {}).await?;
    let symbol = call_method(node, address, IERC20Metadata::symbolCall {}).await?;
    let total_supply = call_method(node, address, IERC20Metadata::totalSupplyCall {}).await?;

    Ok(TokenMetadata {
        token_name,
        decimals,
        symbol,
        total_supply,
    })
}

/// Call a view method and ABI-decode its return value
async fn call_method<C: SolCall>(
    node: &dyn NodeClient,
    address: &str,
    call: C,
) -> Result<C::Return, RepairError> {
    let output = node.call(address, &call.abi_encode()).await?;
    C::abi_decode_returns(&output).map_err(|e| RepairError::Decode(e.to_string()))
}
