use repair_common::{ProgressState, RepairError};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::WriteBuffer;
use crate::classify::classify;
use crate::normalize::{block_record, normalize};
use crate::progress::ProgressStore;
use crate::rpc::{NodeClient, RawBlock};
use crate::store::RepairStore;
use crate::transfer::{decode_transfer, SELECTOR_HEX_LEN};

/// How a call to [`Repairer::run_repair`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Node is not reachable; nothing was touched
    AwaitingConnection,
    /// The cursor already sits on the floor
    RangeComplete,
    /// One window was repaired and the cursor persisted
    WindowComplete {
        first: u64,
        last: u64,
        next_sync_block: u64,
    },
}

pub struct Repairer {
    node: Arc<dyn NodeClient>,
    store: Arc<dyn RepairStore>,
    block_delay: Duration,
}

impl Repairer {
    pub fn new(node: Arc<dyn NodeClient>, store: Arc<dyn RepairStore>, block_delay: Duration) -> Self {
        Self {
            node,
            store,
            block_delay,
        }
    }

    /// Repair one window below `end_block` (the cursor when `None`), newest window first.
    ///
    /// Blocks are walked upward one at a time. Every write is awaited before the
    /// new cursor is saved, so a saved cursor never points past unwritten data.
    pub async fn run_repair(
        &self,
        progress: &mut ProgressState,
        progress_store: &dyn ProgressStore,
        end_block: Option<u64>,
    ) -> Result<RepairOutcome, RepairError> {
        if !self.node.is_listening().await {
            tracing::warn!("Node not listening, waiting for connection");
            return Ok(RepairOutcome::AwaitingConnection);
        }

        let end = end_block.unwrap_or(progress.sync_block);
        if end <= progress.start_block {
            tracing::info!(start_block = progress.start_block, "Repair complete for the whole range");
            return Ok(RepairOutcome::RangeComplete);
        }

        let window_start = end
            .saturating_sub(progress.repair_patch)
            .max(progress.start_block);
        let first = window_start + 1;
        tracing::info!("Repairing blocks {} to {}", first, end);

        let mut buffer = WriteBuffer::new(Arc::clone(&self.store), progress.bulk_size, progress.quiet);

        for number in first..=end {
            match self.node.get_block(number).await {
                Ok(Some(block)) => self.process_block(&block, &mut buffer).await,
                Ok(None) => tracing::warn!(block = number, "Block not found, skipping"),
                Err(e) => tracing::warn!(block = number, "Failed to fetch block, skipping: {}", e),
            }

            buffer.check_writes()?;

            if !self.block_delay.is_zero() {
                tokio::time::sleep(self.block_delay).await;
            }
        }

        buffer.drain().await?;

        // The cursor steps down by one patch even when the window was given explicitly
        let next_sync_block = progress
            .sync_block
            .saturating_sub(progress.repair_patch)
            .max(progress.start_block);
        progress.sync_block = next_sync_block;
        progress_store.save(progress).await?;

        tracing::info!(
            "Window {} to {} repaired, next sync block {}",
            first,
            end,
            next_sync_block
        );

        Ok(RepairOutcome::WindowComplete {
            first,
            last: end,
            next_sync_block,
        })
    }

    async fn process_block(&self, block: &RawBlock, buffer: &mut WriteBuffer) {
        let record = block_record(block);
        buffer.push_block(record.clone(), true);

        let mut transactions = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let receipt = match self.node.get_transaction_receipt(&tx.hash).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    tracing::warn!(block = record.number, tx = %tx.hash, "Failed to fetch receipt: {}", e);
                    None
                }
            };

            transactions.push(normalize(tx, receipt.as_ref(), block));

            let input_len = tx.input.len();
            match &tx.to {
                None if input_len > 2 => {
                    let contract = classify(self.node.as_ref(), tx, receipt.as_ref(), block).await;
                    buffer.submit_contract(contract);
                }
                Some(_) if input_len > SELECTOR_HEX_LEN => {
                    if let Some(transfer) = decode_transfer(tx, receipt.as_ref(), block) {
                        buffer.submit_token_transfer(transfer);
                    }
                }
                _ => {}
            }
        }

        buffer.push_transactions(&record, transactions, true);
    }
}
