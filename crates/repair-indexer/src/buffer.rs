use repair_common::{
    AccountRecord, BlockRecord, ContractRecord, RepairError, TokenTransferRecord, TransactionRecord,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::store::RepairStore;

// ---------------------------------------------------------------------------
// Write buffer - collects records across blocks and hands them to the store
// ---------------------------------------------------------------------------

/// Accumulates block and transaction records and flushes them to the store.
///
/// Two independent accumulators share `bulk_size`: blocks flush when that many
/// blocks are buffered, transactions (plus their accounts) when that many
/// blocks' worth of transactions are buffered. Either flushes early when the
/// caller asks. Buffers are emptied the moment a flush starts; the write
/// itself runs in the background and is tracked until `drain`.
pub struct WriteBuffer {
    store: Arc<dyn RepairStore>,
    bulk_size: usize,
    quiet: bool,

    blocks: Vec<BlockRecord>,

    transactions: Vec<TransactionRecord>,
    miners: Vec<AccountRecord>,
    tx_blocks: usize,

    pending: JoinSet<Result<(), RepairError>>,
}

impl WriteBuffer {
    pub fn new(store: Arc<dyn RepairStore>, bulk_size: usize, quiet: bool) -> Self {
        Self {
            store,
            bulk_size: bulk_size.max(1),
            quiet,
            blocks: Vec::new(),
            transactions: Vec::new(),
            miners: Vec::new(),
            tx_blocks: 0,
            pending: JoinSet::new(),
        }
    }

    /// Buffer a block. Returns how many blocks were handed to the store, if this push flushed.
    pub fn push_block(&mut self, block: BlockRecord, flush: bool) -> Option<usize> {
        progress!(self.quiet, block = block.number, "Block buffered");
        self.blocks.push(block);

        if (flush && !self.blocks.is_empty()) || self.blocks.len() >= self.bulk_size {
            Some(self.flush_blocks())
        } else {
            None
        }
    }

    /// Buffer one block's normalized transactions and its miner.
    /// Returns how many transactions were handed to the store, if this push flushed.
    pub fn push_transactions(
        &mut self,
        block: &BlockRecord,
        transactions: Vec<TransactionRecord>,
        flush: bool,
    ) -> Option<usize> {
        self.miners
            .push(AccountRecord::observed(block.miner.clone(), block.number));
        if !transactions.is_empty() {
            progress!(self.quiet, block = block.number, "{} transactions recorded", transactions.len());
        }
        self.transactions.extend(transactions);
        self.tx_blocks += 1;

        if (flush && self.tx_blocks > 0) || self.tx_blocks >= self.bulk_size {
            Some(self.flush_transactions())
        } else {
            None
        }
    }

    /// Write a classified contract, overwriting any earlier classification
    pub fn submit_contract(&mut self, contract: ContractRecord) {
        let store = Arc::clone(&self.store);
        self.pending.spawn(async move {
            store.upsert_contract(&contract).await.inspect_err(|e| {
                tracing::error!(address = %contract.address, "Contract write failed: {}", e);
            })
        });
    }

    /// Write a decoded token transfer, overwriting any earlier decode of the same transaction
    pub fn submit_token_transfer(&mut self, transfer: TokenTransferRecord) {
        let store = Arc::clone(&self.store);
        self.pending.spawn(async move {
            store.upsert_token_transfer(&transfer).await.inspect_err(|e| {
                tracing::error!(tx = %transfer.hash, "Token transfer write failed: {}", e);
            })
        });
    }

    fn flush_blocks(&mut self) -> usize {
        let bulk = std::mem::take(&mut self.blocks);
        let count = bulk.len();
        let store = Arc::clone(&self.store);
        let quiet = self.quiet;

        self.pending.spawn(async move {
            match store.insert_blocks(&bulk).await {
                Ok(written) => {
                    progress!(quiet, "{} blocks successfully written", written);
                    Ok(())
                }
                Err(e) if !e.is_fatal_write() => {
                    progress!(quiet, "Skip: {}", e);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("Aborted due to error on blocks: {}", e);
                    Err(e)
                }
            }
        });

        count
    }

    fn flush_transactions(&mut self) -> usize {
        let bulk = std::mem::take(&mut self.transactions);
        let miners = std::mem::take(&mut self.miners);
        self.tx_blocks = 0;

        let accounts = collect_accounts(&bulk, miners);

        // One upsert per hash; a later copy of the same transaction wins
        let mut by_hash: HashMap<String, TransactionRecord> = HashMap::with_capacity(bulk.len());
        for tx in bulk {
            by_hash.insert(tx.hash.clone(), tx);
        }
        let count = by_hash.len();

        let store = Arc::clone(&self.store);
        self.pending.spawn(async move {
            for tx in by_hash.values() {
                store.upsert_transaction(tx).await.inspect_err(|e| {
                    tracing::error!(tx = %tx.hash, "Aborted due to error on transaction: {}", e);
                })?;
            }
            for account in accounts.values() {
                store.upsert_account(account).await.inspect_err(|e| {
                    tracing::error!(address = %account.address, "Aborted due to error on account: {}", e);
                })?;
            }
            Ok(())
        });

        count
    }

    /// Surface the result of any writes that already finished.
    /// Fails on the first fatal write error.
    pub fn check_writes(&mut self) -> Result<(), RepairError> {
        while let Some(joined) = self.pending.try_join_next() {
            joined.map_err(|e| RepairError::Task(e.to_string()))??;
        }
        Ok(())
    }

    /// Flush whatever is still buffered and wait until every write has landed
    pub async fn drain(&mut self) -> Result<(), RepairError> {
        if !self.blocks.is_empty() {
            self.flush_blocks();
        }
        if self.tx_blocks > 0 {
            self.flush_transactions();
        }

        while let Some(joined) = self.pending.join_next().await {
            joined.map_err(|e| RepairError::Task(e.to_string()))??;
        }
        Ok(())
    }

    pub fn buffered_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn buffered_transactions(&self) -> usize {
        self.transactions.len()
    }
}

/// One account per address: participants first, then miners, so a miner
/// entry is never replaced by a participant entry from the same batch.
fn collect_accounts(
    transactions: &[TransactionRecord],
    miners: Vec<AccountRecord>,
) -> HashMap<String, AccountRecord> {
    let mut accounts: HashMap<String, AccountRecord> = HashMap::new();

    for tx in transactions {
        accounts.insert(
            tx.from.clone(),
            AccountRecord::observed(tx.from.clone(), tx.block_number),
        );
        if let Some(to) = tx.destination.to() {
            accounts.insert(
                to.to_string(),
                AccountRecord::observed(to.to_string(), tx.block_number),
            );
        }
    }

    for miner in miners {
        accounts.insert(miner.address.clone(), miner);
    }

    accounts
}
