use async_trait::async_trait;
use repair_common::{
    u256_to_decimal, AccountRecord, BlockRecord, ContractRecord, RepairError, TokenTransferRecord,
    TransactionRecord,
};
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Persistence for the five repaired collections.
///
/// Blocks go in with a plain insert that reports existing rows as
/// `RepairError::DuplicateKey`; everything else is an overwrite upsert.
#[async_trait]
pub trait RepairStore: Send + Sync + 'static {
    /// Insert blocks, returning how many rows were written
    async fn insert_blocks(&self, blocks: &[BlockRecord]) -> Result<u64, RepairError>;

    async fn upsert_transaction(&self, tx: &TransactionRecord) -> Result<(), RepairError>;

    async fn upsert_account(&self, account: &AccountRecord) -> Result<(), RepairError>;

    async fn upsert_contract(&self, contract: &ContractRecord) -> Result<(), RepairError>;

    async fn upsert_token_transfer(&self, transfer: &TokenTransferRecord) -> Result<(), RepairError>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Postgres TEXT cannot hold NUL, which contract-supplied strings may contain
fn pg_text(s: &str) -> String {
    s.replace('\0', "")
}

fn insert_error(e: sqlx::Error) -> RepairError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return RepairError::DuplicateKey(db_err.message().to_string());
        }
    }
    RepairError::Database(e)
}

#[async_trait]
impl RepairStore for PgStore {
    async fn insert_blocks(&self, blocks: &[BlockRecord]) -> Result<u64, RepairError> {
        if blocks.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO blocks (number, hash, parent_hash, timestamp, miner, gas_used, gas_limit, transactions) ",
        );
        query.push_values(blocks, |mut row, block| {
            row.push_bind(block.number as i64)
                .push_bind(block.hash.clone())
                .push_bind(block.parent_hash.clone())
                .push_bind(block.timestamp as i64)
                .push_bind(block.miner.clone())
                .push_bind(block.gas_used as i64)
                .push_bind(block.gas_limit as i64)
                .push_bind(block.transactions.clone());
        });

        let result = query.build().execute(&self.pool).await.map_err(insert_error)?;
        Ok(result.rows_affected())
    }

    async fn upsert_transaction(&self, tx: &TransactionRecord) -> Result<(), RepairError> {
        sqlx::query(
            "INSERT INTO transactions (hash, block_hash, block_number, from_address, to_address, creates, value,
                nonce, r, s, v, gas, gas_price, gas_used, status, input, transaction_index, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
             ON CONFLICT (hash) DO UPDATE SET
                block_hash = $2, block_number = $3, from_address = $4, to_address = $5, creates = $6,
                value = $7, nonce = $8, r = $9, s = $10, v = $11, gas = $12, gas_price = $13,
                gas_used = $14, status = $15, input = $16, transaction_index = $17, timestamp = $18"
        )
        .bind(&tx.hash)
        .bind(&tx.block_hash)
        .bind(tx.block_number as i64)
        .bind(&tx.from)
        .bind(tx.destination.to())
        .bind(tx.destination.creates())
        .bind(&tx.value)
        .bind(tx.nonce as i64)
        .bind(&tx.r)
        .bind(&tx.s)
        .bind(&tx.v)
        .bind(tx.gas as i64)
        .bind(&tx.gas_price)
        .bind(tx.gas_used as i64)
        .bind(tx.status)
        .bind(&tx.input)
        .bind(tx.transaction_index as i64)
        .bind(tx.timestamp as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_account(&self, account: &AccountRecord) -> Result<(), RepairError> {
        // Windows are repaired newest-first, so keep the lowest block seen
        sqlx::query(
            "INSERT INTO accounts (address, block_number, type)
             VALUES ($1, $2, $3)
             ON CONFLICT (address) DO UPDATE SET
                block_number = LEAST(accounts.block_number, $2),
                type = $3"
        )
        .bind(&account.address)
        .bind(account.block_number as i64)
        .bind(account.account_type.code())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_contract(&self, contract: &ContractRecord) -> Result<(), RepairError> {
        let token = contract.token.as_ref();
        let total_supply = token.map(|t| u256_to_decimal(t.total_supply)).transpose()?;

        // Token columns are overwritten with NULL on reclassification to plain
        sqlx::query(
            "INSERT INTO contracts (address, owner, block_number, creation_transaction, byte_code, erc,
                token_name, decimals, symbol, total_supply)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (address) DO UPDATE SET
                owner = $2, block_number = $3, creation_transaction = $4, byte_code = $5, erc = $6,
                token_name = $7, decimals = $8, symbol = $9, total_supply = $10"
        )
        .bind(&contract.address)
        .bind(&contract.owner)
        .bind(contract.block_number as i64)
        .bind(&contract.creation_transaction)
        .bind(&contract.byte_code)
        .bind(contract.erc().code())
        .bind(token.map(|t| pg_text(&t.token_name)))
        .bind(token.map(|t| t.decimals as i16))
        .bind(token.map(|t| pg_text(&t.symbol)))
        .bind(total_supply)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_token_transfer(&self, transfer: &TokenTransferRecord) -> Result<(), RepairError> {
        let value = u256_to_decimal(transfer.value)?;

        sqlx::query(
            "INSERT INTO token_transfers (hash, block_number, from_address, to_address, contract, value, method, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (hash) DO UPDATE SET
                block_number = $2, from_address = $3, to_address = $4, contract = $5,
                value = $6, method = $7, timestamp = $8"
        )
        .bind(&transfer.hash)
        .bind(transfer.block_number as i64)
        .bind(&transfer.from)
        .bind(&transfer.to)
        .bind(&transfer.contract)
        .bind(value)
        .bind(&transfer.method)
        .bind(transfer.timestamp as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
