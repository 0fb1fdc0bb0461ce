//! SQLite-backed ledger store

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use ethers_core::types::{Address, H256, U256};
use sniper_types::{PositionRecord, PositionState};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::info;

use crate::store::{LedgerStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS positions (
    pair TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    tx_hash TEXT,
    amount_in TEXT,
    amount_out TEXT,
    executed_price TEXT,
    failure_reason TEXT,
    created_at_ms INTEGER NOT NULL,
    pending_at_ms INTEGER,
    finalized_at_ms INTEGER,
    updated_at_ms INTEGER NOT NULL
)
"#;

const UPSERT: &str = r#"
INSERT INTO positions (
    pair, state, tx_hash, amount_in, amount_out, executed_price, failure_reason,
    created_at_ms, pending_at_ms, finalized_at_ms, updated_at_ms
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(pair) DO UPDATE SET
    state = excluded.state,
    tx_hash = excluded.tx_hash,
    amount_in = excluded.amount_in,
    amount_out = excluded.amount_out,
    executed_price = excluded.executed_price,
    failure_reason = excluded.failure_reason,
    created_at_ms = excluded.created_at_ms,
    pending_at_ms = excluded.pending_at_ms,
    finalized_at_ms = excluded.finalized_at_ms,
    updated_at_ms = excluded.updated_at_ms
WHERE positions.state = excluded.state
"#;

/// Position records in a single SQLite file (WAL, synchronous=FULL)
pub struct SqliteStore {
    pool: SqlitePool,
}

fn key(pair: Address) -> String {
    format!("{:?}", pair)
}

fn opt_u256(value: Option<U256>) -> Option<String> {
    value.map(|v| v.to_string())
}

impl SqliteStore {
    /// Open or create the database file
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        info!("SERAPH: ledger store at {}", path.as_ref().display());

        Ok(Self { pool })
    }

    fn decode(row: &SqliteRow) -> Result<PositionRecord, StoreError> {
        let pair_text: String = row.try_get("pair")?;
        let corrupt = |reason: String| StoreError::Corrupt { pair: pair_text.clone(), reason };

        let pair = Address::from_str(&pair_text).map_err(|e| corrupt(e.to_string()))?;
        let state_text: String = row.try_get("state")?;
        let state = PositionState::from_str(&state_text).map_err(corrupt)?;

        let tx_hash = row
            .try_get::<Option<String>, _>("tx_hash")?
            .map(|h| H256::from_str(&h))
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;

        let amount = |column: &str| -> Result<Option<U256>, StoreError> {
            row.try_get::<Option<String>, _>(column)?
                .map(|v| U256::from_dec_str(&v))
                .transpose()
                .map_err(|e| corrupt(format!("{}: {}", column, e)))
        };

        Ok(PositionRecord {
            pair,
            state,
            tx_hash,
            amount_in: amount("amount_in")?,
            amount_out: amount("amount_out")?,
            executed_price: amount("executed_price")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at_ms: row.try_get("created_at_ms")?,
            pending_at_ms: row.try_get("pending_at_ms")?,
            finalized_at_ms: row.try_get("finalized_at_ms")?,
            updated_at_ms: row.try_get("updated_at_ms")?,
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn load_all(&self) -> Result<Vec<PositionRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY created_at_ms")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn load(&self, pair: Address) -> Result<Option<PositionRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM positions WHERE pair = ?1")
            .bind(key(pair))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn insert_if_absent(&self, record: &PositionRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO positions (pair, state, created_at_ms, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(pair) DO NOTHING
            "#,
        )
        .bind(key(record.pair))
        .bind(record.state.as_str())
        .bind(record.created_at_ms)
        .bind(record.updated_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_swap(
        &self,
        expected: PositionState,
        record: &PositionRecord,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE positions SET
                state = ?3,
                tx_hash = ?4,
                amount_in = ?5,
                amount_out = ?6,
                executed_price = ?7,
                failure_reason = ?8,
                pending_at_ms = ?9,
                finalized_at_ms = ?10,
                updated_at_ms = ?11
            WHERE pair = ?1 AND state = ?2
            "#,
        )
        .bind(key(record.pair))
        .bind(expected.as_str())
        .bind(record.state.as_str())
        .bind(record.tx_hash.map(|h| format!("{:?}", h)))
        .bind(opt_u256(record.amount_in))
        .bind(opt_u256(record.amount_out))
        .bind(opt_u256(record.executed_price))
        .bind(record.failure_reason.clone())
        .bind(record.pending_at_ms)
        .bind(record.finalized_at_ms)
        .bind(record.updated_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn write_all(&self, records: &[PositionRecord]) -> Result<Vec<Address>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut skipped = Vec::new();
        for record in records {
            let result = sqlx::query(UPSERT)
                .bind(key(record.pair))
                .bind(record.state.as_str())
                .bind(record.tx_hash.map(|h| format!("{:?}", h)))
                .bind(opt_u256(record.amount_in))
                .bind(opt_u256(record.amount_out))
                .bind(opt_u256(record.executed_price))
                .bind(record.failure_reason.clone())
                .bind(record.created_at_ms)
                .bind(record.pending_at_ms)
                .bind(record.finalized_at_ms)
                .bind(record.updated_at_ms)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                skipped.push(record.pair);
            }
        }
        tx.commit().await?;
        Ok(skipped)
    }
}
