//! Durable storage behind the ledger

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ethers_core::types::Address;
use parking_lot::Mutex;
use sniper_types::{PositionRecord, PositionState};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record for {pair}: {reason}")]
    Corrupt { pair: String, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record store.
///
/// Every write must be durable when it returns `Ok`. The ledger serializes
/// calls, so implementations only need per-statement atomicity.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<PositionRecord>, StoreError>;

    async fn load(&self, pair: Address) -> Result<Option<PositionRecord>, StoreError>;

    /// Insert unless a record for the pair exists. Returns whether it inserted.
    async fn insert_if_absent(&self, record: &PositionRecord) -> Result<bool, StoreError>;

    /// Replace the stored record only while its state is still `expected`.
    /// Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        expected: PositionState,
        record: &PositionRecord,
    ) -> Result<bool, StoreError>;

    /// Write a full snapshot in one transaction. Absent pairs are inserted;
    /// a stored row is only rewritten while its state equals the snapshot's.
    /// Returns the pairs left untouched because their stored state differs.
    async fn write_all(&self, records: &[PositionRecord]) -> Result<Vec<Address>, StoreError>;
}

/// In-process store for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Address, PositionRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until switched off
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write failure injected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<PositionRecord>, StoreError> {
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn load(&self, pair: Address) -> Result<Option<PositionRecord>, StoreError> {
        Ok(self.records.lock().get(&pair).cloned())
    }

    async fn insert_if_absent(&self, record: &PositionRecord) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut records = self.records.lock();
        if records.contains_key(&record.pair) {
            return Ok(false);
        }
        records.insert(record.pair, record.clone());
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        expected: PositionState,
        record: &PositionRecord,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut records = self.records.lock();
        match records.get_mut(&record.pair) {
            Some(current) if current.state == expected => {
                *current = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn write_all(&self, records: &[PositionRecord]) -> Result<Vec<Address>, StoreError> {
        self.check_writable()?;
        let mut stored = self.records.lock();
        let mut skipped = Vec::new();
        for record in records {
            match stored.get_mut(&record.pair) {
                Some(current) if current.state != record.state => skipped.push(record.pair),
                Some(current) => *current = record.clone(),
                None => {
                    stored.insert(record.pair, record.clone());
                }
            }
        }
        Ok(skipped)
    }
}
