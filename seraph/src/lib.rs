//! SERAPH - Position Ledger
//!
//! Gatekeeper that decides whether a pair may trade. Sole owner of every
//! [`PositionRecord`]; nothing else writes position state.
//!
//! # Guarantees
//! - `UNTRADED -> PENDING` succeeds at most once per pair
//! - Memory is updated only after the durable write commits
//! - Terminal states stay terminal until an operator re-arms the pair

pub mod sqlite;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use ethers_core::types::{Address, H256, U256};
use sniper_types::{now_ms, PositionRecord, PositionState};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub use sqlite::SqliteStore;
pub use store::{LedgerStore, MemoryStore, StoreError};

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("No position record for pair {0:?}")]
    UnknownPair(Address),

    #[error("Pair {pair:?} is {state}, expected PENDING")]
    NotPending { pair: Address, state: PositionState },

    #[error("Pair {0:?} is PENDING; re-arming it needs force")]
    RearmPending(Address),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of an authorize request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    /// The record was not UNTRADED; carries the state that was found
    Denied(PositionState),
}

impl Authorization {
    pub fn is_granted(&self) -> bool {
        matches!(self, Authorization::Granted)
    }
}

/// Terminal outcome reported by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    Traded {
        tx_hash: H256,
        amount_in: U256,
        amount_out: U256,
        executed_price: Option<U256>,
    },
    Failed {
        tx_hash: Option<H256>,
        reason: String,
    },
}

/// Position ledger
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    records: Mutex<HashMap<Address, PositionRecord>>,
}

fn record_transition(from: PositionState, to: PositionState) {
    sniper_metrics::global()
        .ledger
        .transitions
        .with_label_values(&[from.as_str(), to.as_str()])
        .inc();
}

fn record_store_error(operation: &str, pair: Address, err: &StoreError) {
    error!(pair = ?pair, "SERAPH: {} failed to persist: {}", operation, err);
    sniper_metrics::global()
        .ledger
        .store_errors
        .with_label_values(&[operation])
        .inc();
}

impl Ledger {
    /// Open the ledger over a store and load every record
    pub async fn open(store: Arc<dyn LedgerStore>) -> Result<Self, LedgerError> {
        let ledger = Self {
            store,
            records: Mutex::new(HashMap::new()),
        };
        ledger.load().await?;
        Ok(ledger)
    }

    /// Replace the in-memory view with the durable state
    pub async fn load(&self) -> Result<usize, LedgerError> {
        let loaded = self.store.load_all().await?;
        let mut records = self.records.lock().await;
        records.clear();

        for record in loaded {
            if record.state == PositionState::Pending {
                warn!(
                    pair = ?record.pair,
                    tx_hash = ?record.tx_hash,
                    "SERAPH: pair was PENDING at shutdown; reconcile on-chain and re-arm manually"
                );
            }
            records.insert(record.pair, record);
        }

        let terminal = records.values().filter(|r| r.state.is_terminal()).count();
        info!("SERAPH: loaded {} position record(s), {} terminal", records.len(), terminal);
        Ok(records.len())
    }

    /// Write the full in-memory state to the store.
    ///
    /// A row whose durable state moved since it was loaded is not
    /// overwritten; the in-memory view adopts the stored record instead.
    /// Returns the number of records refreshed that way.
    pub async fn persist(&self) -> Result<usize, LedgerError> {
        let mut records = self.records.lock().await;
        let snapshot: Vec<PositionRecord> = records.values().cloned().collect();
        let skipped = self.store.write_all(&snapshot).await?;

        for pair in &skipped {
            if let Some(stored) = self.store.load(*pair).await? {
                warn!(
                    pair = ?pair,
                    state = %stored.state,
                    "SERAPH: stored record moved on; keeping it over the stale snapshot"
                );
                records.insert(*pair, stored);
            }
        }
        Ok(skipped.len())
    }

    /// Make sure a record exists for `pair`, creating it UNTRADED if needed
    pub async fn ensure(&self, pair: Address) -> Result<PositionRecord, LedgerError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get(&pair) {
            return Ok(record.clone());
        }

        let fresh = PositionRecord::untraded(pair, now_ms());
        let record = match self.store.insert_if_absent(&fresh).await {
            Ok(true) => fresh,
            // Written by another process since we loaded
            Ok(false) => self
                .store
                .load(pair)
                .await?
                .ok_or(LedgerError::UnknownPair(pair))?,
            Err(e) => {
                record_store_error("ensure", pair, &e);
                return Err(e.into());
            }
        };

        records.insert(pair, record.clone());
        Ok(record)
    }

    /// Atomic check-and-set `UNTRADED -> PENDING`
    pub async fn authorize(&self, pair: Address) -> Result<Authorization, LedgerError> {
        let mut records = self.records.lock().await;
        let current = records.get(&pair).cloned().ok_or(LedgerError::UnknownPair(pair))?;

        if current.state != PositionState::Untraded {
            return Ok(self.deny(pair, current.state));
        }

        let now = now_ms();
        let mut next = current.clone();
        next.state = PositionState::Pending;
        next.pending_at_ms = Some(now);
        next.updated_at_ms = now;

        match self.store.compare_and_swap(PositionState::Untraded, &next).await {
            Ok(true) => {
                records.insert(pair, next);
                record_transition(PositionState::Untraded, PositionState::Pending);
                info!(pair = ?pair, "SERAPH: authorization granted");
                Ok(Authorization::Granted)
            }
            Ok(false) => {
                // The durable record moved on without us
                let stored = self.store.load(pair).await?.ok_or(LedgerError::UnknownPair(pair))?;
                let state = stored.state;
                records.insert(pair, stored);
                Ok(self.deny(pair, state))
            }
            Err(e) => {
                record_store_error("authorize", pair, &e);
                Err(e.into())
            }
        }
    }

    fn deny(&self, pair: Address, state: PositionState) -> Authorization {
        debug!(pair = ?pair, state = %state, "SERAPH: authorization denied");
        sniper_metrics::global()
            .ledger
            .denied
            .with_label_values(&[state.as_str()])
            .inc();
        Authorization::Denied(state)
    }

    /// `PENDING -> TRADED | FAILED_TERMINAL`
    pub async fn finalize(
        &self,
        pair: Address,
        outcome: Finalization,
    ) -> Result<PositionRecord, LedgerError> {
        let mut records = self.records.lock().await;
        let current = records.get(&pair).cloned().ok_or(LedgerError::UnknownPair(pair))?;

        if current.state != PositionState::Pending {
            error!(pair = ?pair, state = %current.state, "SERAPH: finalize on a non-pending pair");
            return Err(LedgerError::NotPending { pair, state: current.state });
        }

        let now = now_ms();
        let mut next = current;
        next.finalized_at_ms = Some(now);
        next.updated_at_ms = now;
        match outcome {
            Finalization::Traded { tx_hash, amount_in, amount_out, executed_price } => {
                next.state = PositionState::Traded;
                next.tx_hash = Some(tx_hash);
                next.amount_in = Some(amount_in);
                next.amount_out = Some(amount_out);
                next.executed_price = executed_price;
                next.failure_reason = None;
            }
            Finalization::Failed { tx_hash, reason } => {
                next.state = PositionState::FailedTerminal;
                next.tx_hash = tx_hash;
                next.failure_reason = Some(reason);
            }
        }

        match self.store.compare_and_swap(PositionState::Pending, &next).await {
            Ok(true) => {
                record_transition(PositionState::Pending, next.state);
                info!(pair = ?pair, state = %next.state, tx_hash = ?next.tx_hash, "SERAPH: position finalized");
                records.insert(pair, next.clone());
                Ok(next)
            }
            Ok(false) => {
                let stored = self.store.load(pair).await?.ok_or(LedgerError::UnknownPair(pair))?;
                let state = stored.state;
                records.insert(pair, stored);
                Err(LedgerError::NotPending { pair, state })
            }
            Err(e) => {
                record_store_error("finalize", pair, &e);
                Err(e.into())
            }
        }
    }

    /// Operator reset back to UNTRADED. PENDING needs `force`.
    pub async fn rearm(&self, pair: Address, force: bool) -> Result<PositionRecord, LedgerError> {
        let mut records = self.records.lock().await;
        let current = records.get(&pair).cloned().ok_or(LedgerError::UnknownPair(pair))?;

        match current.state {
            PositionState::Untraded => return Ok(current),
            PositionState::Pending if !force => return Err(LedgerError::RearmPending(pair)),
            _ => {}
        }

        let mut next = PositionRecord::untraded(pair, current.created_at_ms);
        next.updated_at_ms = now_ms();

        match self.store.compare_and_swap(current.state, &next).await {
            Ok(true) => {
                record_transition(current.state, PositionState::Untraded);
                warn!(pair = ?pair, from = %current.state, "SERAPH: pair re-armed by operator");
                records.insert(pair, next.clone());
                Ok(next)
            }
            Ok(false) => {
                let stored = self.store.load(pair).await?.ok_or(LedgerError::UnknownPair(pair))?;
                records.insert(pair, stored.clone());
                Ok(stored)
            }
            Err(e) => {
                record_store_error("rearm", pair, &e);
                Err(e.into())
            }
        }
    }

    pub async fn get(&self, pair: Address) -> Option<PositionRecord> {
        self.records.lock().await.get(&pair).cloned()
    }

    /// Every record, oldest first
    pub async fn snapshot(&self) -> Vec<PositionRecord> {
        let mut all: Vec<PositionRecord> = self.records.lock().await.values().cloned().collect();
        all.sort_by_key(|r| (r.created_at_ms, r.pair));
        all
    }
}
