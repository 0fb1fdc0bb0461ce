//! Durable per-pair execution state

use std::fmt;
use std::str::FromStr;

use ethers_core::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Execution state of a pair.
///
/// `Untraded -> Pending` is the only entry into trading. `Pending` resolves to
/// `Traded` or `FailedTerminal`; leaving a terminal state needs an operator re-arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Untraded,
    Pending,
    Traded,
    FailedTerminal,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Untraded => "UNTRADED",
            PositionState::Pending => "PENDING",
            PositionState::Traded => "TRADED",
            PositionState::FailedTerminal => "FAILED_TERMINAL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionState::Traded | PositionState::FailedTerminal)
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNTRADED" => Ok(PositionState::Untraded),
            "PENDING" => Ok(PositionState::Pending),
            "TRADED" => Ok(PositionState::Traded),
            "FAILED_TERMINAL" => Ok(PositionState::FailedTerminal),
            other => Err(format!("unknown position state '{}'", other)),
        }
    }
}

/// One record per configured pair, owned by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub pair: Address,
    pub state: PositionState,
    pub tx_hash: Option<H256>,
    pub amount_in: Option<U256>,
    pub amount_out: Option<U256>,
    /// Executed price, quote per base (wad)
    pub executed_price: Option<U256>,
    pub failure_reason: Option<String>,
    pub created_at_ms: i64,
    pub pending_at_ms: Option<i64>,
    pub finalized_at_ms: Option<i64>,
    pub updated_at_ms: i64,
}

impl PositionRecord {
    pub fn untraded(pair: Address, now_ms: i64) -> Self {
        Self {
            pair,
            state: PositionState::Untraded,
            tx_hash: None,
            amount_in: None,
            amount_out: None,
            executed_price: None,
            failure_reason: None,
            created_at_ms: now_ms,
            pending_at_ms: None,
            finalized_at_ms: None,
            updated_at_ms: now_ms,
        }
    }
}
