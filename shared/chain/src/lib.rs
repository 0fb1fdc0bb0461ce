//! Sniper Chain - Chain client adapter
//!
//! Narrow contract over a JSON-RPC node: reserve and token reads, gas price,
//! nonce, raw transaction submission and receipt lookup. Everything above this
//! crate talks to the chain only through [`ChainClient`].

pub mod abi;
pub mod client;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use thiserror::Error;

pub use client::EthersChainClient;

/// Rejection reasons that call for a gas-escalated resubmission
const ESCALATABLE_REJECTIONS: &[&str] = &[
    "underpriced",
    "nonce too low",
    "nonce conflict",
    "already known",
    "replacement transaction",
];

/// JSON-RPC error codes a node uses for load shedding (EIP-1474 "limit exceeded")
const UNAVAILABLE_RPC_CODES: &[i64] = &[-32005];

/// Error messages of a node that refused to serve, not to accept, a request
const UNAVAILABLE_MESSAGES: &[&str] = &[
    "limit exceeded",
    "rate limit",
    "too many requests",
    "header not found",
    "timeout",
    "timed out",
    "busy",
    "temporarily unavailable",
];

/// Chain adapter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC request timed out after {0}ms")]
    Timeout(u64),

    /// The node answered but declined to process the request for now
    #[error("Node unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ChainError {
    /// Classify a JSON-RPC error response
    pub fn from_rpc_response(code: i64, message: &str) -> Self {
        let lower = message.to_lowercase();
        if UNAVAILABLE_RPC_CODES.contains(&code) || UNAVAILABLE_MESSAGES.iter().any(|m| lower.contains(m)) {
            ChainError::Unavailable(message.to_string())
        } else {
            ChainError::Rejected(message.to_string())
        }
    }

    /// Failures that say nothing about the request itself and are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Rpc(_) | ChainError::Timeout(_) | ChainError::Unavailable(_))
    }

    /// Rejections that a fresh plan with a higher gas price can clear
    pub fn is_escalatable(&self) -> bool {
        match self {
            ChainError::Rejected(reason) => {
                let reason = reason.to_lowercase();
                ESCALATABLE_REJECTIONS.iter().any(|r| reason.contains(r))
            }
            _ => false,
        }
    }

    /// The node may already hold the transaction (accepted or duplicate),
    /// so its hash must be watched for a receipt.
    pub fn may_have_landed(&self) -> bool {
        match self {
            ChainError::Rpc(_) | ChainError::Timeout(_) => true,
            ChainError::Rejected(reason) => reason.to_lowercase().contains("already known"),
            ChainError::Unavailable(_) | ChainError::Decode(_) => false,
        }
    }
}

/// Pair reserves observed at a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reserves {
    pub reserve0: U256,
    pub reserve1: U256,
    pub block_number: u64,
}

/// Decoded UniswapV2 `Swap` event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapLog {
    pub pair: Address,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
}

impl SwapLog {
    /// (amount_in, amount_out) for a swap whose input token is token0 or token1
    pub fn amounts(&self, input_is_token0: bool) -> (U256, U256) {
        if input_is_token0 {
            (self.amount0_in, self.amount1_out)
        } else {
            (self.amount1_in, self.amount0_out)
        }
    }
}

/// Mined-successfully receipt contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptDetails {
    pub tx_hash: H256,
    pub block_number: u64,
    pub gas_used: U256,
    pub effective_gas_price: Option<U256>,
    pub swaps: Vec<SwapLog>,
}

impl ReceiptDetails {
    pub fn swap_for(&self, pair: Address) -> Option<&SwapLog> {
        self.swaps.iter().find(|s| s.pair == pair)
    }
}

/// Receipt lookup result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Pending,
    Success(ReceiptDetails),
    Reverted { tx_hash: H256, block_number: u64 },
}

/// Chain client adapter
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_block_number(&self) -> Result<u64, ChainError>;

    /// `getReserves()` of a pair, read at a single block
    async fn get_reserves(&self, pair: Address) -> Result<Reserves, ChainError>;

    /// `(token0, token1)` of a pair
    async fn pair_tokens(&self, pair: Address) -> Result<(Address, Address), ChainError>;

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError>;

    async fn get_gas_price(&self) -> Result<U256, ChainError>;

    /// Confirmed transaction count of an account
    async fn get_nonce(&self, account: Address) -> Result<U256, ChainError>;

    /// Submit a signed, RLP-encoded transaction
    async fn submit_transaction(&self, raw: Bytes) -> Result<H256, ChainError>;

    async fn get_receipt(&self, tx_hash: H256) -> Result<ReceiptStatus, ChainError>;
}

/// Hash a signed raw transaction the way the node will
pub fn raw_tx_hash(raw: &Bytes) -> H256 {
    H256::from(ethers::utils::keccak256(raw.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalatable_rejections() {
        assert!(ChainError::Rejected("replacement transaction underpriced".into()).is_escalatable());
        assert!(ChainError::Rejected("transaction underpriced".into()).is_escalatable());
        assert!(ChainError::Rejected("Nonce too low".into()).is_escalatable());
        assert!(!ChainError::Rejected("insufficient funds for gas * price + value".into()).is_escalatable());
        assert!(!ChainError::Rpc("connection reset".into()).is_escalatable());
    }

    #[test]
    fn test_may_have_landed() {
        assert!(ChainError::Timeout(1000).may_have_landed());
        assert!(ChainError::Rejected("already known".into()).may_have_landed());
        assert!(!ChainError::Rejected("underpriced".into()).may_have_landed());
    }

    #[test]
    fn test_rpc_response_classification() {
        let limited = ChainError::from_rpc_response(-32005, "limit exceeded");
        assert_eq!(limited, ChainError::Unavailable("limit exceeded".to_string()));
        assert!(limited.is_transient());
        assert!(!limited.may_have_landed());
        assert!(!limited.is_escalatable());

        assert!(matches!(
            ChainError::from_rpc_response(-32000, "header not found"),
            ChainError::Unavailable(_)
        ));

        let underpriced = ChainError::from_rpc_response(-32000, "transaction underpriced");
        assert!(underpriced.is_escalatable());
        assert!(!underpriced.is_transient());

        let funds = ChainError::from_rpc_response(-32000, "insufficient funds for gas * price + value");
        assert!(matches!(funds, ChainError::Rejected(_)));
        assert!(!funds.is_transient());
    }

    #[test]
    fn test_swap_log_amounts() {
        let log = SwapLog {
            pair: Address::zero(),
            amount0_in: U256::from(10u64),
            amount1_in: U256::zero(),
            amount0_out: U256::zero(),
            amount1_out: U256::from(25u64),
        };
        assert_eq!(log.amounts(true), (U256::from(10u64), U256::from(25u64)));
        assert_eq!(log.amounts(false), (U256::zero(), U256::zero()));
    }
}
