//! Sniper Types - Shared types for the pair sniper
//!
//! Targets are declared once at startup and never mutated. Snapshots are
//! produced per poll and dropped after predicate evaluation.

pub mod event;
pub mod math;
pub mod position;

use ethers_core::types::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use event::{EventKind, LifecycleEvent};
pub use math::{price_wad, MAX_TOKEN_DECIMALS, WAD_DECIMALS};
pub use position::{PositionRecord, PositionState};

/// Basis point denominator (100% = 10_000 bps)
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Current wall clock in unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Target invariant violations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TargetError {
    #[error("Trigger threshold must be strictly positive")]
    NonPositiveThreshold,

    #[error("Trade amount must be strictly positive")]
    NonPositiveAmount,

    #[error("Slippage tolerance {0}bps outside (0, 10000)")]
    SlippageOutOfRange(u32),

    #[error("Maximum gas multiplier {0}bps is below 1.0x")]
    GasMultiplierTooLow(u32),

    #[error("Base and quote token are the same: {0:?}")]
    SameToken(Address),

    #[error("Token decimals {0} above the supported maximum of {}", MAX_TOKEN_DECIMALS)]
    DecimalsOutOfRange(u8),
}

/// Condition that fires a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Spot price (quote per base) at or above threshold
    PriceAbove,
    /// Spot price at or below threshold
    PriceBelow,
    /// Quote-side reserve at or above threshold
    LiquidityAbove,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::PriceAbove => write!(f, "price-above"),
            TriggerKind::PriceBelow => write!(f, "price-below"),
            TriggerKind::LiquidityAbove => write!(f, "liquidity-above"),
        }
    }
}

/// Direction of the swap executed when a target fires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    /// Spend quote token, receive base token
    #[default]
    Buy,
    /// Spend base token, receive quote token
    Sell,
}

/// Trigger kind plus threshold in its native unit.
///
/// Price thresholds are 18-decimal fixed point (quote per base). Liquidity
/// thresholds are quote-token base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub threshold: U256,
}

/// Token ordering and decimals of a pair, resolved from the chain at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairLayout {
    pub base_is_token0: bool,
    pub base_decimals: u8,
    pub quote_decimals: u8,
}

impl PairLayout {
    pub fn validate(&self) -> Result<(), TargetError> {
        for decimals in [self.base_decimals, self.quote_decimals] {
            if decimals > MAX_TOKEN_DECIMALS {
                return Err(TargetError::DecimalsOutOfRange(decimals));
            }
        }
        Ok(())
    }

    /// Split (reserve0, reserve1) into (base, quote)
    pub fn split(&self, reserve0: U256, reserve1: U256) -> (U256, U256) {
        if self.base_is_token0 {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        }
    }
}

/// Operator-declared intent to watch one pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub pair: Address,
    pub base_token: Address,
    pub quote_token: Address,
    pub layout: PairLayout,
    pub trigger: Trigger,
    pub side: TradeSide,
    /// Input amount in base units of the input token
    pub amount_in: U256,
    pub slippage_bps: u32,
    pub max_gas_multiplier_bps: u32,
    /// Minimum quote-side reserve before any trigger may fire
    pub min_liquidity: Option<U256>,
}

impl Target {
    /// Check the invariants every target must hold before it is watched
    pub fn validate(&self) -> Result<(), TargetError> {
        if self.trigger.threshold.is_zero() {
            return Err(TargetError::NonPositiveThreshold);
        }
        if self.amount_in.is_zero() {
            return Err(TargetError::NonPositiveAmount);
        }
        if self.slippage_bps == 0 || self.slippage_bps >= BPS_DENOMINATOR {
            return Err(TargetError::SlippageOutOfRange(self.slippage_bps));
        }
        if self.max_gas_multiplier_bps < BPS_DENOMINATOR {
            return Err(TargetError::GasMultiplierTooLow(self.max_gas_multiplier_bps));
        }
        if self.base_token == self.quote_token {
            return Err(TargetError::SameToken(self.base_token));
        }
        self.layout.validate()
    }

    pub fn input_token(&self) -> Address {
        match self.side {
            TradeSide::Buy => self.quote_token,
            TradeSide::Sell => self.base_token,
        }
    }

    pub fn output_token(&self) -> Address {
        match self.side {
            TradeSide::Buy => self.base_token,
            TradeSide::Sell => self.quote_token,
        }
    }

    /// (reserve_in, reserve_out) for this target's swap direction
    pub fn swap_reserves(&self, snapshot: &ReserveSnapshot) -> (U256, U256) {
        match self.side {
            TradeSide::Buy => (snapshot.quote_reserve, snapshot.base_reserve),
            TradeSide::Sell => (snapshot.base_reserve, snapshot.quote_reserve),
        }
    }

    /// Executed price (quote per base, wad) for an input/output amount pair
    pub fn execution_price(&self, amount_in: U256, amount_out: U256) -> Option<U256> {
        let layout = &self.layout;
        match self.side {
            TradeSide::Buy => price_wad(amount_in, layout.quote_decimals, amount_out, layout.base_decimals),
            TradeSide::Sell => price_wad(amount_out, layout.quote_decimals, amount_in, layout.base_decimals),
        }
    }
}

/// Result of one poll of a pair's reserves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveSnapshot {
    pub pair: Address,
    pub reserve0: U256,
    pub reserve1: U256,
    pub base_reserve: U256,
    pub quote_reserve: U256,
    /// Spot price, quote per base (wad). None when the base reserve is empty.
    pub price: Option<U256>,
    pub block_number: u64,
    pub observed_at_ms: i64,
}

impl ReserveSnapshot {
    pub fn observe(
        pair: Address,
        layout: &PairLayout,
        reserve0: U256,
        reserve1: U256,
        block_number: u64,
    ) -> Self {
        let (base_reserve, quote_reserve) = layout.split(reserve0, reserve1);
        let price = price_wad(
            quote_reserve,
            layout.quote_decimals,
            base_reserve,
            layout.base_decimals,
        );
        Self {
            pair,
            reserve0,
            reserve1,
            base_reserve,
            quote_reserve,
            price,
            block_number,
            observed_at_ms: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target {
            name: "WBNB/USDT".to_string(),
            pair: Address::repeat_byte(0x11),
            base_token: Address::repeat_byte(0xaa),
            quote_token: Address::repeat_byte(0xbb),
            layout: PairLayout { base_is_token0: true, base_decimals: 18, quote_decimals: 18 },
            trigger: Trigger { kind: TriggerKind::PriceAbove, threshold: U256::exp10(20) },
            side: TradeSide::Buy,
            amount_in: U256::exp10(18),
            slippage_bps: 100,
            max_gas_multiplier_bps: 20_000,
            min_liquidity: None,
        }
    }

    #[test]
    fn test_valid_target() {
        assert!(target().validate().is_ok());
    }

    #[test]
    fn test_target_invariants() {
        let mut t = target();
        t.trigger.threshold = U256::zero();
        assert_eq!(t.validate(), Err(TargetError::NonPositiveThreshold));

        let mut t = target();
        t.amount_in = U256::zero();
        assert_eq!(t.validate(), Err(TargetError::NonPositiveAmount));

        for bps in [0, 10_000, 12_000] {
            let mut t = target();
            t.slippage_bps = bps;
            assert_eq!(t.validate(), Err(TargetError::SlippageOutOfRange(bps)));
        }

        let mut t = target();
        t.max_gas_multiplier_bps = 9_999;
        assert!(matches!(t.validate(), Err(TargetError::GasMultiplierTooLow(_))));

        let mut t = target();
        t.layout.quote_decimals = 120;
        assert_eq!(t.validate(), Err(TargetError::DecimalsOutOfRange(120)));
    }

    #[test]
    fn test_execution_price_with_extreme_decimals_is_none() {
        let mut t = target();
        t.layout.base_decimals = 200;
        assert_eq!(t.execution_price(U256::exp10(18), U256::one() << 100), None);
    }

    #[test]
    fn test_snapshot_orientation() {
        let layout = PairLayout { base_is_token0: false, base_decimals: 18, quote_decimals: 18 };
        // token0 is the quote token here
        let snap = ReserveSnapshot::observe(
            Address::zero(),
            &layout,
            U256::from(200u64) * U256::exp10(18),
            U256::exp10(18),
            7,
        );
        assert_eq!(snap.base_reserve, U256::exp10(18));
        assert_eq!(snap.price, Some(U256::from(200u64) * U256::exp10(18)));
        assert_eq!(snap.block_number, 7);
    }

    #[test]
    fn test_swap_direction() {
        let mut t = target();
        assert_eq!(t.input_token(), t.quote_token);
        assert_eq!(t.output_token(), t.base_token);
        t.side = TradeSide::Sell;
        assert_eq!(t.input_token(), t.base_token);
    }

    #[test]
    fn test_execution_price_sell() {
        let mut t = target();
        t.side = TradeSide::Sell;
        // sold 2 base for 300 quote => 150 quote per base
        let price = t
            .execution_price(U256::from(2u64) * U256::exp10(18), U256::from(300u64) * U256::exp10(18))
            .unwrap();
        assert_eq!(price, U256::from(150u64) * U256::exp10(18));
    }

    #[test]
    fn test_trigger_kind_serde() {
        let kind: TriggerKind = serde_json::from_str("\"liquidity_above\"").unwrap();
        assert_eq!(kind, TriggerKind::LiquidityAbove);
        assert_eq!(kind.to_string(), "liquidity-above");
    }
}
