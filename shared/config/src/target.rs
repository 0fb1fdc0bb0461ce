//! `[[targets]]` entries
//!
//! Amounts and thresholds are written as human decimals ("650.5") and only
//! scaled to integer units once the pair's token decimals are known.

use ethers_core::types::{Address, U256};
use ethers_core::utils::{parse_units, ParseUnits};
use serde::{Deserialize, Serialize};
use sniper_types::{PairLayout, Target, TradeSide, Trigger, TriggerKind, BPS_DENOMINATOR, WAD_DECIMALS};

use crate::{multiplier_bps, ConfigError};

fn default_slippage_bps() -> u32 {
    100
}

fn default_max_gas_multiplier() -> f64 {
    2.0
}

/// One target as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub pair: String,
    pub base_token: String,
    pub quote_token: String,
    pub trigger: TriggerKind,
    /// Quote per base for price triggers, quote tokens for liquidity triggers
    pub threshold: String,
    /// Input token amount
    pub amount: String,
    #[serde(default)]
    pub side: TradeSide,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_max_gas_multiplier")]
    pub max_gas_multiplier: f64,
    /// Quote tokens that must sit in the pool before any trigger fires
    #[serde(default)]
    pub min_liquidity: Option<String>,
}

/// Target with addresses parsed and scalar limits checked. Decimal fields
/// stay textual until [`TargetSpec::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSpec {
    pub name: String,
    pub pair: Address,
    pub base_token: Address,
    pub quote_token: Address,
    pub trigger: TriggerKind,
    pub threshold: String,
    pub amount: String,
    pub side: TradeSide,
    pub slippage_bps: u32,
    pub max_gas_multiplier_bps: u32,
    pub min_liquidity: Option<String>,
}

pub(crate) fn parse_address(field: &str, value: &str) -> Result<Address, ConfigError> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|_| ConfigError::InvalidValue(format!("{} is not an address: '{}'", field, value)))
}

/// Plain unsigned decimal with at least one non-zero digit
fn is_positive_decimal(text: &str) -> bool {
    let text = text.trim();
    let mut dots = 0;
    let mut nonzero = false;
    for c in text.chars() {
        match c {
            '.' => dots += 1,
            '1'..='9' => nonzero = true,
            '0' => {}
            _ => return false,
        }
    }
    !text.is_empty() && dots <= 1 && nonzero
}

/// Scale a decimal string into integer units of `decimals`
pub fn parse_amount(text: &str, decimals: u8) -> Result<U256, String> {
    let text = text.trim();
    if text.starts_with('-') {
        return Err(format!("'{}' is negative", text));
    }
    match parse_units(text, decimals as u32) {
        Ok(ParseUnits::U256(value)) => Ok(value),
        Ok(ParseUnits::I256(_)) => Err(format!("'{}' is negative", text)),
        Err(e) => Err(format!("'{}': {}", text, e)),
    }
}

impl TargetConfig {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.pair.clone())
    }

    pub fn to_spec(&self) -> Result<TargetSpec, ConfigError> {
        let name = self.display_name();
        let invalid = |reason: String| ConfigError::InvalidTarget { name: name.clone(), reason };

        let pair = parse_address("pair", &self.pair).map_err(|e| invalid(e.to_string()))?;
        let base_token = parse_address("base_token", &self.base_token).map_err(|e| invalid(e.to_string()))?;
        let quote_token = parse_address("quote_token", &self.quote_token).map_err(|e| invalid(e.to_string()))?;

        if base_token == quote_token {
            return Err(invalid("base_token and quote_token are the same".to_string()));
        }
        if !is_positive_decimal(&self.threshold) {
            return Err(invalid(format!("threshold '{}' must be a positive decimal", self.threshold)));
        }
        if !is_positive_decimal(&self.amount) {
            return Err(invalid(format!("amount '{}' must be a positive decimal", self.amount)));
        }
        if let Some(min) = &self.min_liquidity {
            if !is_positive_decimal(min) {
                return Err(invalid(format!("min_liquidity '{}' must be a positive decimal", min)));
            }
        }
        if self.slippage_bps == 0 || self.slippage_bps >= BPS_DENOMINATOR {
            return Err(invalid(format!("slippage_bps {} outside (0, 10000)", self.slippage_bps)));
        }
        if !(self.max_gas_multiplier >= 1.0) {
            return Err(invalid(format!("max_gas_multiplier {} is below 1.0", self.max_gas_multiplier)));
        }

        Ok(TargetSpec {
            name,
            pair,
            base_token,
            quote_token,
            trigger: self.trigger,
            threshold: self.threshold.trim().to_string(),
            amount: self.amount.trim().to_string(),
            side: self.side,
            slippage_bps: self.slippage_bps,
            max_gas_multiplier_bps: multiplier_bps(self.max_gas_multiplier),
            min_liquidity: self.min_liquidity.as_ref().map(|m| m.trim().to_string()),
        })
    }
}

impl TargetSpec {
    /// Scale decimal fields with the pair's resolved decimals and build the
    /// immutable [`Target`].
    pub fn resolve(&self, layout: PairLayout) -> Result<Target, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTarget { name: self.name.clone(), reason };
        layout.validate().map_err(|e| invalid(e.to_string()))?;

        let threshold_decimals = match self.trigger {
            TriggerKind::PriceAbove | TriggerKind::PriceBelow => WAD_DECIMALS as u8,
            TriggerKind::LiquidityAbove => layout.quote_decimals,
        };
        let input_decimals = match self.side {
            TradeSide::Buy => layout.quote_decimals,
            TradeSide::Sell => layout.base_decimals,
        };

        let threshold = parse_amount(&self.threshold, threshold_decimals).map_err(|e| invalid(format!("threshold {}", e)))?;
        let amount_in = parse_amount(&self.amount, input_decimals).map_err(|e| invalid(format!("amount {}", e)))?;
        let min_liquidity = self
            .min_liquidity
            .as_deref()
            .map(|m| parse_amount(m, layout.quote_decimals))
            .transpose()
            .map_err(|e| invalid(format!("min_liquidity {}", e)))?;

        let target = Target {
            name: self.name.clone(),
            pair: self.pair,
            base_token: self.base_token,
            quote_token: self.quote_token,
            layout,
            trigger: Trigger { kind: self.trigger, threshold },
            side: self.side,
            amount_in,
            slippage_bps: self.slippage_bps,
            max_gas_multiplier_bps: self.max_gas_multiplier_bps,
            min_liquidity,
        };

        target.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(target)
    }
}
