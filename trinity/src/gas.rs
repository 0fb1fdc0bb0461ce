//! Gas escalation ladder
//!
//! Multipliers are integer basis points over the network gas price
//! (12_000 = 1.2x). The ladder only climbs and never passes its ceiling.

use ethers::types::U256;
use sniper_types::BPS_DENOMINATOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasLadder {
    current_bps: u32,
    step_bps: u32,
    max_bps: u32,
}

impl GasLadder {
    /// Start at `start_bps` clamped into `[1.0x, max_bps]`
    pub fn new(start_bps: u32, step_bps: u32, max_bps: u32) -> Self {
        let max_bps = max_bps.max(BPS_DENOMINATOR);
        Self {
            current_bps: start_bps.clamp(BPS_DENOMINATOR, max_bps),
            step_bps,
            max_bps,
        }
    }

    pub fn current(&self) -> u32 {
        self.current_bps
    }

    pub fn max(&self) -> u32 {
        self.max_bps
    }

    pub fn at_ceiling(&self) -> bool {
        self.current_bps >= self.max_bps
    }

    /// Climb one step and return the new multiplier
    pub fn escalate(&mut self) -> u32 {
        self.current_bps = self.current_bps.saturating_add(self.step_bps).min(self.max_bps);
        self.current_bps
    }

    /// Network gas price scaled by the current multiplier, rounded down
    pub fn apply(&self, network_gas_price: U256) -> U256 {
        network_gas_price.saturating_mul(U256::from(self.current_bps)) / U256::from(BPS_DENOMINATOR)
    }
}
