//! Trigger predicate
//!
//! Pure and synchronous: a snapshot in, a decision out.

use ethers::types::U256;
use sniper_types::{ReserveSnapshot, Target, TriggerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Predicate satisfied; `observed` is the value compared to the threshold
    Fire { observed: U256 },
    /// Not satisfied. `None` when a price trigger has no price (empty base reserve).
    Hold { observed: Option<U256> },
    /// Quote reserve below the target's minimum liquidity
    Gated { quote_reserve: U256, min_liquidity: U256 },
}

impl TriggerDecision {
    pub fn is_fire(&self) -> bool {
        matches!(self, TriggerDecision::Fire { .. })
    }
}

/// Evaluate a target's trigger against one snapshot.
///
/// `price-above` fires on `price >= threshold`, `price-below` on
/// `price <= threshold`, `liquidity-above` on `quote_reserve >= threshold`.
pub fn evaluate(target: &Target, snapshot: &ReserveSnapshot) -> TriggerDecision {
    if let Some(min_liquidity) = target.min_liquidity {
        if snapshot.quote_reserve < min_liquidity {
            return TriggerDecision::Gated {
                quote_reserve: snapshot.quote_reserve,
                min_liquidity,
            };
        }
    }

    let threshold = target.trigger.threshold;
    let (observed, hit) = match target.trigger.kind {
        TriggerKind::PriceAbove => match snapshot.price {
            Some(price) => (Some(price), price >= threshold),
            None => (None, false),
        },
        TriggerKind::PriceBelow => match snapshot.price {
            Some(price) => (Some(price), price <= threshold),
            None => (None, false),
        },
        TriggerKind::LiquidityAbove => (Some(snapshot.quote_reserve), snapshot.quote_reserve >= threshold),
    };

    match (hit, observed) {
        (true, Some(observed)) => TriggerDecision::Fire { observed },
        _ => TriggerDecision::Hold { observed },
    }
}
