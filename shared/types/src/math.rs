//! Fixed-point helpers
//!
//! Prices are carried as 18-decimal integers ("wad"). Intermediate products
//! are computed in 512 bits so that 112-bit reserves scaled by up to 10^54
//! cannot overflow.

use ethers_core::types::{U256, U512};

pub const WAD_DECIMALS: u32 = 18;

/// Largest token decimals a U256 amount can express (10^77 < 2^256 < 10^78)
pub const MAX_TOKEN_DECIMALS: u8 = 77;

/// Price of `base_amount` expressed in `quote_amount`, normalized for token
/// decimals and scaled to 18 decimals. Rounds down.
///
/// `price = quote · 10^(18 + base_decimals) / (base · 10^quote_decimals)`
///
/// Returns `None` when `base_amount` is zero, when either decimals value is
/// above [`MAX_TOKEN_DECIMALS`], or when a scaled operand does not fit in 512
/// bits. Saturates at `U256::MAX`.
pub fn price_wad(quote_amount: U256, quote_decimals: u8, base_amount: U256, base_decimals: u8) -> Option<U256> {
    if base_amount.is_zero() || quote_decimals > MAX_TOKEN_DECIMALS || base_decimals > MAX_TOKEN_DECIMALS {
        return None;
    }

    let numerator = U512::from(quote_amount)
        .checked_mul(U512::exp10(WAD_DECIMALS as usize + base_decimals as usize))?;
    let denominator = U512::from(base_amount).checked_mul(U512::exp10(quote_decimals as usize))?;

    Some(U256::try_from(numerator / denominator).unwrap_or(U256::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_decimals() {
        let price = price_wad(U256::from(2_000u64), 18, U256::from(1_000u64), 18);
        assert_eq!(price, Some(U256::from(2u64) * U256::exp10(18)));
    }

    #[test]
    fn test_decimal_mismatch() {
        // 1 WETH (18) against 3000 USDC (6)
        let price = price_wad(U256::from(3_000_000_000u64), 6, U256::exp10(18), 18);
        assert_eq!(price, Some(U256::from(3_000u64) * U256::exp10(18)));

        // 1 WBTC (8) against 60000 DAI (18)
        let price = price_wad(U256::from(60_000u64) * U256::exp10(18), 18, U256::exp10(8), 8);
        assert_eq!(price, Some(U256::from(60_000u64) * U256::exp10(18)));
    }

    #[test]
    fn test_rounds_down() {
        // 1 / 3 with 18 decimals
        let price = price_wad(U256::one(), 18, U256::from(3u64), 18).unwrap();
        assert_eq!(price, U256::from(333_333_333_333_333_333u64));
    }

    #[test]
    fn test_zero_base() {
        assert_eq!(price_wad(U256::from(5u64), 18, U256::zero(), 18), None);
    }

    #[test]
    fn test_max_reserves_do_not_overflow() {
        let max_reserve = (U256::one() << 112) - 1;
        let price = price_wad(max_reserve, 0, U256::one(), 36);
        assert_eq!(price, Some(U256::MAX));
    }

    #[test]
    fn test_out_of_range_decimals_yield_no_price() {
        let reserve = U256::one() << 100;
        assert_eq!(price_wad(reserve, 18, U256::one(), 120), None);
        assert_eq!(price_wad(reserve, 255, U256::one(), 18), None);
        assert_eq!(price_wad(U256::MAX, 18, U256::MAX, MAX_TOKEN_DECIMALS), None);
    }

    #[test]
    fn test_largest_decimals_still_priced() {
        let price = price_wad(U256::exp10(18), MAX_TOKEN_DECIMALS, U256::exp10(18), MAX_TOKEN_DECIMALS);
        assert_eq!(price, Some(U256::exp10(18)));
    }
}
