//! Swap plan construction and signing
//!
//! All amounts are integer base units. Quotes and slippage floors round down.

use ethers::abi::{self, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256, U512};
use sniper_types::BPS_DENOMINATOR;

use crate::TrinityError;

/// `swapExactTokensForTokens(uint256,uint256,address[],address,uint256)`
pub const SWAP_EXACT_TOKENS: &str =
    "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)";

fn narrow(value: U512) -> U256 {
    U256::try_from(value).unwrap_or(U256::MAX)
}

/// Constant-product output for `amount_in` after the pool fee
pub fn quote_amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256, fee_bps: u32) -> U256 {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return U256::zero();
    }
    let fee_bps = fee_bps.min(BPS_DENOMINATOR);
    let in_with_fee = amount_in.full_mul(U256::from(BPS_DENOMINATOR - fee_bps));
    let numerator = in_with_fee.saturating_mul(U512::from(reserve_out));
    let denominator = reserve_in.full_mul(U256::from(BPS_DENOMINATOR)) + in_with_fee;
    narrow(numerator / denominator)
}

/// `quote * (1 - slippage)`, rounded down
pub fn min_amount_out(quote: U256, slippage_bps: u32) -> U256 {
    let keep = BPS_DENOMINATOR.saturating_sub(slippage_bps);
    narrow(quote.full_mul(U256::from(keep)) / U512::from(BPS_DENOMINATOR))
}

/// Router calldata for an exact-input swap along `path`
pub fn encode_swap_call(
    amount_in: U256,
    min_amount_out: U256,
    path: &[Address],
    to: Address,
    deadline: U256,
) -> Bytes {
    let selector = ethers::utils::id(SWAP_EXACT_TOKENS);
    let params = abi::encode(&[
        Token::Uint(amount_in),
        Token::Uint(min_amount_out),
        Token::Array(path.iter().copied().map(Token::Address).collect()),
        Token::Address(to),
        Token::Uint(deadline),
    ]);

    let mut data = Vec::with_capacity(4 + params.len());
    data.extend_from_slice(&selector);
    data.extend_from_slice(&params);
    Bytes::from(data)
}

/// One submission attempt, rebuilt from fresh chain state every time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPlan {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub quoted_amount_out: U256,
    pub min_amount_out: U256,
    pub gas_price: U256,
    pub gas_multiplier_bps: u32,
    pub nonce: U256,
    pub deadline: U256,
}

impl SwapPlan {
    /// Legacy (EIP-155) transaction to the router, signed and RLP-encoded
    pub fn sign(
        &self,
        wallet: &LocalWallet,
        router: Address,
        chain_id: u64,
        gas_limit: u64,
    ) -> Result<Bytes, TrinityError> {
        let calldata = encode_swap_call(
            self.amount_in,
            self.min_amount_out,
            &[self.token_in, self.token_out],
            wallet.address(),
            self.deadline,
        );

        let request = TransactionRequest::new()
            .from(wallet.address())
            .to(router)
            .value(U256::zero())
            .data(calldata)
            .gas(gas_limit)
            .gas_price(self.gas_price)
            .nonce(self.nonce)
            .chain_id(chain_id);

        let tx: TypedTransaction = request.into();
        let signature = wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| TrinityError::Signing(e.to_string()))?;

        Ok(tx.rlp_signed(&signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_quote_matches_router_formula() {
        // 1 token into a 100/200_000 pool at 0.25% fee
        let out = quote_amount_out(
            U256::exp10(18),
            U256::from(100u64) * U256::exp10(18),
            U256::from(200_000u64) * U256::exp10(18),
            25,
        );
        let expected = {
            let in_fee = U256::exp10(18) * U256::from(9_975u64);
            in_fee * U256::from(200_000u64) * U256::exp10(18)
                / (U256::from(100u64) * U256::exp10(18) * U256::from(10_000u64) + in_fee)
        };
        assert_eq!(out, expected);
        assert!(out < U256::from(2_000u64) * U256::exp10(18));
    }

    #[test]
    fn test_quote_empty_pool() {
        assert_eq!(quote_amount_out(U256::one(), U256::zero(), U256::one(), 25), U256::zero());
    }

    #[test]
    fn test_min_amount_out_floor() {
        assert_eq!(min_amount_out(U256::from(1_000u64), 100), U256::from(990u64));
        // 999 * 0.99 = 989.01
        assert_eq!(min_amount_out(U256::from(999u64), 100), U256::from(989u64));
        assert_eq!(min_amount_out(U256::MAX, 0), U256::MAX);
    }

    #[test]
    fn test_encode_swap_call_layout() {
        let data = encode_swap_call(
            U256::from(1u64),
            U256::from(2u64),
            &[Address::repeat_byte(0xaa), Address::repeat_byte(0xbb)],
            Address::repeat_byte(0xcc),
            U256::from(3u64),
        );
        assert_eq!(&data[..4], &[0x38, 0xed, 0x17, 0x39]);
        // selector + 5 head words + array length + 2 elements
        assert_eq!(data.len(), 4 + 32 * 8);
        assert_eq!(data[4 + 31], 1);
        assert_eq!(data[4 + 63], 2);
    }

    #[test]
    fn test_sign_produces_decodable_tx() {
        let wallet: LocalWallet = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
            .parse()
            .unwrap();
        let plan = SwapPlan {
            token_in: Address::repeat_byte(1),
            token_out: Address::repeat_byte(2),
            amount_in: U256::from(1_000u64),
            quoted_amount_out: U256::from(500u64),
            min_amount_out: U256::from(495u64),
            gas_price: U256::from(6_000_000_000u64),
            gas_multiplier_bps: 12_000,
            nonce: U256::from(9u64),
            deadline: U256::from(1_700_000_000u64),
        };

        let raw = plan.sign(&wallet, Address::repeat_byte(3), 56, 300_000).unwrap();
        let (tx, signature) = TypedTransaction::decode_signed(&ethers::utils::rlp::Rlp::new(&raw)).unwrap();
        assert_eq!(tx.nonce(), Some(&U256::from(9u64)));
        assert_eq!(tx.gas_price(), Some(U256::from(6_000_000_000u64)));
        assert_eq!(tx.chain_id().map(|id| id.as_u64()), Some(56));
        assert_eq!(signature.recover(tx.sighash()).unwrap(), wallet.address());
    }

    proptest! {
        #[test]
        fn prop_min_out_never_exceeds_exact(quote in any::<u128>(), slippage in 1u32..10_000) {
            let quote = U256::from(quote);
            let min_out = min_amount_out(quote, slippage);
            let exact_scaled = quote.full_mul(U256::from(10_000 - slippage));
            let floor_scaled = min_out.full_mul(U256::from(10_000u64));
            prop_assert!(floor_scaled <= exact_scaled);
            // and it is the floor, not something lower
            prop_assert!(floor_scaled + U512::from(10_000u64) > exact_scaled);
        }

        #[test]
        fn prop_quote_below_reserve_out(
            amount_in in 1u128..,
            reserve_in in 1u128..,
            reserve_out in 1u128..,
            fee in 0u32..1_000,
        ) {
            let out = quote_amount_out(U256::from(amount_in), U256::from(reserve_in), U256::from(reserve_out), fee);
            prop_assert!(out < U256::from(reserve_out));
        }
    }
}
