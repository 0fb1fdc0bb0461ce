//! UniswapV2 pair / ERC20 ABI subset
//!
//! Only the handful of view calls and the `Swap` event the sniper needs, so
//! no generated bindings are pulled in.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Log, H256, U256};
use ethers::utils::{id, keccak256};

use crate::{ChainError, SwapLog};

pub const GET_RESERVES: &str = "getReserves()";
pub const TOKEN0: &str = "token0()";
pub const TOKEN1: &str = "token1()";
pub const DECIMALS: &str = "decimals()";
pub const SWAP_EVENT: &str = "Swap(address,uint256,uint256,uint256,uint256,address)";

/// 4-byte selector of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    id(signature)
}

pub fn swap_event_topic() -> H256 {
    H256::from(keccak256(SWAP_EVENT.as_bytes()))
}

/// Decode `getReserves() returns (uint112, uint112, uint32)`
pub fn decode_reserves(data: &[u8]) -> Result<(U256, U256), ChainError> {
    let tokens = abi::decode(
        &[ParamType::Uint(112), ParamType::Uint(112), ParamType::Uint(32)],
        data,
    )
    .map_err(|e| ChainError::Decode(format!("getReserves: {}", e)))?;

    let mut iter = tokens.into_iter();
    let reserve0 = iter.next().and_then(Token::into_uint);
    let reserve1 = iter.next().and_then(Token::into_uint);
    match (reserve0, reserve1) {
        (Some(r0), Some(r1)) => Ok((r0, r1)),
        _ => Err(ChainError::Decode("getReserves: missing reserve words".to_string())),
    }
}

pub fn decode_address(data: &[u8]) -> Result<Address, ChainError> {
    abi::decode(&[ParamType::Address], data)
        .map_err(|e| ChainError::Decode(format!("address: {}", e)))?
        .into_iter()
        .next()
        .and_then(Token::into_address)
        .ok_or_else(|| ChainError::Decode("address: empty return".to_string()))
}

pub fn decode_decimals(data: &[u8]) -> Result<u8, ChainError> {
    let value = abi::decode(&[ParamType::Uint(8)], data)
        .map_err(|e| ChainError::Decode(format!("decimals: {}", e)))?
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| ChainError::Decode("decimals: empty return".to_string()))?;

    if value > U256::from(u8::MAX) {
        return Err(ChainError::Decode(format!("decimals: {} out of range", value)));
    }
    Ok(value.as_u32() as u8)
}

/// Decode a pair `Swap` event. Returns `None` for any other log.
pub fn decode_swap_log(log: &Log) -> Option<SwapLog> {
    if log.topics.first() != Some(&swap_event_topic()) {
        return None;
    }

    let tokens = abi::decode(
        &[
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ],
        log.data.as_ref(),
    )
    .ok()?;

    let mut amounts = tokens.into_iter().filter_map(Token::into_uint);
    Some(SwapLog {
        pair: log.address,
        amount0_in: amounts.next()?,
        amount1_in: amounts.next()?,
        amount0_out: amounts.next()?,
        amount1_out: amounts.next()?,
    })
}
