//! Exact conversions between display denominations and smallest indivisible units.
//!
//! Display amounts are `Decimal`s, on-chain amounts are integer `U256`s. Converting into
//! the smallest unit truncates excess fractional digits toward zero; nothing here goes
//! through floating point.

use ethers::types::U256;
use rust_decimal::{prelude::FromPrimitive, Decimal, RoundingStrategy};
use std::str::FromStr;

use crate::types::MpeError;

pub const AGIX_DECIMALS: u32 = 8;
pub const ASI_DECIMALS: u32 = 18;
pub const ETH_DECIMALS: u32 = 18;
pub const ADA_DECIMALS: u32 = 6;

// Largest scale a Decimal can carry.
const MAX_DECIMALS: u32 = 28;

pub fn to_smallest_unit(amount: Decimal, decimals: u32) -> Result<U256, MpeError> {
    if decimals > MAX_DECIMALS {
        return Err(MpeError::InvalidAmount(format!(
            "{decimals} decimals exceeds the supported precision"
        )));
    }
    if amount < Decimal::ZERO {
        return Err(MpeError::InvalidAmount(format!("{amount} is negative")));
    }
    let truncated = amount.round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
    let mantissa = U256::from(truncated.mantissa().unsigned_abs());
    let factor = U256::exp10((decimals - truncated.scale()) as usize);
    mantissa
        .checked_mul(factor)
        .ok_or_else(|| MpeError::InvalidAmount(format!("{amount} overflows 256 bits")))
}

pub fn to_display_unit(amount: U256, decimals: u32) -> Result<Decimal, MpeError> {
    if decimals > MAX_DECIMALS {
        return Err(MpeError::InvalidAmount(format!(
            "{decimals} decimals exceeds the supported precision"
        )));
    }
    if amount > U256::from(i128::MAX as u128) {
        return Err(MpeError::InvalidAmount(format!(
            "{amount} is too large to display"
        )));
    }
    Decimal::try_from_i128_with_scale(amount.as_u128() as i128, decimals)
        .map(|value| value.normalize())
        .map_err(|e| MpeError::InvalidAmount(format!("{amount}: {e}")))
}

/// Parses a human-entered amount such as `"2.5"`.
pub fn parse_display_amount(raw: &str) -> Result<Decimal, MpeError> {
    Decimal::from_str(raw.trim()).map_err(|e| MpeError::InvalidAmount(format!("{raw}: {e}")))
}

/// Lifts a float into a display amount, refusing NaN and infinities.
pub fn display_amount_from_f64(value: f64) -> Result<Decimal, MpeError> {
    if !value.is_finite() {
        return Err(MpeError::InvalidAmount(format!("{value} is not finite")));
    }
    Decimal::from_f64(value)
        .ok_or_else(|| MpeError::InvalidAmount(format!("{value} is not representable")))
}

/// Moves an integer amount between two precisions, e.g. 8-decimal cogs to 18-decimal units.
pub fn rescale(amount: U256, from_decimals: u32, to_decimals: u32) -> Result<U256, MpeError> {
    let overflow = || MpeError::InvalidAmount(format!("{amount} overflows when rescaled"));
    if to_decimals >= from_decimals {
        let factor = power_of_ten(to_decimals - from_decimals).ok_or_else(overflow)?;
        amount.checked_mul(factor).ok_or_else(overflow)
    } else {
        // A divisor past 2^256 leaves nothing of any representable amount.
        Ok(power_of_ten(from_decimals - to_decimals)
            .map(|divisor| amount / divisor)
            .unwrap_or_default())
    }
}

fn power_of_ten(exponent: u32) -> Option<U256> {
    U256::from(10u8).checked_pow(U256::from(exponent))
}

pub fn agix_to_cogs(agix: Decimal) -> Result<U256, MpeError> {
    to_smallest_unit(agix, AGIX_DECIMALS)
}

pub fn cogs_to_agix(cogs: U256) -> Result<Decimal, MpeError> {
    to_display_unit(cogs, AGIX_DECIMALS)
}

pub fn eth_to_wei(eth: Decimal) -> Result<U256, MpeError> {
    to_smallest_unit(eth, ETH_DECIMALS)
}

pub fn wei_to_eth(wei: U256) -> Result<Decimal, MpeError> {
    to_display_unit(wei, ETH_DECIMALS)
}

pub fn ada_to_lovelace(ada: Decimal) -> Result<U256, MpeError> {
    to_smallest_unit(ada, ADA_DECIMALS)
}

pub fn lovelace_to_ada(lovelace: U256) -> Result<Decimal, MpeError> {
    to_display_unit(lovelace, ADA_DECIMALS)
}
