//! Pure channel-status arithmetic over already-fetched channel rows.
//!
//! Heights are block numbers (or slots); no wall-clock time is involved.

use ethers::types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{MpeError, PaymentChannel};

/// Default head-room applied on top of `price * calls`.
pub const DEFAULT_SAFETY_MULTIPLIER: Decimal = Decimal::from_parts(11, 0, 0, false, 1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Open,
    /// Still claimable, but fewer than the warning threshold of blocks remain.
    Expiring,
    Expired,
    /// Nothing left to claim.
    Exhausted,
}

pub fn is_expired(channel: &PaymentChannel, current_height: u64) -> bool {
    current_height >= channel.expiration
}

/// Unclaimed value. A claimed total above the deposit means the ledger view is corrupt.
pub fn remaining_value(channel: &PaymentChannel, cumulative_claimed: U256) -> Result<U256, MpeError> {
    channel.value.checked_sub(cumulative_claimed).ok_or_else(|| {
        tracing::error!(
            channel_id = %channel.channel_id,
            value = %channel.value,
            claimed = %cumulative_claimed,
            "claimed amount exceeds channel value"
        );
        MpeError::InvariantViolation(format!(
            "channel {} has value {} but {} was claimed",
            channel.channel_id, channel.value, cumulative_claimed
        ))
    })
}

pub fn channel_status(
    channel: &PaymentChannel,
    current_height: u64,
    cumulative_claimed: U256,
    expiry_warning_blocks: u64,
) -> Result<ChannelStatus, MpeError> {
    let remaining = remaining_value(channel, cumulative_claimed)?;
    if is_expired(channel, current_height) {
        return Ok(ChannelStatus::Expired);
    }
    if remaining.is_zero() {
        return Ok(ChannelStatus::Exhausted);
    }
    if channel.expiration - current_height <= expiry_warning_blocks {
        return Ok(ChannelStatus::Expiring);
    }
    Ok(ChannelStatus::Open)
}

/// `ceil(price_per_call * expected_calls * multiplier)` in integer arithmetic.
pub fn minimum_deposit(
    price_per_call: U256,
    expected_calls: u64,
    multiplier: Decimal,
) -> Result<U256, MpeError> {
    if multiplier < Decimal::ONE {
        return Err(MpeError::InvalidAmount(format!(
            "safety multiplier {multiplier} is below 1"
        )));
    }
    let overflow = || MpeError::InvalidAmount("deposit calculation overflows".into());
    let base = price_per_call
        .checked_mul(U256::from(expected_calls))
        .ok_or_else(overflow)?;
    let numerator = base
        .checked_mul(U256::from(multiplier.mantissa().unsigned_abs()))
        .ok_or_else(overflow)?;
    let denominator = U256::exp10(multiplier.scale() as usize);
    let (quotient, remainder) = numerator.div_mod(denominator);
    if remainder.is_zero() {
        Ok(quotient)
    } else {
        quotient.checked_add(U256::one()).ok_or_else(overflow)
    }
}

/// What a plan of `expected_calls` at `price_per_call` needs deposited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepositPlan {
    pub base: U256,
    pub minimum: U256,
    pub buffer: U256,
}

pub fn plan_deposit(
    price_per_call: U256,
    expected_calls: u64,
    multiplier: Decimal,
) -> Result<DepositPlan, MpeError> {
    let minimum = minimum_deposit(price_per_call, expected_calls, multiplier)?;
    // minimum_deposit already proved this product fits.
    let base = price_per_call * U256::from(expected_calls);
    Ok(DepositPlan {
        base,
        minimum,
        buffer: minimum - base,
    })
}

pub fn expiration_from_now(current_height: u64, duration_blocks: u64) -> Result<u64, MpeError> {
    current_height
        .checked_add(duration_blocks)
        .ok_or_else(|| MpeError::InvalidAmount("expiration height overflows".into()))
}
