use ethers::{
    signers::Signer,
    types::{Address, U256},
};
use std::collections::HashMap;

use crate::{
    payment::signer::sign_claim,
    types::{MpeError, PaymentAuthorization, PaymentChannel},
};

/// Caller-owned high-water mark of the cumulative amounts signed per `(channel_id, nonce)`.
///
/// Not shared and not locked: one workflow owns one tracker and serializes its own calls.
#[derive(Debug, Default)]
pub struct ClaimTracker {
    issued: HashMap<(U256, U256), U256>,
}

impl ClaimTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last cumulative amount signed for this channel at this nonce, zero if none.
    pub fn last_issued(&self, channel_id: U256, nonce: U256) -> U256 {
        self.issued
            .get(&(channel_id, nonce))
            .copied()
            .unwrap_or_default()
    }

    /// Seeds the mark, e.g. from the amount a daemon reports it has already accepted.
    pub fn record(&mut self, channel_id: U256, nonce: U256, amount: U256) {
        let entry = self.issued.entry((channel_id, nonce)).or_default();
        if amount > *entry {
            *entry = amount;
        }
    }

    /// Signs exactly `amount`, refusing to go below the mark or above the channel's value.
    pub async fn authorize<S: Signer>(
        &mut self,
        signer: &S,
        mpe_address: Address,
        channel: &PaymentChannel,
        amount: U256,
    ) -> Result<PaymentAuthorization, MpeError> {
        let last = self.last_issued(channel.channel_id, channel.nonce);
        if amount < last {
            return Err(MpeError::ClaimRegression {
                last,
                requested: amount,
            });
        }
        if amount > channel.value {
            return Err(MpeError::InvalidAmount(format!(
                "cumulative amount {amount} exceeds channel {} value {}",
                channel.channel_id, channel.value
            )));
        }

        let authorization =
            sign_claim(signer, mpe_address, channel.channel_id, channel.nonce, amount).await?;
        self.issued.insert((channel.channel_id, channel.nonce), amount);
        Ok(authorization)
    }

    /// Authorizes one more call at `price`, on top of everything already signed.
    pub async fn next_call<S: Signer>(
        &mut self,
        signer: &S,
        mpe_address: Address,
        channel: &PaymentChannel,
        price: U256,
    ) -> Result<PaymentAuthorization, MpeError> {
        let last = self.last_issued(channel.channel_id, channel.nonce);
        let amount = last
            .checked_add(price)
            .ok_or_else(|| MpeError::InvalidAmount("cumulative amount overflows".into()))?;
        self.authorize(signer, mpe_address, channel, amount).await
    }
}
