use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use crate::{
    ledger::EscrowLedger,
    payment::{
        headers::{EscrowPayment, FreeCallPayment},
        verifier::{verify_claim, verify_free_call_token},
    },
    state::evaluator::is_expired,
    types::{AuthError, FreeCallToken, MpeError, PaymentChannel},
};

/// What a daemon charges and whom it accepts payment for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub recipient: Address,
    pub group_id: H256,
    pub price_per_call: U256,
    pub organization_id: String,
    pub service_id: String,
    pub free_call_signer: Option<Address>,
    pub free_calls_per_user: u64,
    /// How many blocks old a free-call token may be.
    pub free_call_block_tolerance: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcceptedPayment {
    Escrow {
        channel_id: U256,
        nonce: U256,
        amount: U256,
        price: U256,
    },
    FreeCall {
        user_id: String,
        remaining: u64,
    },
}

/// Server-side bookkeeping for a service daemon: the highest claim accepted per channel
/// and the free calls used per user.
#[derive(Clone)]
pub struct DaemonState {
    pub(crate) accepted: Arc<RwLock<HashMap<U256, (U256, U256)>>>,
    free_calls_used: Arc<RwLock<HashMap<String, u64>>>,
    ledger: Arc<dyn EscrowLedger>,
    config: Arc<DaemonConfig>,
}

impl DaemonState {
    pub fn new(ledger: Arc<dyn EscrowLedger>, config: DaemonConfig) -> Self {
        Self {
            accepted: Arc::new(RwLock::new(HashMap::new())),
            free_calls_used: Arc::new(RwLock::new(HashMap::new())),
            ledger,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Highest cumulative amount accepted on this channel at `nonce`.
    pub async fn accepted_amount(&self, channel_id: U256, nonce: U256) -> U256 {
        match self.accepted.read().await.get(&channel_id) {
            Some((accepted_nonce, amount)) if *accepted_nonce == nonce => *amount,
            _ => U256::zero(),
        }
    }

    async fn channel(&self, channel_id: U256) -> Result<PaymentChannel, AuthError> {
        match self.ledger.channel(channel_id).await? {
            Some(channel) => Ok(channel),
            None => Err(AuthError::Ledger(MpeError::ChannelNotFound(channel_id))),
        }
    }

    pub async fn accept_escrow_payment(
        &self,
        payment: &EscrowPayment,
    ) -> Result<AcceptedPayment, AuthError> {
        let channel = self.channel(payment.channel_id).await?;
        if channel.recipient != self.config.recipient || channel.group_id != self.config.group_id {
            tracing::warn!(channel_id = %payment.channel_id, "channel pays a different recipient or group");
            return Err(AuthError::InvalidChannel);
        }
        if payment.nonce != channel.nonce {
            tracing::warn!(
                channel_id = %payment.channel_id,
                current = %channel.nonce,
                received = %payment.nonce,
                "stale channel nonce"
            );
            return Err(AuthError::InvalidChannel);
        }

        let current_block = self.ledger.current_block().await?;
        if is_expired(&channel, current_block) {
            return Err(AuthError::Expired);
        }

        let expected_signer = format!("{:?}", channel.signer);
        if !verify_claim(
            self.ledger.escrow_address(),
            payment.channel_id,
            payment.nonce,
            payment.amount,
            &payment.signature,
            &expected_signer,
        ) {
            tracing::warn!(channel_id = %payment.channel_id, "claim signature does not match channel signer");
            return Err(AuthError::InvalidSignature);
        }
        if payment.amount > channel.value {
            tracing::warn!(
                channel_id = %payment.channel_id,
                amount = %payment.amount,
                value = %channel.value,
                "claim exceeds channel value"
            );
            return Err(AuthError::InsufficientBalance);
        }

        let price = self.config.price_per_call;
        let mut accepted = self.accepted.write().await;
        let previous = match accepted.get(&payment.channel_id) {
            Some((nonce, amount)) if *nonce == payment.nonce => *amount,
            _ => U256::zero(),
        };
        if payment.amount < previous.saturating_add(price) {
            tracing::warn!(
                channel_id = %payment.channel_id,
                previous = %previous,
                amount = %payment.amount,
                "claim does not cover the call price"
            );
            return Err(AuthError::InsufficientPayment);
        }
        accepted.insert(payment.channel_id, (payment.nonce, payment.amount));

        tracing::info!(channel_id = %payment.channel_id, amount = %payment.amount, "accepted channel claim");
        Ok(AcceptedPayment::Escrow {
            channel_id: payment.channel_id,
            nonce: payment.nonce,
            amount: payment.amount,
            price,
        })
    }

    pub async fn accept_free_call(
        &self,
        payment: &FreeCallPayment,
    ) -> Result<AcceptedPayment, AuthError> {
        let Some(free_call_signer) = self.config.free_call_signer else {
            return Err(AuthError::InvalidSignature);
        };
        let token = FreeCallToken {
            user_address: payment.user_id.clone(),
            organization_id: self.config.organization_id.clone(),
            service_id: self.config.service_id.clone(),
            current_block: payment.current_block,
            signature: payment.signature.clone(),
        };
        if !verify_free_call_token(&token, &format!("{free_call_signer:?}")) {
            tracing::warn!(user = %payment.user_id, "free-call token signature rejected");
            return Err(AuthError::InvalidSignature);
        }

        let current_block = self.ledger.current_block().await?;
        if current_block > payment.current_block.saturating_add(self.config.free_call_block_tolerance) {
            return Err(AuthError::Expired);
        }

        let mut used = self.free_calls_used.write().await;
        let count = used.entry(payment.user_id.clone()).or_default();
        if *count >= self.config.free_calls_per_user {
            return Err(AuthError::FreeCallsExhausted);
        }
        *count += 1;

        Ok(AcceptedPayment::FreeCall {
            user_id: payment.user_id.clone(),
            remaining: self.config.free_calls_per_user - *count,
        })
    }
}
