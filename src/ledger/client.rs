use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{EscrowLedger, OpenChannelRequest, OpenedChannel, TxOutcome};
use crate::{
    state::evaluator::{self, ChannelStatus},
    types::{ChainConfig, ChainFamily, ChainId, MpeError, NetworkConfig, PaymentChannel},
    utils::units,
};

/// Result of the two-step approve-then-deposit sequence. The steps are separate
/// transactions: if `approval` landed and the deposit failed, retry the deposit alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowDeposit {
    pub approval: Option<TxOutcome>,
    pub deposit: TxOutcome,
}

/// What a caller expects to spend through one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FundingPlan {
    pub signer: Address,
    pub recipient: Address,
    pub group_id: H256,
    pub price_per_call: U256,
    pub expected_calls: u64,
    pub safety_multiplier: Decimal,
    pub duration_blocks: u64,
    /// Amount the recipient has already been authorized to claim at the current nonce.
    pub cumulative_claimed: U256,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelOperation {
    Deposit { amount: U256 },
    Withdraw { amount: U256 },
    Open(OpenChannelRequest),
    AddFunds { channel_id: U256, amount: U256 },
    Extend { channel_id: U256, new_expiration: u64 },
    ExtendAndAddFunds { channel_id: U256, new_expiration: u64, amount: U256 },
    ClaimTimeout { channel_id: U256 },
    Query { channel_id: U256 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationOutcome {
    Deposited(EscrowDeposit),
    Opened(OpenedChannel),
    Submitted(TxOutcome),
    Channel(PaymentChannel),
}

/// Typed client over the escrow contract for one configured chain.
///
/// Validates inputs locally before anything is submitted, and never retries: a
/// `MpeError::Transport` says nothing about whether a write landed.
#[derive(Clone)]
pub struct ChannelClient {
    ledger: Arc<dyn EscrowLedger>,
    chain: ChainConfig,
    chain_id: ChainId,
}

impl ChannelClient {
    pub fn new(
        ledger: Arc<dyn EscrowLedger>,
        network: Arc<NetworkConfig>,
        chain_id: ChainId,
    ) -> Result<Self, MpeError> {
        let chain = network.chain(&chain_id)?.clone();
        if chain.family != ChainFamily::Ethereum {
            return Err(MpeError::Config(format!(
                "chain {chain_id} has no escrow contract surface"
            )));
        }
        Ok(Self {
            ledger,
            chain,
            chain_id,
        })
    }

    pub fn ledger(&self) -> &Arc<dyn EscrowLedger> {
        &self.ledger
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn account(&self) -> Address {
        self.ledger.account()
    }

    pub fn escrow_address(&self) -> Address {
        self.ledger.escrow_address()
    }

    /// Human-facing rendering of a smallest-unit amount in the chain's service token.
    pub fn display_amount(&self, amount: U256) -> String {
        let token = &self.chain().token;
        match units::to_display_unit(amount, token.decimals) {
            Ok(value) => format!("{value} {}", token.symbol),
            Err(_) => format!("{amount} (smallest units)"),
        }
    }

    pub async fn current_block(&self) -> Result<u64, MpeError> {
        self.ledger.current_block().await
    }

    pub async fn escrow_balance(&self, owner: Address) -> Result<U256, MpeError> {
        self.ledger.escrow_balance(owner).await
    }

    pub async fn token_balance(&self, owner: Address) -> Result<U256, MpeError> {
        self.ledger.token_balance(owner).await
    }

    /// First half of a deposit: raises the escrow's spending allowance if it is short.
    pub async fn ensure_allowance(&self, amount: U256) -> Result<Option<TxOutcome>, MpeError> {
        let owner = self.account();
        let allowance = self.ledger.allowance(owner).await?;
        if allowance >= amount {
            tracing::debug!(%allowance, %amount, "allowance already sufficient");
            return Ok(None);
        }
        let tx = self.ledger.approve(amount).await?;
        tracing::info!(amount = %self.display_amount(amount), tx_hash = ?tx.tx_hash, "approved escrow allowance");
        Ok(Some(tx))
    }

    /// Approve-then-deposit. Not atomic; see [`EscrowDeposit`].
    pub async fn deposit_to_escrow(&self, amount: U256) -> Result<EscrowDeposit, MpeError> {
        require_positive(amount)?;
        let approval = self.ensure_allowance(amount).await?;
        let deposit = self.ledger.deposit(amount).await.map_err(|e| {
            tracing::warn!(
                approved = approval.is_some(),
                error = %e,
                "deposit failed after the allowance step; retry the deposit alone"
            );
            e
        })?;
        tracing::info!(amount = %self.display_amount(amount), tx_hash = ?deposit.tx_hash, "deposited to escrow");
        Ok(EscrowDeposit { approval, deposit })
    }

    pub async fn withdraw_from_escrow(&self, amount: U256) -> Result<TxOutcome, MpeError> {
        require_positive(amount)?;
        let tx = self.ledger.withdraw(amount).await?;
        tracing::info!(amount = %self.display_amount(amount), tx_hash = ?tx.tx_hash, "withdrew from escrow");
        Ok(tx)
    }

    /// Opens a channel, depositing the full amount in the same call when the escrow
    /// balance does not already cover it.
    pub async fn open_channel(
        &self,
        signer: Address,
        recipient: Address,
        group_id: H256,
        amount: U256,
        expiration: u64,
    ) -> Result<OpenedChannel, MpeError> {
        require_positive(amount)?;
        let request = OpenChannelRequest {
            signer,
            recipient,
            group_id,
            amount,
            expiration,
        };

        let balance = self.ledger.escrow_balance(self.account()).await?;
        let opened = if balance >= amount {
            self.ledger.open_channel(&request).await?
        } else {
            self.ensure_allowance(amount).await?;
            self.ledger.deposit_and_open_channel(&request).await?
        };

        tracing::info!(
            channel_id = %opened.channel_id,
            ?recipient,
            amount = %self.display_amount(amount),
            expiration,
            tx_hash = ?opened.tx.tx_hash,
            "opened payment channel"
        );
        Ok(opened)
    }

    pub async fn get_channel(&self, channel_id: U256) -> Result<PaymentChannel, MpeError> {
        let channel = self
            .ledger
            .channel(channel_id)
            .await?
            .ok_or(MpeError::ChannelNotFound(channel_id))?;
        tracing::debug!(%channel_id, nonce = %channel.nonce, value = %channel.value, "fetched channel");
        Ok(channel)
    }

    pub async fn add_funds(&self, channel_id: U256, amount: U256) -> Result<TxOutcome, MpeError> {
        require_positive(amount)?;
        let tx = self.ledger.add_funds(channel_id, amount).await?;
        tracing::info!(%channel_id, amount = %self.display_amount(amount), tx_hash = ?tx.tx_hash, "added channel funds");
        Ok(tx)
    }

    pub async fn extend(&self, channel_id: U256, new_expiration: u64) -> Result<TxOutcome, MpeError> {
        let tx = self.ledger.extend(channel_id, new_expiration).await?;
        tracing::info!(%channel_id, new_expiration, tx_hash = ?tx.tx_hash, "extended channel");
        Ok(tx)
    }

    pub async fn extend_and_add_funds(
        &self,
        channel_id: U256,
        new_expiration: u64,
        amount: U256,
    ) -> Result<TxOutcome, MpeError> {
        require_positive(amount)?;
        let tx = self
            .ledger
            .extend_and_add_funds(channel_id, new_expiration, amount)
            .await?;
        tracing::info!(
            %channel_id,
            new_expiration,
            amount = %self.display_amount(amount),
            tx_hash = ?tx.tx_hash,
            "extended and funded channel"
        );
        Ok(tx)
    }

    /// Reclaims the unclaimed remainder after expiration. A channel with nothing left
    /// fails with `AlreadySettled` without submitting anything.
    pub async fn claim_timeout(&self, channel_id: U256) -> Result<TxOutcome, MpeError> {
        let channel = self.get_channel(channel_id).await?;
        if channel.value.is_zero() {
            return Err(MpeError::AlreadySettled(channel_id));
        }
        let tx = self.ledger.claim_timeout(channel_id).await?;
        tracing::info!(
            %channel_id,
            refunded = %self.display_amount(channel.value),
            tx_hash = ?tx.tx_hash,
            "claimed channel timeout"
        );
        Ok(tx)
    }

    pub async fn channel_status(
        &self,
        channel_id: U256,
        cumulative_claimed: U256,
    ) -> Result<ChannelStatus, MpeError> {
        let channel = self.get_channel(channel_id).await?;
        let current = self.current_block().await?;
        evaluator::channel_status(
            &channel,
            current,
            cumulative_claimed,
            self.expiry_warning_blocks(),
        )
    }

    /// Opens, tops up and/or extends a channel so it covers `plan`. Returns the channel
    /// as the ledger reports it afterwards.
    pub async fn ensure_funded(
        &self,
        existing: Option<U256>,
        plan: &FundingPlan,
    ) -> Result<PaymentChannel, MpeError> {
        let current = self.current_block().await?;
        let deposit = evaluator::plan_deposit(
            plan.price_per_call,
            plan.expected_calls,
            plan.safety_multiplier,
        )?;
        let wanted_expiration = evaluator::expiration_from_now(current, plan.duration_blocks)?;

        let Some(channel_id) = existing else {
            let opened = self
                .open_channel(
                    plan.signer,
                    plan.recipient,
                    plan.group_id,
                    deposit.minimum,
                    wanted_expiration,
                )
                .await?;
            return self.get_channel(opened.channel_id).await;
        };

        let channel = self.get_channel(channel_id).await?;
        if channel.signer != plan.signer
            || channel.recipient != plan.recipient
            || channel.group_id != plan.group_id
        {
            return Err(MpeError::InvalidAddress(format!(
                "channel {channel_id} belongs to a different signer, recipient or group"
            )));
        }

        let remaining = evaluator::remaining_value(&channel, plan.cumulative_claimed)?;
        let top_up = deposit.minimum.saturating_sub(remaining);
        let new_expiration = (channel.expiration < wanted_expiration).then_some(wanted_expiration);

        if !top_up.is_zero() {
            let balance = self.ledger.escrow_balance(self.account()).await?;
            if balance < top_up {
                self.deposit_to_escrow(top_up - balance).await?;
            }
        }

        match (top_up.is_zero(), new_expiration) {
            (false, Some(expiration)) => {
                self.extend_and_add_funds(channel_id, expiration, top_up).await?;
            }
            (false, None) => {
                self.add_funds(channel_id, top_up).await?;
            }
            (true, Some(expiration)) => {
                self.extend(channel_id, expiration).await?;
            }
            (true, None) => {
                tracing::debug!(%channel_id, "channel already covers the plan");
                return Ok(channel);
            }
        }
        self.get_channel(channel_id).await
    }

    pub async fn execute(&self, operation: ChannelOperation) -> Result<OperationOutcome, MpeError> {
        match operation {
            ChannelOperation::Deposit { amount } => {
                self.deposit_to_escrow(amount).await.map(OperationOutcome::Deposited)
            }
            ChannelOperation::Withdraw { amount } => {
                self.withdraw_from_escrow(amount).await.map(OperationOutcome::Submitted)
            }
            ChannelOperation::Open(request) => self
                .open_channel(
                    request.signer,
                    request.recipient,
                    request.group_id,
                    request.amount,
                    request.expiration,
                )
                .await
                .map(OperationOutcome::Opened),
            ChannelOperation::AddFunds { channel_id, amount } => {
                self.add_funds(channel_id, amount).await.map(OperationOutcome::Submitted)
            }
            ChannelOperation::Extend {
                channel_id,
                new_expiration,
            } => self
                .extend(channel_id, new_expiration)
                .await
                .map(OperationOutcome::Submitted),
            ChannelOperation::ExtendAndAddFunds {
                channel_id,
                new_expiration,
                amount,
            } => self
                .extend_and_add_funds(channel_id, new_expiration, amount)
                .await
                .map(OperationOutcome::Submitted),
            ChannelOperation::ClaimTimeout { channel_id } => {
                self.claim_timeout(channel_id).await.map(OperationOutcome::Submitted)
            }
            ChannelOperation::Query { channel_id } => {
                self.get_channel(channel_id).await.map(OperationOutcome::Channel)
            }
        }
    }

    fn expiry_warning_blocks(&self) -> u64 {
        self.chain().default_expiration_blocks / 10
    }
}

fn require_positive(amount: U256) -> Result<(), MpeError> {
    if amount.is_zero() {
        return Err(MpeError::InvalidAmount("amount must be greater than zero".into()));
    }
    Ok(())
}
