//! The escrow contract surface the channel client drives.
//!
//! Every method is one RPC read or one submitted transaction. Nothing is retried here; a
//! caller that stops awaiting a write may still see it land on chain.

pub mod client;
pub mod ethereum;
pub mod memory;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::types::{MpeError, PaymentChannel};

pub use client::{ChannelClient, ChannelOperation, FundingPlan, OperationOutcome};
pub use ethereum::EthereumLedger;
pub use memory::InMemoryEscrow;

/// Effect of one included transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutcome {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenChannelRequest {
    pub signer: Address,
    pub recipient: Address,
    pub group_id: H256,
    pub amount: U256,
    pub expiration: u64,
}

/// An opened channel, with the id read back from the confirmation event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedChannel {
    pub channel_id: U256,
    pub tx: TxOutcome,
}

#[async_trait]
pub trait EscrowLedger: Send + Sync {
    /// The account that signs this ledger's transactions.
    fn account(&self) -> Address;

    fn escrow_address(&self) -> Address;

    async fn current_block(&self) -> Result<u64, MpeError>;

    async fn token_balance(&self, owner: Address) -> Result<U256, MpeError>;

    /// Amount the escrow contract may still pull from `owner`'s tokens.
    async fn allowance(&self, owner: Address) -> Result<U256, MpeError>;

    async fn approve(&self, amount: U256) -> Result<TxOutcome, MpeError>;

    async fn transfer_tokens(&self, to: Address, amount: U256) -> Result<TxOutcome, MpeError>;

    async fn escrow_balance(&self, owner: Address) -> Result<U256, MpeError>;

    async fn deposit(&self, amount: U256) -> Result<TxOutcome, MpeError>;

    async fn withdraw(&self, amount: U256) -> Result<TxOutcome, MpeError>;

    async fn open_channel(&self, request: &OpenChannelRequest) -> Result<OpenedChannel, MpeError>;

    /// Deposits `request.amount` and opens the channel in one contract call.
    async fn deposit_and_open_channel(
        &self,
        request: &OpenChannelRequest,
    ) -> Result<OpenedChannel, MpeError>;

    /// `None` when the id was never assigned.
    async fn channel(&self, channel_id: U256) -> Result<Option<PaymentChannel>, MpeError>;

    async fn add_funds(&self, channel_id: U256, amount: U256) -> Result<TxOutcome, MpeError>;

    async fn extend(&self, channel_id: U256, new_expiration: u64) -> Result<TxOutcome, MpeError>;

    async fn extend_and_add_funds(
        &self,
        channel_id: U256,
        new_expiration: u64,
        amount: U256,
    ) -> Result<TxOutcome, MpeError>;

    async fn claim_timeout(&self, channel_id: U256) -> Result<TxOutcome, MpeError>;
}
