//! An in-process escrow that follows the contract's rules, for tests and local dry runs.

use async_trait::async_trait;
use ethers::{
    types::{Address, H256, U256},
    utils::keccak256,
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use super::{EscrowLedger, OpenChannelRequest, OpenedChannel, TxOutcome};
use crate::{
    payment::verifier::recover_claim_signer,
    types::{MpeError, PaymentChannel},
};

#[derive(Debug, Default)]
struct EscrowBook {
    block: u64,
    tx_count: u64,
    tokens: HashMap<Address, U256>,
    allowances: HashMap<Address, U256>,
    balances: HashMap<Address, U256>,
    channels: HashMap<U256, PaymentChannel>,
    next_channel_id: U256,
}

impl EscrowBook {
    fn mine(&mut self) -> TxOutcome {
        self.tx_count += 1;
        TxOutcome {
            tx_hash: H256::from(keccak256(self.tx_count.to_be_bytes())),
            block_number: Some(self.block),
        }
    }

    fn debit(map: &mut HashMap<Address, U256>, owner: Address, amount: U256, reason: &str) -> Result<(), MpeError> {
        let entry = map.entry(owner).or_default();
        *entry = entry
            .checked_sub(amount)
            .ok_or_else(|| MpeError::insufficient_balance(reason))?;
        Ok(())
    }

    fn credit(map: &mut HashMap<Address, U256>, owner: Address, amount: U256) {
        *map.entry(owner).or_default() += amount;
    }

    fn deposit(&mut self, owner: Address, amount: U256) -> Result<(), MpeError> {
        if self.allowances.get(&owner).copied().unwrap_or_default() < amount {
            return Err(MpeError::insufficient_balance("ERC20: insufficient allowance"));
        }
        Self::debit(&mut self.tokens, owner, amount, "ERC20: transfer amount exceeds balance")?;
        Self::debit(&mut self.allowances, owner, amount, "ERC20: insufficient allowance")?;
        Self::credit(&mut self.balances, owner, amount);
        Ok(())
    }

    fn open(&mut self, sender: Address, request: &OpenChannelRequest) -> Result<U256, MpeError> {
        Self::debit(&mut self.balances, sender, request.amount, "Insufficient balance")?;
        let channel_id = self.next_channel_id;
        self.next_channel_id += U256::one();
        self.channels.insert(
            channel_id,
            PaymentChannel {
                channel_id,
                nonce: U256::zero(),
                sender,
                signer: request.signer,
                recipient: request.recipient,
                group_id: request.group_id,
                value: request.amount,
                expiration: request.expiration,
            },
        );
        Ok(channel_id)
    }

    fn channel_mut(&mut self, channel_id: U256) -> Result<&mut PaymentChannel, MpeError> {
        self.channels
            .get_mut(&channel_id)
            .ok_or_else(|| missing_channel(channel_id))
    }

    fn add_funds(&mut self, from: Address, channel_id: U256, amount: U256) -> Result<(), MpeError> {
        self.channel_mut(channel_id)?;
        Self::debit(&mut self.balances, from, amount, "Insufficient balance")?;
        self.channel_mut(channel_id)?.value += amount;
        Ok(())
    }

    fn check_extend(&self, from: Address, channel_id: U256, new_expiration: u64) -> Result<(), MpeError> {
        let channel = self
            .channels
            .get(&channel_id)
            .ok_or_else(|| missing_channel(channel_id))?;
        if channel.sender != from {
            return Err(MpeError::rejected(Some("Sender not authorized".into())));
        }
        if new_expiration < channel.expiration {
            return Err(MpeError::rejected(Some("Invalid expiration".into())));
        }
        Ok(())
    }

    fn extend(&mut self, from: Address, channel_id: U256, new_expiration: u64) -> Result<(), MpeError> {
        self.check_extend(from, channel_id, new_expiration)?;
        self.channel_mut(channel_id)?.expiration = new_expiration;
        Ok(())
    }

    /// Both halves are checked before either is applied, so a revert leaves the channel as it was.
    fn extend_and_add_funds(
        &mut self,
        from: Address,
        channel_id: U256,
        new_expiration: u64,
        amount: U256,
    ) -> Result<(), MpeError> {
        self.check_extend(from, channel_id, new_expiration)?;
        if self.balances.get(&from).copied().unwrap_or_default() < amount {
            return Err(MpeError::insufficient_balance("Insufficient balance"));
        }
        self.add_funds(from, channel_id, amount)?;
        self.extend(from, channel_id, new_expiration)
    }
}

fn missing_channel(channel_id: U256) -> MpeError {
    MpeError::rejected(Some(format!("channel {channel_id} does not exist")))
}

/// A handle onto a shared simulated escrow, acting as one account.
#[derive(Clone)]
pub struct InMemoryEscrow {
    book: Arc<RwLock<EscrowBook>>,
    account: Address,
    escrow_address: Address,
}

impl InMemoryEscrow {
    pub fn new(account: Address, escrow_address: Address) -> Self {
        Self {
            book: Arc::new(RwLock::new(EscrowBook::default())),
            account,
            escrow_address,
        }
    }

    /// Another handle onto the same ledger, signing as `account`.
    pub fn connect_as(&self, account: Address) -> Self {
        Self {
            book: self.book.clone(),
            account,
            escrow_address: self.escrow_address,
        }
    }

    pub async fn mint(&self, to: Address, amount: U256) {
        EscrowBook::credit(&mut self.book.write().await.tokens, to, amount);
    }

    pub async fn advance_blocks(&self, blocks: u64) -> u64 {
        let mut book = self.book.write().await;
        book.block += blocks;
        book.block
    }

    /// Recipient-side claim of `amount` against the channel's current nonce.
    pub async fn claim(
        &self,
        channel_id: U256,
        amount: U256,
        signature: &[u8],
        sendback: bool,
    ) -> Result<TxOutcome, MpeError> {
        let mut book = self.book.write().await;
        let escrow_address = self.escrow_address;
        let block = book.block;
        let channel = book.channel_mut(channel_id)?;
        if channel.recipient != self.account {
            return Err(MpeError::rejected(Some("Only recipient can claim".into())));
        }
        if block >= channel.expiration {
            return Err(MpeError::rejected(Some("Channel expired".into())));
        }
        if amount > channel.value {
            return Err(MpeError::insufficient_balance("Insufficient channel value"));
        }
        let recovered =
            recover_claim_signer(escrow_address, channel_id, channel.nonce, amount, signature);
        if recovered != Some(channel.signer) {
            return Err(MpeError::rejected(Some("Invalid signature".into())));
        }

        channel.value -= amount;
        channel.nonce += U256::one();
        let (sender, recipient) = (channel.sender, channel.recipient);
        let refund = if sendback {
            std::mem::take(&mut channel.value)
        } else {
            U256::zero()
        };
        EscrowBook::credit(&mut book.balances, recipient, amount);
        EscrowBook::credit(&mut book.balances, sender, refund);
        Ok(book.mine())
    }
}

#[async_trait]
impl EscrowLedger for InMemoryEscrow {
    fn account(&self) -> Address {
        self.account
    }

    fn escrow_address(&self) -> Address {
        self.escrow_address
    }

    async fn current_block(&self) -> Result<u64, MpeError> {
        Ok(self.book.read().await.block)
    }

    async fn token_balance(&self, owner: Address) -> Result<U256, MpeError> {
        Ok(self.book.read().await.tokens.get(&owner).copied().unwrap_or_default())
    }

    async fn allowance(&self, owner: Address) -> Result<U256, MpeError> {
        Ok(self.book.read().await.allowances.get(&owner).copied().unwrap_or_default())
    }

    async fn approve(&self, amount: U256) -> Result<TxOutcome, MpeError> {
        let mut book = self.book.write().await;
        book.allowances.insert(self.account, amount);
        Ok(book.mine())
    }

    async fn transfer_tokens(&self, to: Address, amount: U256) -> Result<TxOutcome, MpeError> {
        let mut book = self.book.write().await;
        EscrowBook::debit(&mut book.tokens, self.account, amount, "ERC20: transfer amount exceeds balance")?;
        EscrowBook::credit(&mut book.tokens, to, amount);
        Ok(book.mine())
    }

    async fn escrow_balance(&self, owner: Address) -> Result<U256, MpeError> {
        Ok(self.book.read().await.balances.get(&owner).copied().unwrap_or_default())
    }

    async fn deposit(&self, amount: U256) -> Result<TxOutcome, MpeError> {
        let mut book = self.book.write().await;
        book.deposit(self.account, amount)?;
        Ok(book.mine())
    }

    async fn withdraw(&self, amount: U256) -> Result<TxOutcome, MpeError> {
        let mut book = self.book.write().await;
        EscrowBook::debit(&mut book.balances, self.account, amount, "Insufficient balance")?;
        EscrowBook::credit(&mut book.tokens, self.account, amount);
        Ok(book.mine())
    }

    async fn open_channel(&self, request: &OpenChannelRequest) -> Result<OpenedChannel, MpeError> {
        let mut book = self.book.write().await;
        let channel_id = book.open(self.account, request)?;
        Ok(OpenedChannel {
            channel_id,
            tx: book.mine(),
        })
    }

    async fn deposit_and_open_channel(
        &self,
        request: &OpenChannelRequest,
    ) -> Result<OpenedChannel, MpeError> {
        let mut book = self.book.write().await;
        book.deposit(self.account, request.amount)?;
        let channel_id = book.open(self.account, request)?;
        Ok(OpenedChannel {
            channel_id,
            tx: book.mine(),
        })
    }

    async fn channel(&self, channel_id: U256) -> Result<Option<PaymentChannel>, MpeError> {
        Ok(self.book.read().await.channels.get(&channel_id).cloned())
    }

    async fn add_funds(&self, channel_id: U256, amount: U256) -> Result<TxOutcome, MpeError> {
        let mut book = self.book.write().await;
        book.add_funds(self.account, channel_id, amount)?;
        Ok(book.mine())
    }

    async fn extend(&self, channel_id: U256, new_expiration: u64) -> Result<TxOutcome, MpeError> {
        let mut book = self.book.write().await;
        book.extend(self.account, channel_id, new_expiration)?;
        Ok(book.mine())
    }

    async fn extend_and_add_funds(
        &self,
        channel_id: U256,
        new_expiration: u64,
        amount: U256,
    ) -> Result<TxOutcome, MpeError> {
        let mut book = self.book.write().await;
        book.extend_and_add_funds(self.account, channel_id, new_expiration, amount)?;
        Ok(book.mine())
    }

    async fn claim_timeout(&self, channel_id: U256) -> Result<TxOutcome, MpeError> {
        let mut book = self.book.write().await;
        let block = book.block;
        let channel = book.channel_mut(channel_id)?;
        if channel.sender != self.account {
            return Err(MpeError::rejected(Some("Only sender can claim timeout".into())));
        }
        if block < channel.expiration {
            return Err(MpeError::rejected(Some("Only after expiration".into())));
        }
        let refund = std::mem::take(&mut channel.value);
        channel.nonce += U256::one();
        let sender = channel.sender;
        EscrowBook::credit(&mut book.balances, sender, refund);
        Ok(book.mine())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER_FUNDS: u64 = 100;

    async fn open_test_channel(escrow: &InMemoryEscrow, expiration: u64) -> U256 {
        escrow.mint(escrow.account(), U256::from(SENDER_FUNDS)).await;
        escrow.approve(U256::from(SENDER_FUNDS)).await.unwrap();
        escrow
            .deposit_and_open_channel(&OpenChannelRequest {
                signer: escrow.account(),
                recipient: Address::random(),
                group_id: H256::repeat_byte(7),
                amount: U256::from(SENDER_FUNDS),
                expiration,
            })
            .await
            .unwrap()
            .channel_id
    }

    #[tokio::test]
    async fn failed_extend_and_add_funds_leaves_channel_untouched() {
        let escrow = InMemoryEscrow::new(Address::random(), Address::random());
        let channel_id = open_test_channel(&escrow, 1_000).await;
        assert_eq!(escrow.escrow_balance(escrow.account()).await.unwrap(), U256::zero());

        let err = escrow
            .extend_and_add_funds(channel_id, 5_000, U256::from(50u64))
            .await
            .unwrap_err();
        assert!(err.is_insufficient_balance());

        let channel = escrow.channel(channel_id).await.unwrap().unwrap();
        assert_eq!(channel.expiration, 1_000);
        assert_eq!(channel.value, U256::from(SENDER_FUNDS));
    }

    #[tokio::test]
    async fn extend_and_add_funds_rejects_shorter_expiration_before_debiting() {
        let escrow = InMemoryEscrow::new(Address::random(), Address::random());
        let channel_id = open_test_channel(&escrow, 1_000).await;
        escrow.mint(escrow.account(), U256::from(50u64)).await;
        escrow.approve(U256::from(50u64)).await.unwrap();
        escrow.deposit(U256::from(50u64)).await.unwrap();

        let err = escrow
            .extend_and_add_funds(channel_id, 500, U256::from(50u64))
            .await
            .unwrap_err();
        assert!(matches!(err, MpeError::ContractRejected { .. }));
        assert_eq!(escrow.escrow_balance(escrow.account()).await.unwrap(), U256::from(50u64));

        escrow
            .extend_and_add_funds(channel_id, 5_000, U256::from(50u64))
            .await
            .unwrap();
        let channel = escrow.channel(channel_id).await.unwrap().unwrap();
        assert_eq!(channel.expiration, 5_000);
        assert_eq!(channel.value, U256::from(150u64));
    }
}
