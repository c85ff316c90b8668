use async_trait::async_trait;
use ethers::{
    contract::{abigen, parse_log, ContractCall, ContractError},
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, TransactionReceipt, H256, U256},
};
use std::{sync::Arc, time::Duration};

use super::{EscrowLedger, OpenChannelRequest, OpenedChannel, TxOutcome};
use crate::types::{ChainConfig, MpeError, PaymentChannel};

abigen!(
    MultiPartyEscrow,
    r#"[
        function balances(address) external view returns (uint256)
        function deposit(uint256 value) external returns (bool)
        function withdraw(uint256 value) external returns (bool)
        function openChannel(address signer, address recipient, bytes32 groupId, uint256 value, uint256 expiration) external returns (bool)
        function depositAndOpenChannel(address signer, address recipient, bytes32 groupId, uint256 value, uint256 expiration) external returns (bool)
        function channelAddFunds(uint256 channelId, uint256 amount) external returns (bool)
        function channelExtend(uint256 channelId, uint256 newExpiration) external returns (bool)
        function channelExtendAndAddFunds(uint256 channelId, uint256 newExpiration, uint256 amount) external returns (bool)
        function channelClaimTimeout(uint256 channelId) external
        function channels(uint256) external view returns (uint256 nonce, address sender, address signer, address recipient, bytes32 groupId, uint256 value, uint256 expiration)
        event ChannelOpen(uint256 channelId, uint256 nonce, address indexed sender, address signer, address indexed recipient, bytes32 indexed groupId, uint256 amount, uint256 expiration)
    ]"#
);

abigen!(
    EscrowToken,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Escrow ledger backed by a JSON-RPC node and a local key.
pub struct EthereumLedger {
    client: Arc<SignerClient>,
    escrow: MultiPartyEscrow<SignerClient>,
    token: EscrowToken<SignerClient>,
}

impl EthereumLedger {
    pub async fn connect(
        chain: &ChainConfig,
        wallet: LocalWallet,
        rpc_timeout: Duration,
    ) -> Result<Self, MpeError> {
        let url = reqwest::Url::parse(&chain.rpc_endpoint)
            .map_err(|e| MpeError::Config(format!("{}: {e}", chain.rpc_endpoint)))?;
        let http_client = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| MpeError::Config(e.to_string()))?;
        let provider = Provider::new(Http::new_with_client(url, http_client));

        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| MpeError::Transport(e.to_string()))?;
        let wallet = wallet.with_chain_id(chain_id.as_u64());
        let client = Arc::new(SignerMiddleware::new(provider, wallet));

        let escrow = MultiPartyEscrow::new(chain.escrow_address()?, client.clone());
        let token = EscrowToken::new(chain.token_address()?, client.clone());

        tracing::info!(
            chain_id = chain_id.as_u64(),
            escrow = ?escrow.address(),
            account = ?client.address(),
            "connected escrow ledger"
        );
        Ok(Self {
            client,
            escrow,
            token,
        })
    }

    async fn submit<D>(&self, call: ContractCall<SignerClient, D>) -> Result<TransactionReceipt, MpeError>
    where
        D: ethers::abi::Detokenize,
    {
        let pending = call.send().await.map_err(map_contract_error)?;
        let tx_hash = pending.tx_hash();
        tracing::debug!(?tx_hash, "transaction submitted");

        // Broadcast: from here on the transaction may still land.
        let receipt = pending.await.map_err(|e| MpeError::Unconfirmed {
            tx_hash,
            reason: e.to_string(),
        })?;
        confirmed(tx_hash, receipt)
    }
}

/// Checks the receipt of a broadcast transaction: dropped is unconfirmed, status 0 is a revert.
fn confirmed(
    tx_hash: H256,
    receipt: Option<TransactionReceipt>,
) -> Result<TransactionReceipt, MpeError> {
    let receipt = receipt.ok_or_else(|| MpeError::Unconfirmed {
        tx_hash,
        reason: "dropped from the mempool".into(),
    })?;
    if receipt.status.map_or(false, |status| status.is_zero()) {
        return Err(MpeError::rejected(Some(format!(
            "transaction {tx_hash:?} reverted"
        ))));
    }
    Ok(receipt)
}

/// Reads the assigned id out of the receipt's `ChannelOpen` event.
fn opened_channel(
    escrow_address: Address,
    receipt: &TransactionReceipt,
) -> Result<OpenedChannel, MpeError> {
    let event = receipt
        .logs
        .iter()
        .filter(|log| log.address == escrow_address)
        .find_map(|log| parse_log::<ChannelOpenFilter>(log.clone()).ok())
        .ok_or_else(|| {
            MpeError::EventDecode(format!(
                "no ChannelOpen event in transaction {:?}",
                receipt.transaction_hash
            ))
        })?;
    Ok(OpenedChannel {
        channel_id: event.channel_id,
        tx: outcome(receipt),
    })
}

fn outcome(receipt: &TransactionReceipt) -> TxOutcome {
    TxOutcome {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number.map(|n| n.as_u64()),
    }
}

fn map_contract_error<M: Middleware>(err: ContractError<M>) -> MpeError {
    if let Some(reason) = err.decode_revert::<String>() {
        return MpeError::rejected(Some(reason));
    }
    if err.is_revert() {
        return MpeError::rejected(None);
    }
    let message = err.to_string();
    // Nodes report reverts hit during gas estimation as RPC errors.
    if message.contains("execution reverted") {
        return MpeError::rejected(Some(message));
    }
    MpeError::Transport(message)
}

#[async_trait]
impl EscrowLedger for EthereumLedger {
    fn account(&self) -> Address {
        self.client.address()
    }

    fn escrow_address(&self) -> Address {
        self.escrow.address()
    }

    async fn current_block(&self) -> Result<u64, MpeError> {
        self.client
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| MpeError::Transport(e.to_string()))
    }

    async fn token_balance(&self, owner: Address) -> Result<U256, MpeError> {
        self.token
            .balance_of(owner)
            .call()
            .await
            .map_err(map_contract_error)
    }

    async fn allowance(&self, owner: Address) -> Result<U256, MpeError> {
        self.token
            .allowance(owner, self.escrow.address())
            .call()
            .await
            .map_err(map_contract_error)
    }

    async fn approve(&self, amount: U256) -> Result<TxOutcome, MpeError> {
        let receipt = self
            .submit(self.token.approve(self.escrow.address(), amount))
            .await?;
        Ok(outcome(&receipt))
    }

    async fn transfer_tokens(&self, to: Address, amount: U256) -> Result<TxOutcome, MpeError> {
        let receipt = self.submit(self.token.transfer(to, amount)).await?;
        Ok(outcome(&receipt))
    }

    async fn escrow_balance(&self, owner: Address) -> Result<U256, MpeError> {
        self.escrow
            .balances(owner)
            .call()
            .await
            .map_err(map_contract_error)
    }

    async fn deposit(&self, amount: U256) -> Result<TxOutcome, MpeError> {
        let receipt = self.submit(self.escrow.deposit(amount)).await?;
        Ok(outcome(&receipt))
    }

    async fn withdraw(&self, amount: U256) -> Result<TxOutcome, MpeError> {
        let receipt = self.submit(self.escrow.withdraw(amount)).await?;
        Ok(outcome(&receipt))
    }

    async fn open_channel(&self, request: &OpenChannelRequest) -> Result<OpenedChannel, MpeError> {
        let call = self.escrow.open_channel(
            request.signer,
            request.recipient,
            request.group_id.to_fixed_bytes(),
            request.amount,
            U256::from(request.expiration),
        );
        let receipt = self.submit(call).await?;
        opened_channel(self.escrow.address(), &receipt)
    }

    async fn deposit_and_open_channel(
        &self,
        request: &OpenChannelRequest,
    ) -> Result<OpenedChannel, MpeError> {
        let call = self.escrow.deposit_and_open_channel(
            request.signer,
            request.recipient,
            request.group_id.to_fixed_bytes(),
            request.amount,
            U256::from(request.expiration),
        );
        let receipt = self.submit(call).await?;
        opened_channel(self.escrow.address(), &receipt)
    }

    async fn channel(&self, channel_id: U256) -> Result<Option<PaymentChannel>, MpeError> {
        let row = self
            .escrow
            .channels(channel_id)
            .call()
            .await
            .map_err(map_contract_error)?;
        Ok(PaymentChannel::from_contract_tuple(channel_id, row))
    }

    async fn add_funds(&self, channel_id: U256, amount: U256) -> Result<TxOutcome, MpeError> {
        let receipt = self
            .submit(self.escrow.channel_add_funds(channel_id, amount))
            .await?;
        Ok(outcome(&receipt))
    }

    async fn extend(&self, channel_id: U256, new_expiration: u64) -> Result<TxOutcome, MpeError> {
        let receipt = self
            .submit(self.escrow.channel_extend(channel_id, U256::from(new_expiration)))
            .await?;
        Ok(outcome(&receipt))
    }

    async fn extend_and_add_funds(
        &self,
        channel_id: U256,
        new_expiration: u64,
        amount: U256,
    ) -> Result<TxOutcome, MpeError> {
        let call =
            self.escrow
                .channel_extend_and_add_funds(channel_id, U256::from(new_expiration), amount);
        let receipt = self.submit(call).await?;
        Ok(outcome(&receipt))
    }

    async fn claim_timeout(&self, channel_id: U256) -> Result<TxOutcome, MpeError> {
        let receipt = self
            .submit(self.escrow.channel_claim_timeout(channel_id))
            .await?;
        Ok(outcome(&receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::{
        abi::{self, Token},
        contract::EthEvent,
        providers::ProviderError,
        types::{Bytes, Log, U64},
    };

    fn address_topic(address: Address) -> H256 {
        let mut topic = [0u8; 32];
        topic[12..].copy_from_slice(address.as_bytes());
        H256(topic)
    }

    fn channel_open_log(emitter: Address, channel_id: U256) -> Log {
        let data = abi::encode(&[
            Token::Uint(channel_id),
            Token::Uint(U256::zero()),
            Token::Address(Address::random()),
            Token::Uint(U256::from(100u64)),
            Token::Uint(U256::from(1_000u64)),
        ]);
        Log {
            address: emitter,
            topics: vec![
                ChannelOpenFilter::signature(),
                address_topic(Address::random()),
                address_topic(Address::random()),
                H256::repeat_byte(7),
            ],
            data: Bytes::from(data),
            ..Default::default()
        }
    }

    fn receipt_with(logs: Vec<Log>, status: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: H256::repeat_byte(0x11),
            block_number: Some(U64::from(42u64)),
            status: Some(U64::from(status)),
            logs,
            ..Default::default()
        }
    }

    #[test]
    fn channel_id_comes_from_the_open_event() {
        let escrow = Address::random();
        let receipt = receipt_with(vec![channel_open_log(escrow, U256::from(17u64))], 1);

        let opened = opened_channel(escrow, &receipt).unwrap();
        assert_eq!(opened.channel_id, U256::from(17u64));
        assert_eq!(opened.tx.tx_hash, H256::repeat_byte(0x11));
        assert_eq!(opened.tx.block_number, Some(42));
    }

    #[test]
    fn missing_open_event_is_a_hard_error() {
        let err = opened_channel(Address::random(), &receipt_with(vec![], 1)).unwrap_err();
        assert!(matches!(err, MpeError::EventDecode(_)));
    }

    #[test]
    fn open_event_from_another_contract_is_ignored() {
        let receipt = receipt_with(vec![channel_open_log(Address::random(), U256::from(3u64))], 1);
        let err = opened_channel(Address::random(), &receipt).unwrap_err();
        assert!(matches!(err, MpeError::EventDecode(_)));
    }

    #[test]
    fn receipt_status_and_drops_are_classified() {
        let hash = H256::repeat_byte(0x22);
        assert!(confirmed(hash, Some(receipt_with(vec![], 1))).is_ok());

        let err = confirmed(hash, Some(receipt_with(vec![], 0))).unwrap_err();
        assert!(matches!(err, MpeError::ContractRejected { .. }));

        let err = confirmed(hash, None).unwrap_err();
        assert!(matches!(err, MpeError::Unconfirmed { tx_hash, .. } if tx_hash == hash));
        assert!(!err.is_retryable());
    }

    #[test]
    fn reverts_and_transport_failures_are_told_apart() {
        let estimation = ContractError::<Provider<Http>>::ProviderError {
            e: ProviderError::CustomError("execution reverted: Insufficient balance".into()),
        };
        let err = map_contract_error(estimation);
        assert!(err.is_insufficient_balance());
        assert!(!err.is_retryable());

        let mut revert_data = vec![0x08, 0xc3, 0x79, 0xa0];
        revert_data.extend(abi::encode(&[Token::String("Invalid expiration".into())]));
        let revert = ContractError::<Provider<Http>>::Revert(Bytes::from(revert_data));
        assert!(matches!(
            map_contract_error(revert),
            MpeError::ContractRejected { reason: Some(reason), .. } if reason == "Invalid expiration"
        ));

        let bare = ContractError::<Provider<Http>>::Revert(Bytes::default());
        assert!(matches!(
            map_contract_error(bare),
            MpeError::ContractRejected { reason: None, .. }
        ));

        let offline = ContractError::<Provider<Http>>::ProviderError {
            e: ProviderError::CustomError("connection refused".into()),
        };
        assert!(map_contract_error(offline).is_retryable());
    }
}
