use ethers::{
    types::{Address, H256, U256},
    utils::keccak256,
};

/// Domain tag prefixed to every channel claim.
pub const CLAIM_MESSAGE_TAG: &str = "__MPE_claim_message";
/// Domain tag prefixed to every free-call token; distinct from the claim tag.
pub const FREE_CALL_MESSAGE_TAG: &str = "__prefix_free_trial";

pub trait U256Ext {
    fn to_be_bytes_vec(&self) -> Vec<u8>;
}

impl U256Ext for U256 {
    fn to_be_bytes_vec(&self) -> Vec<u8> {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        bytes.to_vec()
    }
}

/// Packed `(tag, mpe, channel_id, nonce, amount)`, matching the contract's `abi.encodePacked`.
pub fn create_claim_message(mpe_address: Address, channel_id: U256, nonce: U256, amount: U256) -> Vec<u8> {
    let mut message = Vec::with_capacity(CLAIM_MESSAGE_TAG.len() + 20 + 3 * 32);
    message.extend_from_slice(CLAIM_MESSAGE_TAG.as_bytes());
    message.extend_from_slice(mpe_address.as_bytes());
    message.extend_from_slice(&channel_id.to_be_bytes_vec());
    message.extend_from_slice(&nonce.to_be_bytes_vec());
    message.extend_from_slice(&amount.to_be_bytes_vec());
    message
}

pub fn create_free_call_message(
    user_address: &str,
    organization_id: &str,
    service_id: &str,
    current_block: u64,
) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend_from_slice(FREE_CALL_MESSAGE_TAG.as_bytes());
    message.extend_from_slice(user_address.as_bytes());
    message.extend_from_slice(organization_id.as_bytes());
    message.extend_from_slice(service_id.as_bytes());
    message.extend_from_slice(&U256::from(current_block).to_be_bytes_vec());
    message
}

/// The 32-byte digest that gets signed (under the personal-message prefix).
pub fn message_digest(message: &[u8]) -> H256 {
    H256::from(keccak256(message))
}
