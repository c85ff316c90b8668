use base64::{engine::general_purpose::STANDARD, Engine as _};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use super::MpeError;

/// One row of the escrow contract's channel table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChannel {
    pub channel_id: U256,
    pub nonce: U256,
    pub sender: Address,
    pub signer: Address,
    pub recipient: Address,
    pub group_id: H256,
    pub value: U256,
    pub expiration: u64,
}

impl PaymentChannel {
    /// Decodes the positional `(nonce, sender, signer, recipient, groupId, value, expiration)`
    /// tuple returned by the contract's `channels(uint256)` getter.
    pub fn from_contract_tuple(
        channel_id: U256,
        (nonce, sender, signer, recipient, group_id, value, expiration): (
            U256,
            Address,
            Address,
            Address,
            [u8; 32],
            U256,
            U256,
        ),
    ) -> Option<Self> {
        // Unassigned ids read back as a zeroed struct.
        if sender.is_zero() {
            return None;
        }
        Some(Self {
            channel_id,
            nonce,
            sender,
            signer,
            recipient,
            group_id: H256::from(group_id),
            value,
            expiration: saturating_u64(expiration),
        })
    }
}

/// A signed claim letting the recipient withdraw up to `amount` from the channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub mpe_address: Address,
    pub channel_id: U256,
    pub nonce: U256,
    pub amount: U256,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// A signed grant for a zero-payment call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeCallToken {
    pub user_address: String,
    pub organization_id: String,
    pub service_id: String,
    pub current_block: u64,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// Parses a 32-byte payment group id, given either in the registry's base64 form or as `0x` hex.
pub fn parse_group_id(raw: &str) -> Result<H256, MpeError> {
    let raw = raw.trim();
    let bytes = match raw.strip_prefix("0x") {
        Some(hex_part) => hex::decode(hex_part)
            .map_err(|e| MpeError::Config(format!("group id is not hex: {e}")))?,
        None => STANDARD
            .decode(raw)
            .map_err(|e| MpeError::Config(format!("group id is not base64: {e}")))?,
    };
    if bytes.len() != 32 {
        return Err(MpeError::Config(format!(
            "group id must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

pub fn group_id_to_base64(group_id: &H256) -> String {
    STANDARD.encode(group_id.as_bytes())
}

pub(crate) fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_id_accepts_base64_and_hex() {
        let id = H256::repeat_byte(0xab);
        let encoded = group_id_to_base64(&id);
        assert_eq!(parse_group_id(&encoded).unwrap(), id);
        assert_eq!(parse_group_id(&format!("{:?}", id)).unwrap(), id);
        assert!(matches!(parse_group_id("c2hvcnQ="), Err(MpeError::Config(_))));
        assert!(matches!(parse_group_id("0xzz"), Err(MpeError::Config(_))));
    }

    #[test]
    fn zeroed_contract_row_is_not_a_channel() {
        let row = (
            U256::zero(),
            Address::zero(),
            Address::zero(),
            Address::zero(),
            [0u8; 32],
            U256::zero(),
            U256::zero(),
        );
        assert!(PaymentChannel::from_contract_tuple(U256::from(7), row).is_none());
    }

    #[test]
    fn contract_row_decodes_positionally() {
        let sender = Address::repeat_byte(1);
        let signer = Address::repeat_byte(2);
        let recipient = Address::repeat_byte(3);
        let row = (
            U256::from(4),
            sender,
            signer,
            recipient,
            [9u8; 32],
            U256::from(500_000_000u64),
            U256::from(11_520u64),
        );
        let channel = PaymentChannel::from_contract_tuple(U256::from(7), row).unwrap();
        assert_eq!(channel.nonce, U256::from(4));
        assert_eq!(channel.signer, signer);
        assert_eq!(channel.recipient, recipient);
        assert_eq!(channel.group_id, H256::repeat_byte(9));
        assert_eq!(channel.expiration, 11_520);
    }

    #[test]
    fn authorization_serializes_signature_as_hex() {
        let auth = PaymentAuthorization {
            mpe_address: Address::zero(),
            channel_id: U256::one(),
            nonce: U256::zero(),
            amount: U256::from(10),
            signature: vec![0xde, 0xad],
        };
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["signature"], "0xdead");
        let back: PaymentAuthorization = serde_json::from_value(json).unwrap();
        assert_eq!(back, auth);
    }
}
