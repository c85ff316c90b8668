//! The signed-claim header set exchanged with a service daemon.
//!
//! Key names are a wire contract with the daemon and must not change. Signature bytes travel
//! base64-encoded so they survive text-only transports.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ethers::types::U256;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{FreeCallToken, PaymentAuthorization};

pub const PAYMENT_TYPE_HEADER: &str = "snet-payment-type";
pub const CHANNEL_ID_HEADER: &str = "snet-payment-channel-id";
pub const CHANNEL_NONCE_HEADER: &str = "snet-payment-channel-nonce";
pub const CHANNEL_AMOUNT_HEADER: &str = "snet-payment-channel-amount";
pub const SIGNATURE_HEADER: &str = "snet-payment-channel-signature-bin";
pub const FREE_CALL_USER_HEADER: &str = "snet-free-call-user-id";
pub const CURRENT_BLOCK_HEADER: &str = "snet-current-block-number";

pub const ESCROW_PAYMENT_TYPE: &str = "escrow";
pub const FREE_CALL_PAYMENT_TYPE: &str = "free-call";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("missing payment header {0}")]
    Missing(&'static str),
    #[error("malformed payment header {0}")]
    Malformed(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscrowPayment {
    pub channel_id: U256,
    pub nonce: U256,
    pub amount: U256,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreeCallPayment {
    pub user_id: String,
    pub current_block: u64,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentHeaders {
    Escrow(EscrowPayment),
    FreeCall(FreeCallPayment),
}

impl From<&PaymentAuthorization> for PaymentHeaders {
    fn from(auth: &PaymentAuthorization) -> Self {
        PaymentHeaders::Escrow(EscrowPayment {
            channel_id: auth.channel_id,
            nonce: auth.nonce,
            amount: auth.amount,
            signature: auth.signature.clone(),
        })
    }
}

impl From<&FreeCallToken> for PaymentHeaders {
    fn from(token: &FreeCallToken) -> Self {
        PaymentHeaders::FreeCall(FreeCallPayment {
            user_id: token.user_address.clone(),
            current_block: token.current_block,
            signature: token.signature.clone(),
        })
    }
}

impl PaymentHeaders {
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            PaymentHeaders::Escrow(payment) => vec![
                (PAYMENT_TYPE_HEADER, ESCROW_PAYMENT_TYPE.to_string()),
                (CHANNEL_ID_HEADER, payment.channel_id.to_string()),
                (CHANNEL_NONCE_HEADER, payment.nonce.to_string()),
                (CHANNEL_AMOUNT_HEADER, payment.amount.to_string()),
                (SIGNATURE_HEADER, STANDARD.encode(&payment.signature)),
            ],
            PaymentHeaders::FreeCall(payment) => vec![
                (PAYMENT_TYPE_HEADER, FREE_CALL_PAYMENT_TYPE.to_string()),
                (FREE_CALL_USER_HEADER, payment.user_id.clone()),
                (CURRENT_BLOCK_HEADER, payment.current_block.to_string()),
                (SIGNATURE_HEADER, STANDARD.encode(&payment.signature)),
            ],
        }
    }

    /// Metadata form for transports other than HTTP headers.
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        self.to_pairs()
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }

    pub fn to_header_map(&self) -> Result<HeaderMap, HeaderError> {
        let mut headers = HeaderMap::new();
        for (key, value) in self.to_pairs() {
            let value = HeaderValue::from_str(&value).map_err(|_| HeaderError::Malformed(key))?;
            headers.insert(HeaderName::from_static(key), value);
        }
        Ok(headers)
    }

    pub fn from_header_map(headers: &HeaderMap) -> Result<Self, HeaderError> {
        Self::decode(|key| {
            headers
                .get(key)
                .map(|value| value.to_str().map(str::to_string).map_err(|_| ()))
        })
    }

    pub fn from_metadata(metadata: &BTreeMap<String, String>) -> Result<Self, HeaderError> {
        Self::decode(|key| metadata.get(key).cloned().map(Ok))
    }

    fn decode<F>(get: F) -> Result<Self, HeaderError>
    where
        F: Fn(&'static str) -> Option<Result<String, ()>>,
    {
        let field = |key: &'static str| -> Result<String, HeaderError> {
            get(key)
                .ok_or(HeaderError::Missing(key))?
                .map_err(|_| HeaderError::Malformed(key))
        };
        let signature = STANDARD
            .decode(field(SIGNATURE_HEADER)?.trim())
            .map_err(|_| HeaderError::Malformed(SIGNATURE_HEADER))?;

        match field(PAYMENT_TYPE_HEADER)?.as_str() {
            ESCROW_PAYMENT_TYPE => Ok(PaymentHeaders::Escrow(EscrowPayment {
                channel_id: parse_u256(&field(CHANNEL_ID_HEADER)?, CHANNEL_ID_HEADER)?,
                nonce: parse_u256(&field(CHANNEL_NONCE_HEADER)?, CHANNEL_NONCE_HEADER)?,
                amount: parse_u256(&field(CHANNEL_AMOUNT_HEADER)?, CHANNEL_AMOUNT_HEADER)?,
                signature,
            })),
            FREE_CALL_PAYMENT_TYPE => Ok(PaymentHeaders::FreeCall(FreeCallPayment {
                user_id: field(FREE_CALL_USER_HEADER)?,
                current_block: field(CURRENT_BLOCK_HEADER)?
                    .trim()
                    .parse()
                    .map_err(|_| HeaderError::Malformed(CURRENT_BLOCK_HEADER))?,
                signature,
            })),
            _ => Err(HeaderError::Malformed(PAYMENT_TYPE_HEADER)),
        }
    }
}

fn parse_u256(raw: &str, key: &'static str) -> Result<U256, HeaderError> {
    U256::from_dec_str(raw.trim()).map_err(|_| HeaderError::Malformed(key))
}
