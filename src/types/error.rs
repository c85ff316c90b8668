use axum::http::StatusCode;
use ethers::types::{H256, U256};
use thiserror::Error;

/// Why the escrow contract (or the token contract in front of it) refused a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionKind {
    InsufficientBalance,
    Reverted,
}

#[derive(Error, Debug)]
pub enum MpeError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Payment channel {0} not found")]
    ChannelNotFound(U256),
    #[error("Payment channel {0} already settled")]
    AlreadySettled(U256),
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Contract rejected the operation ({kind:?}): {}", .reason.as_deref().unwrap_or("no reason given"))]
    ContractRejected {
        kind: RejectionKind,
        reason: Option<String>,
    },
    #[error("Transport error: {0}")]
    Transport(String),
    /// Broadcast, but its fate is unknown. Look the hash up before sending again.
    #[error("Transaction {tx_hash:?} was broadcast but not confirmed: {reason}")]
    Unconfirmed { tx_hash: H256, reason: String },
    #[error("Cumulative amount {requested} is below the last authorized amount {last}")]
    ClaimRegression { last: U256, requested: U256 },
    #[error("Could not decode confirmation event: {0}")]
    EventDecode(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MpeError {
    /// Builds a rejection, singling out the balance/allowance shortfalls callers can act on.
    pub fn rejected(reason: Option<String>) -> Self {
        let kind = match reason.as_deref().map(str::to_ascii_lowercase) {
            Some(r)
                if r.contains("insufficient")
                    || r.contains("exceeds balance")
                    || r.contains("exceeds allowance") =>
            {
                RejectionKind::InsufficientBalance
            }
            _ => RejectionKind::Reverted,
        };
        MpeError::ContractRejected { kind, reason }
    }

    pub fn insufficient_balance(reason: impl Into<String>) -> Self {
        MpeError::ContractRejected {
            kind: RejectionKind::InsufficientBalance,
            reason: Some(reason.into()),
        }
    }

    /// Only transport failures may be retried with the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MpeError::Transport(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, MpeError::InvariantViolation(_))
    }

    pub fn is_insufficient_balance(&self) -> bool {
        matches!(
            self,
            MpeError::ContractRejected {
                kind: RejectionKind::InsufficientBalance,
                ..
            }
        )
    }
}

/// Reasons a service daemon refuses to render a paid call.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Insufficient payment channel balance")]
    InsufficientBalance,
    #[error("Payment does not cover the call price")]
    InsufficientPayment,
    #[error("Payment channel expired")]
    Expired,
    #[error("Invalid payment channel")]
    InvalidChannel,
    #[error("Free calls exhausted")]
    FreeCallsExhausted,
    #[error("Ledger unavailable: {0}")]
    Ledger(#[from] MpeError),
}

impl From<AuthError> for StatusCode {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientBalance | AuthError::InsufficientPayment => {
                StatusCode::PAYMENT_REQUIRED
            }
            AuthError::Expired => StatusCode::REQUEST_TIMEOUT,
            AuthError::InvalidChannel => StatusCode::BAD_REQUEST,
            AuthError::FreeCallsExhausted => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Ledger(MpeError::ChannelNotFound(_)) => StatusCode::BAD_REQUEST,
            AuthError::Ledger(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
