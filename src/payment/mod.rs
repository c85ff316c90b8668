pub mod headers;
pub mod signer;
pub mod tracker;
pub mod verifier;

pub use headers::{EscrowPayment, FreeCallPayment, HeaderError, PaymentHeaders};
pub use signer::{sign_claim, sign_free_call_token};
pub use tracker::ClaimTracker;
pub use verifier::{verify_authorization, verify_claim, verify_free_call_token};
