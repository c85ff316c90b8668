pub mod address;
pub mod crypto;
pub mod units;

pub use address::{classify_address, resolve_asset_reference, AddressKind};
pub use crypto::{create_claim_message, create_free_call_message, U256Ext};
