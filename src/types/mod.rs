pub mod channel;
pub mod error;
pub mod network;

pub use channel::{
    group_id_to_base64, parse_group_id, FreeCallToken, PaymentAuthorization, PaymentChannel,
};
pub use error::{AuthError, MpeError, RejectionKind};
pub use network::{
    AssetReference, ChainConfig, ChainFamily, ChainId, NetworkConfig, TokenConfig,
    DEFAULT_EXPIRATION_BLOCKS,
};
