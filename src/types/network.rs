use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, path::Path, str::FromStr};

use super::MpeError;

/// Broad protocol lineage of a chain; decides address syntax and asset-reference shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamily {
    /// Account-model chains with hex addresses and ERC-20 tokens.
    Ethereum,
    /// UTXO-model chains with bech32 addresses and native multi-assets.
    Cardano,
}

/// Numeric chain id for the EVM family, a string tag for the Cardano family.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChainId {
    Evm(u64),
    Cardano(String),
}

impl ChainId {
    pub fn family(&self) -> ChainFamily {
        match self {
            ChainId::Evm(_) => ChainFamily::Ethereum,
            ChainId::Cardano(_) => ChainFamily::Cardano,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainId::Evm(id) => write!(f, "{id}"),
            ChainId::Cardano(tag) => f.write_str(tag),
        }
    }
}

impl FromStr for ChainId {
    type Err = MpeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if let Ok(id) = raw.parse::<u64>() {
            return Ok(ChainId::Evm(id));
        }
        if raw.starts_with("cardano") {
            return Ok(ChainId::Cardano(raw.to_string()));
        }
        Err(MpeError::Config(format!("unknown chain identifier `{raw}`")))
    }
}

impl TryFrom<String> for ChainId {
    type Error = MpeError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<ChainId> for String {
    fn from(id: ChainId) -> Self {
        id.to_string()
    }
}

/// Chain-specific identity of a token. Opaque per family; never converted across families.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetReference {
    Erc20 { contract: String },
    NativeAsset { policy_id: String, asset_name: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub decimals: u32,
    pub reference: AssetReference,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub family: ChainFamily,
    pub rpc_endpoint: String,
    /// The MultiPartyEscrow deployment; absent on chains that only bridge the token.
    #[serde(default)]
    pub escrow_address: Option<String>,
    pub token: TokenConfig,
    #[serde(default = "default_expiration_blocks")]
    pub default_expiration_blocks: u64,
}

/// Roughly two days of 15 second blocks.
pub const DEFAULT_EXPIRATION_BLOCKS: u64 = 11_520;

fn default_expiration_blocks() -> u64 {
    DEFAULT_EXPIRATION_BLOCKS
}

impl ChainConfig {
    pub fn escrow_address(&self) -> Result<Address, MpeError> {
        let raw = self
            .escrow_address
            .as_deref()
            .ok_or_else(|| MpeError::Config("chain has no escrow contract".into()))?;
        Address::from_str(raw).map_err(|e| MpeError::InvalidAddress(format!("{raw}: {e}")))
    }

    pub fn token_address(&self) -> Result<Address, MpeError> {
        match &self.token.reference {
            AssetReference::Erc20 { contract } => Address::from_str(contract)
                .map_err(|e| MpeError::InvalidAddress(format!("{contract}: {e}"))),
            AssetReference::NativeAsset { .. } => Err(MpeError::Config(
                "token is a native asset, not an ERC-20 contract".into(),
            )),
        }
    }
}

/// Read-only, process-wide network table. Built once, then shared behind an `Arc`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chains: HashMap<ChainId, ChainConfig>,
}

impl NetworkConfig {
    pub fn builtin() -> Self {
        let mut chains = HashMap::new();
        chains.insert(
            ChainId::Evm(1),
            ChainConfig {
                family: ChainFamily::Ethereum,
                rpc_endpoint: "https://ethereum-rpc.publicnode.com".to_string(),
                escrow_address: Some("0x5e592F9b1d303183d963635f895f0f0C48284f4e".to_string()),
                token: TokenConfig {
                    symbol: "AGIX".to_string(),
                    decimals: 8,
                    reference: AssetReference::Erc20 {
                        contract: "0x5B7533812759B45C2B44C19e320ba2cD2681b542".to_string(),
                    },
                },
                default_expiration_blocks: DEFAULT_EXPIRATION_BLOCKS,
            },
        );
        chains.insert(
            ChainId::Cardano("cardano-mainnet".to_string()),
            ChainConfig {
                family: ChainFamily::Cardano,
                rpc_endpoint: "https://cardano-mainnet.blockfrost.io/api/v0".to_string(),
                escrow_address: None,
                token: TokenConfig {
                    symbol: "AGIX".to_string(),
                    decimals: 8,
                    reference: AssetReference::NativeAsset {
                        policy_id: "f43a62fdc3965df486de8a0d32fe800963589c41b38946602a0dc535"
                            .to_string(),
                        asset_name: "AGIX".to_string(),
                    },
                },
                default_expiration_blocks: 8_640,
            },
        );
        Self { chains }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, MpeError> {
        serde_json::from_str(raw).map_err(|e| MpeError::Config(format!("network config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MpeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MpeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn chain(&self, id: &ChainId) -> Result<&ChainConfig, MpeError> {
        self.chains
            .get(id)
            .ok_or_else(|| MpeError::Config(format!("chain {id} is not configured")))
    }
}
