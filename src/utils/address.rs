//! Syntactic address classification and per-family asset resolution.
//!
//! Nothing here touches the network: an address that classifies may still never have been
//! used on chain.

use ethers::{types::Address, utils::to_checksum};
use std::str::FromStr;

use crate::types::{AssetReference, ChainFamily, MpeError, NetworkConfig};

const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const CARDANO_PREFIXES: [&str; 4] = ["addr", "addr_test", "stake", "stake_test"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressKind {
    EthereumStyle,
    CardanoStyle,
    Invalid,
}

impl AddressKind {
    pub fn family(self) -> Option<ChainFamily> {
        match self {
            AddressKind::EthereumStyle => Some(ChainFamily::Ethereum),
            AddressKind::CardanoStyle => Some(ChainFamily::Cardano),
            AddressKind::Invalid => None,
        }
    }
}

pub fn classify_address(address: &str) -> AddressKind {
    if is_ethereum_address(address) {
        AddressKind::EthereumStyle
    } else if is_cardano_address(address) {
        AddressKind::CardanoStyle
    } else {
        AddressKind::Invalid
    }
}

/// `0x` plus 40 hex digits. Mixed-case input must carry a valid EIP-55 checksum.
pub fn is_ethereum_address(address: &str) -> bool {
    let Some(body) = address.strip_prefix("0x") else {
        return false;
    };
    if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
    if !(has_lower && has_upper) {
        return true;
    }
    match Address::from_str(address) {
        Ok(parsed) => to_checksum(&parsed, None) == address,
        Err(_) => false,
    }
}

/// Bech32-shaped Shelley address: known prefix, `1` separator, single-case data part.
pub fn is_cardano_address(address: &str) -> bool {
    let has_lower = address.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = address.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return false;
    }
    let address = address.to_ascii_lowercase();
    let Some((prefix, data)) = address.rsplit_once('1') else {
        return false;
    };
    if !CARDANO_PREFIXES.contains(&prefix) {
        return false;
    }
    // Bech32 data carries at least a 6-char checksum; real payloads are far longer.
    if data.len() < 20 || address.len() > 120 {
        return false;
    }
    data.chars().all(|c| BECH32_CHARSET.contains(c))
}

/// Parses an EVM address, failing with `InvalidAddress` on anything else.
pub fn parse_ethereum_address(address: &str) -> Result<Address, MpeError> {
    if !is_ethereum_address(address) {
        return Err(MpeError::InvalidAddress(address.to_string()));
    }
    Address::from_str(address).map_err(|e| MpeError::InvalidAddress(format!("{address}: {e}")))
}

/// Looks up how `symbol` is identified on chains of `family`.
pub fn resolve_asset_reference(
    config: &NetworkConfig,
    family: ChainFamily,
    symbol: &str,
) -> Result<AssetReference, MpeError> {
    let reference = config
        .chains
        .values()
        .filter(|chain| chain.family == family)
        .find(|chain| chain.token.symbol.eq_ignore_ascii_case(symbol))
        .map(|chain| chain.token.reference.clone())
        .ok_or_else(|| {
            MpeError::Config(format!("{symbol} is not configured on any {family:?} chain"))
        })?;

    let consistent = matches!(
        (family, &reference),
        (ChainFamily::Ethereum, AssetReference::Erc20 { .. })
            | (ChainFamily::Cardano, AssetReference::NativeAsset { .. })
    );
    if !consistent {
        return Err(MpeError::Config(format!(
            "{symbol} on {family:?} has a reference of the wrong shape"
        )));
    }
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARDANO_ADDRESS: &str = "addr1qx2fxv2umyhttkxyxp8x0dlpdt3k6cwng5pxj3jhsydzer3n0d3vllmyqwsx5wktcd8cc3sq835lu7drv2xwl2wywfgse35a3x";

    #[test]
    fn evm_addresses_classify() {
        let lower = "0x5e592f9b1d303183d963635f895f0f0c48284f4e";
        assert_eq!(classify_address(lower), AddressKind::EthereumStyle);
        assert!(!is_cardano_address(lower));

        let checksummed = to_checksum(&Address::from_str(lower).unwrap(), None);
        assert!(is_ethereum_address(&checksummed));
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let lower = "0x5e592f9b1d303183d963635f895f0f0c48284f4e";
        let checksummed = to_checksum(&Address::from_str(lower).unwrap(), None);
        let flipped: String = checksummed
            .chars()
            .enumerate()
            .map(|(i, c)| {
                if i > 1 && c.is_ascii_alphabetic() {
                    if c.is_ascii_uppercase() {
                        c.to_ascii_lowercase()
                    } else {
                        c.to_ascii_uppercase()
                    }
                } else {
                    c
                }
            })
            .collect();
        assert_eq!(classify_address(&flipped), AddressKind::Invalid);
    }

    #[test]
    fn cardano_addresses_classify() {
        assert_eq!(classify_address(CARDANO_ADDRESS), AddressKind::CardanoStyle);
        assert!(!is_ethereum_address(CARDANO_ADDRESS));
        assert!(parse_ethereum_address(CARDANO_ADDRESS).is_err());
        assert_eq!(
            classify_address(CARDANO_ADDRESS).family(),
            Some(ChainFamily::Cardano)
        );

        let upper = CARDANO_ADDRESS.to_ascii_uppercase();
        assert_eq!(classify_address(&upper), AddressKind::CardanoStyle);

        let mixed = format!("ADDR{}", &CARDANO_ADDRESS[4..]);
        assert_eq!(classify_address(&mixed), AddressKind::Invalid);
    }

    #[test]
    fn arbitrary_strings_are_invalid() {
        for raw in ["hello world", "0x1234", "addr1", "addr1BIO", ""] {
            assert_eq!(classify_address(raw), AddressKind::Invalid, "{raw}");
        }
    }

    #[test]
    fn assets_resolve_per_family() {
        let config = NetworkConfig::builtin();
        assert!(matches!(
            resolve_asset_reference(&config, ChainFamily::Ethereum, "agix").unwrap(),
            AssetReference::Erc20 { .. }
        ));
        match resolve_asset_reference(&config, ChainFamily::Cardano, "AGIX").unwrap() {
            AssetReference::NativeAsset { policy_id, asset_name } => {
                assert_eq!(policy_id.len(), 56);
                assert_eq!(asset_name, "AGIX");
            }
            other => panic!("unexpected reference {other:?}"),
        }
        assert!(resolve_asset_reference(&config, ChainFamily::Cardano, "ETH").is_err());
    }
}
