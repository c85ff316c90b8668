use ethers::signers::LocalWallet;
use std::{fmt, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use crate::{
    ledger::{ChannelClient, EthereumLedger},
    types::{ChainId, MpeError, NetworkConfig},
};

pub const CHAIN_VAR: &str = "MPE_CHAIN";
pub const RPC_URL_VAR: &str = "MPE_RPC_URL";
pub const PRIVATE_KEY_VAR: &str = "MPE_PRIVATE_KEY";
pub const NETWORK_CONFIG_VAR: &str = "MPE_NETWORK_CONFIG";
pub const RPC_TIMEOUT_VAR: &str = "MPE_RPC_TIMEOUT_SECS";

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

/// Process settings for a channel client, read once at startup.
#[derive(Clone)]
pub struct ClientSettings {
    pub chain_id: ChainId,
    pub rpc_url: Option<String>,
    pub private_key: String,
    pub network_config: Option<PathBuf>,
    pub rpc_timeout: Duration,
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("network_config", &self.network_config)
            .field("rpc_timeout", &self.rpc_timeout)
            .finish()
    }
}

impl ClientSettings {
    pub fn from_env() -> Result<Self, MpeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, MpeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let chain_id = lookup(CHAIN_VAR).unwrap_or_else(|| "1".to_string()).parse()?;
        let private_key = lookup(PRIVATE_KEY_VAR)
            .ok_or_else(|| MpeError::Config(format!("{PRIVATE_KEY_VAR} is not set")))?;
        let rpc_timeout = match lookup(RPC_TIMEOUT_VAR) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| MpeError::Config(format!("{RPC_TIMEOUT_VAR} must be whole seconds")))?,
            None => DEFAULT_RPC_TIMEOUT_SECS,
        };

        Ok(Self {
            chain_id,
            rpc_url: lookup(RPC_URL_VAR).filter(|url| !url.trim().is_empty()),
            private_key,
            network_config: lookup(NETWORK_CONFIG_VAR).map(PathBuf::from),
            rpc_timeout: Duration::from_secs(rpc_timeout),
        })
    }

    /// The network table, from the configured file or the built-in defaults, with the RPC
    /// override applied to the selected chain.
    pub fn load_network(&self) -> Result<NetworkConfig, MpeError> {
        let mut network = match &self.network_config {
            Some(path) => NetworkConfig::from_file(path)?,
            None => NetworkConfig::builtin(),
        };
        if let Some(url) = &self.rpc_url {
            let chain = network.chains.get_mut(&self.chain_id).ok_or_else(|| {
                MpeError::Config(format!("chain {} is not configured", self.chain_id))
            })?;
            chain.rpc_endpoint = url.clone();
        }
        Ok(network)
    }

    pub fn wallet(&self) -> Result<LocalWallet, MpeError> {
        LocalWallet::from_str(self.private_key.trim().trim_start_matches("0x"))
            .map_err(|e| MpeError::Config(format!("{PRIVATE_KEY_VAR}: {e}")))
    }

    pub async fn connect(&self) -> Result<ChannelClient, MpeError> {
        let network = Arc::new(self.load_network()?);
        let chain = network.chain(&self.chain_id)?;
        let ledger = EthereumLedger::connect(chain, self.wallet()?, self.rpc_timeout).await?;
        ChannelClient::new(Arc::new(ledger), network, self.chain_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;
    use std::collections::HashMap;

    const KEY: &str = "0x1234567890123456789012345678901234567890123456789012345678901234";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_mainnet_with_builtin_table() {
        let settings = ClientSettings::from_lookup(lookup(&[(PRIVATE_KEY_VAR, KEY)])).unwrap();
        assert_eq!(settings.chain_id, ChainId::Evm(1));
        assert_eq!(settings.rpc_timeout, Duration::from_secs(30));
        assert!(settings.load_network().unwrap().chain(&ChainId::Evm(1)).is_ok());
        assert!(!settings.wallet().unwrap().address().is_zero());
    }

    #[test]
    fn rpc_override_applies_to_selected_chain() {
        let settings = ClientSettings::from_lookup(lookup(&[
            (PRIVATE_KEY_VAR, KEY),
            (RPC_URL_VAR, "http://localhost:8545"),
            (RPC_TIMEOUT_VAR, "5"),
        ]))
        .unwrap();
        let network = settings.load_network().unwrap();
        assert_eq!(
            network.chain(&ChainId::Evm(1)).unwrap().rpc_endpoint,
            "http://localhost:8545"
        );
        assert_eq!(settings.rpc_timeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_key_and_bad_chain_are_config_errors() {
        assert!(matches!(
            ClientSettings::from_lookup(lookup(&[])),
            Err(MpeError::Config(_))
        ));
        assert!(ClientSettings::from_lookup(lookup(&[(PRIVATE_KEY_VAR, KEY), (CHAIN_VAR, "solana")])).is_err());

        let settings = ClientSettings::from_lookup(lookup(&[
            (PRIVATE_KEY_VAR, KEY),
            (CHAIN_VAR, "31337"),
            (RPC_URL_VAR, "http://localhost:8545"),
        ]))
        .unwrap();
        assert!(settings.load_network().is_err());
    }

    #[test]
    fn debug_output_redacts_the_key() {
        let settings = ClientSettings::from_lookup(lookup(&[(PRIVATE_KEY_VAR, KEY)])).unwrap();
        assert!(!format!("{settings:?}").contains("1234567890"));
    }
}
