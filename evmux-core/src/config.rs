//! Endpoint configuration
//!
//! Resolves the WebSocket URL the client connects to. The URL is either
//! given explicitly or derived from an API key and a [`Network`]:
//!
//! ```text
//! wss://<network>.g.alchemy.com/v2/<api_key>
//! ```
//!
//! # Environment Variables
//!
//! [`EndpointConfig::from_env`] reads:
//! - `EVMUX_API_KEY`: API key (default `demo`)
//! - `EVMUX_NETWORK`: network name, e.g. `polygon-mainnet` (default `eth-mainnet`)
//! - `EVMUX_WS_URL`: full URL override; the other two are ignored when set
//!
//! # Examples
//!
//! ```rust
//! use evmux_core::{EndpointConfig, Network};
//!
//! let config = EndpointConfig::new("my-key").with_network(Network::ArbMainnet);
//! assert_eq!(config.ws_url(), "wss://arb-mainnet.g.alchemy.com/v2/my-key");
//! ```

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// API key used when none is configured
pub const DEFAULT_API_KEY: &str = "demo";

/// Supported networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    /// Ethereum mainnet
    #[default]
    EthMainnet,
    /// Ethereum Goerli testnet
    EthGoerli,
    /// Ethereum Sepolia testnet
    EthSepolia,
    /// Polygon mainnet
    PolygonMainnet,
    /// Polygon Mumbai testnet
    PolygonMumbai,
    /// Optimism mainnet
    OptMainnet,
    /// Optimism Goerli testnet
    OptGoerli,
    /// Optimism Kovan testnet
    OptKovan,
    /// Arbitrum mainnet
    ArbMainnet,
    /// Arbitrum Goerli testnet
    ArbGoerli,
    /// Astar mainnet
    AstarMainnet,
}

impl Network {
    /// Every supported network, in declaration order
    pub const ALL: [Network; 11] = [
        Network::EthMainnet,
        Network::EthGoerli,
        Network::EthSepolia,
        Network::PolygonMainnet,
        Network::PolygonMumbai,
        Network::OptMainnet,
        Network::OptGoerli,
        Network::OptKovan,
        Network::ArbMainnet,
        Network::ArbGoerli,
        Network::AstarMainnet,
    ];

    /// Hostname prefix of the network
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::EthMainnet => "eth-mainnet",
            Network::EthGoerli => "eth-goerli",
            Network::EthSepolia => "eth-sepolia",
            Network::PolygonMainnet => "polygon-mainnet",
            Network::PolygonMumbai => "polygon-mumbai",
            Network::OptMainnet => "opt-mainnet",
            Network::OptGoerli => "opt-goerli",
            Network::OptKovan => "opt-kovan",
            Network::ArbMainnet => "arb-mainnet",
            Network::ArbGoerli => "arb-goerli",
            Network::AstarMainnet => "astar-mainnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Network::ALL
            .iter()
            .copied()
            .find(|network| network.as_str() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown network: {}", s)))
    }
}

/// Where the subscription socket connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// API key appended to the URL path
    pub api_key: String,
    /// Network selecting the hostname
    pub network: Network,
    /// Full URL; takes precedence over `api_key` and `network`
    pub url: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_key: DEFAULT_API_KEY.to_string(),
            network: Network::default(),
            url: None,
        }
    }
}

impl EndpointConfig {
    /// Configuration for an API key on the default network
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Select the network
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Connect to `url` instead of the derived endpoint
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Load from `EVMUX_API_KEY`, `EVMUX_NETWORK` and `EVMUX_WS_URL`
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfig` if `EVMUX_NETWORK` names an unknown network
    /// or `EVMUX_WS_URL` is not a `ws://`/`wss://` URL.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(api_key) = lookup("EVMUX_API_KEY").filter(|k| !k.is_empty()) {
            config.api_key = api_key;
        }
        if let Some(network) = lookup("EVMUX_NETWORK").filter(|n| !n.is_empty()) {
            config.network = network.parse()?;
        }
        if let Some(url) = lookup("EVMUX_WS_URL").filter(|u| !u.is_empty()) {
            config.url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that an explicit URL uses a WebSocket scheme
    pub fn validate(&self) -> Result<()> {
        match &self.url {
            Some(url) if !(url.starts_with("ws://") || url.starts_with("wss://")) => Err(
                Error::InvalidConfig(format!("not a WebSocket URL: {}", url)),
            ),
            _ => Ok(()),
        }
    }

    /// The URL to connect to
    pub fn ws_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!("wss://{}.g.alchemy.com/v2/{}", self.network, self.api_key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_endpoint() {
        let config = EndpointConfig::default();
        assert_eq!(config.api_key, "demo");
        assert_eq!(config.network, Network::EthMainnet);
        assert_eq!(config.ws_url(), "wss://eth-mainnet.g.alchemy.com/v2/demo");
    }

    #[test]
    fn test_url_override() {
        let config = EndpointConfig::new("key").with_url("ws://127.0.0.1:8546");
        assert_eq!(config.ws_url(), "ws://127.0.0.1:8546");
    }

    #[test]
    fn test_network_round_trip_names() {
        for network in Network::ALL {
            assert_eq!(network.as_str().parse::<Network>().unwrap(), network);
        }
    }

    #[test]
    fn test_unknown_network() {
        let err = "eth-ropsten".parse::<Network>().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_from_lookup() {
        let config = EndpointConfig::from_lookup(lookup(&[
            ("EVMUX_API_KEY", "abc123"),
            ("EVMUX_NETWORK", "polygon-mumbai"),
        ]))
        .unwrap();

        assert_eq!(config.ws_url(), "wss://polygon-mumbai.g.alchemy.com/v2/abc123");
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = EndpointConfig::from_lookup(lookup(&[("EVMUX_API_KEY", "")])).unwrap();
        assert_eq!(config, EndpointConfig::default());
    }

    #[test]
    fn test_from_lookup_bad_network() {
        let result = EndpointConfig::from_lookup(lookup(&[("EVMUX_NETWORK", "mars")]));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_from_lookup_rejects_http_url() {
        let result = EndpointConfig::from_lookup(lookup(&[("EVMUX_WS_URL", "https://example.com")]));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
