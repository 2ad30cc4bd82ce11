use alloy_primitives::{Address, B256, address};
use alloy_sol_types::{SolEvent, sol};
use serde::{Deserialize, Serialize};
use std::time::Duration;

sol! {
    /// ERC-721 `Transfer`. Shares its topic with the ERC-20 event of the same name,
    /// the two only differ in how many of the arguments are indexed.
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
}

/// ENS base registrar. Emits a Transfer-shaped event for name registrations.
pub const ENS_BASE_REGISTRAR: Address = address!("0x57f1887a8bf19b14fc0df6fd9b2acc9af147ea85");

pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub rpc_ws_url: String,
    #[serde(default = "default_transfer_signature")]
    pub transfer_signature: B256,
    #[serde(default = "default_excluded_addresses")]
    pub excluded_addresses: Vec<Address>,
    #[serde(default = "default_ipfs_gateway")]
    pub ipfs_gateway: String,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_event_timeout_ms")]
    pub event_timeout_ms: u64,
    #[serde(default = "default_max_in_flight_events")]
    pub max_in_flight_events: usize,
    #[serde(default = "default_shutdown_grace_period_ms")]
    pub shutdown_grace_period_ms: u64,
    #[serde(default)]
    pub output_format: OutputFormat,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Config suitable for tests and library users that do not read `config.yml`.
    pub fn with_rpc_url(rpc_ws_url: impl Into<String>) -> Self {
        Self {
            rpc_ws_url: rpc_ws_url.into(),
            transfer_signature: default_transfer_signature(),
            excluded_addresses: default_excluded_addresses(),
            ipfs_gateway: default_ipfs_gateway(),
            call_timeout_ms: default_call_timeout_ms(),
            event_timeout_ms: default_event_timeout_ms(),
            max_in_flight_events: default_max_in_flight_events(),
            shutdown_grace_period_ms: default_shutdown_grace_period_ms(),
            output_format: OutputFormat::default(),
            metrics: MetricsConfig {
                enabled: false,
                address: "0.0.0.0".to_string(),
                port: 9100,
            },
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }
}

fn default_transfer_signature() -> B256 {
    Transfer::SIGNATURE_HASH
}

fn default_excluded_addresses() -> Vec<Address> {
    vec![ENS_BASE_REGISTRAR]
}

fn default_ipfs_gateway() -> String {
    DEFAULT_IPFS_GATEWAY.to_string()
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

fn default_event_timeout_ms() -> u64 {
    30_000
}

fn default_max_in_flight_events() -> usize {
    64
}

fn default_shutdown_grace_period_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn test_transfer_signature_matches_erc721_topic() {
        assert_eq!(
            Transfer::SIGNATURE_HASH,
            b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
        );
    }

    #[test]
    fn test_defaults_exclude_ens_registrar() {
        let config = Config::with_rpc_url("ws://localhost:8546");
        assert_eq!(config.excluded_addresses, vec![ENS_BASE_REGISTRAR]);
        assert_eq!(config.ipfs_gateway, "https://ipfs.io/ipfs/");
        assert_eq!(config.call_timeout(), Duration::from_secs(10));
    }
}
