use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use super::types::{ChainId, Endpoint};
use crate::utils::config_loader::{LoadConfigError, load_from_file, load_from_file_sync};
use crate::utils::constants::{
    DEFAULT_CHANNEL_BUFFER_SIZE, DEFAULT_EVENT_QUEUE_DELAY, DEFAULT_EVENT_QUEUE_MAX_SIZE,
    DEFAULT_LIGHT_CLIENT_CONNECT_TIMEOUT, DEFAULT_RPC_CONNECT_TIMEOUT, DEFAULT_TICK_DURATION,
};

/// Endpoint a chain should be connected through at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEndpointConfig {
    pub chain: ChainId,
    pub endpoint: Endpoint,
}

/// Configuration for the watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Chains to connect at startup
    pub chains: Vec<ChainEndpointConfig>,
    /// Connect timeout for direct RPC endpoints in seconds
    pub rpc_connect_timeout_secs: u64,
    /// Connect timeout for light client endpoints in seconds
    pub light_client_connect_timeout_secs: u64,
    /// Interval scheduler tick in seconds
    pub tick_duration_secs: u64,
    /// Maximum number of matched events waiting to be processed
    pub event_queue_max_size: usize,
    /// Pause between two processed queue items in milliseconds
    pub event_queue_delay_ms: u64,
    /// Buffer size for push stream channels
    pub channel_buffer_size: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            chains: vec![ChainEndpointConfig { chain: ChainId::Polkadot, endpoint: Endpoint::LightClient }],
            rpc_connect_timeout_secs: DEFAULT_RPC_CONNECT_TIMEOUT.as_secs(),
            light_client_connect_timeout_secs: DEFAULT_LIGHT_CLIENT_CONNECT_TIMEOUT.as_secs(),
            tick_duration_secs: DEFAULT_TICK_DURATION.as_secs(),
            event_queue_max_size: DEFAULT_EVENT_QUEUE_MAX_SIZE,
            event_queue_delay_ms: DEFAULT_EVENT_QUEUE_DELAY.as_millis() as u64,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
        }
    }
}

impl WatchConfig {
    /// Load configuration from environment variables
    ///
    /// `CHAIN_WATCH_ENDPOINTS` takes `chain=endpoint` pairs separated by `;`,
    /// where endpoint is an RPC url or `light-client`.
    pub fn from_env() -> eyre::Result<Self> {
        let mut config = Self::default();

        if let Ok(endpoints) = std::env::var("CHAIN_WATCH_ENDPOINTS") {
            config.chains = parse_endpoints(&endpoints)?;
        }

        if let Ok(timeout_str) = std::env::var("CHAIN_WATCH_RPC_CONNECT_TIMEOUT_SECS") {
            config.rpc_connect_timeout_secs = timeout_str
                .parse()
                .map_err(|e| eyre::eyre!("Invalid CHAIN_WATCH_RPC_CONNECT_TIMEOUT_SECS: {}", e))?;
        }

        if let Ok(timeout_str) = std::env::var("CHAIN_WATCH_LIGHT_CLIENT_CONNECT_TIMEOUT_SECS") {
            config.light_client_connect_timeout_secs = timeout_str
                .parse()
                .map_err(|e| eyre::eyre!("Invalid CHAIN_WATCH_LIGHT_CLIENT_CONNECT_TIMEOUT_SECS: {}", e))?;
        }

        if let Ok(tick_str) = std::env::var("CHAIN_WATCH_TICK_DURATION_SECS") {
            config.tick_duration_secs =
                tick_str.parse().map_err(|e| eyre::eyre!("Invalid CHAIN_WATCH_TICK_DURATION_SECS: {}", e))?;
        }

        if let Ok(size_str) = std::env::var("CHAIN_WATCH_EVENT_QUEUE_MAX_SIZE") {
            config.event_queue_max_size =
                size_str.parse().map_err(|e| eyre::eyre!("Invalid CHAIN_WATCH_EVENT_QUEUE_MAX_SIZE: {}", e))?;
        }

        if let Ok(delay_str) = std::env::var("CHAIN_WATCH_EVENT_QUEUE_DELAY_MS") {
            config.event_queue_delay_ms =
                delay_str.parse().map_err(|e| eyre::eyre!("Invalid CHAIN_WATCH_EVENT_QUEUE_DELAY_MS: {}", e))?;
        }

        if let Ok(buffer_size_str) = std::env::var("CHAIN_WATCH_CHANNEL_BUFFER_SIZE") {
            config.channel_buffer_size = buffer_size_str
                .parse()
                .map_err(|e| eyre::eyre!("Invalid CHAIN_WATCH_CHANNEL_BUFFER_SIZE: {}", e))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, expanding `${VAR}` references.
    pub async fn from_file(file_name: String) -> Result<Self, LoadConfigError> {
        load_from_file(file_name).await
    }

    pub fn from_file_sync(file_name: String) -> Result<Self, LoadConfigError> {
        load_from_file_sync(file_name)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        for chain in &self.chains {
            if let Endpoint::Rpc(url) = &chain.endpoint {
                let parsed = Url::parse(url).map_err(|e| eyre::eyre!("Invalid endpoint for {}: {}", chain.chain, e))?;
                if !matches!(parsed.scheme(), "ws" | "wss" | "http" | "https") {
                    return Err(eyre::eyre!("Unsupported endpoint scheme for {}: {}", chain.chain, parsed.scheme()));
                }
            }
        }
        if self.tick_duration_secs == 0 {
            return Err(eyre::eyre!("tick_duration_secs must be positive"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self, endpoint: &Endpoint) -> Duration {
        match endpoint {
            Endpoint::Rpc(_) => Duration::from_secs(self.rpc_connect_timeout_secs),
            Endpoint::LightClient => Duration::from_secs(self.light_client_connect_timeout_secs),
        }
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(self.tick_duration_secs)
    }

    pub fn event_queue_delay(&self) -> Duration {
        Duration::from_millis(self.event_queue_delay_ms)
    }

    pub fn endpoint_for(&self, chain: ChainId) -> Option<&Endpoint> {
        self.chains.iter().find(|c| c.chain == chain).map(|c| &c.endpoint)
    }
}

fn parse_endpoints(raw: &str) -> eyre::Result<Vec<ChainEndpointConfig>> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (chain, endpoint) =
                pair.split_once('=').ok_or_else(|| eyre::eyre!("Invalid endpoint pair: {}", pair))?;
            let chain = ChainId::from_str(chain.trim()).map_err(|e| eyre::eyre!("Invalid chain {}: {}", chain, e))?;
            let endpoint = match endpoint.trim() {
                "light-client" => Endpoint::LightClient,
                url => Endpoint::Rpc(url.to_string()),
            };
            Ok(ChainEndpointConfig { chain, endpoint })
        })
        .collect()
}
