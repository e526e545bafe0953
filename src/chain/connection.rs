use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::client::{ChainClient, ChainClientFactory};
use super::config::WatchConfig;
use super::types::{ChainId, ConnectionStatus, Endpoint};
use crate::errors::{WatchError, WatchResult};

struct ClientSlot {
    endpoint: Endpoint,
    client: Option<Arc<dyn ChainClient>>,
    status: ConnectionStatus,
}

/// Owns one client per chain and the connect/teardown policy.
///
/// A connect attempt races the factory against an endpoint-specific timeout.
/// Any failure hard-resets the chain: the slot is dropped and the client
/// disconnected. There is no retry loop here; callers reconnect explicitly.
pub struct ConnectionManager {
    factory: Arc<dyn ChainClientFactory>,
    rpc_timeout: Duration,
    light_client_timeout: Duration,
    slots: DashMap<ChainId, ClientSlot>,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn ChainClientFactory>, config: &WatchConfig) -> Self {
        Self {
            factory,
            rpc_timeout: config.connect_timeout(&Endpoint::Rpc(String::new())),
            light_client_timeout: config.connect_timeout(&Endpoint::LightClient),
            slots: DashMap::new(),
        }
    }

    fn timeout_for(&self, endpoint: &Endpoint) -> Duration {
        match endpoint {
            Endpoint::Rpc(_) => self.rpc_timeout,
            Endpoint::LightClient => self.light_client_timeout,
        }
    }

    /// Connect a chain, reusing the live client if one exists.
    pub async fn connect(&self, chain: ChainId, endpoint: Endpoint) -> WatchResult<Arc<dyn ChainClient>> {
        if let Some(client) = self.client(chain) {
            return Ok(client);
        }
        // a reconnecting or stale client is torn down before it is replaced
        if let Some((_, stale)) = self.slots.remove(&chain) {
            if let Some(client) = stale.client {
                warn!("Replacing {} client ({}, {})", chain, stale.endpoint, stale.status);
                client.disconnect().await;
            }
        }

        let connect_timeout = self.timeout_for(&endpoint);
        info!("Connecting to {} via {}", chain, endpoint);
        self.slots.insert(
            chain,
            ClientSlot { endpoint: endpoint.clone(), client: None, status: ConnectionStatus::Reconnecting },
        );

        match timeout(connect_timeout, self.factory.connect(chain, &endpoint)).await {
            Ok(Ok(client)) => {
                self.slots.insert(
                    chain,
                    ClientSlot { endpoint, client: Some(Arc::clone(&client)), status: ConnectionStatus::Connected },
                );
                info!("Connected to {}", chain);
                Ok(client)
            }
            Ok(Err(e)) => {
                error!("Connection to {} failed: {}", chain, e);
                self.hard_reset(chain).await;
                if e.is_connectivity() {
                    Err(e)
                } else {
                    Err(WatchError::Connectivity { chain, reason: e.to_string() })
                }
            }
            Err(_) => {
                error!("Connection to {} timed out after {:?}", chain, connect_timeout);
                self.hard_reset(chain).await;
                Err(WatchError::ConnectTimeout { chain, timeout: connect_timeout })
            }
        }
    }

    /// Drop the chain's client entirely so the next connect starts clean.
    pub async fn hard_reset(&self, chain: ChainId) {
        if let Some((_, slot)) = self.slots.remove(&chain) {
            warn!("Hard reset of {} client ({})", chain, slot.endpoint);
            if let Some(client) = slot.client {
                client.disconnect().await;
            }
        }
    }

    pub async fn disconnect(&self, chain: ChainId) {
        if let Some((_, slot)) = self.slots.remove(&chain) {
            info!("Disconnecting from {}", chain);
            if let Some(client) = slot.client {
                client.disconnect().await;
            }
        }
    }

    pub async fn disconnect_all(&self) {
        let chains: Vec<ChainId> = self.slots.iter().map(|slot| *slot.key()).collect();
        for chain in chains {
            self.disconnect(chain).await;
        }
    }

    /// Record that a live client lost its transport and is trying to recover.
    pub fn mark_reconnecting(&self, chain: ChainId) {
        if let Some(mut slot) = self.slots.get_mut(&chain) {
            slot.status = ConnectionStatus::Reconnecting;
        }
    }

    /// Record that a reconnecting client is usable again.
    pub fn mark_connected(&self, chain: ChainId) {
        if let Some(mut slot) = self.slots.get_mut(&chain) {
            if slot.client.is_some() {
                slot.status = ConnectionStatus::Connected;
            }
        }
    }

    pub fn status(&self, chain: ChainId) -> ConnectionStatus {
        self.slots.get(&chain).map(|slot| slot.status).unwrap_or_default()
    }

    pub fn is_online(&self, chain: ChainId) -> bool {
        self.status(chain) == ConnectionStatus::Connected
    }

    /// The chain's client, only while it is connected.
    pub fn client(&self, chain: ChainId) -> Option<Arc<dyn ChainClient>> {
        self.slots
            .get(&chain)
            .filter(|slot| slot.status == ConnectionStatus::Connected)
            .and_then(|slot| slot.client.clone())
    }

    pub fn connected_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self
            .slots
            .iter()
            .filter(|slot| slot.status == ConnectionStatus::Connected)
            .map(|slot| *slot.key())
            .collect();
        chains.sort();
        chains
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock_client::{MockChainClient, MockClientFactory};

    fn manager(factory: MockClientFactory) -> ConnectionManager {
        ConnectionManager::new(Arc::new(factory), &WatchConfig::default())
    }

    #[tokio::test]
    async fn test_connect_and_status() {
        let mock = Arc::new(MockChainClient::new(ChainId::Polkadot));
        let manager = manager(MockClientFactory::new().with_client(Arc::clone(&mock)));

        assert_eq!(manager.status(ChainId::Polkadot), ConnectionStatus::Disconnected);
        manager.connect(ChainId::Polkadot, Endpoint::LightClient).await.unwrap();
        assert!(manager.is_online(ChainId::Polkadot));
        assert_eq!(manager.connected_chains(), vec![ChainId::Polkadot]);

        manager.mark_reconnecting(ChainId::Polkadot);
        assert!(manager.client(ChainId::Polkadot).is_none());
        manager.mark_connected(ChainId::Polkadot);
        assert!(manager.client(ChainId::Polkadot).is_some());

        manager.disconnect(ChainId::Polkadot).await;
        assert_eq!(manager.status(ChainId::Polkadot), ConnectionStatus::Disconnected);
        assert!(mock.is_disconnected());
    }

    /// Opens a new mock client on every connect.
    #[derive(Default)]
    struct FreshClientFactory {
        opened: std::sync::Mutex<Vec<Arc<MockChainClient>>>,
    }

    impl FreshClientFactory {
        fn opened(&self) -> Vec<Arc<MockChainClient>> {
            self.opened.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ChainClientFactory for FreshClientFactory {
        async fn connect(&self, chain: ChainId, _endpoint: &Endpoint) -> WatchResult<Arc<dyn ChainClient>> {
            let client = Arc::new(MockChainClient::new(chain));
            self.opened.lock().unwrap().push(Arc::clone(&client));
            Ok(client)
        }
    }

    #[tokio::test]
    async fn test_reconnect_disconnects_previous_client() {
        let factory = Arc::new(FreshClientFactory::default());
        let manager = ConnectionManager::new(factory.clone(), &WatchConfig::default());

        manager.connect(ChainId::Kusama, Endpoint::LightClient).await.unwrap();
        // a connected client is reused
        manager.connect(ChainId::Kusama, Endpoint::LightClient).await.unwrap();
        assert_eq!(factory.opened().len(), 1);

        manager.mark_reconnecting(ChainId::Kusama);
        manager.connect(ChainId::Kusama, Endpoint::LightClient).await.unwrap();

        let opened = factory.opened();
        assert_eq!(opened.len(), 2);
        assert!(opened[0].is_disconnected());
        assert!(!opened[1].is_disconnected());
        assert!(manager.is_online(ChainId::Kusama));
    }

    #[tokio::test]
    async fn test_unknown_chain_fails_with_connectivity_error() {
        let manager = manager(MockClientFactory::new());
        let err = manager.connect(ChainId::Kusama, Endpoint::Rpc("wss://kusama.test".into())).await.err().unwrap();
        assert!(err.is_connectivity());
        assert_eq!(manager.status(ChainId::Kusama), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_hard_reset() {
        let mock = Arc::new(MockChainClient::new(ChainId::Westend));
        let factory = MockClientFactory::new()
            .with_client(Arc::clone(&mock))
            .with_connect_delay(Duration::from_secs(60));
        let manager = manager(factory);

        let err = manager.connect(ChainId::Westend, Endpoint::Rpc("wss://westend.test".into())).await.err().unwrap();
        match err {
            WatchError::ConnectTimeout { chain, timeout } => {
                assert_eq!(chain, ChainId::Westend);
                assert_eq!(timeout, Duration::from_secs(15));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manager.status(ChainId::Westend), ConnectionStatus::Disconnected);
    }
}
