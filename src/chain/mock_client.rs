use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use super::client::{BatchStream, ChainClient, ChainClientFactory, EventStream, PushStream};
use super::types::{
    AccountBalance, ChainEvent, ChainId, Endpoint, NominatingData, PoolMembership, QueryCall, ReferendumInfo,
};
use crate::errors::{WatchError, WatchResult};

const MOCK_STREAM_BUFFER: usize = 64;

struct MockBatch {
    calls: Vec<QueryCall>,
    tx: mpsc::Sender<Vec<Value>>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// In-process chain client. Tests push batch results and events by hand.
pub struct MockChainClient {
    chain: ChainId,
    batches: Mutex<Vec<MockBatch>>,
    event_senders: Mutex<Vec<mpsc::Sender<Vec<ChainEvent>>>>,
    query_results: DashMap<String, Value>,
    balances: DashMap<String, AccountBalance>,
    pools: DashMap<String, PoolMembership>,
    nominating: DashMap<String, NominatingData>,
    referenda: DashMap<u32, ReferendumInfo>,
    fetch_count: AtomicUsize,
    fetch_delay: Mutex<Option<Duration>>,
    fail_subscribe: AtomicBool,
    disconnected: AtomicBool,
}

impl MockChainClient {
    pub fn new(chain: ChainId) -> Self {
        Self {
            chain,
            batches: Mutex::new(Vec::new()),
            event_senders: Mutex::new(Vec::new()),
            query_results: DashMap::new(),
            balances: DashMap::new(),
            pools: DashMap::new(),
            nominating: DashMap::new(),
            referenda: DashMap::new(),
            fetch_count: AtomicUsize::new(0),
            fetch_delay: Mutex::new(None),
            fail_subscribe: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn set_query_result(&self, call: &QueryCall, value: Value) {
        self.query_results.insert(call.to_string(), value);
    }

    pub fn set_balance(&self, address: &str, balance: AccountBalance) {
        self.balances.insert(address.to_string(), balance);
    }

    pub fn set_pool_membership(&self, address: &str, membership: PoolMembership) {
        self.pools.insert(address.to_string(), membership);
    }

    pub fn set_nominating(&self, address: &str, nominating: NominatingData) {
        self.nominating.insert(address.to_string(), nominating);
    }

    pub fn set_referendum(&self, info: ReferendumInfo) {
        self.referenda.insert(info.id, info);
    }

    pub fn remove_referendum(&self, referendum_id: u32) {
        self.referenda.remove(&referendum_id);
    }

    /// Delay every following referendum fetch.
    pub fn set_fetch_delay(&self, delay: Duration) {
        if let Ok(mut fetch_delay) = self.fetch_delay.lock() {
            *fetch_delay = Some(delay);
        }
    }

    /// Make every following batched subscribe fail.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::Relaxed);
    }

    /// Push one result tuple to the most recently opened batch.
    pub async fn push_batch(&self, values: Vec<Value>) -> bool {
        let tx = match self.batches.lock() {
            Ok(batches) => batches.last().map(|batch| batch.tx.clone()),
            Err(_) => None,
        };
        match tx {
            Some(tx) => tx.send(values).await.is_ok(),
            None => false,
        }
    }

    /// Push one block worth of events to every event subscriber.
    pub async fn push_events(&self, events: Vec<ChainEvent>) -> usize {
        let senders = self.event_senders.lock().map(|s| s.clone()).unwrap_or_default();
        let mut delivered = 0;
        for tx in senders {
            if tx.send(events.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of batched subscriptions opened so far.
    pub fn batch_count(&self) -> usize {
        self.batches.lock().map(|b| b.len()).unwrap_or_default()
    }

    pub fn last_calls(&self) -> Option<Vec<QueryCall>> {
        self.batches.lock().ok().and_then(|b| b.last().map(|batch| batch.calls.clone()))
    }

    /// Whether the batch at `index` was torn down by its subscriber.
    pub fn is_unsubscribed(&self, index: usize) -> bool {
        let Ok(mut batches) = self.batches.lock() else {
            return false;
        };
        match batches.get_mut(index) {
            Some(batch) => !matches!(batch.shutdown_rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)),
            None => false,
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::Relaxed)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }

    fn record_fetch(&self) {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain(&self) -> ChainId {
        self.chain
    }

    async fn query(&self, call: &QueryCall) -> WatchResult<Value> {
        self.query_results
            .get(&call.to_string())
            .map(|value| value.clone())
            .ok_or_else(|| WatchError::malformed(call.to_string(), "no mocked result"))
    }

    async fn subscribe_batched(&self, calls: Vec<QueryCall>) -> WatchResult<BatchStream> {
        if self.fail_subscribe.load(Ordering::Relaxed) {
            return Err(WatchError::Connectivity { chain: self.chain, reason: "mock subscribe failure".to_string() });
        }
        let (tx, updates) = mpsc::channel(MOCK_STREAM_BUFFER);
        let (shutdown, shutdown_rx) = mpsc::channel(1);
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(MockBatch { calls, tx, shutdown_rx });
        }
        Ok(PushStream { updates, shutdown })
    }

    async fn subscribe_events(&self) -> WatchResult<EventStream> {
        let (tx, updates) = mpsc::channel(MOCK_STREAM_BUFFER);
        let (shutdown, _shutdown_rx) = mpsc::channel(1);
        if let Ok(mut senders) = self.event_senders.lock() {
            senders.push(tx);
        }
        Ok(PushStream { updates, shutdown })
    }

    async fn fetch_balance(&self, address: &str) -> WatchResult<AccountBalance> {
        self.record_fetch();
        self.balances
            .get(address)
            .map(|balance| *balance)
            .ok_or_else(|| WatchError::malformed(format!("balance of {address}"), "no mocked balance"))
    }

    async fn fetch_pool_membership(&self, address: &str) -> WatchResult<Option<PoolMembership>> {
        self.record_fetch();
        Ok(self.pools.get(address).map(|membership| membership.clone()))
    }

    async fn fetch_nominating(&self, address: &str) -> WatchResult<Option<NominatingData>> {
        self.record_fetch();
        Ok(self.nominating.get(address).map(|nominating| nominating.clone()))
    }

    async fn fetch_referendum(&self, referendum_id: u32) -> WatchResult<Option<ReferendumInfo>> {
        self.record_fetch();
        let delay = self.fetch_delay.lock().ok().and_then(|delay| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.referenda.get(&referendum_id).map(|info| info.clone()))
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::Relaxed);
    }
}

/// Hands out pre-registered mock clients.
#[derive(Default)]
pub struct MockClientFactory {
    clients: DashMap<ChainId, Arc<MockChainClient>>,
    connect_delay: Option<Duration>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(self, client: Arc<MockChainClient>) -> Self {
        self.clients.insert(client.chain(), client);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }
}

#[async_trait]
impl ChainClientFactory for MockClientFactory {
    async fn connect(&self, chain: ChainId, _endpoint: &Endpoint) -> WatchResult<Arc<dyn ChainClient>> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        let client = self
            .clients
            .get(&chain)
            .map(|client| Arc::clone(client.value()))
            .ok_or_else(|| WatchError::Connectivity { chain, reason: "no mock client registered".to_string() })?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_batch_reaches_latest_subscriber() {
        let client = MockChainClient::new(ChainId::Polkadot);
        assert!(!client.push_batch(vec![json!(1)]).await);

        let calls = vec![QueryCall::new("timestamp.now", vec![])];
        let mut first = client.subscribe_batched(calls.clone()).await.unwrap();
        let mut second = client.subscribe_batched(calls).await.unwrap();
        assert_eq!(client.batch_count(), 2);

        assert!(client.push_batch(vec![json!(7)]).await);
        assert_eq!(second.updates.recv().await, Some(vec![json!(7)]));
        assert!(first.updates.try_recv().is_err());

        first.shutdown.try_send(()).unwrap();
        assert!(client.is_unsubscribed(0));
        assert!(!client.is_unsubscribed(1));
    }

    #[tokio::test]
    async fn test_fetches_are_counted() {
        let client = MockChainClient::new(ChainId::Kusama);
        client.set_balance("acc1", AccountBalance { free: 5, reserved: 0, frozen: 0 });
        assert_eq!(client.fetch_balance("acc1").await.unwrap().free, 5);
        assert!(client.fetch_balance("acc2").await.is_err());
        assert_eq!(client.fetch_pool_membership("acc1").await.unwrap(), None);
        assert_eq!(client.fetch_count(), 3);
    }
}
