use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::types::{
    AccountBalance, ChainEvent, ChainId, Endpoint, NominatingData, PoolMembership, QueryCall, ReferendumInfo,
};
use crate::errors::WatchResult;

/// A live push stream plus the handle that tears it down.
///
/// Dropping the receiver or sending on `shutdown` ends the stream; the
/// client is free to keep pushing until it observes either.
pub struct PushStream<T> {
    pub updates: mpsc::Receiver<T>,
    pub shutdown: mpsc::Sender<()>,
}

/// One pushed result tuple per update, positionally aligned with the
/// calls the batch was opened with.
pub type BatchStream = PushStream<Vec<Value>>;

/// Arrays of native event records, one array per block.
pub type EventStream = PushStream<Vec<ChainEvent>>;

/// Connected chain client. The wire protocol lives behind this trait.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> ChainId;

    /// Single point query.
    async fn query(&self, call: &QueryCall) -> WatchResult<Value>;

    /// Open one batched live subscription over an ordered list of calls.
    async fn subscribe_batched(&self, calls: Vec<QueryCall>) -> WatchResult<BatchStream>;

    /// Subscribe to the chain's native block events.
    async fn subscribe_events(&self) -> WatchResult<EventStream>;

    async fn fetch_balance(&self, address: &str) -> WatchResult<AccountBalance>;

    async fn fetch_pool_membership(&self, address: &str) -> WatchResult<Option<PoolMembership>>;

    async fn fetch_nominating(&self, address: &str) -> WatchResult<Option<NominatingData>>;

    async fn fetch_referendum(&self, referendum_id: u32) -> WatchResult<Option<ReferendumInfo>>;

    async fn disconnect(&self);
}

/// Opens clients for the connection manager.
#[async_trait]
pub trait ChainClientFactory: Send + Sync {
    async fn connect(&self, chain: ChainId, endpoint: &Endpoint) -> WatchResult<Arc<dyn ChainClient>>;
}
