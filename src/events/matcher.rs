use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::extractors::extract_addresses;
use super::filters::FilterRegistry;
use super::queue::{EventQueue, QueueItem};
use crate::chain::{ChainClient, ChainEvent, ChainId, Pallet};
use crate::errors::WatchResult;

/// Matches a chain's native events against the registered filters and feeds
/// the matches into the event queue.
pub struct EventMatcher {
    filters: Arc<FilterRegistry>,
    queue: Arc<EventQueue>,
}

impl EventMatcher {
    pub fn new(filters: Arc<FilterRegistry>, queue: Arc<EventQueue>) -> Self {
        Self { filters, queue }
    }

    pub fn filters(&self) -> &Arc<FilterRegistry> {
        &self.filters
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Queue items for one event.
    ///
    /// Scoped matches come first, one per interested account. When any exists
    /// the chain-wide filter for the same event is not consulted.
    pub fn match_event(&self, chain: ChainId, event: &ChainEvent) -> Vec<QueueItem> {
        let Ok(pallet) = Pallet::from_str(&event.pallet) else {
            trace!("{}: ignoring {}.{}", chain, event.pallet, event.method);
            return Vec::new();
        };
        if !chain.supports_pallet(pallet) {
            trace!("{}: pallet {} not handled on this chain", chain, pallet);
            return Vec::new();
        }

        let item = |notify: bool, account: Option<String>| QueueItem {
            chain,
            pallet,
            event: event.clone(),
            notify,
            account,
        };

        let addresses = extract_addresses(pallet, event);
        let scoped: Vec<QueueItem> = self
            .filters
            .scoped_matches(chain, &addresses, pallet, &event.method)
            .into_iter()
            .map(|(address, notify)| item(notify, Some(address)))
            .collect();
        if !scoped.is_empty() {
            return scoped;
        }

        match self.filters.global_notify(chain, pallet, &event.method) {
            Some(notify) => vec![item(notify, None)],
            None => Vec::new(),
        }
    }

    /// Match and queue a block's events. Returns the number of items queued.
    pub fn handle_events(&self, chain: ChainId, events: &[ChainEvent]) -> usize {
        let mut queued = 0;
        for event in events {
            for item in self.match_event(chain, event) {
                self.queue.push(item);
                queued += 1;
            }
        }
        if queued > 0 {
            debug!("{}: queued {} items from {} events", chain, queued, events.len());
        }
        queued
    }

    /// Consume a chain's native event stream until it closes or the task is aborted.
    pub async fn listen(self: &Arc<Self>, chain: ChainId, client: Arc<dyn ChainClient>) -> WatchResult<JoinHandle<()>> {
        let stream = client.subscribe_events().await?;
        let matcher = Arc::clone(self);
        info!("{}: listening for native events", chain);

        Ok(tokio::spawn(async move {
            let mut updates = stream.updates;
            // held so the stream stays open for the life of the task
            let _shutdown = stream.shutdown;
            while let Some(events) = updates.recv().await {
                matcher.handle_events(chain, &events);
            }
            warn!("{}: native event stream closed", chain);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::events::filters::EventFilter;
    use crate::events::queue::QueueItemHandler;
    use serde_json::json;
    use std::time::Duration;

    struct Discard;

    impl QueueItemHandler for Discard {
        fn handle(&self, _item: &QueueItem) -> WatchResult<()> {
            Ok(())
        }
    }

    fn matcher() -> Arc<EventMatcher> {
        let queue = Arc::new(EventQueue::new(Arc::new(Discard), 100, Duration::from_millis(1)));
        Arc::new(EventMatcher::new(Arc::new(FilterRegistry::new()), queue))
    }

    fn transfer(from: &str, to: &str) -> ChainEvent {
        ChainEvent::new("Balances", "Transfer", json!({ "from": from, "to": to, "amount": 10 }))
    }

    #[test]
    fn test_scoped_match_suppresses_global() {
        let matcher = matcher();
        let chain = ChainId::Polkadot;
        matcher.filters().add_global(chain, EventFilter::new(Pallet::Balances, "Transfer", true));
        matcher.filters().add_scoped(chain, "alice", EventFilter::new(Pallet::Balances, "Transfer", false));

        let items = matcher.match_event(chain, &transfer("bob", "alice"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].account.as_deref(), Some("alice"));
        // the scoped flag wins even though the global filter asked for a notification
        assert!(!items[0].notify);

        let items = matcher.match_event(chain, &transfer("bob", "carol"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].account, None);
        assert!(items[0].notify);
    }

    #[test]
    fn test_one_item_per_interested_account() {
        let matcher = matcher();
        let chain = ChainId::Kusama;
        matcher.filters().add_scoped(chain, "alice", EventFilter::new(Pallet::Balances, "Transfer", true));
        matcher.filters().add_scoped(chain, "bob", EventFilter::new(Pallet::Balances, "Transfer", false));

        let queued = matcher.handle_events(chain, &[transfer("bob", "alice"), transfer("dave", "erin")]);
        assert_eq!(queued, 2);
        let accounts: Vec<Option<String>> = matcher.queue().pending().into_iter().map(|item| item.account).collect();
        assert_eq!(accounts, vec![Some("alice".to_string()), Some("bob".to_string())]);
    }

    #[test]
    fn test_unknown_and_unsupported_pallets_are_ignored() {
        let matcher = matcher();
        matcher.filters().add_global(ChainId::PolkadotAssetHub, EventFilter::new(Pallet::Referenda, "Submitted", true));

        let submitted = ChainEvent::new("Referenda", "Submitted", json!({ "index": 1, "track": 0 }));
        assert!(matcher.match_event(ChainId::PolkadotAssetHub, &submitted).is_empty());
        let unknown = ChainEvent::new("Treasury", "Proposed", json!({}));
        assert!(matcher.match_event(ChainId::Polkadot, &unknown).is_empty());
    }

    #[tokio::test]
    async fn test_listen_feeds_the_queue() {
        let matcher = matcher();
        let client = Arc::new(MockChainClient::new(ChainId::Westend));
        matcher.filters().add_global(ChainId::Westend, EventFilter::new(Pallet::Staking, "EraPaid", false));

        let handle = matcher.listen(ChainId::Westend, client.clone()).await.unwrap();
        let era_paid = ChainEvent::new("Staking", "EraPaid", json!({ "eraIndex": 9 }));
        assert_eq!(client.push_events(vec![era_paid]).await, 1);

        for _ in 0..100 {
            if matcher.queue().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(matcher.queue().len(), 1);
        handle.abort();
    }
}
