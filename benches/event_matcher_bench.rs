use chain_watch::chain::Pallet;
use chain_watch::errors::WatchResult;
use chain_watch::events::QueueItemHandler;
use chain_watch::{ChainEvent, ChainId, EventFilter, EventMatcher, EventQueue, FilterRegistry, QueueItem};
use criterion::{Criterion, criterion_group, criterion_main};
use lazy_static::lazy_static;
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

lazy_static! {
    static ref TRANSFERS: Vec<ChainEvent> = (0..100)
        .map(|i| {
            ChainEvent::new(
                "Balances",
                "Transfer",
                json!({ "from": format!("account-{i:04}"), "to": format!("account-{:04}", i + 500), "amount": "1" }),
            )
        })
        .collect();
}

struct Discard;

impl QueueItemHandler for Discard {
    fn handle(&self, _item: &QueueItem) -> WatchResult<()> {
        Ok(())
    }
}

fn matcher() -> EventMatcher {
    let filters = Arc::new(FilterRegistry::new());
    filters.add_global(ChainId::Polkadot, EventFilter::new(Pallet::Balances, "Transfer", false));
    for i in 0..1000 {
        let account = format!("account-{i:04}");
        filters.add_scoped(ChainId::Polkadot, &account, EventFilter::new(Pallet::Balances, "Transfer", i % 2 == 0));
    }
    let queue = Arc::new(EventQueue::new(Arc::new(Discard), 500, Duration::ZERO));
    EventMatcher::new(filters, queue)
}

fn benchmark_event_matcher(c: &mut Criterion) {
    let matcher = matcher();
    let mut group = c.benchmark_group("event_matcher");

    group.bench_function("match_100_transfers_against_1000_accounts", |b| {
        b.iter(|| {
            TRANSFERS
                .iter()
                .map(|event| matcher.match_event(ChainId::Polkadot, black_box(event)).len())
                .sum::<usize>()
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_event_matcher);
criterion_main!(benches);
