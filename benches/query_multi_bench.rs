use chain_watch::chain::WatchConfig;
use chain_watch::{
    AccountCache, AppSettings, ChainId, ConnectionManager, MemorySink, MockClientFactory, QueryMultiEngine,
    SubscriptionTask, TaskAction,
};
use criterion::{Criterion, criterion_group, criterion_main};
use lazy_static::lazy_static;
use std::hint::black_box;
use std::sync::Arc;

const BALANCE_ACTIONS: [TaskAction; 4] =
    [TaskAction::BalanceFree, TaskAction::BalanceFrozen, TaskAction::BalanceReserved, TaskAction::BalanceSpendable];

lazy_static! {
    static ref ADDRESSES: Vec<String> = (0..250).map(|i| format!("account-{i:04}")).collect();
}

fn engine() -> QueryMultiEngine {
    let connections = Arc::new(ConnectionManager::new(Arc::new(MockClientFactory::new()), &WatchConfig::default()));
    QueryMultiEngine::new(
        Arc::new(AccountCache::new()),
        Arc::new(AppSettings::default()),
        Arc::new(MemorySink::new()),
        connections,
    )
}

fn tasks() -> Vec<SubscriptionTask> {
    let mut tasks = vec![
        SubscriptionTask::chain_task(ChainId::Polkadot, TaskAction::ChainTimestamp),
        SubscriptionTask::chain_task(ChainId::Polkadot, TaskAction::ChainCurrentSlot),
    ];
    for address in ADDRESSES.iter() {
        for action in BALANCE_ACTIONS {
            tasks.push(SubscriptionTask::account_task(ChainId::Polkadot, action, address.as_str(), address.as_str()));
        }
    }
    tasks
}

fn benchmark_query_multi(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("query_multi");
    group.sample_size(20);

    group.bench_function("insert_1002_tasks", |b| {
        b.to_async(&runtime).iter(|| async {
            let engine = engine();
            for task in tasks() {
                engine.insert(task).await.unwrap();
            }
            black_box(engine.entry_count(ChainId::Polkadot).await)
        })
    });

    let built = engine();
    runtime.block_on(async {
        for task in tasks() {
            built.insert(task).await.unwrap();
        }
    });
    group.bench_function("build_1002_entries_into_252_calls", |b| {
        b.to_async(&runtime).iter(|| async { black_box(built.build(ChainId::Polkadot).await.unwrap()) })
    });

    group.finish();
}

criterion_group!(benches, benchmark_query_multi);
criterion_main!(benches);
