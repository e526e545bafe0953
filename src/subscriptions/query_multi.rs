use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::callbacks::{CallbackContext, EvalMode, evaluate};
use super::reconcile::{ReconcileFlags, reconcile};
use super::task::{SubscriptionTask, TaskAction, TaskKey};
use crate::chain::{ChainClient, ChainId, ConnectionManager, QueryCall};
use crate::delivery::{Delivery, DownstreamSink, SettingsProvider};
use crate::errors::{WatchError, WatchResult};
use crate::utils::account_cache::AccountCache;

/// One tracked task inside a chain's batch.
#[derive(Clone, Debug)]
pub struct ApiCallEntry {
    pub task: SubscriptionTask,
    pub call: QueryCall,
    /// Last observed projection of this entry's result.
    pub cached: Option<Value>,
    /// Position of this entry's call in the batch. Set by build.
    pub data_index: Option<usize>,
    /// The next continuous value is a baseline, not a change.
    pub just_built: bool,
}

impl ApiCallEntry {
    pub fn new(task: SubscriptionTask, call: QueryCall) -> Self {
        Self { task, call, cached: None, data_index: None, just_built: false }
    }
}

/// Result of [`QueryMultiEngine::update`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskUpdate {
    NotTracked,
    Unchanged,
    /// Same query, new flags. Takes effect on the next push.
    InPlace,
    /// The query changed; the chain has to be rebuilt.
    QueryChanged,
}

/// Per-chain state: the entries, the de-duplicated call list and the live listener.
#[derive(Default)]
struct QueryMultiEntry {
    /// Bumped on every mutation; a listener holding an older value exits.
    generation: u64,
    entries: Vec<ApiCallEntry>,
    calls: Vec<QueryCall>,
    built: bool,
    /// Set when the last entry leaves; the slot is about to be unhooked.
    retired: bool,
    shutdown: Option<mpsc::Sender<()>>,
    listener: Option<JoinHandle<()>>,
}

impl QueryMultiEntry {
    fn invalidate(&mut self) {
        self.built = false;
        self.generation += 1;
    }

    fn stop_listener(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.try_send(());
        }
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }

    fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(|listener| !listener.is_finished())
    }
}

#[derive(Debug, Default)]
pub struct EngineStats {
    pub batches_processed: AtomicU64,
    pub events_emitted: AtomicU64,
    pub malformed_results: AtomicU64,
    pub reconciliations: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub batches_processed: u64,
    pub events_emitted: u64,
    pub malformed_results: u64,
    pub reconciliations: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            batches_processed: self.batches_processed(),
            events_emitted: self.events_emitted(),
            malformed_results: self.malformed_results(),
            reconciliations: self.reconciliations(),
        }
    }

    pub fn batches_processed(&self) -> u64 {
        self.batches_processed.load(Ordering::Relaxed)
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    pub fn malformed_results(&self) -> u64 {
        self.malformed_results.load(Ordering::Relaxed)
    }

    pub fn reconciliations(&self) -> u64 {
        self.reconciliations.load(Ordering::Relaxed)
    }
}

struct DispatchContext {
    accounts: Arc<AccountCache>,
    settings: Arc<dyn SettingsProvider>,
    sink: Arc<dyn DownstreamSink>,
    connections: Arc<ConnectionManager>,
    stats: EngineStats,
}

impl DispatchContext {
    fn callback_context(&self) -> CallbackContext<'_> {
        CallbackContext { accounts: &self.accounts, settings: self.settings.as_ref() }
    }
}

/// Multiplexes every continuous task of a chain over one batched live query.
///
/// Tasks reading the same call share one slot of the batch. After any
/// insert or remove the chain must be rebuilt and re-run before new pushes
/// are dispatched; a stale listener notices the generation change and exits.
pub struct QueryMultiEngine {
    chains: DashMap<ChainId, Arc<Mutex<QueryMultiEntry>>>,
    ctx: Arc<DispatchContext>,
}

impl QueryMultiEngine {
    pub fn new(
        accounts: Arc<AccountCache>,
        settings: Arc<dyn SettingsProvider>,
        sink: Arc<dyn DownstreamSink>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            chains: DashMap::new(),
            ctx: Arc::new(DispatchContext { accounts, settings, sink, connections, stats: EngineStats::default() }),
        }
    }

    fn slot(&self, chain: ChainId) -> Option<Arc<Mutex<QueryMultiEntry>>> {
        self.chains.get(&chain).map(|slot| Arc::clone(slot.value()))
    }

    /// Track a task. Returns false when its key is already tracked.
    pub async fn insert(&self, task: SubscriptionTask) -> WatchResult<bool> {
        let call = task.resolve_query(&self.ctx.accounts)?;
        let key = task.key();

        loop {
            let slot = Arc::clone(
                self.chains
                    .entry(task.chain)
                    .or_insert_with(|| Arc::new(Mutex::new(QueryMultiEntry::default())))
                    .value(),
            );
            let mut entry = slot.lock().await;
            if entry.retired {
                // lost a race with the removal of the last entry
                drop(entry);
                tokio::task::yield_now().await;
                continue;
            }

            if entry.entries.iter().any(|existing| existing.task.key() == key) {
                debug!("{} already tracked", key);
                return Ok(false);
            }

            debug!("Tracking {} via {}", key, call);
            entry.entries.push(ApiCallEntry::new(task, call));
            entry.invalidate();
            return Ok(true);
        }
    }

    /// Apply a changed notify flag or arguments to a tracked task.
    ///
    /// A changed query invalidates the chain; it must be rebuilt and re-run.
    pub async fn update(&self, task: SubscriptionTask) -> WatchResult<TaskUpdate> {
        let call = task.resolve_query(&self.ctx.accounts)?;
        let key = task.key();
        let Some(slot) = self.slot(task.chain) else {
            return Ok(TaskUpdate::NotTracked);
        };
        let mut entry = slot.lock().await;
        let Some(tracked) = entry.entries.iter_mut().find(|existing| existing.task.key() == key) else {
            return Ok(TaskUpdate::NotTracked);
        };

        if tracked.task == task {
            return Ok(TaskUpdate::Unchanged);
        }
        if tracked.call.same_query(&call) {
            debug!("Updated {} in place", key);
            tracked.task = task;
            return Ok(TaskUpdate::InPlace);
        }

        debug!("{} now reads {} instead of {}", key, call, tracked.call);
        tracked.task = task;
        tracked.call = call;
        tracked.cached = None;
        tracked.data_index = None;
        entry.invalidate();
        Ok(TaskUpdate::QueryChanged)
    }

    /// Stop tracking a task. Removing a chain's last task drops the chain.
    pub async fn remove(&self, chain: ChainId, action: TaskAction, account: Option<&str>) -> bool {
        let Some(slot) = self.slot(chain) else {
            return false;
        };
        let mut entry = slot.lock().await;
        let Some(position) = entry
            .entries
            .iter()
            .position(|existing| existing.task.action == action && existing.task.address() == account)
        else {
            return false;
        };

        entry.stop_listener();
        let removed = entry.entries.remove(position);
        entry.calls.clear();
        entry.invalidate();
        debug!("Stopped tracking {}", removed.task.key());

        if entry.entries.is_empty() {
            entry.retired = true;
            drop(entry);
            self.chains.remove_if(&chain, |_, current| Arc::ptr_eq(current, &slot));
            info!("{}: no tracked subscriptions left", chain);
        }
        true
    }

    /// Compute the de-duplicated call list and every entry's data index.
    ///
    /// Returns the number of distinct calls.
    pub async fn build(&self, chain: ChainId) -> WatchResult<usize> {
        let slot = self.slot(chain).ok_or(WatchError::UnknownChain(chain))?;
        let mut entry = slot.lock().await;
        let start_time = Instant::now();

        let mut calls: Vec<QueryCall> = Vec::new();
        let mut indices = Vec::with_capacity(entry.entries.len());
        for api_call in &entry.entries {
            let index = match calls.iter().position(|call| call.same_query(&api_call.call)) {
                Some(index) => index,
                None => {
                    calls.push(api_call.call.clone());
                    calls.len() - 1
                }
            };
            indices.push(index);
        }

        for (api_call, index) in entry.entries.iter_mut().zip(indices) {
            api_call.data_index = Some(index);
            api_call.just_built = true;
        }
        let distinct = calls.len();
        entry.calls = calls;
        entry.generation += 1;
        entry.built = true;

        debug!(
            "{}: built {} entries into {} calls in {:?}",
            chain,
            entry.entries.len(),
            distinct,
            start_time.elapsed()
        );
        Ok(distinct)
    }

    /// Open the batched live subscription for a built chain and start dispatching.
    pub async fn run(&self, chain: ChainId) -> WatchResult<()> {
        let slot = self.slot(chain).ok_or(WatchError::UnknownChain(chain))?;
        let mut entry = slot.lock().await;
        if !entry.built {
            return Err(WatchError::NotBuilt(chain));
        }
        if entry.calls.is_empty() {
            return Ok(());
        }

        let client = self.ctx.connections.client(chain).ok_or_else(|| WatchError::offline(chain))?;
        let stream = client.subscribe_batched(entry.calls.clone()).await?;

        entry.stop_listener();
        let generation = entry.generation;
        entry.shutdown = Some(stream.shutdown);
        entry.listener = Some(tokio::spawn(listen(
            Arc::clone(&self.ctx),
            Arc::clone(&slot),
            chain,
            generation,
            client,
            stream.updates,
        )));

        info!("{}: batched subscription running with {} calls", chain, entry.calls.len());
        Ok(())
    }

    pub async fn build_and_run(&self, chain: ChainId) -> WatchResult<()> {
        self.build(chain).await?;
        self.run(chain).await.inspect_err(|e| error!("{}: failed to run batched subscription: {}", chain, e))
    }

    /// Fetch a task's current value once and deliver it unconditionally.
    pub async fn execute_one_shot(&self, task: &SubscriptionTask) -> WatchResult<Delivery> {
        let call = task.resolve_query(&self.ctx.accounts)?;
        let client = self.ctx.connections.client(task.chain).ok_or_else(|| WatchError::offline(task.chain))?;
        let raw = client.query(&call).await?;
        let callback_ctx = self.ctx.callback_context();
        let key = task.key();

        let outcome = match self.slot(task.chain) {
            Some(slot) => {
                let mut entry = slot.lock().await;
                match entry.entries.iter_mut().find(|existing| existing.task.key() == key) {
                    Some(tracked) => {
                        let outcome = evaluate(&callback_ctx, tracked, &raw, EvalMode::OneShot)?;
                        if !outcome.reconcile.is_empty() {
                            self.ctx.stats.reconciliations.fetch_add(1, Ordering::Relaxed);
                            reconcile(client.as_ref(), &self.ctx.accounts, task.chain, &mut entry.entries, outcome.reconcile.clone())
                                .await;
                        }
                        outcome
                    }
                    None => evaluate(&callback_ctx, &mut ApiCallEntry::new(task.clone(), call), &raw, EvalMode::OneShot)?,
                }
            }
            None => evaluate(&callback_ctx, &mut ApiCallEntry::new(task.clone(), call), &raw, EvalMode::OneShot)?,
        };

        let delivery = outcome
            .delivery
            .ok_or_else(|| WatchError::malformed(key.to_string(), "one-shot evaluation produced no event"))?;
        self.ctx.stats.events_emitted.fetch_add(1, Ordering::Relaxed);
        self.ctx.sink.deliver(delivery.clone());
        Ok(delivery)
    }

    /// Tear down every live listener, keeping the tracked entries.
    pub async fn stop_all(&self) {
        for chain in self.tracked_chains() {
            if let Some(slot) = self.slot(chain) {
                let mut entry = slot.lock().await;
                entry.stop_listener();
                entry.invalidate();
            }
        }
    }

    pub async fn data_indices(&self, chain: ChainId) -> Vec<(TaskKey, Option<usize>)> {
        match self.slot(chain) {
            Some(slot) => {
                let entry = slot.lock().await;
                entry.entries.iter().map(|api_call| (api_call.task.key(), api_call.data_index)).collect()
            }
            None => Vec::new(),
        }
    }

    pub async fn batched_calls(&self, chain: ChainId) -> Vec<QueryCall> {
        match self.slot(chain) {
            Some(slot) => slot.lock().await.calls.clone(),
            None => Vec::new(),
        }
    }

    pub async fn tasks(&self, chain: ChainId) -> Vec<SubscriptionTask> {
        match self.slot(chain) {
            Some(slot) => slot.lock().await.entries.iter().map(|api_call| api_call.task.clone()).collect(),
            None => Vec::new(),
        }
    }

    pub async fn entry_count(&self, chain: ChainId) -> usize {
        match self.slot(chain) {
            Some(slot) => slot.lock().await.entries.len(),
            None => 0,
        }
    }

    pub async fn is_built(&self, chain: ChainId) -> bool {
        match self.slot(chain) {
            Some(slot) => slot.lock().await.built,
            None => false,
        }
    }

    pub async fn is_running(&self, chain: ChainId) -> bool {
        match self.slot(chain) {
            Some(slot) => slot.lock().await.is_listening(),
            None => false,
        }
    }

    pub fn has_chain(&self, chain: ChainId) -> bool {
        self.chains.contains_key(&chain)
    }

    pub fn tracked_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.chains.iter().map(|slot| *slot.key()).collect();
        chains.sort();
        chains
    }

    pub fn stats(&self) -> &EngineStats {
        &self.ctx.stats
    }

    pub fn accounts(&self) -> &Arc<AccountCache> {
        &self.ctx.accounts
    }
}

async fn listen(
    ctx: Arc<DispatchContext>,
    slot: Arc<Mutex<QueryMultiEntry>>,
    chain: ChainId,
    generation: u64,
    client: Arc<dyn ChainClient>,
    mut updates: mpsc::Receiver<Vec<Value>>,
) {
    while let Some(values) = updates.recv().await {
        let mut entry = slot.lock().await;
        if entry.retired || entry.generation != generation {
            debug!("{}: listener for generation {} is stale, exiting", chain, generation);
            break;
        }

        let flags = process_batch(&ctx, chain, &mut entry.entries, &values);
        if !flags.is_empty() {
            ctx.stats.reconciliations.fetch_add(1, Ordering::Relaxed);
            reconcile(client.as_ref(), &ctx.accounts, chain, &mut entry.entries, flags).await;
        }
    }
    debug!("{}: batch listener finished", chain);
}

/// Dispatch one pushed result tuple to every entry, in entry order.
fn process_batch(ctx: &DispatchContext, chain: ChainId, entries: &mut [ApiCallEntry], values: &[Value]) -> ReconcileFlags {
    ctx.stats.batches_processed.fetch_add(1, Ordering::Relaxed);
    let callback_ctx = ctx.callback_context();
    let mut flags = ReconcileFlags::none();

    for api_call in entries.iter_mut() {
        let Some(raw) = api_call.data_index.and_then(|index| values.get(index)) else {
            warn!("{}: no pushed value for {} (batch of {})", chain, api_call.task.key(), values.len());
            ctx.stats.malformed_results.fetch_add(1, Ordering::Relaxed);
            continue;
        };

        match evaluate(&callback_ctx, api_call, raw, EvalMode::Continuous) {
            Ok(outcome) => {
                flags.merge(outcome.reconcile);
                if let Some(delivery) = outcome.delivery {
                    ctx.stats.events_emitted.fetch_add(1, Ordering::Relaxed);
                    ctx.sink.deliver(delivery);
                }
            }
            Err(e) => {
                ctx.stats.malformed_results.fetch_add(1, Ordering::Relaxed);
                warn!("{}: skipping {}: {}", chain, api_call.task.key(), e);
            }
        }
    }
    flags
}
