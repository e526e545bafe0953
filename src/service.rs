use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClientFactory, ChainId, ConnectionManager, WatchConfig};
use crate::delivery::{AppSettings, DownstreamSink, SettingsProvider};
use crate::errors::{WatchError, WatchResult};
use crate::events::{EventFilter, EventMatcher, EventQueue, FilterRegistry, PalletEventHandler};
use crate::interval::{IntervalEvaluator, IntervalScheduler, IntervalSubscription};
use crate::subscriptions::{QueryMultiEngine, SubscriptionTask, TaskLifecycleOrchestrator};
use crate::utils::account_cache::{AccountCache, AccountRecord};
use crate::utils::config_loader::load_optional_from_file;

/// A native event filter as stored in the catalog. Without an account it
/// applies chain-wide.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEventFilter {
    pub chain: ChainId,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(flatten)]
    pub filter: EventFilter,
}

/// Everything persisted between runs: imported accounts, tasks and filters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub accounts: Vec<AccountRecord>,
    pub tasks: Vec<SubscriptionTask>,
    pub interval_tasks: Vec<IntervalSubscription>,
    pub event_filters: Vec<CatalogEventFilter>,
}

/// Source of the persisted subscription catalog.
#[async_trait]
pub trait SubscriptionCatalog: Send + Sync {
    async fn load(&self) -> WatchResult<Catalog>;
}

#[async_trait]
impl SubscriptionCatalog for Catalog {
    async fn load(&self) -> WatchResult<Catalog> {
        Ok(self.clone())
    }
}

/// TOML catalog file. A missing file is an empty catalog.
pub struct FileCatalog {
    file_name: String,
}

impl FileCatalog {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self { file_name: file_name.into() }
    }
}

#[async_trait]
impl SubscriptionCatalog for FileCatalog {
    async fn load(&self) -> WatchResult<Catalog> {
        let catalog = load_optional_from_file::<Catalog>(self.file_name.clone())
            .await
            .map_err(|e| eyre::eyre!("Failed to load catalog {}: {}", self.file_name, e))?;
        if catalog.is_none() {
            debug!("No catalog at {}, starting empty", self.file_name);
        }
        Ok(catalog.unwrap_or_default())
    }
}

/// What `WatchService::start` managed to bring up.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartReport {
    pub connected: Vec<ChainId>,
    pub failed: Vec<ChainId>,
    pub tasks_tracked: usize,
    pub interval_tasks: usize,
    pub event_listeners: usize,
}

/// All services, wired once at process start.
pub struct WatchService {
    config: WatchConfig,
    accounts: Arc<AccountCache>,
    connections: Arc<ConnectionManager>,
    orchestrator: Arc<TaskLifecycleOrchestrator>,
    filters: Arc<FilterRegistry>,
    queue: Arc<EventQueue>,
    matcher: Arc<EventMatcher>,
    scheduler: Arc<IntervalScheduler>,
    catalog: Arc<dyn SubscriptionCatalog>,
    listeners: DashMap<ChainId, JoinHandle<()>>,
}

impl WatchService {
    pub fn builder(config: WatchConfig) -> WatchServiceBuilder {
        WatchServiceBuilder::new(config)
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn accounts(&self) -> &Arc<AccountCache> {
        &self.accounts
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn engine(&self) -> &Arc<QueryMultiEngine> {
        self.orchestrator.engine()
    }

    pub fn orchestrator(&self) -> &Arc<TaskLifecycleOrchestrator> {
        &self.orchestrator
    }

    pub fn filters(&self) -> &Arc<FilterRegistry> {
        &self.filters
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<IntervalScheduler> {
        &self.scheduler
    }

    /// Bring every service up: catalog, connections, queue drain, event
    /// listeners, batched subscriptions and the interval timer.
    ///
    /// A chain that fails to connect is reported, not fatal; its tasks stay
    /// pending until [`WatchService::resubscribe`].
    pub async fn start(&self) -> WatchResult<StartReport> {
        info!("Starting WatchService for {} chains", self.config.chains.len());
        let mut report = StartReport::default();

        let catalog = self.catalog.load().await?;
        for account in catalog.accounts {
            self.accounts.insert(account);
        }
        for entry in catalog.event_filters {
            match entry.account {
                Some(account) => self.filters.add_scoped(entry.chain, &account, entry.filter),
                None => self.filters.add_global(entry.chain, entry.filter),
            }
        }

        let attempts = self.config.chains.iter().map(|chain| async move {
            (chain.chain, self.connections.connect(chain.chain, chain.endpoint.clone()).await)
        });
        for (chain, result) in join_all(attempts).await {
            match result {
                Ok(_) => report.connected.push(chain),
                Err(e) => {
                    error!("{}: not connected at startup: {}", chain, e);
                    report.failed.push(chain);
                }
            }
        }

        self.queue.start();
        for chain in &report.connected {
            if self.start_listener(*chain).await {
                report.event_listeners += 1;
            }
        }

        report.tasks_tracked = self.orchestrator.subscribe_tasks(catalog.tasks).await?;

        for task in catalog.interval_tasks.into_iter().filter(IntervalSubscription::is_enabled) {
            if self.scheduler.insert(task) {
                report.interval_tasks += 1;
            }
        }
        self.scheduler.start();

        info!(
            "WatchService started: {} connected, {} failed, {} tasks, {} interval tasks, {} event listeners",
            report.connected.len(),
            report.failed.len(),
            report.tasks_tracked,
            report.interval_tasks,
            report.event_listeners
        );
        Ok(report)
    }

    /// Reconnect a chain if needed, then rebuild and rerun its batch and
    /// restart its event listener.
    pub async fn resubscribe(&self, chain: ChainId) -> WatchResult<()> {
        if !self.connections.is_online(chain) {
            let endpoint = self.config.endpoint_for(chain).cloned().ok_or(WatchError::UnknownChain(chain))?;
            self.connections.connect(chain, endpoint).await?;
        }
        self.orchestrator.resubscribe_chain(chain).await?;
        self.start_listener(chain).await;
        info!("{}: resubscribed", chain);
        Ok(())
    }

    /// Record that a chain's transport went away.
    pub fn mark_offline(&self, chain: ChainId) {
        warn!("{}: connection lost", chain);
        self.connections.mark_reconnecting(chain);
        self.orchestrator.mark_chain_offline(chain);
    }

    pub async fn stop(&self) {
        info!("Stopping WatchService");
        self.scheduler.stop();
        self.queue.stop();
        self.engine().stop_all().await;
        let chains: Vec<ChainId> = self.listeners.iter().map(|listener| *listener.key()).collect();
        for chain in chains {
            if let Some((_, listener)) = self.listeners.remove(&chain) {
                listener.abort();
            }
        }
        self.connections.disconnect_all().await;
        info!("WatchService stopped");
    }

    /// Replace the chain's native event listener. Chains without filters get none.
    async fn start_listener(&self, chain: ChainId) -> bool {
        if !self.filters.has_filters(chain) {
            return false;
        }
        let Some(client) = self.connections.client(chain) else {
            return false;
        };
        match self.matcher.listen(chain, client).await {
            Ok(listener) => {
                if let Some(previous) = self.listeners.insert(chain, listener) {
                    previous.abort();
                }
                true
            }
            Err(e) => {
                error!("{}: native event subscription failed: {}", chain, e);
                false
            }
        }
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        for listener in self.listeners.iter() {
            listener.abort();
        }
    }
}

/// Builder for [`WatchService`]. A client factory and a sink are required.
pub struct WatchServiceBuilder {
    config: WatchConfig,
    factory: Option<Arc<dyn ChainClientFactory>>,
    sink: Option<Arc<dyn DownstreamSink>>,
    settings: Arc<dyn SettingsProvider>,
    catalog: Arc<dyn SubscriptionCatalog>,
    accounts: Arc<AccountCache>,
}

impl WatchServiceBuilder {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            factory: None,
            sink: None,
            settings: Arc::new(AppSettings::default()),
            catalog: Arc::new(Catalog::default()),
            accounts: Arc::new(AccountCache::new()),
        }
    }

    pub fn with_client_factory(mut self, factory: Arc<dyn ChainClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DownstreamSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn SubscriptionCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_accounts(mut self, accounts: Arc<AccountCache>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn build(self) -> WatchResult<WatchService> {
        let factory = self.factory.ok_or_else(|| eyre::eyre!("WatchService needs a chain client factory"))?;
        let sink = self.sink.ok_or_else(|| eyre::eyre!("WatchService needs a downstream sink"))?;
        self.config.validate()?;

        let connections = Arc::new(ConnectionManager::new(factory, &self.config));
        let engine = Arc::new(QueryMultiEngine::new(
            Arc::clone(&self.accounts),
            Arc::clone(&self.settings),
            Arc::clone(&sink),
            Arc::clone(&connections),
        ));
        let orchestrator = Arc::new(TaskLifecycleOrchestrator::new(engine, Arc::clone(&connections)));

        let handler = Arc::new(PalletEventHandler::new(
            Arc::clone(&sink),
            Arc::clone(&self.settings),
            Arc::clone(&self.accounts),
        ));
        let queue = Arc::new(EventQueue::new(
            handler,
            self.config.event_queue_max_size,
            self.config.event_queue_delay(),
        ));
        let filters = Arc::new(FilterRegistry::new());
        let matcher = Arc::new(EventMatcher::new(Arc::clone(&filters), Arc::clone(&queue)));

        let evaluator = Arc::new(IntervalEvaluator::new(Arc::clone(&connections), sink, self.settings));
        let scheduler = Arc::new(IntervalScheduler::new(evaluator, self.config.tick_duration()));

        Ok(WatchService {
            config: self.config,
            accounts: self.accounts,
            connections,
            orchestrator,
            filters,
            queue,
            matcher,
            scheduler,
            catalog: self.catalog,
            listeners: DashMap::new(),
        })
    }
}
