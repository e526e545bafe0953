// Layered Architecture
pub mod chain;          // Chain Layer: clients, connections, chain data types
pub mod subscriptions;  // Subscriptions Layer: batched live queries, task lifecycle
pub mod events;         // Events Layer: native event matching, bounded queue
pub mod interval;       // Interval Layer: tick-driven periodic checks
pub mod delivery;       // Delivery Layer: events, notifications, sinks

// Common utilities, errors and service wiring
pub mod errors;
pub mod service;
pub mod utils;

// Re-export key components from each layer
pub use chain::{
    ChainClient, ChainClientFactory, ChainEvent, ChainId, ConnectionManager, ConnectionStatus, Endpoint,
    MockChainClient, MockClientFactory, QueryCall, WatchConfig,
};
pub use subscriptions::{
    ApiCallEntry, QueryMultiEngine, SubscriptionTask, TaskAction, TaskLifecycleOrchestrator, TaskState, TaskStatus,
};
pub use events::{EventFilter, EventMatcher, EventQueue, FilterRegistry, PalletEventHandler, QueueItem};
pub use interval::{IntervalAction, IntervalEvaluator, IntervalScheduler, IntervalSubscription, TickReport};
pub use delivery::{
    AppSettings, ChannelSink, Delivery, DomainEvent, DownstreamSink, MemorySink, Notification, SettingsProvider,
    should_notify,
};
pub use errors::{WatchError, WatchResult};
pub use service::{Catalog, FileCatalog, StartReport, SubscriptionCatalog, WatchService, WatchServiceBuilder};
pub use utils::{AccountCache, AccountRecord};
