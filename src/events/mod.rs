/// Events Layer
///
/// Native chain events from subscription to delivery:
///
/// - Global and account-scoped filters per chain
/// - Per-pallet address extraction for scoped matching
/// - The matcher, where a scoped match suppresses the global one
/// - A bounded FIFO queue with a single drain task
/// - Per-pallet handlers that build the event and notification in one step

pub mod extractors;
pub mod filters;
pub mod handlers;
pub mod matcher;
pub mod queue;

pub use extractors::extract_addresses;
pub use filters::{EventFilter, FilterRegistry};
pub use handlers::PalletEventHandler;
pub use matcher::EventMatcher;
pub use queue::{DrainState, EventQueue, QueueItem, QueueItemHandler, QueueStats, QueueStatsSnapshot};
