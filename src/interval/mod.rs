/// Interval Layer
///
/// Periodic re-evaluation on a single wall-clock aligned timer:
///
/// - Interval subscriptions with per-task cadence in ticks
/// - The scheduler: advance every counter, then evaluate what became due
/// - The evaluator: referendum checks with notification coalescing

pub mod evaluator;
pub mod scheduler;
pub mod task;

pub use evaluator::{IntervalEvaluator, TickReport};
pub use scheduler::{IntervalScheduler, delay_until_next_tick};
pub use task::{IntervalAction, IntervalKey, IntervalSubscription};
