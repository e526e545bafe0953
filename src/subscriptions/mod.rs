/// Subscriptions Layer
///
/// Continuous query tasks and the engine that serves them:
///
/// - Task model with an exhaustive action enum and prerequisite checks
/// - QueryMultiEngine: one batched live query per chain, shared result slots
///   for identical calls, change-detecting callbacks
/// - Post-batch reconciliation folded from per-callback flags
/// - Lifecycle orchestration (disabled, pending build, active)

pub mod callbacks;
pub mod lifecycle;
pub mod query_multi;
pub mod reconcile;
pub mod task;


pub use callbacks::{CallbackContext, CallbackOutcome, EvalMode};
pub use lifecycle::{TaskLifecycleOrchestrator, TaskState};
pub use query_multi::{ApiCallEntry, EngineStats, EngineStatsSnapshot, QueryMultiEngine, TaskUpdate};
pub use reconcile::{ReconcileCategory, ReconcileFlags, ReconcileReport};
pub use task::{Prerequisite, SubscriptionTask, TaskAccount, TaskAction, TaskCategory, TaskKey, TaskStatus};
