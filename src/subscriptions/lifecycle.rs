use dashmap::DashMap;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use strum_macros::Display;
use tracing::{debug, error, info};

use super::query_multi::{QueryMultiEngine, TaskUpdate};
use super::task::{SubscriptionTask, TaskKey};
use crate::chain::{ChainId, ConnectionManager};
use crate::delivery::Delivery;
use crate::errors::{WatchError, WatchResult};

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Disabled,
    /// Tracked, waiting for the chain to be built and run.
    PendingBuild,
    Active,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Tracked {
    New,
    /// Already tracked, its query changed.
    Changed,
    Unchanged,
    Skipped,
}

impl Tracked {
    fn needs_rebuild(self) -> bool {
        matches!(self, Tracked::New | Tracked::Changed)
    }
}

/// Moves tasks between disabled, pending and active, and decides when a
/// chain's batch has to be rebuilt.
pub struct TaskLifecycleOrchestrator {
    engine: Arc<QueryMultiEngine>,
    connections: Arc<ConnectionManager>,
    states: DashMap<TaskKey, TaskState>,
}

impl TaskLifecycleOrchestrator {
    pub fn new(engine: Arc<QueryMultiEngine>, connections: Arc<ConnectionManager>) -> Self {
        Self { engine, connections, states: DashMap::new() }
    }

    pub fn engine(&self) -> &Arc<QueryMultiEngine> {
        &self.engine
    }

    pub fn task_state(&self, key: &TaskKey) -> TaskState {
        self.states.get(key).map(|state| *state).unwrap_or_default()
    }

    /// Apply one task's status: track or untrack it, then rebuild and rerun
    /// its chain when the chain is online.
    ///
    /// Only insert errors other than a missing prerequisite are returned.
    pub async fn subscribe_task(&self, task: SubscriptionTask) -> WatchResult<()> {
        let chain = task.chain;
        if task.is_enabled() {
            if !self.track(task).await?.needs_rebuild() {
                return Ok(());
            }
            if self.connections.is_online(chain) {
                self.rebuild(chain).await;
            }
        } else {
            self.untrack(&task).await;
            if self.connections.is_online(chain) && self.engine.has_chain(chain) {
                self.rebuild(chain).await;
            }
        }
        Ok(())
    }

    /// Build and run a chain. Failures are logged and leave pending tasks pending.
    async fn rebuild(&self, chain: ChainId) -> bool {
        match self.engine.build_and_run(chain).await {
            Ok(()) => {
                self.activate_pending(chain);
                true
            }
            Err(e) => {
                error!("{}: batch subscription not started: {}", chain, e);
                false
            }
        }
    }

    /// Apply many tasks at once. Each affected chain is built and run once.
    ///
    /// Returns the number of tasks newly tracked.
    pub async fn subscribe_tasks(&self, tasks: Vec<SubscriptionTask>) -> WatchResult<usize> {
        let mut touched = BTreeSet::new();
        let mut tracked = 0;

        for task in tasks {
            let chain = task.chain;
            if task.is_enabled() {
                let outcome = self.track(task).await?;
                if outcome == Tracked::New {
                    tracked += 1;
                }
                if outcome.needs_rebuild() {
                    touched.insert(chain);
                }
            } else if self.untrack(&task).await {
                touched.insert(chain);
            }
        }

        let ready: Vec<ChainId> = touched
            .into_iter()
            .filter(|chain| self.connections.is_online(*chain) && self.engine.has_chain(*chain))
            .collect();
        let results = join_all(ready.iter().map(|chain| self.engine.build_and_run(*chain))).await;
        for (chain, result) in ready.into_iter().zip(results) {
            match result {
                Ok(()) => self.activate_pending(chain),
                Err(e) => error!("{}: batch subscription not started: {}", chain, e),
            }
        }

        info!("Tracked {} new tasks", tracked);
        Ok(tracked)
    }

    /// Rebuild and rerun a chain after it came (back) online.
    pub async fn resubscribe_chain(&self, chain: ChainId) -> WatchResult<()> {
        if !self.engine.has_chain(chain) {
            debug!("{}: nothing to resubscribe", chain);
            return Ok(());
        }
        self.engine.build_and_run(chain).await?;
        self.activate_pending(chain);
        Ok(())
    }

    /// A chain's connection went away. Task states stay as they are; nothing
    /// is delivered until the client is connected again and the chain is
    /// resubscribed.
    pub fn mark_chain_offline(&self, chain: ChainId) {
        let active = self
            .states
            .iter()
            .filter(|state| state.key().chain == chain && *state.value() == TaskState::Active)
            .count();
        info!("{}: offline, delivery suspended for {} active tasks", chain, active);
    }

    pub async fn execute_one_shot(&self, task: &SubscriptionTask) -> WatchResult<Delivery> {
        self.engine.execute_one_shot(task).await
    }

    /// Insert an enabled task, or apply its new flags and arguments when it is
    /// already tracked. Missing prerequisites skip the task silently.
    async fn track(&self, task: SubscriptionTask) -> WatchResult<Tracked> {
        let key = task.key();
        let result = match self.engine.insert(task.clone()).await {
            Ok(true) => Ok(Tracked::New),
            Ok(false) => self.engine.update(task).await.map(|update| match update {
                TaskUpdate::QueryChanged => Tracked::Changed,
                TaskUpdate::NotTracked | TaskUpdate::Unchanged | TaskUpdate::InPlace => Tracked::Unchanged,
            }),
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                if outcome.needs_rebuild() {
                    self.states.insert(key, TaskState::PendingBuild);
                }
                Ok(outcome)
            }
            Err(e @ WatchError::PrerequisiteMissing { .. }) => {
                info!("Skipping {}: {}", key, e);
                Ok(Tracked::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    async fn untrack(&self, task: &SubscriptionTask) -> bool {
        let removed = self.engine.remove(task.chain, task.action, task.address()).await;
        self.states.insert(task.key(), TaskState::Disabled);
        removed
    }

    fn activate_pending(&self, chain: ChainId) {
        for mut state in self.states.iter_mut().filter(|state| state.key().chain == chain) {
            if *state == TaskState::PendingBuild {
                *state = TaskState::Active;
            }
        }
    }
}
