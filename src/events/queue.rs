use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strum_macros::Display;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::chain::{ChainEvent, ChainId, Pallet};
use crate::errors::WatchResult;

/// One matched native event waiting to be handled.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueItem {
    pub chain: ChainId,
    pub pallet: Pallet,
    pub event: ChainEvent,
    pub notify: bool,
    /// The scoped account this match was made for, none for global matches.
    pub account: Option<String>,
}

/// Processes drained items one at a time.
pub trait QueueItemHandler: Send + Sync {
    fn handle(&self, item: &QueueItem) -> WatchResult<()>;
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum DrainState {
    /// No drain task running.
    Stopped,
    /// Drain task waiting for items.
    Idle,
    /// Drain task handling an item.
    Draining,
}

#[derive(Debug, Default)]
pub struct QueueStats {
    pub pushed: AtomicU64,
    pub dropped: AtomicU64,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    pub pushed: u64,
    pub dropped: u64,
    pub processed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct QueueShared {
    items: Mutex<VecDeque<QueueItem>>,
    state: Mutex<DrainState>,
    wakeup: Notify,
    max_size: usize,
    delay: Duration,
    stats: QueueStats,
    handler: Arc<dyn QueueItemHandler>,
}

impl QueueShared {
    fn set_state(&self, state: DrainState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    fn pop(&self) -> Option<QueueItem> {
        self.items.lock().ok().and_then(|mut items| items.pop_front())
    }
}

/// Bounded FIFO of matched events with a single background consumer.
///
/// `push` never blocks: past `max_size` the oldest items are dropped. One
/// drain task handles items strictly in order, pausing `delay` between items.
pub struct EventQueue {
    shared: Arc<QueueShared>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl EventQueue {
    pub fn new(handler: Arc<dyn QueueItemHandler>, max_size: usize, delay: Duration) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                items: Mutex::new(VecDeque::with_capacity(max_size.max(1))),
                state: Mutex::new(DrainState::Stopped),
                wakeup: Notify::new(),
                max_size: max_size.max(1),
                delay,
                stats: QueueStats::default(),
                handler,
            }),
            drain: Mutex::new(None),
        }
    }

    pub fn push(&self, item: QueueItem) {
        let Ok(mut items) = self.shared.items.lock() else {
            warn!("Event queue lock poisoned, dropping {}.{}", item.event.pallet, item.event.method);
            return;
        };
        items.push_back(item);
        self.shared.stats.pushed.fetch_add(1, Ordering::Relaxed);

        while items.len() > self.shared.max_size {
            if let Some(dropped) = items.pop_front() {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Event queue full ({}), dropping oldest {}.{} on {}",
                    self.shared.max_size, dropped.event.pallet, dropped.event.method, dropped.chain
                );
            }
        }
        drop(items);
        self.shared.wakeup.notify_one();
    }

    /// Spawn the drain task. Returns false if one is already running.
    pub fn start(&self) -> bool {
        let Ok(mut drain) = self.drain.lock() else {
            return false;
        };
        if drain.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Event queue drain already running");
            return false;
        }

        self.shared.set_state(DrainState::Idle);
        *drain = Some(tokio::spawn(drain_loop(Arc::clone(&self.shared))));
        info!("Event queue drain started (max {} items, {:?} between items)", self.shared.max_size, self.shared.delay);
        true
    }

    /// Stop the drain task. Pending items stay queued.
    pub fn stop(&self) {
        if let Some(handle) = self.drain.lock().ok().and_then(|mut drain| drain.take()) {
            handle.abort();
            info!("Event queue drain stopped with {} items pending", self.len());
        }
        self.shared.set_state(DrainState::Stopped);
    }

    pub fn state(&self) -> DrainState {
        self.shared.state.lock().map(|state| *state).unwrap_or(DrainState::Stopped)
    }

    pub fn len(&self) -> usize {
        self.shared.items.lock().map(|items| items.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the pending items, oldest first.
    pub fn pending(&self) -> Vec<QueueItem> {
        self.shared.items.lock().map(|items| items.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn max_size(&self) -> usize {
        self.shared.max_size
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        if let Some(handle) = self.drain.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}

async fn drain_loop(shared: Arc<QueueShared>) {
    loop {
        let Some(item) = shared.pop() else {
            shared.set_state(DrainState::Idle);
            shared.wakeup.notified().await;
            continue;
        };

        shared.set_state(DrainState::Draining);
        match shared.handler.handle(&item) {
            Ok(()) => {
                shared.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to handle {}.{} on {}: {}", item.event.pallet, item.event.method, item.chain, e);
            }
        }
        sleep(shared.delay).await;
    }
}
