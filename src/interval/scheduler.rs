use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::evaluator::{IntervalEvaluator, TickReport};
use super::task::{IntervalKey, IntervalSubscription};
use crate::chain::ChainId;

struct Timer {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

/// Delay from `now_ms` to the next wall-clock multiple of `period_ms`.
/// Zero when `now_ms` already sits on a boundary.
pub fn delay_until_next_tick(now_ms: u128, period_ms: u128) -> Duration {
    if period_ms == 0 {
        return Duration::ZERO;
    }
    let remainder = now_ms % period_ms;
    if remainder == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((period_ms - remainder) as u64)
    }
}

/// One process-wide timer driving every interval subscription.
///
/// The first tick is aligned to the next wall-clock multiple of the tick
/// duration, then the timer repeats at that period. Every list mutation stops
/// the timer first and restarts it afterwards, which recomputes the alignment.
/// Stopping never cancels a tick in flight: its due evaluations run to the end.
pub struct IntervalScheduler {
    subscriptions: DashMap<ChainId, Vec<IntervalSubscription>>,
    evaluator: Arc<IntervalEvaluator>,
    tick_duration: Duration,
    timer: Mutex<Option<Timer>>,
    /// One tick at a time, also across a timer restart.
    tick_guard: AsyncMutex<()>,
    ticks_processed: AtomicU64,
}

impl IntervalScheduler {
    pub fn new(evaluator: Arc<IntervalEvaluator>, tick_duration: Duration) -> Self {
        Self {
            subscriptions: DashMap::new(),
            evaluator,
            tick_duration: tick_duration.max(Duration::from_millis(1)),
            timer: Mutex::new(None),
            tick_guard: AsyncMutex::new(()),
            ticks_processed: AtomicU64::new(0),
        }
    }

    pub fn evaluator(&self) -> &Arc<IntervalEvaluator> {
        &self.evaluator
    }

    /// Start the timer. Returns false if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let Ok(mut timer) = self.timer.lock() else {
            return false;
        };
        if timer.as_ref().is_some_and(|timer| !timer.worker.is_finished()) {
            return false;
        }

        let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        let delay = delay_until_next_tick(now_ms, self.tick_duration.as_millis());
        let (shutdown, rx) = watch::channel(false);
        let worker = tokio::spawn(run_timer(Arc::downgrade(self), self.tick_duration, delay, rx));

        info!("Interval scheduler started, first tick in {:?}, then every {:?}", delay, self.tick_duration);
        *timer = Some(Timer { shutdown, worker });
        true
    }

    pub fn stop(&self) -> bool {
        let Some(timer) = self.timer.lock().ok().and_then(|mut timer| timer.take()) else {
            return false;
        };
        // the worker exits after the tick it may be processing
        let _ = timer.shutdown.send(true);
        debug!("Interval scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .map(|timer| timer.as_ref().is_some_and(|timer| !timer.worker.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the timer, apply `mutate`, restart the timer if it was running.
    fn mutate<R>(self: &Arc<Self>, mutate: impl FnOnce(&Self) -> R) -> R {
        let was_running = self.stop();
        let result = mutate(self);
        if was_running {
            self.start();
        }
        result
    }

    /// Add a subscription. Returns false if its key is already scheduled.
    pub fn insert(self: &Arc<Self>, subscription: IntervalSubscription) -> bool {
        self.mutate(|scheduler| {
            let key = subscription.key();
            let mut list = scheduler.subscriptions.entry(subscription.chain).or_default();
            if list.iter().any(|existing| existing.key() == key) {
                return false;
            }
            debug!("Scheduling {} every {} ticks", key, subscription.ticks_to_wait);
            list.push(subscription);
            true
        })
    }

    pub fn remove(self: &Arc<Self>, key: &IntervalKey) -> bool {
        self.mutate(|scheduler| {
            let Some(mut list) = scheduler.subscriptions.get_mut(&key.chain) else {
                return false;
            };
            let before = list.len();
            list.retain(|existing| existing.key() != *key);
            let removed = list.len() != before;
            let now_empty = list.is_empty();
            drop(list);
            if now_empty {
                scheduler.subscriptions.remove_if(&key.chain, |_, list| list.is_empty());
            }
            removed
        })
    }

    /// Change cadence and notify flag of a scheduled subscription.
    pub fn update(self: &Arc<Self>, key: &IntervalKey, ticks_to_wait: u32, enable_os_notifications: bool) -> bool {
        self.mutate(|scheduler| {
            let Some(mut list) = scheduler.subscriptions.get_mut(&key.chain) else {
                return false;
            };
            match list.iter_mut().find(|existing| existing.key() == *key) {
                Some(subscription) => {
                    subscription.set_cadence(ticks_to_wait);
                    subscription.enable_os_notifications = enable_os_notifications;
                    true
                }
                None => false,
            }
        })
    }

    pub fn get(&self, key: &IntervalKey) -> Option<IntervalSubscription> {
        self.subscriptions.get(&key.chain)?.iter().find(|existing| existing.key() == *key).cloned()
    }

    pub fn subscriptions(&self, chain: ChainId) -> Vec<IntervalSubscription> {
        self.subscriptions.get(&chain).map(|list| list.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.iter().map(|list| list.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ticks_processed(&self) -> u64 {
        self.ticks_processed.load(Ordering::Relaxed)
    }

    /// One tick: advance every counter, then evaluate whatever became due.
    pub async fn process_tick(&self) -> TickReport {
        let _tick = self.tick_guard.lock().await;
        let mut due = Vec::new();
        for mut list in self.subscriptions.iter_mut() {
            for subscription in list.iter_mut() {
                if subscription.advance() {
                    due.push(subscription.clone());
                }
            }
        }
        self.ticks_processed.fetch_add(1, Ordering::Relaxed);
        debug!("Interval tick: {} of {} subscriptions due", due.len(), self.len());
        self.evaluator.process_due(due).await
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().ok().and_then(Option::take) {
            timer.worker.abort();
        }
    }
}

async fn run_timer(
    scheduler: Weak<IntervalScheduler>,
    period: Duration,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(Instant::now() + delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                scheduler.process_tick().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        ConnectionManager, Endpoint, MockChainClient, MockClientFactory, ReferendumInfo, ReferendumStatus, WatchConfig,
    };
    use crate::delivery::{AppSettings, MemorySink};
    use crate::interval::task::IntervalAction;

    const TICK: Duration = Duration::from_secs(15 * 60);

    async fn scheduler() -> (Arc<IntervalScheduler>, Arc<MemorySink>) {
        let (scheduler, _, sink) = scheduler_with_client().await;
        (scheduler, sink)
    }

    async fn scheduler_with_client() -> (Arc<IntervalScheduler>, Arc<MockChainClient>, Arc<MemorySink>) {
        let mock = Arc::new(MockChainClient::new(ChainId::Kusama));
        for id in 0..10 {
            mock.set_referendum(ReferendumInfo {
                id,
                track: 1,
                status: ReferendumStatus::Ongoing,
                ayes: 10,
                nays: 0,
                support: 10,
                electorate: 100,
                approval_threshold_perbill: 500_000_000,
                support_threshold_perbill: 10_000_000,
                decision_ends_block: None,
                current_block: 10,
            });
        }
        let factory = MockClientFactory::new().with_client(Arc::clone(&mock));
        let connections = Arc::new(ConnectionManager::new(Arc::new(factory), &WatchConfig::default()));
        connections.connect(ChainId::Kusama, Endpoint::Rpc("wss://kusama.test".to_string())).await.unwrap();

        let sink = Arc::new(MemorySink::new());
        let evaluator = Arc::new(IntervalEvaluator::new(connections, sink.clone(), Arc::new(AppSettings::default())));
        (Arc::new(IntervalScheduler::new(evaluator, TICK)), mock, sink)
    }

    fn subscription(id: u32, ticks_to_wait: u32) -> IntervalSubscription {
        IntervalSubscription::new(ChainId::Kusama, IntervalAction::ReferendumVotes, Some(id), ticks_to_wait)
    }

    #[test]
    fn test_alignment_delay() {
        let period = TICK.as_millis();
        assert_eq!(delay_until_next_tick(period * 4, period), Duration::ZERO);
        assert_eq!(delay_until_next_tick(period * 4 + 1_000, period), TICK - Duration::from_secs(1));
        assert_eq!(delay_until_next_tick(period - 1, period), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_tick_cadence() {
        let (scheduler, sink) = scheduler().await;
        scheduler.insert(subscription(1, 1));
        scheduler.insert(subscription(2, 4));
        assert!(!scheduler.insert(subscription(2, 4)));

        let mut due_per_tick = Vec::new();
        for _ in 0..8 {
            due_per_tick.push(scheduler.process_tick().await.due);
        }
        assert_eq!(due_per_tick, vec![1, 1, 1, 2, 1, 1, 1, 2]);
        assert_eq!(scheduler.get(&subscription(2, 4).key()).unwrap().tick_counter, 0);
        assert_eq!(sink.len(), 10);
    }

    #[tokio::test]
    async fn test_coalescing_through_tick() {
        let (scheduler, sink) = scheduler().await;
        for id in 1..=3 {
            scheduler.insert(subscription(id, 1).with_os_notifications(true));
        }

        let report = scheduler.process_tick().await;
        assert_eq!(report.evaluated, 3);
        assert!(report.summary_sent);
        assert_eq!(sink.shown_notifications(), 1);
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let (scheduler, _) = scheduler().await;
        let key = subscription(5, 3).key();
        scheduler.insert(subscription(5, 3));
        scheduler.process_tick().await;
        scheduler.process_tick().await;

        assert!(scheduler.update(&key, 2, true));
        let updated = scheduler.get(&key).unwrap();
        assert_eq!((updated.ticks_to_wait, updated.tick_counter), (2, 0));
        assert!(updated.enable_os_notifications);

        assert!(scheduler.remove(&key));
        assert!(!scheduler.remove(&key));
        assert!(scheduler.is_empty());
        assert!(scheduler.subscriptions(ChainId::Kusama).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_and_survives_mutation() {
        let (scheduler, _) = scheduler().await;
        scheduler.insert(subscription(1, 1));

        assert!(scheduler.start());
        assert!(!scheduler.start());
        time::sleep(TICK * 2).await;
        let ticks = scheduler.ticks_processed();
        assert!((2..=3).contains(&ticks), "unexpected tick count {ticks}");

        scheduler.insert(subscription(2, 1));
        assert!(scheduler.is_running());

        assert!(scheduler.stop());
        assert!(!scheduler.is_running());
        time::sleep(TICK * 3).await;
        assert_eq!(scheduler.ticks_processed(), ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_during_tick_keeps_due_evaluation() {
        let (scheduler, mock, sink) = scheduler_with_client().await;
        mock.set_fetch_delay(Duration::from_secs(5));
        let mut almost_due = subscription(1, 3);
        almost_due.tick_counter = 2;
        scheduler.insert(almost_due);
        assert!(scheduler.start());

        // wait until the first tick is evaluating
        for _ in 0..2_000 {
            if scheduler.ticks_processed() >= 1 {
                break;
            }
            time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(scheduler.ticks_processed(), 1);
        assert!(sink.is_empty());

        assert!(scheduler.insert(subscription(2, 3)));
        assert!(scheduler.is_running());
        time::sleep(Duration::from_secs(10)).await;

        let deliveries = sink.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].event.data["referendum"], serde_json::json!(1));
        scheduler.stop();
    }
}
