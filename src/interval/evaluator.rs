use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::task::{IntervalAction, IntervalSubscription};
use crate::chain::types::format_perbill;
use crate::chain::{ChainId, ConnectionManager, ReferendumInfo, ReferendumStatus};
use crate::delivery::{
    Delivery, DomainEvent, DownstreamSink, EventCategory, EventOrigin, Notification, SettingsProvider, should_notify,
};
use crate::errors::{WatchError, WatchResult};
use crate::utils::constants::{BLOCK_TIME, SUMMARY_NOTIFICATION_TITLE};

/// Outcome of one batch of due interval tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub evaluated: usize,
    pub failed: usize,
    /// Task-specific notifications attached to deliveries.
    pub notified: usize,
    pub summary_sent: bool,
}

/// Evaluates interval tasks against fresh referendum data.
pub struct IntervalEvaluator {
    connections: Arc<ConnectionManager>,
    sink: Arc<dyn DownstreamSink>,
    settings: Arc<dyn SettingsProvider>,
}

impl IntervalEvaluator {
    pub fn new(
        connections: Arc<ConnectionManager>,
        sink: Arc<dyn DownstreamSink>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self { connections, sink, settings }
    }

    /// Evaluate a batch of due tasks with notification coalescing.
    ///
    /// A single notify-enabled task shows its own notification. Several
    /// notify-enabled tasks show none of their own and one summary instead.
    /// Silent tasks never notify. One task failing does not affect the rest.
    pub async fn process_due(&self, due: Vec<IntervalSubscription>) -> TickReport {
        let mut report = TickReport { due: due.len(), ..Default::default() };
        if due.is_empty() {
            return report;
        }

        let wants_notification =
            |task: &IntervalSubscription| should_notify(false, self.settings.as_ref(), task.enable_os_notifications);
        let loud = due.iter().filter(|task| wants_notification(task)).count();
        let individual = loud == 1;

        let evaluations = due.iter().map(|task| {
            let notify = individual && wants_notification(task);
            async move { (task, self.evaluate(task, notify, false).await) }
        });
        let mut loud_evaluated = 0;
        for (task, result) in join_all(evaluations).await {
            match result {
                Ok(delivery) => {
                    report.evaluated += 1;
                    if wants_notification(task) {
                        loud_evaluated += 1;
                    }
                    if delivery.notification.is_some() {
                        report.notified += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Interval task {} failed: {}", task.key(), e);
                }
            }
        }

        // failed tasks are not counted in the summary
        if !individual && loud_evaluated > 0 {
            self.sink.notify(Notification::new(
                SUMMARY_NOTIFICATION_TITLE,
                None,
                format!("Processed {} new events", loud_evaluated),
            ));
            report.summary_sent = true;
        }

        info!(
            "Interval batch: {} due, {} evaluated, {} failed, {} notified{}",
            report.due,
            report.evaluated,
            report.failed,
            report.notified,
            if report.summary_sent { ", summary sent" } else { "" }
        );
        report
    }

    /// Manual refresh: evaluate now and always notify.
    pub async fn execute_one_shot(&self, task: &IntervalSubscription) -> WatchResult<Delivery> {
        self.evaluate(task, true, true).await
    }

    async fn evaluate(&self, task: &IntervalSubscription, notify: bool, is_one_shot: bool) -> WatchResult<Delivery> {
        let key = task.key();
        let referendum_id = task.referendum_id.ok_or_else(|| WatchError::PrerequisiteMissing {
            task: key.to_string(),
            prerequisite: "referendum id".to_string(),
        })?;
        let client = self.connections.client(task.chain).ok_or_else(|| WatchError::offline(task.chain))?;
        let info = client
            .fetch_referendum(referendum_id)
            .await?
            .ok_or_else(|| WatchError::malformed(key.to_string(), format!("referendum {referendum_id} not found")))?;

        let event = describe(task.chain, task.action, &info);
        debug!("{}: {}", key, event.subtitle);
        let delivery = Delivery::new(event, notify, is_one_shot);
        self.sink.deliver(delivery.clone());
        Ok(delivery)
    }
}

fn describe(chain: ChainId, action: IntervalAction, info: &ReferendumInfo) -> DomainEvent {
    let id = info.id;
    let (subtitle, data) = match action {
        IntervalAction::ReferendumVotes => (
            format!(
                "Referendum #{}: {} aye ({} / {} {})",
                id,
                format_perbill(info.approval_perbill()),
                chain.format_units(info.ayes),
                chain.format_units(info.nays),
                chain.token()
            ),
            json!({
                "referendum": id,
                "ayes": info.ayes.to_string(),
                "nays": info.nays.to_string(),
                "approval_perbill": info.approval_perbill(),
            }),
        ),
        IntervalAction::ReferendumDecisionPeriod => {
            let remaining = match (info.status, info.decision_ends_block) {
                (ReferendumStatus::Ongoing, Some(end)) => Some(end.saturating_sub(info.current_block)),
                _ => None,
            };
            let subtitle = match remaining {
                Some(blocks) => format!("Referendum #{}: decision period ends in {}", id, format_eta(blocks)),
                None if info.status == ReferendumStatus::Ongoing => {
                    format!("Referendum #{} is not in its decision period", id)
                }
                None => format!("Referendum #{} is {}", id, info.status),
            };
            (subtitle, json!({ "referendum": id, "status": info.status, "remaining_blocks": remaining }))
        }
        IntervalAction::ReferendumThresholds => {
            let approval = info.approval_perbill();
            let support = info.support_perbill();
            let passing = approval >= info.approval_threshold_perbill && support >= info.support_threshold_perbill;
            (
                format!(
                    "Referendum #{}: approval {} of {}, support {} of {}{}",
                    id,
                    format_perbill(approval),
                    format_perbill(info.approval_threshold_perbill),
                    format_perbill(support),
                    format_perbill(info.support_threshold_perbill),
                    if passing { ", passing" } else { "" }
                ),
                json!({
                    "referendum": id,
                    "approval_perbill": approval,
                    "support_perbill": support,
                    "passing": passing,
                }),
            )
        }
    };

    let mut data = data;
    data["action"] = json!(action.to_string());
    DomainEvent::new(chain, EventCategory::OpenGov, EventOrigin::Chain, action.label(), subtitle, data)
}

fn format_eta(blocks: u64) -> String {
    let eta = Duration::from_secs(blocks.saturating_mul(BLOCK_TIME.as_secs()));
    let hours = eta.as_secs() / 3600;
    let minutes = (eta.as_secs() % 3600) / 60;
    match hours {
        0 => format!("{}m", minutes),
        h if h >= 24 => format!("{}d {}h", h / 24, h % 24),
        h => format!("{}h {}m", h, minutes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Endpoint, MockChainClient, MockClientFactory, WatchConfig};
    use crate::delivery::{AppSettings, MemorySink};

    fn referendum(id: u32) -> ReferendumInfo {
        ReferendumInfo {
            id,
            track: 0,
            status: ReferendumStatus::Ongoing,
            ayes: 750,
            nays: 250,
            support: 100,
            electorate: 1_000,
            approval_threshold_perbill: 500_000_000,
            support_threshold_perbill: 50_000_000,
            decision_ends_block: Some(1_600),
            current_block: 1_000,
        }
    }

    async fn evaluator(silenced: bool) -> (IntervalEvaluator, Arc<MockChainClient>, Arc<MemorySink>) {
        let mock = Arc::new(MockChainClient::new(ChainId::Polkadot));
        for id in 1..=3 {
            mock.set_referendum(referendum(id));
        }
        let factory = MockClientFactory::new().with_client(Arc::clone(&mock));
        let connections = Arc::new(ConnectionManager::new(Arc::new(factory), &WatchConfig::default()));
        connections.connect(ChainId::Polkadot, Endpoint::LightClient).await.unwrap();
        let sink = Arc::new(MemorySink::new());
        let evaluator = IntervalEvaluator::new(connections, sink.clone(), Arc::new(AppSettings::new(silenced)));
        (evaluator, mock, sink)
    }

    fn task(id: u32, notify: bool) -> IntervalSubscription {
        IntervalSubscription::new(ChainId::Polkadot, IntervalAction::ReferendumVotes, Some(id), 1)
            .with_os_notifications(notify)
    }

    #[tokio::test]
    async fn test_three_loud_tasks_coalesce_into_one_summary() {
        let (evaluator, _, sink) = evaluator(false).await;
        let report = evaluator.process_due(vec![task(1, true), task(2, true), task(3, true)]).await;

        assert_eq!(report.evaluated, 3);
        assert!(report.summary_sent);
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.shown_notifications(), 1);
        assert_eq!(sink.notifications()[0].body, "Processed 3 new events");
    }

    #[tokio::test]
    async fn test_single_loud_task_notifies_itself() {
        let (evaluator, _, sink) = evaluator(false).await;
        let report = evaluator.process_due(vec![task(1, true), task(2, false)]).await;

        assert_eq!(report.notified, 1);
        assert!(!report.summary_sent);
        assert_eq!(sink.shown_notifications(), 1);
        assert!(sink.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_silent_tasks_emit_without_notifications() {
        let (evaluator, _, sink) = evaluator(false).await;
        let report = evaluator.process_due(vec![task(1, false), task(2, false)]).await;

        assert_eq!(report.evaluated, 2);
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.shown_notifications(), 0);
    }

    #[tokio::test]
    async fn test_global_silence_suppresses_summary() {
        let (evaluator, _, sink) = evaluator(true).await;
        let report = evaluator.process_due(vec![task(1, true), task(2, true)]).await;
        assert!(!report.summary_sent);
        assert_eq!(sink.shown_notifications(), 0);
    }

    #[tokio::test]
    async fn test_failing_task_does_not_block_siblings() {
        let (evaluator, mock, sink) = evaluator(false).await;
        mock.remove_referendum(2);
        let no_id = IntervalSubscription::new(ChainId::Polkadot, IntervalAction::ReferendumThresholds, None, 1);

        let report = evaluator.process_due(vec![task(1, false), task(2, false), no_id]).await;
        assert_eq!(report, TickReport { due: 3, evaluated: 1, failed: 2, notified: 0, summary_sent: false });
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_counts_only_evaluated_tasks() {
        let (evaluator, mock, sink) = evaluator(false).await;
        mock.remove_referendum(3);

        let report = evaluator.process_due(vec![task(1, true), task(2, true), task(3, true)]).await;
        assert_eq!(report.failed, 1);
        assert!(report.summary_sent);
        assert_eq!(sink.shown_notifications(), 1);
        assert_eq!(sink.notifications()[0].body, "Processed 2 new events");

        // every loud task failed: nothing to summarize
        mock.remove_referendum(1);
        mock.remove_referendum(2);
        let report = evaluator.process_due(vec![task(1, true), task(2, true)]).await;
        assert!(!report.summary_sent);
        assert_eq!(sink.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_one_shot_forces_notification() {
        let (evaluator, _, sink) = evaluator(true).await;
        let decision = IntervalSubscription::new(ChainId::Polkadot, IntervalAction::ReferendumDecisionPeriod, Some(1), 4);

        let delivery = evaluator.execute_one_shot(&decision).await.unwrap();
        assert!(delivery.is_one_shot);
        assert!(delivery.notification.is_some());
        assert_eq!(delivery.event.subtitle, "Referendum #1: decision period ends in 1h 0m");
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_descriptions() {
        let info = referendum(7);
        let votes = describe(ChainId::Polkadot, IntervalAction::ReferendumVotes, &info);
        assert_eq!(votes.subtitle, "Referendum #7: 75.0% aye (0.000000075 / 0.000000025 DOT)");

        let thresholds = describe(ChainId::Polkadot, IntervalAction::ReferendumThresholds, &info);
        assert_eq!(thresholds.subtitle, "Referendum #7: approval 75.0% of 50.0%, support 10.0% of 5.0%, passing");
        assert_eq!(thresholds.data["passing"], json!(true));

        let closed = ReferendumInfo { status: ReferendumStatus::Approved, ..info };
        let decision = describe(ChainId::Polkadot, IntervalAction::ReferendumDecisionPeriod, &closed);
        assert_eq!(decision.subtitle, "Referendum #7 is Approved");
        assert_eq!(format_eta(20_000), "1d 9h");
    }
}
