use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use strum_macros::{Display, EnumIter, EnumString};

use crate::chain::ChainId;
use crate::subscriptions::TaskStatus;

/// Periodic checks re-evaluated on the global tick.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, EnumIter, Serialize, Deserialize)]
pub enum IntervalAction {
    #[strum(serialize = "subscribe:interval:openGov:referendumVotes")]
    #[serde(rename = "subscribe:interval:openGov:referendumVotes")]
    ReferendumVotes,
    #[strum(serialize = "subscribe:interval:openGov:decisionPeriod")]
    #[serde(rename = "subscribe:interval:openGov:decisionPeriod")]
    ReferendumDecisionPeriod,
    #[strum(serialize = "subscribe:interval:openGov:thresholds")]
    #[serde(rename = "subscribe:interval:openGov:thresholds")]
    ReferendumThresholds,
}

impl IntervalAction {
    pub fn label(&self) -> &'static str {
        match self {
            IntervalAction::ReferendumVotes => "Referendum Votes",
            IntervalAction::ReferendumDecisionPeriod => "Decision Period",
            IntervalAction::ReferendumThresholds => "Referendum Thresholds",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalKey {
    pub chain: ChainId,
    pub action: IntervalAction,
    pub referendum_id: Option<u32>,
}

impl Display for IntervalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.referendum_id {
            Some(id) => write!(f, "{}@{}[#{}]", self.action, self.chain, id),
            None => write!(f, "{}@{}", self.action, self.chain),
        }
    }
}

fn one_tick() -> u32 {
    1
}

/// A periodic task with its own cadence, counted in global ticks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSubscription {
    pub chain: ChainId,
    pub action: IntervalAction,
    #[serde(default)]
    pub referendum_id: Option<u32>,
    #[serde(default = "one_tick")]
    pub ticks_to_wait: u32,
    #[serde(default)]
    pub tick_counter: u32,
    #[serde(default)]
    pub enable_os_notifications: bool,
    #[serde(default)]
    pub status: TaskStatus,
}

impl IntervalSubscription {
    pub fn new(chain: ChainId, action: IntervalAction, referendum_id: Option<u32>, ticks_to_wait: u32) -> Self {
        Self {
            chain,
            action,
            referendum_id,
            ticks_to_wait: ticks_to_wait.max(1),
            tick_counter: 0,
            enable_os_notifications: false,
            status: TaskStatus::Enable,
        }
    }

    pub fn with_os_notifications(mut self, enabled: bool) -> Self {
        self.enable_os_notifications = enabled;
        self
    }

    pub fn key(&self) -> IntervalKey {
        IntervalKey { chain: self.chain, action: self.action, referendum_id: self.referendum_id }
    }

    pub fn is_enabled(&self) -> bool {
        self.status == TaskStatus::Enable
    }

    /// Count one tick. Returns true when the task is due on this tick.
    pub fn advance(&mut self) -> bool {
        let ticks_to_wait = self.ticks_to_wait.max(1);
        let next = self.tick_counter.saturating_add(1);
        self.tick_counter = next % ticks_to_wait;
        next >= ticks_to_wait
    }

    /// Change the cadence, keeping the counter inside the new range.
    pub fn set_cadence(&mut self, ticks_to_wait: u32) {
        self.ticks_to_wait = ticks_to_wait.max(1);
        self.tick_counter %= self.ticks_to_wait;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_of_four() {
        let mut task = IntervalSubscription::new(ChainId::Polkadot, IntervalAction::ReferendumVotes, Some(1), 4);
        let fired: Vec<bool> = (0..8).map(|_| task.advance()).collect();
        assert_eq!(fired, vec![false, false, false, true, false, false, false, true]);
        assert_eq!(task.tick_counter, 0);
    }

    #[test]
    fn test_cadence_of_one_and_zero_is_clamped() {
        let mut task = IntervalSubscription::new(ChainId::Kusama, IntervalAction::ReferendumThresholds, Some(1), 0);
        assert_eq!(task.ticks_to_wait, 1);
        assert!((0..3).all(|_| task.advance()));
        assert_eq!(task.tick_counter, 0);
    }

    #[test]
    fn test_counter_at_limit_fires_and_wraps() {
        let mut task = IntervalSubscription::new(ChainId::Kusama, IntervalAction::ReferendumVotes, Some(1), u32::MAX);
        task.tick_counter = u32::MAX - 1;
        assert!(task.advance());
        assert_eq!(task.tick_counter, 0);

        // a stored counter outside the cadence
        let mut task = IntervalSubscription::new(ChainId::Kusama, IntervalAction::ReferendumVotes, Some(1), 5);
        task.tick_counter = u32::MAX;
        assert!(task.advance());
        assert_eq!(task.tick_counter, 0);
        assert!(!task.advance());
    }

    #[test]
    fn test_set_cadence_wraps_counter() {
        let mut task = IntervalSubscription::new(ChainId::Kusama, IntervalAction::ReferendumVotes, Some(1), 8);
        (0..5).for_each(|_| {
            task.advance();
        });
        assert_eq!(task.tick_counter, 5);
        task.set_cadence(2);
        assert_eq!(task.tick_counter, 1);
        assert!(task.advance());
    }

    #[test]
    fn test_deserialize_defaults() {
        let task: IntervalSubscription = toml::from_str(
            r#"
            chain = "Polkadot Relay"
            action = "subscribe:interval:openGov:decisionPeriod"
            referendum_id = 512
            "#,
        )
        .unwrap();
        assert_eq!(task.ticks_to_wait, 1);
        assert!(!task.is_enabled());
        assert_eq!(task.key().to_string(), "subscribe:interval:openGov:decisionPeriod@Polkadot Relay[#512]");
    }
}
