use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use super::queue::{QueueItem, QueueItemHandler};
use crate::chain::types::{parse_u64, parse_u128};
use crate::chain::{ChainId, Pallet};
use crate::delivery::{Delivery, DomainEvent, DownstreamSink, EventCategory, EventOrigin, SettingsProvider, should_notify};
use crate::errors::{WatchError, WatchResult};
use crate::utils::account_cache::AccountCache;

/// Turns drained native events into deliveries, one pallet at a time.
pub struct PalletEventHandler {
    sink: Arc<dyn DownstreamSink>,
    settings: Arc<dyn SettingsProvider>,
    accounts: Arc<AccountCache>,
}

impl PalletEventHandler {
    pub fn new(sink: Arc<dyn DownstreamSink>, settings: Arc<dyn SettingsProvider>, accounts: Arc<AccountCache>) -> Self {
        Self { sink, settings, accounts }
    }

    /// Build the event and its optional notification together.
    pub fn build_delivery(&self, item: &QueueItem) -> WatchResult<Delivery> {
        let (title, subtitle) = describe(item)?;
        let origin = match &item.account {
            Some(address) => EventOrigin::Account {
                address: address.clone(),
                name: self.accounts.account_name(item.chain, address).unwrap_or_else(|| address.clone()),
            },
            None => EventOrigin::Chain,
        };
        let data = json!({
            "pallet": item.event.pallet,
            "method": item.event.method,
            "data": item.event.data,
        });

        let event = DomainEvent::new(item.chain, EventCategory::from(item.pallet), origin, title, subtitle, data);
        let notify = should_notify(false, self.settings.as_ref(), item.notify);
        Ok(Delivery::new(event, notify, false))
    }
}

impl QueueItemHandler for PalletEventHandler {
    fn handle(&self, item: &QueueItem) -> WatchResult<()> {
        let delivery = self.build_delivery(item)?;
        debug!("{}: {} for {}", item.chain, delivery.event.title, delivery.event.origin);
        self.sink.deliver(delivery);
        Ok(())
    }
}

/// Read a named field, falling back to a position for tuple-style payloads.
fn field<'a>(data: &'a Value, name: &str, position: usize) -> Option<&'a Value> {
    match data {
        Value::Object(fields) => fields.get(name),
        Value::Array(items) => items.get(position),
        _ => None,
    }
}

struct Fields<'a> {
    item: &'a QueueItem,
}

impl<'a> Fields<'a> {
    fn raw(&self, name: &str, position: usize) -> WatchResult<&'a Value> {
        field(&self.item.event.data, name, position).ok_or_else(|| self.missing(name))
    }

    fn amount(&self, name: &str, position: usize) -> WatchResult<String> {
        let chain: ChainId = self.item.chain;
        let planck = parse_u128(self.raw(name, position)?).ok_or_else(|| self.missing(name))?;
        Ok(format!("{} {}", chain.format_units(planck), chain.token()))
    }

    fn number(&self, name: &str, position: usize) -> WatchResult<u64> {
        parse_u64(self.raw(name, position)?).ok_or_else(|| self.missing(name))
    }

    fn text(&self, name: &str, position: usize) -> WatchResult<String> {
        match self.raw(name, position)? {
            Value::String(text) => Ok(text.clone()),
            other => Ok(other.to_string()),
        }
    }

    fn missing(&self, name: &str) -> WatchError {
        WatchError::malformed(format!("{}.{}", self.item.event.pallet, self.item.event.method), format!("missing {name}"))
    }
}

fn describe(item: &QueueItem) -> WatchResult<(String, String)> {
    let f = Fields { item };
    let method = item.event.method.as_str();

    let described = match (item.pallet, method) {
        (Pallet::Balances, "Transfer") => (
            "Transfer".to_string(),
            format!("{} from {} to {}", f.amount("amount", 2)?, f.text("from", 0)?, f.text("to", 1)?),
        ),
        (Pallet::Balances, "Deposit") => ("Deposit".to_string(), format!("{} received", f.amount("amount", 1)?)),
        (Pallet::Balances, "Withdraw") => ("Withdrawal".to_string(), format!("{} withdrawn", f.amount("amount", 1)?)),
        (Pallet::Balances, "Reserved") => ("Funds Reserved".to_string(), f.amount("amount", 1)?),
        (Pallet::Balances, "Unreserved") => ("Funds Unreserved".to_string(), f.amount("amount", 1)?),
        (Pallet::Balances, "Slashed") => ("Balance Slashed".to_string(), f.amount("amount", 1)?),

        (Pallet::NominationPools, "PaidOut") => (
            "Pool Rewards Paid".to_string(),
            format!("{} from pool #{}", f.amount("payout", 2)?, f.number("poolId", 1)?),
        ),
        (Pallet::NominationPools, "Bonded") => (
            "Pool Bonded".to_string(),
            format!("{} bonded to pool #{}", f.amount("bonded", 2)?, f.number("poolId", 1)?),
        ),
        (Pallet::NominationPools, "Unbonded") => (
            "Pool Unbonded".to_string(),
            format!("{} unbonding from pool #{}", f.amount("balance", 2)?, f.number("poolId", 1)?),
        ),
        (Pallet::NominationPools, "Withdrawn") => (
            "Pool Withdrawal".to_string(),
            format!("{} withdrawn from pool #{}", f.amount("balance", 2)?, f.number("poolId", 1)?),
        ),
        (Pallet::NominationPools, "StateChanged") => (
            "Pool State Changed".to_string(),
            format!("Pool #{} is now {}", f.number("poolId", 0)?, f.text("newState", 1)?),
        ),

        (Pallet::Staking, "Rewarded") => ("Staking Reward".to_string(), format!("{} rewarded", f.amount("amount", 1)?)),
        (Pallet::Staking, "Slashed") => ("Stake Slashed".to_string(), format!("{} slashed", f.amount("amount", 1)?)),
        (Pallet::Staking, "Bonded") => ("Stake Bonded".to_string(), f.amount("amount", 1)?),
        (Pallet::Staking, "Unbonded") => ("Stake Unbonded".to_string(), f.amount("amount", 1)?),
        (Pallet::Staking, "Withdrawn") => ("Stake Withdrawn".to_string(), f.amount("amount", 1)?),
        (Pallet::Staking, "Kicked") => ("Nomination Kicked".to_string(), format!("Removed by {}", f.text("stash", 1)?)),
        (Pallet::Staking, "Chilled") => ("Stash Chilled".to_string(), f.text("stash", 0)?),
        (Pallet::Staking, "EraPaid") => ("Era Paid".to_string(), format!("Era {} paid out", f.number("eraIndex", 0)?)),

        (Pallet::Referenda, "Submitted") => (
            "Referendum Submitted".to_string(),
            format!("Referendum #{} on track {}", f.number("index", 0)?, f.number("track", 1)?),
        ),
        (Pallet::Referenda, "DecisionStarted") => (
            "Decision Started".to_string(),
            format!("Referendum #{} entered its decision period", f.number("index", 0)?),
        ),
        (Pallet::Referenda, "ConfirmStarted") => (
            "Confirmation Started".to_string(),
            format!("Referendum #{} is confirming", f.number("index", 0)?),
        ),
        (Pallet::Referenda, outcome @ ("Confirmed" | "Approved" | "Rejected" | "Cancelled" | "TimedOut" | "Killed")) => (
            format!("Referendum {}", outcome),
            format!("Referendum #{} {}", f.number("index", 0)?, outcome.to_lowercase()),
        ),

        (Pallet::ConvictionVoting, "Voted") => ("Vote Cast".to_string(), format!("Vote by {}", f.text("who", 0)?)),
        (Pallet::ConvictionVoting, "Delegated") => (
            "Votes Delegated".to_string(),
            format!("{} delegated to {}", f.text("who", 0)?, f.text("target", 1)?),
        ),
        (Pallet::ConvictionVoting, "Undelegated") => {
            ("Votes Undelegated".to_string(), format!("{} undelegated", f.text("who", 0)?))
        }

        (pallet, method) => (format!("{} {}", pallet, method), String::new()),
    };
    Ok(described)
}
