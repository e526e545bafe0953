use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use strum_macros::{Display, EnumString};

use crate::chain::{ChainId, Pallet};

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Balances,
    Chain,
    NominationPools,
    Nominating,
    OpenGov,
    Staking,
    Voting,
    Summary,
}

impl From<Pallet> for EventCategory {
    fn from(pallet: Pallet) -> Self {
        match pallet {
            Pallet::Balances => EventCategory::Balances,
            Pallet::ConvictionVoting => EventCategory::Voting,
            Pallet::NominationPools => EventCategory::NominationPools,
            Pallet::Referenda => EventCategory::OpenGov,
            Pallet::Staking => EventCategory::Staking,
        }
    }
}

/// Who an event is about.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum EventOrigin {
    Account { address: String, name: String },
    Chain,
}

impl Display for EventOrigin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EventOrigin::Account { name, .. } => write!(f, "{name}"),
            EventOrigin::Chain => write!(f, "chain"),
        }
    }
}

/// A structured domain event handed to the downstream sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Content hash; equal events produce equal uids so the sink can de-duplicate.
    pub uid: String,
    pub chain: ChainId,
    pub category: EventCategory,
    pub origin: EventOrigin,
    pub title: String,
    pub subtitle: String,
    pub data: Value,
    pub timestamp: u64,
}

impl DomainEvent {
    pub fn new(
        chain: ChainId,
        category: EventCategory,
        origin: EventOrigin,
        title: impl Into<String>,
        subtitle: impl Into<String>,
        data: Value,
    ) -> Self {
        let title = title.into();
        let subtitle = subtitle.into();
        let uid = event_uid(chain, category, &origin, &title, &data);

        Self {
            uid,
            chain,
            category,
            origin,
            title,
            subtitle,
            data,
            timestamp: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
        }
    }

    pub fn account_address(&self) -> Option<&str> {
        match &self.origin {
            EventOrigin::Account { address, .. } => Some(address),
            EventOrigin::Chain => None,
        }
    }
}

/// Hash the identifying parts of an event to a hex sha256 digest.
fn event_uid(chain: ChainId, category: EventCategory, origin: &EventOrigin, title: &str, data: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chain.to_string().as_bytes());
    hasher.update(category.to_string().as_bytes());
    match origin {
        EventOrigin::Account { address, .. } => hasher.update(address.as_bytes()),
        EventOrigin::Chain => hasher.update(b"chain"),
    }
    hasher.update(title.as_bytes());
    hasher.update(data.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub subtitle: Option<String>,
    pub body: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, subtitle: Option<String>, body: impl Into<String>) -> Self {
        Self { title: title.into(), subtitle, body: body.into() }
    }

    pub fn for_event(event: &DomainEvent) -> Self {
        let subtitle = match &event.origin {
            EventOrigin::Account { name, .. } => Some(name.clone()),
            EventOrigin::Chain => Some(event.chain.to_string()),
        };
        Self::new(event.title.clone(), subtitle, event.subtitle.clone())
    }
}

/// What the sink receives: the event and, when warranted, its notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub event: DomainEvent,
    pub notification: Option<Notification>,
    pub is_one_shot: bool,
}

impl Delivery {
    /// Build the delivery in one step so event and notification always travel together.
    pub fn new(event: DomainEvent, notify: bool, is_one_shot: bool) -> Self {
        let notification = notify.then(|| Notification::for_event(&event));
        Self { event, notification, is_one_shot }
    }
}
