use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::{Display, Formatter};
use strum_macros::{Display, EnumIter, EnumString, VariantNames};

use super::reconcile::ReconcileCategory;
use crate::chain::{ChainId, QueryCall};
use crate::errors::{WatchError, WatchResult};
use crate::utils::account_cache::{AccountCache, AccountRecord};
use crate::utils::constants::QueryPath;

/// Every continuous query task kind the engine can track.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, EnumIter, VariantNames, Serialize, Deserialize)]
pub enum TaskAction {
    #[strum(serialize = "subscribe:chain:timestamp")]
    #[serde(rename = "subscribe:chain:timestamp")]
    ChainTimestamp,
    #[strum(serialize = "subscribe:chain:currentSlot")]
    #[serde(rename = "subscribe:chain:currentSlot")]
    ChainCurrentSlot,
    #[strum(serialize = "subscribe:account:balance:free")]
    #[serde(rename = "subscribe:account:balance:free")]
    BalanceFree,
    #[strum(serialize = "subscribe:account:balance:frozen")]
    #[serde(rename = "subscribe:account:balance:frozen")]
    BalanceFrozen,
    #[strum(serialize = "subscribe:account:balance:reserved")]
    #[serde(rename = "subscribe:account:balance:reserved")]
    BalanceReserved,
    #[strum(serialize = "subscribe:account:balance:spendable")]
    #[serde(rename = "subscribe:account:balance:spendable")]
    BalanceSpendable,
    #[strum(serialize = "subscribe:account:nominationPools:rewards")]
    #[serde(rename = "subscribe:account:nominationPools:rewards")]
    NominationPoolRewards,
    #[strum(serialize = "subscribe:account:nominationPools:state")]
    #[serde(rename = "subscribe:account:nominationPools:state")]
    NominationPoolState,
    #[strum(serialize = "subscribe:account:nominationPools:renamed")]
    #[serde(rename = "subscribe:account:nominationPools:renamed")]
    NominationPoolRenamed,
    #[strum(serialize = "subscribe:account:nominationPools:roles")]
    #[serde(rename = "subscribe:account:nominationPools:roles")]
    NominationPoolRoles,
    #[strum(serialize = "subscribe:account:nominationPools:commission")]
    #[serde(rename = "subscribe:account:nominationPools:commission")]
    NominationPoolCommission,
    #[strum(serialize = "subscribe:account:nominating:pendingPayouts")]
    #[serde(rename = "subscribe:account:nominating:pendingPayouts")]
    NominatingPendingPayouts,
    #[strum(serialize = "subscribe:account:nominating:exposure")]
    #[serde(rename = "subscribe:account:nominating:exposure")]
    NominatingExposure,
    #[strum(serialize = "subscribe:account:nominating:commission")]
    #[serde(rename = "subscribe:account:nominating:commission")]
    NominatingCommission,
    #[strum(serialize = "subscribe:account:nominating:nominations")]
    #[serde(rename = "subscribe:account:nominating:nominations")]
    NominatingNominations,
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskCategory {
    Chain,
    Balances,
    NominationPools,
    Nominating,
}

/// Account state a task needs before it can be subscribed.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum Prerequisite {
    #[strum(serialize = "known account")]
    Account,
    #[strum(serialize = "nomination pool membership")]
    PoolMembership,
    #[strum(serialize = "nominator status")]
    NominatorStatus,
}

impl TaskAction {
    pub fn category(&self) -> TaskCategory {
        match self {
            TaskAction::ChainTimestamp | TaskAction::ChainCurrentSlot => TaskCategory::Chain,
            TaskAction::BalanceFree
            | TaskAction::BalanceFrozen
            | TaskAction::BalanceReserved
            | TaskAction::BalanceSpendable => TaskCategory::Balances,
            TaskAction::NominationPoolRewards
            | TaskAction::NominationPoolState
            | TaskAction::NominationPoolRenamed
            | TaskAction::NominationPoolRoles
            | TaskAction::NominationPoolCommission => TaskCategory::NominationPools,
            TaskAction::NominatingPendingPayouts
            | TaskAction::NominatingExposure
            | TaskAction::NominatingCommission
            | TaskAction::NominatingNominations => TaskCategory::Nominating,
        }
    }

    pub fn reconcile_category(&self) -> Option<ReconcileCategory> {
        match self.category() {
            TaskCategory::Chain => None,
            TaskCategory::Balances => Some(ReconcileCategory::Balance),
            TaskCategory::NominationPools => Some(ReconcileCategory::NominationPool),
            TaskCategory::Nominating => Some(ReconcileCategory::Nominating),
        }
    }

    pub fn requires_account(&self) -> bool {
        self.category() != TaskCategory::Chain
    }

    pub fn prerequisite(&self) -> Option<Prerequisite> {
        match self.category() {
            TaskCategory::Chain => None,
            TaskCategory::Balances => Some(Prerequisite::Account),
            TaskCategory::NominationPools => Some(Prerequisite::PoolMembership),
            TaskCategory::Nominating => Some(Prerequisite::NominatorStatus),
        }
    }

    /// Short human label used as event title.
    pub fn label(&self) -> &'static str {
        match self {
            TaskAction::ChainTimestamp => "Chain Timestamp",
            TaskAction::ChainCurrentSlot => "Current Slot",
            TaskAction::BalanceFree => "Free Balance",
            TaskAction::BalanceFrozen => "Frozen Balance",
            TaskAction::BalanceReserved => "Reserved Balance",
            TaskAction::BalanceSpendable => "Spendable Balance",
            TaskAction::NominationPoolRewards => "Unclaimed Pool Rewards",
            TaskAction::NominationPoolState => "Pool State Changed",
            TaskAction::NominationPoolRenamed => "Pool Renamed",
            TaskAction::NominationPoolRoles => "Pool Roles Changed",
            TaskAction::NominationPoolCommission => "Pool Commission Changed",
            TaskAction::NominatingPendingPayouts => "Pending Payouts",
            TaskAction::NominatingExposure => "Era Exposure",
            TaskAction::NominatingCommission => "Commission Check",
            TaskAction::NominatingNominations => "Nominations Changed",
        }
    }
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Default, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enable,
    #[default]
    Disable,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskAccount {
    pub address: String,
    pub name: String,
}

/// A user-configured request to watch one chain query or account condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionTask {
    pub chain: ChainId,
    pub action: TaskAction,
    #[serde(default)]
    pub account: Option<TaskAccount>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub enable_os_notifications: bool,
    /// Extra query arguments appended after the ones derived from the account.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Identity of a task inside the engine: one entry per (chain, action[, account]).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub chain: ChainId,
    pub action: TaskAction,
    pub account: Option<String>,
}

impl Display for TaskKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.account {
            Some(address) => write!(f, "{}@{}[{}]", self.action, self.chain, address),
            None => write!(f, "{}@{}", self.action, self.chain),
        }
    }
}

impl SubscriptionTask {
    pub fn chain_task(chain: ChainId, action: TaskAction) -> Self {
        Self {
            chain,
            action,
            account: None,
            status: TaskStatus::Enable,
            enable_os_notifications: false,
            args: Vec::new(),
        }
    }

    pub fn account_task(chain: ChainId, action: TaskAction, address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            account: Some(TaskAccount { address: address.into(), name: name.into() }),
            ..Self::chain_task(chain, action)
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_os_notifications(mut self, enabled: bool) -> Self {
        self.enable_os_notifications = enabled;
        self
    }

    pub fn key(&self) -> TaskKey {
        TaskKey {
            chain: self.chain,
            action: self.action,
            account: self.account.as_ref().map(|account| account.address.clone()),
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.account.as_ref().map(|account| account.address.as_str())
    }

    pub fn is_enabled(&self) -> bool {
        self.status == TaskStatus::Enable
    }

    /// The account record this task needs, validated against its prerequisite.
    pub fn check_prerequisites(&self, accounts: &AccountCache) -> WatchResult<Option<AccountRecord>> {
        let Some(prerequisite) = self.action.prerequisite() else {
            return Ok(None);
        };
        let missing = |prerequisite: Prerequisite| WatchError::PrerequisiteMissing {
            task: self.key().to_string(),
            prerequisite: prerequisite.to_string(),
        };

        let address = self.address().ok_or_else(|| missing(Prerequisite::Account))?;
        let record = accounts.get(self.chain, address).ok_or_else(|| missing(Prerequisite::Account))?;
        match prerequisite {
            Prerequisite::PoolMembership if record.nomination_pool.is_none() => Err(missing(prerequisite)),
            Prerequisite::NominatorStatus if record.nominating.is_none() => Err(missing(prerequisite)),
            _ => Ok(Some(record)),
        }
    }

    /// Resolve the underlying query descriptor this task reads from.
    pub fn resolve_query(&self, accounts: &AccountCache) -> WatchResult<QueryCall> {
        let record = self.check_prerequisites(accounts)?;
        let address = || json!(self.address().unwrap_or_default());
        let pool_id = || json!(record.as_ref().and_then(|r| r.nomination_pool.as_ref()).map(|p| p.pool_id));

        let (path, mut args) = match self.action {
            TaskAction::ChainTimestamp => (QueryPath::TIMESTAMP_NOW, vec![]),
            TaskAction::ChainCurrentSlot => (QueryPath::BABE_CURRENT_SLOT, vec![]),
            TaskAction::BalanceFree
            | TaskAction::BalanceFrozen
            | TaskAction::BalanceReserved
            | TaskAction::BalanceSpendable => (QueryPath::SYSTEM_ACCOUNT, vec![address()]),
            TaskAction::NominationPoolRewards => (QueryPath::POOL_PENDING_REWARDS, vec![address()]),
            TaskAction::NominationPoolState
            | TaskAction::NominationPoolRoles
            | TaskAction::NominationPoolCommission => (QueryPath::POOL_BONDED_POOLS, vec![pool_id()]),
            TaskAction::NominationPoolRenamed => (QueryPath::POOL_METADATA, vec![pool_id()]),
            TaskAction::NominatingPendingPayouts
            | TaskAction::NominatingExposure
            | TaskAction::NominatingCommission => (QueryPath::STAKING_ACTIVE_ERA, vec![]),
            TaskAction::NominatingNominations => (QueryPath::STAKING_NOMINATORS, vec![address()]),
        };
        args.extend(self.args.iter().cloned());
        Ok(QueryCall::new(path, args))
    }
}
