//! Callback contract.
//!
//! A callback turns one raw query result into "nothing changed" or exactly one
//! domain event (with its optional notification) plus any reconciliation
//! flags. The comparison logic is shared between continuous and one-shot
//! evaluation; only the force flag differs.

use serde_json::{Value, json};

use super::query_multi::ApiCallEntry;
use super::reconcile::ReconcileFlags;
use super::task::{SubscriptionTask, TaskAction};
use crate::chain::types::{format_perbill, parse_u64, parse_u128};
use crate::chain::{AccountBalance, ChainId, PoolCommission, PoolRoles};
use crate::delivery::{Delivery, DomainEvent, EventCategory, EventOrigin, SettingsProvider, should_notify};
use crate::errors::{WatchError, WatchResult};
use crate::utils::account_cache::{AccountCache, AccountRecord};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvalMode {
    /// Pushed by a live subscription: emit only on change.
    Continuous,
    /// Manual refresh or import: always emit.
    OneShot,
}

impl EvalMode {
    pub fn is_one_shot(&self) -> bool {
        matches!(self, EvalMode::OneShot)
    }
}

pub struct CallbackContext<'a> {
    pub accounts: &'a AccountCache,
    pub settings: &'a dyn SettingsProvider,
}

#[derive(Debug, Default)]
pub struct CallbackOutcome {
    pub delivery: Option<Delivery>,
    pub reconcile: ReconcileFlags,
}

impl CallbackOutcome {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> bool {
        self.delivery.is_some()
    }
}

/// Run the callback for one entry against the latest raw value.
///
/// The first continuous evaluation after a build only captures the baseline.
/// A malformed value leaves the entry untouched.
pub fn evaluate(
    ctx: &CallbackContext<'_>,
    entry: &mut ApiCallEntry,
    raw: &Value,
    mode: EvalMode,
) -> WatchResult<CallbackOutcome> {
    let task = &entry.task;
    let observed = project(task.action, task.chain, raw)?;

    if entry.just_built && mode == EvalMode::Continuous {
        entry.just_built = false;
        entry.cached = Some(observed);
        return Ok(CallbackOutcome::unchanged());
    }

    let changed = entry.cached.as_ref() != Some(&observed);
    if !changed && !mode.is_one_shot() {
        return Ok(CallbackOutcome::unchanged());
    }

    let previous = entry.cached.replace(observed.clone());
    let task = &entry.task;

    if let Some(address) = task.address() {
        apply_to_record(ctx.accounts, task.chain, address, task.action, &observed);
    }
    let record = task.address().and_then(|address| ctx.accounts.get(task.chain, address));

    let event = describe(task, previous.as_ref(), &observed, record.as_ref());
    let notify = should_notify(mode.is_one_shot(), ctx.settings, task.enable_os_notifications);
    let delivery = Delivery::new(event, notify, mode.is_one_shot());

    let mut reconcile = ReconcileFlags::none();
    if changed {
        if let (Some(category), Some(address)) = (task.action.reconcile_category(), task.address()) {
            reconcile.set(category, address);
        }
    }

    Ok(CallbackOutcome { delivery: Some(delivery), reconcile })
}

/// Reduce a raw query result to the value this action compares on.
pub fn project(action: TaskAction, chain: ChainId, raw: &Value) -> WatchResult<Value> {
    let context = || format!("{} on {}", action, chain);
    let malformed = |reason: &str| WatchError::malformed(context(), reason);

    let projection = match action {
        TaskAction::ChainTimestamp | TaskAction::ChainCurrentSlot => {
            json!(parse_u64(raw).ok_or_else(|| malformed("expected an unsigned integer"))?)
        }
        TaskAction::BalanceFree
        | TaskAction::BalanceFrozen
        | TaskAction::BalanceReserved
        | TaskAction::BalanceSpendable => {
            let balance = parse_account_balance(raw).ok_or_else(|| malformed("expected account info"))?;
            balance_projection(action, chain, &balance)
        }
        TaskAction::NominationPoolRewards => {
            json!(parse_u128(raw).ok_or_else(|| malformed("expected a balance"))?.to_string())
        }
        TaskAction::NominationPoolState => {
            let state = raw.get("state").and_then(Value::as_str).ok_or_else(|| malformed("missing pool state"))?;
            json!(state)
        }
        TaskAction::NominationPoolRoles => {
            let roles = raw.get("roles").cloned().ok_or_else(|| malformed("missing pool roles"))?;
            let roles: PoolRoles = serde_json::from_value(roles).map_err(|e| malformed(&e.to_string()))?;
            serde_json::to_value(roles)?
        }
        TaskAction::NominationPoolCommission => {
            let current = raw.pointer("/commission/current").ok_or_else(|| malformed("missing pool commission"))?;
            serde_json::to_value(parse_commission(current).map_err(|reason| malformed(&reason))?)?
        }
        TaskAction::NominationPoolRenamed => {
            let name = raw.as_str().ok_or_else(|| malformed("expected pool metadata"))?;
            json!(decode_metadata(name))
        }
        TaskAction::NominatingPendingPayouts | TaskAction::NominatingExposure | TaskAction::NominatingCommission => {
            let era = raw.get("index").map_or_else(|| parse_u64(raw), parse_u64);
            json!(era.ok_or_else(|| malformed("expected active era"))?)
        }
        TaskAction::NominatingNominations => {
            if raw.is_null() {
                json!(Vec::<String>::new())
            } else {
                let targets = raw
                    .get("targets")
                    .and_then(Value::as_array)
                    .ok_or_else(|| malformed("missing nomination targets"))?;
                let mut targets: Vec<String> =
                    targets.iter().filter_map(Value::as_str).map(str::to_string).collect();
                targets.sort();
                json!(targets)
            }
        }
    };
    Ok(projection)
}

/// The projection an action would have given the account's stored snapshot.
pub fn project_record(action: TaskAction, chain: ChainId, record: &AccountRecord) -> Option<Value> {
    match action {
        TaskAction::ChainTimestamp | TaskAction::ChainCurrentSlot => None,
        TaskAction::BalanceFree
        | TaskAction::BalanceFrozen
        | TaskAction::BalanceReserved
        | TaskAction::BalanceSpendable => record.balance.as_ref().map(|balance| balance_projection(action, chain, balance)),
        TaskAction::NominationPoolRewards => record.nomination_pool.as_ref().map(|p| json!(p.pending_rewards.to_string())),
        TaskAction::NominationPoolState => record.nomination_pool.as_ref().map(|p| json!(p.state)),
        TaskAction::NominationPoolRenamed => record.nomination_pool.as_ref().map(|p| json!(p.name)),
        TaskAction::NominationPoolRoles => {
            record.nomination_pool.as_ref().and_then(|p| serde_json::to_value(&p.roles).ok())
        }
        TaskAction::NominationPoolCommission => {
            record.nomination_pool.as_ref().and_then(|p| serde_json::to_value(&p.commission).ok())
        }
        TaskAction::NominatingPendingPayouts | TaskAction::NominatingExposure | TaskAction::NominatingCommission => {
            record.nominating.as_ref().map(|n| json!(n.era))
        }
        TaskAction::NominatingNominations => record.nominating.as_ref().map(|n| {
            let mut targets = n.targets.clone();
            targets.sort();
            json!(targets)
        }),
    }
}

fn balance_projection(action: TaskAction, chain: ChainId, balance: &AccountBalance) -> Value {
    let amount = match action {
        TaskAction::BalanceFrozen => balance.frozen,
        TaskAction::BalanceReserved => balance.reserved,
        TaskAction::BalanceSpendable => balance.spendable(chain.existential_deposit()),
        _ => balance.free,
    };
    json!(amount.to_string())
}

fn parse_account_balance(raw: &Value) -> Option<AccountBalance> {
    let data = raw.get("data")?;
    let frozen = data.get("frozen").or_else(|| data.get("miscFrozen"))?;
    Some(AccountBalance {
        free: parse_u128(data.get("free")?)?,
        reserved: parse_u128(data.get("reserved")?)?,
        frozen: parse_u128(frozen)?,
    })
}

fn parse_commission(current: &Value) -> Result<Option<PoolCommission>, String> {
    match current {
        Value::Null => Ok(None),
        Value::Array(pair) if pair.len() == 2 => {
            let perbill = parse_u64(&pair[0]).and_then(|p| u32::try_from(p).ok()).ok_or("invalid commission rate")?;
            let payee = pair[1].as_str().ok_or("invalid commission payee")?;
            Ok(Some(PoolCommission { perbill, payee: payee.to_string() }))
        }
        _ => Err("expected [rate, payee] or null".to_string()),
    }
}

/// Pool metadata is raw bytes; chains return it hex-encoded.
fn decode_metadata(raw: &str) -> String {
    match raw.strip_prefix("0x").map(hex::decode) {
        Some(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => raw.to_string(),
    }
}

fn apply_to_record(accounts: &AccountCache, chain: ChainId, address: &str, action: TaskAction, observed: &Value) {
    let as_u128 = || parse_u128(observed).unwrap_or_default();
    accounts.update(chain, address, |record| match action {
        TaskAction::BalanceFree | TaskAction::BalanceFrozen | TaskAction::BalanceReserved => {
            let balance = record.balance.get_or_insert_with(AccountBalance::default);
            match action {
                TaskAction::BalanceFree => balance.free = as_u128(),
                TaskAction::BalanceFrozen => balance.frozen = as_u128(),
                _ => balance.reserved = as_u128(),
            }
        }
        TaskAction::NominationPoolRewards
        | TaskAction::NominationPoolState
        | TaskAction::NominationPoolRenamed
        | TaskAction::NominationPoolRoles
        | TaskAction::NominationPoolCommission => {
            let Some(pool) = record.nomination_pool.as_mut() else {
                return;
            };
            match action {
                TaskAction::NominationPoolRewards => pool.pending_rewards = as_u128(),
                TaskAction::NominationPoolState => pool.state = observed.as_str().unwrap_or_default().to_string(),
                TaskAction::NominationPoolRenamed => pool.name = observed.as_str().unwrap_or_default().to_string(),
                TaskAction::NominationPoolRoles => {
                    if let Ok(roles) = serde_json::from_value(observed.clone()) {
                        pool.roles = roles;
                    }
                }
                _ => pool.commission = serde_json::from_value(observed.clone()).unwrap_or(None),
            }
        }
        TaskAction::NominatingPendingPayouts | TaskAction::NominatingExposure | TaskAction::NominatingCommission => {
            let era = parse_u64(observed).and_then(|era| u32::try_from(era).ok());
            if let (Some(nominating), Some(era)) = (record.nominating.as_mut(), era) {
                nominating.era = era;
            }
        }
        TaskAction::NominatingNominations => {
            if let (Some(nominating), Some(targets)) = (record.nominating.as_mut(), observed.as_array()) {
                nominating.targets = targets.iter().filter_map(Value::as_str).map(str::to_string).collect();
            }
        }
        // spendable is derived, chain tasks have no account
        TaskAction::BalanceSpendable | TaskAction::ChainTimestamp | TaskAction::ChainCurrentSlot => {}
    });
}

fn describe(
    task: &SubscriptionTask,
    previous: Option<&Value>,
    observed: &Value,
    record: Option<&AccountRecord>,
) -> DomainEvent {
    let chain = task.chain;
    let token = chain.token();
    let amount = |value: &Value| chain.format_units(parse_u128(value).unwrap_or_default());
    let pool = record.and_then(|r| r.nomination_pool.as_ref());
    let nominating = record.and_then(|r| r.nominating.as_ref());
    let pool_id = pool.map(|p| p.pool_id).unwrap_or_default();

    let subtitle = match task.action {
        TaskAction::ChainTimestamp => format!("{}", parse_u64(observed).unwrap_or_default()),
        TaskAction::ChainCurrentSlot => format!("Slot {}", parse_u64(observed).unwrap_or_default()),
        TaskAction::BalanceFree
        | TaskAction::BalanceFrozen
        | TaskAction::BalanceReserved
        | TaskAction::BalanceSpendable => format!("{} {}", amount(observed), token),
        TaskAction::NominationPoolRewards => format!("{} {} unclaimed", amount(observed), token),
        TaskAction::NominationPoolState => {
            format!("Pool #{} is now {}", pool_id, observed.as_str().unwrap_or_default())
        }
        TaskAction::NominationPoolRenamed => format!("Pool renamed to {}", observed.as_str().unwrap_or_default()),
        TaskAction::NominationPoolRoles => format!("Pool #{} roles updated", pool_id),
        TaskAction::NominationPoolCommission => match observed.get("perbill").and_then(Value::as_u64) {
            Some(perbill) => format!("Pool #{} commission set to {}", pool_id, format_perbill(perbill as u32)),
            None => format!("Pool #{} commission removed", pool_id),
        },
        TaskAction::NominatingPendingPayouts => format!(
            "Era {} started, {} {} pending",
            parse_u64(observed).unwrap_or_default(),
            chain.format_units(nominating.map(|n| n.pending_payout).unwrap_or_default()),
            token
        ),
        TaskAction::NominatingExposure => {
            let state = if nominating.is_some_and(|n| n.exposed) { "Active" } else { "Inactive" };
            format!("{} in era {}", state, parse_u64(observed).unwrap_or_default())
        }
        TaskAction::NominatingCommission => format!(
            "Era {}: {} validator commissions checked",
            parse_u64(observed).unwrap_or_default(),
            nominating.map(|n| n.commissions.len()).unwrap_or_default()
        ),
        TaskAction::NominatingNominations => {
            format!("{} validators nominated", observed.as_array().map(Vec::len).unwrap_or_default())
        }
    };

    let category = match task.action.category() {
        super::task::TaskCategory::Chain => EventCategory::Chain,
        super::task::TaskCategory::Balances => EventCategory::Balances,
        super::task::TaskCategory::NominationPools => EventCategory::NominationPools,
        super::task::TaskCategory::Nominating => EventCategory::Nominating,
    };
    let origin = match &task.account {
        Some(account) => EventOrigin::Account { address: account.address.clone(), name: account.name.clone() },
        None => EventOrigin::Chain,
    };
    let mut data = json!({
        "action": task.action.to_string(),
        "previous": previous,
        "current": observed,
    });
    if task.action == TaskAction::NominatingCommission {
        data["commissions"] = json!(nominating.map(|n| n.commissions.clone()).unwrap_or_default());
    }

    DomainEvent::new(chain, category, origin, task.action.label(), subtitle, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{NominatingData, PoolMembership, QueryCall};
    use crate::delivery::AppSettings;

    fn account_info(free: u128, reserved: u128, frozen: u128) -> Value {
        json!({ "nonce": 1, "data": { "free": free.to_string(), "reserved": reserved.to_string(), "frozen": frozen.to_string() } })
    }

    fn balance_entry(action: TaskAction) -> ApiCallEntry {
        let task = SubscriptionTask::account_task(ChainId::Polkadot, action, "acc1", "Alice").with_os_notifications(true);
        let mut entry = ApiCallEntry::new(task, QueryCall::new("system.account", vec![json!("acc1")]));
        entry.just_built = true;
        entry
    }

    fn accounts() -> AccountCache {
        let accounts = AccountCache::new();
        accounts.insert(AccountRecord::new(ChainId::Polkadot, "acc1", "Alice"));
        accounts
    }

    #[test]
    fn test_first_evaluation_after_build_is_baseline() {
        let accounts = accounts();
        let settings = AppSettings::default();
        let ctx = CallbackContext { accounts: &accounts, settings: &settings };
        let mut entry = balance_entry(TaskAction::BalanceFree);
        entry.cached = Some(json!("1"));

        let outcome = evaluate(&ctx, &mut entry, &account_info(100, 0, 10), EvalMode::Continuous).unwrap();
        assert!(!outcome.emitted());
        assert!(outcome.reconcile.is_empty());
        assert!(!entry.just_built);
        assert_eq!(entry.cached, Some(json!("100")));
    }

    #[test]
    fn test_change_detection() {
        let accounts = accounts();
        let settings = AppSettings::default();
        let ctx = CallbackContext { accounts: &accounts, settings: &settings };
        let mut entry = balance_entry(TaskAction::BalanceFree);

        evaluate(&ctx, &mut entry, &account_info(100, 0, 10), EvalMode::Continuous).unwrap();
        let outcome = evaluate(&ctx, &mut entry, &account_info(150, 0, 10), EvalMode::Continuous).unwrap();
        let delivery = outcome.delivery.expect("changed value emits");
        assert_eq!(delivery.event.title, "Free Balance");
        assert_eq!(delivery.event.subtitle, "0.000000015 DOT");
        assert!(delivery.notification.is_some());
        assert!(!delivery.is_one_shot);
        assert!(outcome.reconcile.contains(crate::subscriptions::reconcile::ReconcileCategory::Balance, "acc1"));
        assert_eq!(accounts.get(ChainId::Polkadot, "acc1").unwrap().balance.unwrap().free, 150);

        let repeat = evaluate(&ctx, &mut entry, &account_info(150, 0, 10), EvalMode::Continuous).unwrap();
        assert!(!repeat.emitted());
    }

    #[test]
    fn test_one_shot_forces_emission_and_notification() {
        let accounts = accounts();
        let settings = AppSettings::new(true);
        let ctx = CallbackContext { accounts: &accounts, settings: &settings };
        let mut entry = balance_entry(TaskAction::BalanceFrozen);
        entry.task.enable_os_notifications = false;

        evaluate(&ctx, &mut entry, &account_info(100, 0, 10), EvalMode::Continuous).unwrap();
        let outcome = evaluate(&ctx, &mut entry, &account_info(100, 0, 10), EvalMode::OneShot).unwrap();
        let delivery = outcome.delivery.unwrap();
        assert!(delivery.is_one_shot);
        assert!(delivery.notification.is_some());
        assert!(outcome.reconcile.is_empty());
    }

    #[test]
    fn test_silenced_settings_suppress_continuous_notifications() {
        let accounts = accounts();
        let settings = AppSettings::new(true);
        let ctx = CallbackContext { accounts: &accounts, settings: &settings };
        let mut entry = balance_entry(TaskAction::BalanceReserved);
        entry.just_built = false;

        let delivery = evaluate(&ctx, &mut entry, &account_info(100, 5, 10), EvalMode::Continuous)
            .unwrap()
            .delivery
            .unwrap();
        assert!(delivery.notification.is_none());
    }

    #[test]
    fn test_malformed_value_leaves_entry_untouched() {
        let accounts = accounts();
        let settings = AppSettings::default();
        let ctx = CallbackContext { accounts: &accounts, settings: &settings };
        let mut entry = balance_entry(TaskAction::BalanceFree);

        let err = evaluate(&ctx, &mut entry, &json!({"unexpected": true}), EvalMode::Continuous).unwrap_err();
        assert!(matches!(err, WatchError::MalformedResult { .. }));
        assert!(entry.just_built);
        assert!(entry.cached.is_none());
    }

    #[test]
    fn test_projections() {
        let chain = ChainId::Polkadot;
        let spendable = project(TaskAction::BalanceSpendable, chain, &account_info(30_000_000_000, 0, 5_000_000_000)).unwrap();
        assert_eq!(spendable, json!("20000000000"));

        let pool = json!({
            "state": "Destroying",
            "roles": { "depositor": "d", "root": "r", "nominator": null, "bouncer": "b" },
            "commission": { "current": ["50000000", "payee"] }
        });
        assert_eq!(project(TaskAction::NominationPoolState, chain, &pool).unwrap(), json!("Destroying"));
        assert_eq!(
            project(TaskAction::NominationPoolCommission, chain, &pool).unwrap(),
            json!({ "perbill": 50_000_000, "payee": "payee" })
        );
        assert_eq!(project(TaskAction::NominationPoolRoles, chain, &pool).unwrap()["bouncer"], json!("b"));

        let name = project(TaskAction::NominationPoolRenamed, chain, &json!("0x506f6f6c")).unwrap();
        assert_eq!(name, json!("Pool"));

        let era = project(TaskAction::NominatingExposure, chain, &json!({ "index": 1200, "start": 1 })).unwrap();
        assert_eq!(era, json!(1200));

        let nominations = json!({ "targets": ["v2", "v1"], "submittedIn": 1100 });
        assert_eq!(project(TaskAction::NominatingNominations, chain, &nominations).unwrap(), json!(["v1", "v2"]));
        assert_eq!(project(TaskAction::NominatingNominations, chain, &json!(null)).unwrap(), json!([]));
    }

    #[test]
    fn test_record_projection_matches_raw_projection() {
        let record = AccountRecord::new(ChainId::Kusama, "acc1", "Alice")
            .with_balance(AccountBalance { free: 10, reserved: 2, frozen: 4 })
            .with_pool(PoolMembership { pool_id: 1, state: "Open".into(), name: "Pool".into(), ..Default::default() })
            .with_nominating(NominatingData { era: 9, targets: vec!["b".into(), "a".into()], ..Default::default() });

        let raw_frozen = project(TaskAction::BalanceFrozen, ChainId::Kusama, &account_info(10, 2, 4)).unwrap();
        assert_eq!(project_record(TaskAction::BalanceFrozen, ChainId::Kusama, &record), Some(raw_frozen));
        assert_eq!(project_record(TaskAction::NominationPoolState, ChainId::Kusama, &record), Some(json!("Open")));
        assert_eq!(project_record(TaskAction::NominatingPendingPayouts, ChainId::Kusama, &record), Some(json!(9)));
        assert_eq!(project_record(TaskAction::NominatingNominations, ChainId::Kusama, &record), Some(json!(["a", "b"])));
        assert_eq!(project_record(TaskAction::ChainTimestamp, ChainId::Kusama, &record), None);
    }

    #[test]
    fn test_out_of_range_era_keeps_record() {
        let accounts = AccountCache::new();
        accounts.insert(
            AccountRecord::new(ChainId::Kusama, "acc1", "Alice")
                .with_nominating(NominatingData { era: 9, ..Default::default() }),
        );
        let era = |accounts: &AccountCache| accounts.get(ChainId::Kusama, "acc1").and_then(|r| r.nominating).map(|n| n.era);

        apply_to_record(&accounts, ChainId::Kusama, "acc1", TaskAction::NominatingExposure, &json!(u64::from(u32::MAX) + 1));
        assert_eq!(era(&accounts), Some(9));

        apply_to_record(&accounts, ChainId::Kusama, "acc1", TaskAction::NominatingExposure, &json!(1200));
        assert_eq!(era(&accounts), Some(1200));
    }
}
