use std::collections::BTreeSet;
use std::time::Instant;
use strum_macros::Display;
use tracing::{debug, info, warn};

use super::callbacks::project_record;
use super::query_multi::ApiCallEntry;
use crate::chain::{ChainClient, ChainId};
use crate::errors::WatchResult;
use crate::utils::account_cache::AccountCache;

/// Data categories that can be refreshed with one full-snapshot fetch.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReconcileCategory {
    Balance,
    NominationPool,
    Nominating,
}

/// Per-batch accumulator of refetches requested by callbacks.
///
/// Each callback returns its own flags; the engine folds them after the batch,
/// so N callbacks touching one account cost one fetch per category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileFlags {
    pending: BTreeSet<(ReconcileCategory, String)>,
}

impl ReconcileFlags {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn flag(category: ReconcileCategory, address: impl Into<String>) -> Self {
        let mut flags = Self::default();
        flags.set(category, address);
        flags
    }

    pub fn set(&mut self, category: ReconcileCategory, address: impl Into<String>) {
        self.pending.insert((category, address.into()));
    }

    pub fn merge(&mut self, other: ReconcileFlags) {
        self.pending.extend(other.pending);
    }

    pub fn contains(&self, category: ReconcileCategory, address: &str) -> bool {
        self.pending.iter().any(|(c, a)| *c == category && a == address)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ReconcileCategory, String)> {
        self.pending.iter()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub fetched: usize,
    pub failed: usize,
    pub propagated: usize,
}

/// Refetch every flagged snapshot once, write it into the owning account
/// record and propagate it to every entry reading that account.
pub async fn reconcile(
    client: &dyn ChainClient,
    accounts: &AccountCache,
    chain: ChainId,
    entries: &mut [ApiCallEntry],
    flags: ReconcileFlags,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    if flags.is_empty() {
        return report;
    }

    let start_time = Instant::now();
    debug!("{}: reconciling {} flagged snapshots", chain, flags.len());

    for (category, address) in flags.iter() {
        match refresh_snapshot(client, accounts, chain, *category, address).await {
            Ok(true) => report.fetched += 1,
            Ok(false) => {
                debug!("{}: account {} no longer tracked, skipping {} refresh", chain, address, category);
                continue;
            }
            Err(e) => {
                warn!("{}: {} refresh for {} failed: {}", chain, category, address, e);
                report.failed += 1;
                continue;
            }
        }

        let Some(record) = accounts.get(chain, address) else {
            continue;
        };
        for entry in entries
            .iter_mut()
            .filter(|entry| entry.task.address() == Some(address.as_str()))
            .filter(|entry| entry.task.action.reconcile_category() == Some(*category))
        {
            if let Some(projection) = project_record(entry.task.action, chain, &record) {
                entry.cached = Some(projection);
                report.propagated += 1;
            }
        }
    }

    info!(
        "{}: reconciliation finished in {:?} - {} fetched, {} failed, {} entries refreshed",
        chain,
        start_time.elapsed(),
        report.fetched,
        report.failed,
        report.propagated
    );
    report
}

async fn refresh_snapshot(
    client: &dyn ChainClient,
    accounts: &AccountCache,
    chain: ChainId,
    category: ReconcileCategory,
    address: &str,
) -> WatchResult<bool> {
    let written = match category {
        ReconcileCategory::Balance => {
            let balance = client.fetch_balance(address).await?;
            accounts.set_balance(chain, address, balance)
        }
        ReconcileCategory::NominationPool => {
            let membership = client.fetch_pool_membership(address).await?;
            accounts.set_pool_membership(chain, address, membership)
        }
        ReconcileCategory::Nominating => {
            let nominating = client.fetch_nominating(address).await?;
            accounts.set_nominating(chain, address, nominating)
        }
    };
    Ok(written)
}
