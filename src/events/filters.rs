use ahash::HashMap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::chain::{ChainId, Pallet};

/// Interest in one native event type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub pallet: Pallet,
    pub method: String,
    #[serde(default)]
    pub notify: bool,
}

impl EventFilter {
    pub fn new(pallet: Pallet, method: impl Into<String>, notify: bool) -> Self {
        Self { pallet, method: method.into(), notify }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ScopedFilter {
    method: String,
    notify: bool,
}

/// (pallet, method) -> notify
type GlobalFilters = HashMap<(Pallet, String), bool>;
/// account -> pallet -> filters
type ScopedFilters = HashMap<String, HashMap<Pallet, Vec<ScopedFilter>>>;

/// Chain-wide and account-scoped event filters, kept independently per chain.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    global: DashMap<ChainId, GlobalFilters>,
    scoped: DashMap<ChainId, ScopedFilters>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_global(&self, chain: ChainId, filter: EventFilter) {
        self.global.entry(chain).or_default().insert((filter.pallet, filter.method), filter.notify);
    }

    pub fn remove_global(&self, chain: ChainId, pallet: Pallet, method: &str) -> bool {
        let Some(mut filters) = self.global.get_mut(&chain) else {
            return false;
        };
        filters.remove(&(pallet, method.to_string())).is_some()
    }

    /// Register or update an account's interest in one event type.
    pub fn add_scoped(&self, chain: ChainId, account: &str, filter: EventFilter) {
        let mut chain_filters = self.scoped.entry(chain).or_default();
        let pallet_filters = chain_filters.entry(account.to_string()).or_default().entry(filter.pallet).or_default();
        match pallet_filters.iter_mut().find(|existing| existing.method == filter.method) {
            Some(existing) => existing.notify = filter.notify,
            None => pallet_filters.push(ScopedFilter { method: filter.method, notify: filter.notify }),
        }
    }

    pub fn remove_scoped(&self, chain: ChainId, account: &str, pallet: Pallet, method: &str) -> bool {
        let Some(mut chain_filters) = self.scoped.get_mut(&chain) else {
            return false;
        };
        let Some(account_filters) = chain_filters.get_mut(account) else {
            return false;
        };
        let Some(pallet_filters) = account_filters.get_mut(&pallet) else {
            return false;
        };

        let before = pallet_filters.len();
        pallet_filters.retain(|existing| existing.method != method);
        let removed = pallet_filters.len() != before;
        if pallet_filters.is_empty() {
            account_filters.remove(&pallet);
        }
        if account_filters.is_empty() {
            chain_filters.remove(account);
        }
        removed
    }

    /// Drop every scoped filter of an account, e.g. when the account is forgotten.
    pub fn remove_account(&self, chain: ChainId, account: &str) -> bool {
        self.scoped.get_mut(&chain).is_some_and(|mut chain_filters| chain_filters.remove(account).is_some())
    }

    pub fn global_notify(&self, chain: ChainId, pallet: Pallet, method: &str) -> Option<bool> {
        self.global.get(&chain)?.get(&(pallet, method.to_string())).copied()
    }

    pub fn scoped_notify(&self, chain: ChainId, account: &str, pallet: Pallet, method: &str) -> Option<bool> {
        let chain_filters = self.scoped.get(&chain)?;
        chain_filters
            .get(account)?
            .get(&pallet)?
            .iter()
            .find(|filter| filter.method == method)
            .map(|filter| filter.notify)
    }

    /// Registered accounts among `addresses` interested in this event, with their notify flags.
    pub fn scoped_matches(&self, chain: ChainId, addresses: &[String], pallet: Pallet, method: &str) -> Vec<(String, bool)> {
        addresses
            .iter()
            .filter_map(|address| self.scoped_notify(chain, address, pallet, method).map(|notify| (address.clone(), notify)))
            .collect()
    }

    pub fn has_filters(&self, chain: ChainId) -> bool {
        self.global.get(&chain).is_some_and(|filters| !filters.is_empty())
            || self.scoped.get(&chain).is_some_and(|filters| !filters.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_filters_are_per_chain() {
        let registry = FilterRegistry::new();
        registry.add_global(ChainId::Polkadot, EventFilter::new(Pallet::Referenda, "Submitted", true));

        assert_eq!(registry.global_notify(ChainId::Polkadot, Pallet::Referenda, "Submitted"), Some(true));
        assert_eq!(registry.global_notify(ChainId::Kusama, Pallet::Referenda, "Submitted"), None);
        assert!(registry.remove_global(ChainId::Polkadot, Pallet::Referenda, "Submitted"));
        assert!(!registry.has_filters(ChainId::Polkadot));
    }

    #[test]
    fn test_scoped_filters_update_in_place() {
        let registry = FilterRegistry::new();
        registry.add_scoped(ChainId::Kusama, "acc1", EventFilter::new(Pallet::Balances, "Transfer", false));
        registry.add_scoped(ChainId::Kusama, "acc1", EventFilter::new(Pallet::Balances, "Transfer", true));
        registry.add_scoped(ChainId::Kusama, "acc2", EventFilter::new(Pallet::Balances, "Deposit", false));

        let addresses = vec!["acc1".to_string(), "acc2".to_string(), "acc3".to_string()];
        assert_eq!(
            registry.scoped_matches(ChainId::Kusama, &addresses, Pallet::Balances, "Transfer"),
            vec![("acc1".to_string(), true)]
        );

        assert!(registry.remove_scoped(ChainId::Kusama, "acc1", Pallet::Balances, "Transfer"));
        assert!(!registry.remove_scoped(ChainId::Kusama, "acc1", Pallet::Balances, "Transfer"));
        assert!(registry.remove_account(ChainId::Kusama, "acc2"));
        assert!(!registry.has_filters(ChainId::Kusama));
    }
}
