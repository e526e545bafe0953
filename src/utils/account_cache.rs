use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::chain::{AccountBalance, ChainId, NominatingData, PoolMembership};

/// Everything the watcher knows about one imported account on one chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub chain: ChainId,
    pub address: String,
    pub name: String,
    pub balance: Option<AccountBalance>,
    pub nomination_pool: Option<PoolMembership>,
    pub nominating: Option<NominatingData>,
}

impl AccountRecord {
    pub fn new(chain: ChainId, address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            chain,
            address: address.into(),
            name: name.into(),
            balance: None,
            nomination_pool: None,
            nominating: None,
        }
    }

    pub fn with_balance(mut self, balance: AccountBalance) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn with_pool(mut self, membership: PoolMembership) -> Self {
        self.nomination_pool = Some(membership);
        self
    }

    pub fn with_nominating(mut self, nominating: NominatingData) -> Self {
        self.nominating = Some(nominating);
        self
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }
}

/// Shared account records, keyed by (chain, address).
///
/// Callbacks and reconciliation write here; prerequisite checks read.
#[derive(Debug, Default)]
pub struct AccountCache {
    records: DashMap<(ChainId, String), AccountRecord>,
    pub stats: CacheStats,
}

impl AccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: AccountRecord) {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.records.insert((record.chain, record.address.clone()), record);
    }

    pub fn remove(&self, chain: ChainId, address: &str) -> Option<AccountRecord> {
        self.records.remove(&(chain, address.to_string())).map(|(_, record)| record)
    }

    pub fn get(&self, chain: ChainId, address: &str) -> Option<AccountRecord> {
        match self.records.get(&(chain, address.to_string())) {
            Some(record) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(record.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn contains(&self, chain: ChainId, address: &str) -> bool {
        self.records.contains_key(&(chain, address.to_string()))
    }

    /// Apply `update` to a record in place. Returns false when the account is unknown.
    pub fn update<F>(&self, chain: ChainId, address: &str, update: F) -> bool
    where
        F: FnOnce(&mut AccountRecord),
    {
        match self.records.get_mut(&(chain, address.to_string())) {
            Some(mut record) => {
                update(&mut record);
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn set_balance(&self, chain: ChainId, address: &str, balance: AccountBalance) -> bool {
        self.update(chain, address, |record| record.balance = Some(balance))
    }

    pub fn set_pool_membership(&self, chain: ChainId, address: &str, membership: Option<PoolMembership>) -> bool {
        self.update(chain, address, |record| record.nomination_pool = membership)
    }

    pub fn set_nominating(&self, chain: ChainId, address: &str, nominating: Option<NominatingData>) -> bool {
        self.update(chain, address, |record| record.nominating = nominating)
    }

    pub fn account_name(&self, chain: ChainId, address: &str) -> Option<String> {
        self.records.get(&(chain, address.to_string())).map(|record| record.name.clone())
    }

    pub fn accounts_on(&self, chain: ChainId) -> Vec<AccountRecord> {
        self.records.iter().filter(|entry| entry.key().0 == chain).map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_basic_operations() {
        let cache = AccountCache::new();
        assert!(cache.get(ChainId::Polkadot, "acc1").is_none());

        cache.insert(AccountRecord::new(ChainId::Polkadot, "acc1", "Alice"));
        let record = cache.get(ChainId::Polkadot, "acc1").unwrap();
        assert_eq!(record.name, "Alice");
        assert!(record.balance.is_none());

        assert!(cache.stats.hits.load(Ordering::Relaxed) > 0);
        assert!(cache.stats.misses.load(Ordering::Relaxed) > 0);
        assert_eq!(cache.stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_updates_only_known_accounts() {
        let cache = AccountCache::new();
        let balance = AccountBalance { free: 10, reserved: 0, frozen: 0 };
        assert!(!cache.set_balance(ChainId::Kusama, "acc1", balance));

        cache.insert(AccountRecord::new(ChainId::Kusama, "acc1", "Bob"));
        assert!(cache.set_balance(ChainId::Kusama, "acc1", balance));
        assert_eq!(cache.get(ChainId::Kusama, "acc1").unwrap().balance, Some(balance));

        // same address on another chain is a different record
        assert!(!cache.contains(ChainId::Polkadot, "acc1"));
        assert_eq!(cache.accounts_on(ChainId::Kusama).len(), 1);
    }
}
