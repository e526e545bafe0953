use std::time::Duration;

/// Global interval scheduler tick.
pub const DEFAULT_TICK_DURATION: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_EVENT_QUEUE_MAX_SIZE: usize = 500;

/// Cooperative pause between two drained queue items.
pub const DEFAULT_EVENT_QUEUE_DELAY: Duration = Duration::from_millis(50);

pub const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// Light clients sync headers before answering, so they get longer.
pub const DEFAULT_LIGHT_CLIENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Relay chain block time used to turn block counts into durations.
pub const BLOCK_TIME: Duration = Duration::from_secs(6);

pub const SUMMARY_NOTIFICATION_TITLE: &str = "Chain Watch";

#[non_exhaustive]
pub struct ChainConstants;

impl ChainConstants {
    pub const POLKADOT_DECIMALS: u32 = 10;
    pub const KUSAMA_DECIMALS: u32 = 12;
    pub const WESTEND_DECIMALS: u32 = 12;

    // Existential deposits in planck
    pub const POLKADOT_ED: u128 = 10_000_000_000;
    pub const KUSAMA_ED: u128 = 333_333_333;
    pub const WESTEND_ED: u128 = 10_000_000_000;
    pub const POLKADOT_ASSET_HUB_ED: u128 = 100_000_000;
    pub const KUSAMA_ASSET_HUB_ED: u128 = 3_333_333;
    pub const WESTEND_ASSET_HUB_ED: u128 = 1_000_000_000;
}

#[non_exhaustive]
pub struct QueryPath;

impl QueryPath {
    pub const TIMESTAMP_NOW: &'static str = "timestamp.now";
    pub const BABE_CURRENT_SLOT: &'static str = "babe.currentSlot";
    pub const SYSTEM_ACCOUNT: &'static str = "system.account";
    pub const POOL_PENDING_REWARDS: &'static str = "nominationPoolsApi.pendingRewards";
    pub const POOL_BONDED_POOLS: &'static str = "nominationPools.bondedPools";
    pub const POOL_METADATA: &'static str = "nominationPools.metadata";
    pub const STAKING_ACTIVE_ERA: &'static str = "staking.activeEra";
    pub const STAKING_NOMINATORS: &'static str = "staking.nominators";
}
