use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Debug, Display, Formatter};
use strum_macros::{Display, EnumIter, EnumString, VariantNames};

use crate::utils::constants::ChainConstants;

/// Networks the watcher knows how to track.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, EnumIter, VariantNames, Serialize, Deserialize)]
pub enum ChainId {
    #[strum(serialize = "Polkadot Relay")]
    #[serde(rename = "Polkadot Relay")]
    Polkadot,
    #[strum(serialize = "Kusama Relay")]
    #[serde(rename = "Kusama Relay")]
    Kusama,
    #[strum(serialize = "Westend Relay")]
    #[serde(rename = "Westend Relay")]
    Westend,
    #[strum(serialize = "Polkadot Asset Hub")]
    #[serde(rename = "Polkadot Asset Hub")]
    PolkadotAssetHub,
    #[strum(serialize = "Kusama Asset Hub")]
    #[serde(rename = "Kusama Asset Hub")]
    KusamaAssetHub,
    #[strum(serialize = "Westend Asset Hub")]
    #[serde(rename = "Westend Asset Hub")]
    WestendAssetHub,
}

impl ChainId {
    pub fn token(&self) -> &'static str {
        match self {
            ChainId::Polkadot | ChainId::PolkadotAssetHub => "DOT",
            ChainId::Kusama | ChainId::KusamaAssetHub => "KSM",
            ChainId::Westend | ChainId::WestendAssetHub => "WND",
        }
    }

    pub fn decimals(&self) -> u32 {
        match self {
            ChainId::Polkadot | ChainId::PolkadotAssetHub => ChainConstants::POLKADOT_DECIMALS,
            ChainId::Kusama | ChainId::KusamaAssetHub => ChainConstants::KUSAMA_DECIMALS,
            ChainId::Westend | ChainId::WestendAssetHub => ChainConstants::WESTEND_DECIMALS,
        }
    }

    pub fn existential_deposit(&self) -> u128 {
        match self {
            ChainId::Polkadot => ChainConstants::POLKADOT_ED,
            ChainId::Kusama => ChainConstants::KUSAMA_ED,
            ChainId::Westend => ChainConstants::WESTEND_ED,
            ChainId::PolkadotAssetHub => ChainConstants::POLKADOT_ASSET_HUB_ED,
            ChainId::KusamaAssetHub => ChainConstants::KUSAMA_ASSET_HUB_ED,
            ChainId::WestendAssetHub => ChainConstants::WESTEND_ASSET_HUB_ED,
        }
    }

    /// Pallets whose native events are matched on this chain.
    pub fn supported_pallets(&self) -> &'static [Pallet] {
        match self {
            ChainId::Polkadot | ChainId::Kusama | ChainId::Westend => &[
                Pallet::Balances,
                Pallet::ConvictionVoting,
                Pallet::NominationPools,
                Pallet::Referenda,
                Pallet::Staking,
            ],
            ChainId::PolkadotAssetHub | ChainId::KusamaAssetHub | ChainId::WestendAssetHub => {
                &[Pallet::Balances, Pallet::NominationPools, Pallet::Staking]
            }
        }
    }

    pub fn supports_pallet(&self, pallet: Pallet) -> bool {
        self.supported_pallets().contains(&pallet)
    }

    /// Render a planck amount in token units, trimming trailing zeros.
    pub fn format_units(&self, planck: u128) -> String {
        format_units(planck, self.decimals())
    }
}

/// Runtime pallets the event layer understands.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, EnumIter, Serialize, Deserialize)]
pub enum Pallet {
    Balances,
    ConvictionVoting,
    NominationPools,
    Referenda,
    Staking,
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Default, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Reconnecting,
    Connected,
}

/// Where a chain client connects to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "url")]
pub enum Endpoint {
    Rpc(String),
    LightClient,
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Rpc(url) => write!(f, "rpc({url})"),
            Endpoint::LightClient => write!(f, "light-client"),
        }
    }
}

/// One element of a batched live query: a storage/runtime path plus its arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryCall {
    pub path: String,
    pub args: Vec<Value>,
}

impl QueryCall {
    pub fn new(path: impl Into<String>, args: Vec<Value>) -> Self {
        Self { path: path.into(), args }
    }

    /// Structural equality of path and arguments, ignoring argument order.
    pub fn same_query(&self, other: &QueryCall) -> bool {
        if self.path != other.path || self.args.len() != other.args.len() {
            return false;
        }
        let mut lhs: Vec<String> = self.args.iter().map(Value::to_string).collect();
        let mut rhs: Vec<String> = other.args.iter().map(Value::to_string).collect();
        lhs.sort_unstable();
        rhs.sort_unstable();
        lhs == rhs
    }
}

impl Display for QueryCall {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let args: Vec<String> = self.args.iter().map(Value::to_string).collect();
        write!(f, "{}({})", self.path, args.join(", "))
    }
}

/// A structured native event record as decoded by the chain client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub pallet: String,
    pub method: String,
    pub data: Value,
}

impl ChainEvent {
    pub fn new(pallet: impl Into<String>, method: impl Into<String>, data: Value) -> Self {
        Self { pallet: pallet.into(), method: method.into(), data }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub free: u128,
    pub reserved: u128,
    pub frozen: u128,
}

impl AccountBalance {
    /// Transferable amount: `free - max(frozen - reserved, existential_deposit)`.
    pub fn spendable(&self, existential_deposit: u128) -> u128 {
        let untouchable = self.frozen.saturating_sub(self.reserved).max(existential_deposit);
        self.free.saturating_sub(untouchable)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRoles {
    pub depositor: String,
    pub root: Option<String>,
    pub nominator: Option<String>,
    pub bouncer: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCommission {
    pub perbill: u32,
    pub payee: String,
}

/// Known nomination pool membership of an account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMembership {
    pub pool_id: u32,
    pub points: u128,
    pub pending_rewards: u128,
    pub state: String,
    pub name: String,
    pub roles: PoolRoles,
    pub commission: Option<PoolCommission>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorCommission {
    pub validator: String,
    pub perbill: u32,
}

/// Known nominator status of an account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NominatingData {
    pub era: u32,
    pub exposed: bool,
    pub pending_payout: u128,
    pub targets: Vec<String>,
    pub commissions: Vec<ValidatorCommission>,
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferendumStatus {
    Ongoing,
    Approved,
    Rejected,
    Cancelled,
    TimedOut,
    Killed,
}

/// Point-in-time view of a referendum, enough for the interval checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferendumInfo {
    pub id: u32,
    pub track: u16,
    pub status: ReferendumStatus,
    pub ayes: u128,
    pub nays: u128,
    pub support: u128,
    pub electorate: u128,
    pub approval_threshold_perbill: u32,
    pub support_threshold_perbill: u32,
    pub decision_ends_block: Option<u64>,
    pub current_block: u64,
}

impl ReferendumInfo {
    /// Share of ayes among all votes, in perbill.
    pub fn approval_perbill(&self) -> u32 {
        ratio_perbill(self.ayes, self.ayes.saturating_add(self.nays))
    }

    /// Share of the electorate supporting, in perbill.
    pub fn support_perbill(&self) -> u32 {
        ratio_perbill(self.support, self.electorate)
    }
}

pub const PERBILL: u128 = 1_000_000_000;

pub fn ratio_perbill(part: u128, whole: u128) -> u32 {
    if whole == 0 {
        return 0;
    }
    let part = part.min(whole);
    // part <= whole so the quotient fits in u32 once scaled to perbill
    ((part.saturating_mul(PERBILL)) / whole) as u32
}

/// Perbill rendered as a percentage with one decimal, e.g. `62.5%`.
pub fn format_perbill(perbill: u32) -> String {
    let tenths = (perbill as u64 + 500_000) / 1_000_000;
    format!("{}.{}%", tenths / 10, tenths % 10)
}

pub fn format_units(planck: u128, decimals: u32) -> String {
    let base = 10u128.pow(decimals);
    let whole = planck / base;
    let fraction = planck % base;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{:0width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

/// Balances arrive as JSON numbers, decimal strings or `0x` hex strings.
pub fn parse_u128(value: &Value) -> Option<u128> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .map(u128::from)
            .or_else(|| number.to_string().parse::<u128>().ok()),
        Value::String(text) => match text.strip_prefix("0x") {
            Some(hex) => u128::from_str_radix(hex, 16).ok(),
            None => text.replace(',', "").parse::<u128>().ok(),
        },
        _ => None,
    }
}

pub fn parse_u64(value: &Value) -> Option<u64> {
    parse_u128(value).and_then(|v| u64::try_from(v).ok())
}
