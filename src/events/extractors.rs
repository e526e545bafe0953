use serde_json::Value;

use crate::chain::types::parse_u128;
use crate::chain::{ChainEvent, Pallet};

/// Named fields that carry an account in each pallet's events.
fn address_fields(pallet: Pallet) -> &'static [&'static str] {
    match pallet {
        Pallet::Balances => &["who", "from", "to", "account"],
        Pallet::ConvictionVoting => &["who", "target", "voter"],
        Pallet::NominationPools => &["member", "depositor", "root", "bouncer", "nominator"],
        Pallet::Referenda => &["who", "submitter", "depositor"],
        Pallet::Staking => &["stash", "staker", "nominator", "validator", "dest"],
    }
}

/// Addresses an event concerns, de-duplicated and sorted.
///
/// Named-field payloads are read through the pallet's field list. Positional
/// payloads fall back to every non-numeric string element.
pub fn extract_addresses(pallet: Pallet, event: &ChainEvent) -> Vec<String> {
    let mut addresses: Vec<String> = match &event.data {
        Value::Object(fields) => address_fields(pallet)
            .iter()
            .filter_map(|field| fields.get(*field))
            .filter_map(as_address)
            .collect(),
        Value::Array(items) => items.iter().filter_map(as_address).collect(),
        _ => Vec::new(),
    };
    addresses.sort();
    addresses.dedup();
    addresses
}

fn as_address(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() && parse_u128(value).is_none() => Some(text.clone()),
        // `dest` style enums: { "Account": "..." }
        Value::Object(inner) => inner.get("Account").or_else(|| inner.get("account")).and_then(as_address),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_named_fields_per_pallet() {
        let transfer = ChainEvent::new("Balances", "Transfer", json!({ "from": "bob", "to": "alice", "amount": "100" }));
        assert_eq!(extract_addresses(Pallet::Balances, &transfer), vec!["alice", "bob"]);

        let paid = ChainEvent::new("NominationPools", "PaidOut", json!({ "member": "carol", "poolId": 3, "payout": 5 }));
        assert_eq!(extract_addresses(Pallet::NominationPools, &paid), vec!["carol"]);

        // `who` is not a staking field
        let rewarded = ChainEvent::new("Staking", "Rewarded", json!({ "stash": "dave", "who": "x", "amount": 1 }));
        assert_eq!(extract_addresses(Pallet::Staking, &rewarded), vec!["dave"]);

        let payee = ChainEvent::new("Staking", "Rewarded", json!({ "stash": "dave", "dest": { "Account": "erin" } }));
        assert_eq!(extract_addresses(Pallet::Staking, &payee), vec!["dave", "erin"]);
    }

    #[test]
    fn test_positional_fallback() {
        let transfer = ChainEvent::new("Balances", "Transfer", json!(["bob", "alice", "1,000"]));
        assert_eq!(extract_addresses(Pallet::Balances, &transfer), vec!["alice", "bob"]);

        let self_transfer = ChainEvent::new("Balances", "Transfer", json!(["bob", "bob", 5]));
        assert_eq!(extract_addresses(Pallet::Balances, &self_transfer), vec!["bob"]);

        assert!(extract_addresses(Pallet::Referenda, &ChainEvent::new("Referenda", "Submitted", json!(null))).is_empty());
    }
}
