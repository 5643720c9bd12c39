//! Room: ledger identity of a third-party game server

use super::{AccountId, LedgerTime, TableId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A registered game server. Created by an account-submitted registration
/// operation, mutated only by the rating engine and explicit owner
/// updates, never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub owner: AccountId,
    pub server_url: String,
    pub protocol_version: String,
    pub metadata: String,
    /// Accounts allowed to submit game claims for this room's tables.
    /// The owner is always a member.
    pub witnesses: BTreeSet<AccountId>,

    /// Current reputation score, RATIO_SCALE units
    pub rating: i64,
    /// Rating at the end of the last fully propagated maintenance cycle
    pub prev_rating: i64,

    // Aggregates recomputed each maintenance cycle
    pub weight_sum_by_time_factor: i64,
    pub measurement_sum_by_time_factor: i64,
    pub measurement_quantity: u64,
    pub last_rating_update: LedgerTime,

    /// Resume cursor for the weight-propagation pass; `Some` while a
    /// cycle ran out of quota mid-room
    pub last_updated_table: Option<TableId>,
}

impl Room {
    pub fn new(owner: AccountId, server_url: String, protocol_version: String, metadata: String) -> Self {
        let mut witnesses = BTreeSet::new();
        witnesses.insert(owner.clone());
        Self {
            owner,
            server_url,
            protocol_version,
            metadata,
            witnesses,
            rating: 0,
            prev_rating: 0,
            weight_sum_by_time_factor: 0,
            measurement_sum_by_time_factor: 0,
            measurement_quantity: 0,
            last_rating_update: LedgerTime::default(),
            last_updated_table: None,
        }
    }

    /// The first `count` witnesses in account order, the deterministic
    /// draw used when a voting round is created
    pub fn witness_draw(&self, count: u32) -> BTreeSet<AccountId> {
        self.witnesses.iter().take(count as usize).cloned().collect()
    }

    pub fn is_witness(&self, account: &AccountId) -> bool {
        self.witnesses.contains(account) || &self.owner == account
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_is_always_a_witness() {
        let room = Room::new(
            AccountId::from("host"),
            "wss://room.example".into(),
            "1.0.0".into(),
            String::new(),
        );
        assert!(room.is_witness(&AccountId::from("host")));
        assert!(room.witnesses.contains(&AccountId::from("host")));
    }

    #[test]
    fn witness_draw_is_prefix_in_account_order() {
        let mut room = Room::new(
            AccountId::from("host"),
            "url".into(),
            "1.0.0".into(),
            String::new(),
        );
        room.witnesses.insert(AccountId::from("w-b"));
        room.witnesses.insert(AccountId::from("w-a"));
        let draw = room.witness_draw(2);
        let names: Vec<_> = draw.iter().map(|a| a.0.as_str()).collect();
        assert_eq!(names, vec!["host", "w-a"]);
    }
}
