//! Table: a seating/session unit hosted by a room

use super::{AccountId, Asset, LedgerTime, ReservationId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Lifecycle phase of a table's current hand
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TablePhase {
    #[default]
    Free,
    Waiting,
    VotingForPlaying,
    Playing,
    VotingForResults,
}

/// Per-table mutable record of occupancy, stakes and hand lifecycle.
///
/// `occupied_places` tracks the number of distinct players present in
/// any of `cash`, `playing_cash` or `pending_proposals`. The proposal
/// set is disjoint from the other two; cash and playing cash may overlap
/// transiently while a hand resolves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub room: RoomId,
    /// Free-text matching key ("nl-holdem", stakes class, ...)
    pub metadata: String,
    pub required_witnesses: u32,
    pub min_accepted_proposal: Asset,

    /// Stake reserved per player, waiting to enter play
    pub cash: BTreeMap<AccountId, Asset>,
    /// Stake per player currently in the active hand
    pub playing_cash: BTreeMap<AccountId, Asset>,
    /// In-flight reservation per player placed by the allocation engine
    pub pending_proposals: BTreeMap<AccountId, ReservationId>,
    pub occupied_places: u32,

    /// Matchmaking priority, derived from room rating and liveness
    pub weight: i64,
    pub alive_until: LedgerTime,

    pub phase: TablePhase,
    pub game_created: LedgerTime,
    pub game_expiration: LedgerTime,
    /// Witness set committed to the current hand
    pub voted_witnesses: BTreeSet<AccountId>,
    /// Mid-hand buy-out requests, honored at result resolution
    pub buy_out_intents: BTreeMap<AccountId, Asset>,

    /// Voting-statistics classification of the last resolved round
    pub voted_last_round: BTreeSet<AccountId>,
    pub missed_last_round: BTreeSet<AccountId>,
}

impl Table {
    pub fn new(
        room: RoomId,
        metadata: String,
        required_witnesses: u32,
        min_accepted_proposal: Asset,
    ) -> Self {
        Self {
            room,
            metadata,
            required_witnesses,
            min_accepted_proposal,
            cash: BTreeMap::new(),
            playing_cash: BTreeMap::new(),
            pending_proposals: BTreeMap::new(),
            occupied_places: 0,
            weight: 0,
            alive_until: LedgerTime::default(),
            phase: TablePhase::Free,
            game_created: LedgerTime::default(),
            game_expiration: LedgerTime::default(),
            voted_witnesses: BTreeSet::new(),
            buy_out_intents: BTreeMap::new(),
            voted_last_round: BTreeSet::new(),
            missed_last_round: BTreeSet::new(),
        }
    }

    pub fn is_alive(&self, now: LedgerTime) -> bool {
        self.alive_until > now
    }

    /// Distinct players present in any of the three occupancy sets
    pub fn distinct_players(&self) -> BTreeSet<AccountId> {
        let mut players: BTreeSet<AccountId> = self.cash.keys().cloned().collect();
        players.extend(self.playing_cash.keys().cloned());
        players.extend(self.pending_proposals.keys().cloned());
        players
    }

    /// Recount `occupied_places` from the three sets. Callers mutating
    /// the occupancy maps must invoke this before the table is
    /// re-indexed; the context asserts the counter stays consistent.
    pub fn sync_occupancy(&mut self) {
        self.occupied_places = self.distinct_players().len() as u32;
    }

    pub fn is_present(&self, player: &AccountId) -> bool {
        self.cash.contains_key(player)
            || self.playing_cash.contains_key(player)
            || self.pending_proposals.contains_key(player)
    }

    pub fn is_waiting_at(&self, player: &AccountId) -> bool {
        self.cash.contains_key(player)
    }

    pub fn is_playing_at(&self, player: &AccountId) -> bool {
        self.playing_cash.contains_key(player)
    }

    /// Sum of stakes currently in the active hand
    pub fn playing_total(&self) -> u64 {
        self.playing_cash.values().map(|a| a.amount).sum()
    }

    /// Everyone holding cash or playing cash, the player voter draw
    pub fn active_players(&self) -> BTreeSet<AccountId> {
        let mut players: BTreeSet<AccountId> = self.cash.keys().cloned().collect();
        players.extend(self.playing_cash.keys().cloned());
        players
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new(RoomId(1), "nl-holdem".into(), 2, Asset::new(5, "CHP"))
    }

    #[test]
    fn occupancy_counts_distinct_players_across_sets() {
        let mut t = table();
        t.cash.insert(AccountId::from("a"), Asset::new(10, "CHP"));
        t.playing_cash.insert(AccountId::from("a"), Asset::new(10, "CHP"));
        t.playing_cash.insert(AccountId::from("b"), Asset::new(10, "CHP"));
        t.pending_proposals.insert(AccountId::from("c"), ReservationId(7));
        t.sync_occupancy();
        // "a" overlaps cash and playing cash, still one place
        assert_eq!(t.occupied_places, 3);
    }

    #[test]
    fn liveness_window() {
        let mut t = table();
        t.alive_until = LedgerTime(100);
        assert!(t.is_alive(LedgerTime(99)));
        assert!(!t.is_alive(LedgerTime(100)));
    }

    #[test]
    fn active_players_union() {
        let mut t = table();
        t.cash.insert(AccountId::from("a"), Asset::new(10, "CHP"));
        t.playing_cash.insert(AccountId::from("b"), Asset::new(10, "CHP"));
        t.pending_proposals.insert(AccountId::from("c"), ReservationId(7));
        let active = t.active_players();
        assert!(active.contains(&AccountId::from("a")));
        assert!(active.contains(&AccountId::from("b")));
        // proposals are not active voters
        assert!(!active.contains(&AccountId::from("c")));
    }
}
