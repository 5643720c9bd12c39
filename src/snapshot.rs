//! Read-only views for the external API layer
//!
//! Extended table snapshots (pushed to subscribers whenever a table
//! object changed), owner/metadata pagination and the aggregate player
//! balance query. Nothing here mutates consensus state.

use crate::ledger::Context;
use crate::model::{AccountId, Asset, ReservationId, RoomId, TableId, TablePhase};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Extended serialized view of one table, as pushed to subscribers
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableSnapshot {
    pub id: TableId,
    pub room: RoomId,
    pub metadata: String,
    pub phase: TablePhase,
    pub weight: i64,
    pub occupied_places: u32,
    pub min_accepted_proposal: Asset,
    pub cash: BTreeMap<AccountId, Asset>,
    pub playing_cash: BTreeMap<AccountId, Asset>,
    pub pending_proposals: BTreeMap<AccountId, ReservationId>,
    pub voted_last_round: BTreeSet<AccountId>,
    pub missed_last_round: BTreeSet<AccountId>,
    /// Hand deadline rendered from ledger time ("1970-01-01T00:00:00Z"
    /// while no hand is running)
    pub game_expiration: String,
}

impl TableSnapshot {
    pub fn capture(ctx: &Context, id: TableId) -> Option<Self> {
        let t = ctx.table(id)?;
        Some(Self {
            id,
            room: t.room,
            metadata: t.metadata.clone(),
            phase: t.phase,
            weight: t.weight,
            occupied_places: t.occupied_places,
            min_accepted_proposal: t.min_accepted_proposal.clone(),
            cash: t.cash.clone(),
            playing_cash: t.playing_cash.clone(),
            pending_proposals: t.pending_proposals.clone(),
            voted_last_round: t.voted_last_round.clone(),
            missed_last_round: t.missed_last_round.clone(),
            game_expiration: t.game_expiration.to_string(),
        })
    }
}

/// A caller-supplied table-id filter; polled once per block to turn the
/// context's changed-table queue into snapshots
#[derive(Clone, Debug, Default)]
pub struct SubscriptionSet {
    ids: BTreeSet<TableId>,
}

impl SubscriptionSet {
    pub fn new(ids: impl IntoIterator<Item = TableId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Drain the changed-table queue, returning snapshots for the
    /// subscribed ids among them
    pub fn poll(&self, ctx: &mut Context) -> Vec<TableSnapshot> {
        ctx.take_changed_tables()
            .into_iter()
            .filter(|id| self.ids.contains(id))
            .filter_map(|id| TableSnapshot::capture(ctx, id))
            .collect()
    }
}

/// Rooms owned by an account, paginated by room id
pub fn rooms_by_owner(
    ctx: &Context,
    owner: &AccountId,
    start: Option<RoomId>,
    limit: usize,
) -> Vec<RoomId> {
    ctx.rooms()
        .filter(|(id, room)| {
            *id != RoomId::NULL && room.owner == *owner && start.map_or(true, |s| *id > s)
        })
        .map(|(id, _)| id)
        .take(limit)
        .collect()
}

/// Tables of one metadata class, paginated in allocation index order
pub fn tables_by_metadata(
    ctx: &Context,
    metadata: &str,
    start: Option<TableId>,
    limit: usize,
) -> Vec<TableId> {
    ctx.indexes
        .tables_by_allocation
        .iter()
        .filter(|(meta, _, _, id)| meta == metadata && start.map_or(true, |s| *id > s))
        .map(|(_, _, _, id)| *id)
        .take(limit)
        .collect()
}

/// A player's aggregate holdings per asset symbol: free balance plus
/// open reservations plus every seated or playing stake
pub fn player_aggregate_balance(ctx: &Context, player: &AccountId) -> BTreeMap<String, u64> {
    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    let mut add = |asset: &Asset| {
        *totals.entry(asset.symbol.clone()).or_default() += asset.amount;
    };

    if let Some(balance) = ctx.balance(player) {
        add(balance);
    }
    for id in ctx.open_reservations_of(player) {
        if let Some(r) = ctx.reservation(id) {
            add(&r.amount);
        }
    }
    for (_, table) in ctx.tables() {
        if let Some(stake) = table.cash.get(player) {
            add(stake);
        }
        if let Some(stake) = table.playing_cash.get(player) {
            add(stake);
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::model::{LedgerTime, Table};

    fn ctx_with_table() -> (Context, TableId) {
        let mut ctx = Context::new(ChainConfig::default());
        ctx.begin_block(LedgerTime(10)).unwrap();
        let id = ctx.create_table(Table::new(
            RoomId(1),
            "nl-holdem".into(),
            1,
            Asset::new(5, "CHP"),
        ));
        (ctx, id)
    }

    #[test]
    fn subscription_filters_changed_tables() {
        let (mut ctx, id) = ctx_with_table();
        let other = ctx.create_table(Table::new(
            RoomId(1),
            "plo".into(),
            1,
            Asset::new(5, "CHP"),
        ));
        ctx.take_changed_tables();

        ctx.with_table_mut(id, |t| {
            t.cash.insert(AccountId::from("a"), Asset::new(10, "CHP"));
            t.sync_occupancy();
        })
        .unwrap();
        ctx.with_table_mut(other, |t| {
            t.cash.insert(AccountId::from("b"), Asset::new(10, "CHP"));
            t.sync_occupancy();
        })
        .unwrap();

        let subscription = SubscriptionSet::new([id]);
        let snapshots = subscription.poll(&mut ctx);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].id, id);
        assert_eq!(snapshots[0].occupied_places, 1);

        // queue drained: a second poll sees nothing
        assert!(subscription.poll(&mut ctx).is_empty());
    }

    #[test]
    fn aggregate_balance_spans_sources() {
        let (mut ctx, id) = ctx_with_table();
        let alice = AccountId::from("alice");
        ctx.deposit(alice.clone(), Asset::new(100, "CHP")).unwrap();
        ctx.with_table_mut(id, |t| {
            t.cash.insert(alice.clone(), Asset::new(25, "CHP"));
            t.playing_cash.insert(alice.clone(), Asset::new(5, "CHP"));
            t.sync_occupancy();
        })
        .unwrap();

        let totals = player_aggregate_balance(&ctx, &alice);
        assert_eq!(totals.get("CHP"), Some(&130));
    }

    #[test]
    fn metadata_pagination_walks_index_order() {
        let (mut ctx, first) = ctx_with_table();
        let second = ctx.create_table(Table::new(
            RoomId(1),
            "nl-holdem".into(),
            1,
            Asset::new(5, "CHP"),
        ));
        let all = tables_by_metadata(&ctx, "nl-holdem", None, 10);
        assert_eq!(all.len(), 2);
        let rest = tables_by_metadata(&ctx, "nl-holdem", Some(first), 10);
        assert_eq!(rest, vec![second]);
    }
}
