//! Allocation engine: matches queued reservations to vacant table slots
//!
//! Runs once per block under a configured work quota. Placement is
//! greedy over a total index order (emptier tables first, then heavier
//! tables, then identity) so every replica picks the same table.
//! Unmatched reservations are not an error; they stay queued until they
//! expire.

use crate::errors::CroupierResult;
use crate::events::VirtualOperation;
use crate::ledger::indexes::ReservationScanKey;
use crate::ledger::Context;
use crate::model::{AccountId, KpiMeasurement, LedgerTime, ReservationId, TableId, TablePhase};
use crate::ops::reservations;
use crate::config::RATIO_SCALE;
use std::cmp::Reverse;
use tracing::{debug, warn};

/// Per-block entry point: expiry sweeps first, then quota-bounded
/// placement resuming from the previous block's cursor
pub(crate) fn process_block(ctx: &mut Context) {
    sweep_expired_reservations(ctx);
    sweep_expired_buy_ins(ctx);
    allocate(ctx);
}

fn sweep_expired_reservations(ctx: &mut Context) {
    let now = ctx.head_time();
    // two status prefixes, each ordered by expiration
    let mut due: Vec<ReservationId> = Vec::new();
    for status in [0u8, 1u8] {
        due.extend(
            ctx.indexes
                .reservations_by_status
                .range((status, LedgerTime(0), ReservationId(0))..=(status, now, ReservationId(u64::MAX)))
                .map(|(_, _, id)| *id),
        );
    }
    for id in due {
        if let Err(e) = reservations::release(ctx, id, true) {
            warn!(reservation = %id, error = %e, "expiry refund failed");
        }
    }
}

fn sweep_expired_buy_ins(ctx: &mut Context) {
    let now = ctx.head_time();
    let due: Vec<(TableId, AccountId)> = ctx
        .indexes
        .buy_ins_by_expiration
        .iter()
        .take_while(|(expiration, _, _)| *expiration <= now)
        .map(|(_, table, player)| (*table, player.clone()))
        .collect();

    for (table_id, player) in due {
        let mid_hand = ctx
            .table(table_id)
            .map(|t| t.playing_cash.contains_key(&player))
            .unwrap_or(false);
        if mid_hand {
            // the seat cannot be vacated under an active hand; liveness
            // refreshes when the hand resolves
            ctx.refresh_buy_in(table_id, &player);
            continue;
        }
        ctx.remove_buy_in(table_id, &player);
        let refunded = match ctx.with_table_mut(table_id, |t| {
            let stake = t.cash.remove(&player);
            if t.cash.is_empty() && t.playing_cash.is_empty() && t.phase == TablePhase::Waiting {
                t.phase = TablePhase::Free;
            }
            t.sync_occupancy();
            stake
        }) {
            Ok(stake) => stake,
            Err(_) => continue,
        };
        if let Some(stake) = refunded {
            if let Err(e) = ctx.credit(&player, &stake) {
                warn!(%player, error = %e, "abandoned-seat refund failed");
                continue;
            }
            ctx.emit(VirtualOperation::BuyInExpired {
                table: table_id,
                player: player.clone(),
                refunded: stake,
            });
        }
    }
}

fn allocate(ctx: &mut Context) {
    let quota = ctx.config.reservations.allocated_per_block;
    let mut processed = 0u32;
    let mut cursor = ctx.allocation_cursor.take();

    while processed < quota {
        let next: Option<ReservationScanKey> = {
            let range = match &cursor {
                Some(after) => ctx
                    .indexes
                    .reservations_by_status
                    .range((
                        after.0,
                        after.1,
                        ReservationId(after.2 .0.saturating_add(1)),
                    )..)
                    .next(),
                None => ctx.indexes.reservations_by_status.iter().next(),
            };
            range.copied()
        };
        let key = match next {
            // end of queue: next block starts from the top again
            None => return,
            // allocated entries sort after every unallocated one
            Some(key) if key.0 != 0 => return,
            Some(key) => key,
        };
        cursor = Some(key);
        processed += 1;
        if let Err(e) = try_place(ctx, key.2) {
            warn!(reservation = %key.2, error = %e, "placement failed");
        }
        if processed == quota {
            // quota exhausted mid-queue; resume here next block
            ctx.allocation_cursor = Some(key);
        }
    }
}

fn try_place(ctx: &mut Context, id: ReservationId) -> CroupierResult<()> {
    let r = match ctx.reservation(id) {
        Some(r) => r.clone(),
        None => return Ok(()),
    };

    let min = ctx.config.matchmaking.min_desired_players;
    let max = ctx.config.matchmaking.max_desired_players;
    let upper = max.saturating_sub(1);

    let mut target = find_table(ctx, &r, min, upper);
    if target.is_none() && min > 0 {
        // desired window empty: retry with the minimum relaxed to zero
        target = find_table(ctx, &r, 0, min.saturating_sub(1));
    }
    let table_id = match target {
        Some(t) => t,
        None => return Ok(()), // stays queued for a future block
    };

    // a different reservation already proposing this player here is
    // bumped: refunded and expired before the new entry lands
    let bumped = ctx
        .table(table_id)
        .and_then(|t| t.pending_proposals.get(&r.player).copied())
        .filter(|prior| *prior != id);
    if let Some(prior) = bumped {
        reservations::release(ctx, prior, true)?;
    }

    ctx.with_table_mut(table_id, |t| {
        t.pending_proposals.insert(r.player.clone(), id);
        t.sync_occupancy();
    })?;
    ctx.with_reservation_mut(id, |res| res.table = Some(table_id))?;
    refresh_kpi(ctx, id, table_id);
    ctx.emit(VirtualOperation::ReservationAllocated {
        reservation: id,
        player: r.player.clone(),
        table: table_id,
    });
    debug!(reservation = %id, player = %r.player, table = %table_id, "reservation placed");
    Ok(())
}

/// First acceptable table in index order within the occupancy window
fn find_table(
    ctx: &Context,
    r: &crate::model::Reservation,
    lower: u32,
    upper: u32,
) -> Option<TableId> {
    if lower > upper {
        return None;
    }
    let floor = ctx.config.matchmaking.min_table_weight;
    let start = (r.metadata.clone(), lower, Reverse(i64::MAX), TableId(0));
    let end = (r.metadata.clone(), upper, Reverse(i64::MIN), TableId(u64::MAX));

    for (_, _, _, table_id) in ctx.indexes.tables_by_allocation.range(start..=end) {
        let Some(table) = ctx.table(*table_id) else {
            continue;
        };
        if table.weight < floor {
            continue;
        }
        let Some(room) = ctx.room(table.room) else {
            continue;
        };
        if room.protocol_version != r.protocol_version {
            continue;
        }
        if room.owner == r.player {
            continue;
        }
        if table.min_accepted_proposal.symbol != r.amount.symbol
            || r.amount.amount < table.min_accepted_proposal.amount
        {
            continue;
        }
        if table.is_waiting_at(&r.player) || table.is_playing_at(&r.player) {
            continue;
        }
        return Some(*table_id);
    }
    None
}

/// Create or refresh the table's KPI measurement for this reservation;
/// its weight only counts once the reservation resolves
fn refresh_kpi(ctx: &mut Context, reservation: ReservationId, table_id: TableId) {
    let now = ctx.head_time();
    let expiration = now.plus_secs(ctx.config.rating.kpi_lifetime_secs);
    if let Some(kpi_id) = ctx.indexes.kpi_by_reservation.get(&reservation).copied() {
        ctx.with_kpi_mut(kpi_id, |m| {
            m.table = table_id;
            m.expiration = expiration;
        });
        return;
    }
    let room = match ctx.table(table_id) {
        Some(t) => t.room,
        None => return,
    };
    ctx.create_kpi(KpiMeasurement {
        room,
        table: table_id,
        reservation,
        weight: RATIO_SCALE,
        waiting_resolve: true,
        created: now,
        expiration,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::model::{Asset, Reservation};
    use crate::ops::{rooms, tables};
    use uuid::Uuid;

    fn setup_table(ctx: &mut Context, host: &str, weight_rating: i64) -> TableId {
        let host = AccountId::from(host);
        let room = rooms::create_room(
            ctx,
            host.clone(),
            "wss://room".into(),
            "1.0.0".into(),
            String::new(),
        )
        .unwrap();
        ctx.room_mut(room).unwrap().rating = weight_rating;
        tables::create_table(
            ctx,
            host,
            room,
            "nl-holdem".into(),
            1,
            Asset::new(5, "CHP"),
        )
        .unwrap()
    }

    fn reserve(ctx: &mut Context, player: &str, amount: u64) -> ReservationId {
        let player = AccountId::from(player);
        ctx.deposit(player.clone(), Asset::new(amount, "CHP")).unwrap();
        ctx.debit(&player, &Asset::new(amount, "CHP")).unwrap();
        let now = ctx.head_time();
        ctx.create_reservation(Reservation {
            player,
            uid: Uuid::from_u128(amount as u128),
            amount: Asset::new(amount, "CHP"),
            metadata: "nl-holdem".into(),
            protocol_version: "1.0.0".into(),
            created: now,
            expiration: now.plus_secs(60),
            table: None,
        })
    }

    #[test]
    fn places_into_matching_table() {
        let mut ctx = Context::new(ChainConfig::default());
        ctx.begin_block(LedgerTime(10)).unwrap();
        let table = setup_table(&mut ctx, "host", 5);
        let id = reserve(&mut ctx, "alice", 10);

        allocate(&mut ctx);

        let t = ctx.table(table).unwrap();
        assert_eq!(t.pending_proposals.get(&AccountId::from("alice")), Some(&id));
        assert_eq!(t.occupied_places, 1);
        assert_eq!(ctx.reservation(id).unwrap().table, Some(table));
        assert!(ctx
            .virtual_operations()
            .iter()
            .any(|op| matches!(op, VirtualOperation::ReservationAllocated { reservation, .. } if *reservation == id)));
    }

    #[test]
    fn skips_tables_below_weight_floor() {
        let mut ctx = Context::new(ChainConfig::default());
        ctx.config.matchmaking.min_table_weight = 1;
        ctx.begin_block(LedgerTime(10)).unwrap();
        setup_table(&mut ctx, "host", 0);
        let id = reserve(&mut ctx, "alice", 10);

        allocate(&mut ctx);
        assert_eq!(ctx.reservation(id).unwrap().table, None);
    }

    #[test]
    fn skips_owner_and_protocol_mismatch() {
        let mut ctx = Context::new(ChainConfig::default());
        ctx.begin_block(LedgerTime(10)).unwrap();
        setup_table(&mut ctx, "alice", 5);
        let id = reserve(&mut ctx, "alice", 10);
        allocate(&mut ctx);
        // own table: not placed
        assert_eq!(ctx.reservation(id).unwrap().table, None);

        let bob = reserve(&mut ctx, "bob", 20);
        ctx.with_reservation_mut(bob, |r| r.protocol_version = "2.0.0".into())
            .unwrap();
        allocate(&mut ctx);
        assert_eq!(ctx.reservation(bob).unwrap().table, None);
    }

    #[test]
    fn quota_bounds_work_and_cursor_resumes() {
        let mut ctx = Context::new(ChainConfig::default());
        ctx.config.reservations.allocated_per_block = 1;
        ctx.begin_block(LedgerTime(10)).unwrap();
        setup_table(&mut ctx, "host", 5);
        let first = reserve(&mut ctx, "alice", 10);
        let second = reserve(&mut ctx, "bob", 11);

        allocate(&mut ctx);
        let placed_first = ctx.reservation(first).unwrap().table.is_some();
        let placed_second = ctx.reservation(second).unwrap().table.is_some();
        assert!(placed_first ^ placed_second, "exactly one placed under quota 1");

        allocate(&mut ctx);
        assert!(ctx.reservation(first).unwrap().table.is_some());
        assert!(ctx.reservation(second).unwrap().table.is_some());
    }

    #[test]
    fn expiration_sweep_refunds_and_detaches() {
        let mut ctx = Context::new(ChainConfig::default());
        ctx.begin_block(LedgerTime(10)).unwrap();
        let table = setup_table(&mut ctx, "host", 5);
        let id = reserve(&mut ctx, "alice", 10);
        allocate(&mut ctx);
        assert_eq!(ctx.table(table).unwrap().occupied_places, 1);

        let expiration = ctx.reservation(id).unwrap().expiration;
        ctx.begin_block(expiration.plus_secs(1)).unwrap();
        sweep_expired_reservations(&mut ctx);

        assert!(ctx.reservation(id).is_none());
        assert_eq!(ctx.table(table).unwrap().occupied_places, 0);
        assert_eq!(ctx.balance(&AccountId::from("alice")).unwrap().amount, 10);
        assert!(ctx
            .virtual_operations()
            .iter()
            .any(|op| matches!(op, VirtualOperation::ReservationExpired { .. })));
    }
}
