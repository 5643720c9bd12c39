//! Rating engine: room reputation and table weight maintenance
//!
//! Pure scheduled aggregation with no validation and no failure path.
//! Given
//! the same measurement set and ledger time, every replica computes the
//! same ratings: all arithmetic is integer on the RATIO_SCALE basis and
//! the only "randomness" (the legacy pre-fork tie-break) derives from a
//! sha256 of ledger time and room id.

use crate::config::{RatingConfig, RATING_JITTER_SPAN, RATIO_SCALE};
use crate::ledger::Context;
use crate::model::{LedgerTime, RoomId};
use crate::ops::tables::derived_weight;
use sha2::{Digest, Sha256};
use std::ops::Bound;
use tracing::{debug, trace};

/// Opaque hook into the external referral-fee cascade, invoked once per
/// completed maintenance cycle
pub trait FeeDistributor {
    fn distribute_pending_fees(&mut self, now: LedgerTime);
}

/// Distributor for chains without a referral program
pub struct NoFees;

impl FeeDistributor for NoFees {
    fn distribute_pending_fees(&mut self, _now: LedgerTime) {}
}

/// Cross-cycle state: the globals are fixed when the cycle starts and
/// the cursors let a quota-exhausted pass resume next maintenance tick
#[derive(Clone, Debug)]
pub(crate) struct RatingCycle {
    global_weight_sum: i64,
    global_measurement_sum: i64,
    /// Last room rescored; `None` before the pass touched anything
    rescore_cursor: Option<RoomId>,
    rescore_done: bool,
    /// Last room fully weight-propagated
    propagate_cursor: Option<RoomId>,
}

/// One maintenance slice: rescore rooms, propagate weights, and on full
/// completion purge expired measurements and distribute fees
pub(crate) fn run_cycle(ctx: &mut Context, fees: &mut dyn FeeDistributor) {
    let now = ctx.head_time();
    if ctx.rating_cycle.is_none() {
        let (global_weight_sum, global_measurement_sum) = global_sums(ctx, now);
        ctx.rating_cycle = Some(RatingCycle {
            global_weight_sum,
            global_measurement_sum,
            rescore_cursor: None,
            rescore_done: false,
            propagate_cursor: None,
        });
        debug!(global_weight_sum, global_measurement_sum, "maintenance cycle opened");
    }

    if !rescore_rooms(ctx, now) {
        return;
    }
    if !propagate_weights(ctx, now) {
        return;
    }

    purge_expired(ctx, now);
    fees.distribute_pending_fees(now);
    ctx.rating_cycle = None;
    debug!("maintenance cycle completed");
}

/// Decay factor for a measurement of age `minutes`: linear from
/// RATIO_SCALE down to half at the fade threshold, then halving per
/// further fade interval
pub(crate) fn time_factor(minutes: u64, fade_minutes: u64) -> i64 {
    if minutes <= fade_minutes {
        RATIO_SCALE - (RATIO_SCALE / 2) * minutes as i64 / fade_minutes as i64
    } else {
        let halvings = (minutes - fade_minutes) / fade_minutes;
        if halvings >= 63 {
            0
        } else {
            (RATIO_SCALE / 2) >> halvings
        }
    }
}

/// Confidence multiplier for a room's measurement count: linear below
/// the threshold, logarithmic above
pub(crate) fn quantity_factor(count: u64, threshold: u64) -> i64 {
    if count < threshold {
        count as i64 * RATIO_SCALE / threshold as i64
    } else {
        RATIO_SCALE * (1 + (count / threshold).ilog2() as i64)
    }
}

/// Statistical rating: the room's decayed quality normalized against
/// the cross-room aggregate, pulled toward the population baseline by
/// the correction term and scaled by measurement confidence
pub(crate) fn post_fork_rating(
    room_weight_sum: i64,
    room_measurement_sum: i64,
    count: u64,
    global_weight_sum: i64,
    global_measurement_sum: i64,
    cfg: &RatingConfig,
) -> Option<i64> {
    let wr = room_weight_sum as i128;
    let mr = room_measurement_sum as i128;
    let wg = global_weight_sum as i128;
    let mg = global_measurement_sum as i128;
    let c = cfg.correction as i128;
    let k = cfg.constant as i128;
    let q = quantity_factor(count, cfg.quantity_threshold) as i128;

    let numerator = (wr * mg + wg * c) * q * k;
    let denominator = mg * (mr + c);
    if denominator == 0 {
        return None;
    }
    let rating = numerator / denominator;
    Some(rating.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
}

/// Legacy pre-fork scheme: a deterministic low-order perturbation of
/// the existing rating, only to break ties among equal rooms
pub(crate) fn pre_fork_rating(prev: i64, room: RoomId, now: LedgerTime) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(now.secs().to_le_bytes());
    hasher.update(room.0.to_le_bytes());
    let digest = hasher.finalize();
    let mut eight = [0u8; 8];
    eight.copy_from_slice(&digest[..8]);
    let seed = u64::from_le_bytes(eight);
    trace!(room = %room, seed = %hex::encode(eight), "legacy rating perturbation");

    let span = RATING_JITTER_SPAN;
    let jitter = (seed % (2 * span as u64 + 1)) as i64 - span;
    prev.saturating_add(jitter)
}

fn global_sums(ctx: &Context, now: LedgerTime) -> (i64, i64) {
    let fade = ctx.config.rating.fade_minutes;
    let mut weight_sum = 0i64;
    let mut measurement_sum = 0i64;
    for m in ctx.kpi_measurements.values() {
        if m.room == RoomId::NULL || !m.counts_at(now) {
            continue;
        }
        let factor = time_factor(now.minutes_since(m.created), fade);
        weight_sum = weight_sum.saturating_add(m.weight * factor / RATIO_SCALE);
        measurement_sum = measurement_sum.saturating_add(factor);
    }
    for m in ctx.standby_measurements.values() {
        if m.room == RoomId::NULL || !m.counts_at(now) {
            continue;
        }
        let factor = time_factor(now.minutes_since(m.created), fade);
        weight_sum = weight_sum.saturating_add(m.weight * factor / RATIO_SCALE);
        measurement_sum = measurement_sum.saturating_add(factor);
    }
    (weight_sum, measurement_sum)
}

fn room_sums(ctx: &Context, room: RoomId, now: LedgerTime) -> (i64, i64, u64) {
    let fade = ctx.config.rating.fade_minutes;
    let mut weight_sum = 0i64;
    let mut measurement_sum = 0i64;
    let mut count = 0u64;

    if let Some(ids) = ctx.indexes.kpi_by_room.get(&room) {
        for id in ids {
            let Some(m) = ctx.kpi_measurements.get(id) else {
                continue;
            };
            if !m.counts_at(now) {
                continue;
            }
            let factor = time_factor(now.minutes_since(m.created), fade);
            weight_sum = weight_sum.saturating_add(m.weight * factor / RATIO_SCALE);
            measurement_sum = measurement_sum.saturating_add(factor);
            count += 1;
        }
    }
    if let Some(ids) = ctx.indexes.standby_by_room.get(&room) {
        for id in ids {
            let Some(m) = ctx.standby_measurements.get(id) else {
                continue;
            };
            if !m.counts_at(now) {
                continue;
            }
            let factor = time_factor(now.minutes_since(m.created), fade);
            weight_sum = weight_sum.saturating_add(m.weight * factor / RATIO_SCALE);
            measurement_sum = measurement_sum.saturating_add(factor);
            count += 1;
        }
    }
    (weight_sum, measurement_sum, count)
}

/// First pass: rescore every eligible room, bounded by quota.
/// Returns true once the pass has covered the whole room set.
fn rescore_rooms(ctx: &mut Context, now: LedgerTime) -> bool {
    let cycle = ctx.rating_cycle.clone().expect("cycle state opened by run_cycle");
    if cycle.rescore_done {
        return true;
    }
    let mut cursor = cycle.rescore_cursor;
    let mut quota = ctx.config.rating.room_recomputations_per_cycle;

    while quota > 0 {
        let next = ctx
            .rooms
            .range((
                Bound::Excluded(cursor.unwrap_or(RoomId::NULL)),
                Bound::Unbounded,
            ))
            .map(|(id, _)| *id)
            .next();
        let id = match next {
            Some(id) => id,
            None => {
                if let Some(cycle) = ctx.rating_cycle.as_mut() {
                    cycle.rescore_done = true;
                    cycle.rescore_cursor = None;
                }
                return true;
            }
        };
        cursor = Some(id);

        // rooms mid weight-propagation keep their aggregates untouched
        let mid_propagation = ctx
            .room(id)
            .map(|r| r.last_updated_table.is_some())
            .unwrap_or(true);
        if mid_propagation {
            continue;
        }

        let (weight_sum, measurement_sum, count) = room_sums(ctx, id, now);
        let post_fork = now.secs() >= ctx.config.rating.formula_fork_time;
        let new_rating = if post_fork {
            post_fork_rating(
                weight_sum,
                measurement_sum,
                count,
                cycle.global_weight_sum,
                cycle.global_measurement_sum,
                &ctx.config.rating,
            )
        } else {
            let prev = ctx.room(id).map(|r| r.rating).unwrap_or(0);
            Some(pre_fork_rating(prev, id, now))
        };

        if let Ok(room) = ctx.room_mut(id) {
            room.weight_sum_by_time_factor = weight_sum;
            room.measurement_sum_by_time_factor = measurement_sum;
            room.measurement_quantity = count;
            room.last_rating_update = now;
            if let Some(rating) = new_rating {
                room.rating = rating;
            }
        }
        quota -= 1;
    }

    if let Some(cycle) = ctx.rating_cycle.as_mut() {
        cycle.rescore_cursor = cursor;
    }
    false
}

/// Second pass: recompute the weight of every table whose room's rating
/// changed, bounded by its own quota, resumable mid-room
fn propagate_weights(ctx: &mut Context, now: LedgerTime) -> bool {
    let cycle = ctx.rating_cycle.clone().expect("cycle state opened by run_cycle");
    let mut cursor = cycle.propagate_cursor;
    let mut quota = ctx.config.rating.table_weight_recomputations_per_cycle;

    loop {
        let next = ctx
            .rooms
            .range((
                Bound::Excluded(cursor.unwrap_or(RoomId::NULL)),
                Bound::Unbounded,
            ))
            .filter(|(_, r)| r.rating != r.prev_rating || r.last_updated_table.is_some())
            .map(|(id, _)| *id)
            .next();
        let room_id = match next {
            Some(id) => id,
            None => return true,
        };

        let rating = ctx.room(room_id).map(|r| r.rating).unwrap_or(0);
        let table_cursor = ctx.room(room_id).and_then(|r| r.last_updated_table);
        let tables: Vec<crate::model::TableId> = ctx
            .indexes
            .tables_by_room
            .get(&room_id)
            .map(|set| match table_cursor {
                Some(after) => set.range((Bound::Excluded(after), Bound::Unbounded)).copied().collect(),
                None => set.iter().copied().collect(),
            })
            .unwrap_or_default();

        for table_id in tables {
            if quota == 0 {
                // last_updated_table already names the last table done;
                // this one reruns next cycle
                if let Some(cycle) = ctx.rating_cycle.as_mut() {
                    cycle.propagate_cursor = cursor;
                }
                return false;
            }
            let _ = ctx.with_table_mut(table_id, |t| {
                t.weight = derived_weight(rating, t.is_alive(now));
            });
            if let Ok(room) = ctx.room_mut(room_id) {
                room.last_updated_table = Some(table_id);
            }
            quota -= 1;
        }

        // room fully propagated; its prev_rating may now be reset
        if let Ok(room) = ctx.room_mut(room_id) {
            room.prev_rating = room.rating;
            room.last_updated_table = None;
        }
        cursor = Some(room_id);
        if let Some(cycle) = ctx.rating_cycle.as_mut() {
            cycle.propagate_cursor = cursor;
        }
    }
}

/// KPI and standby expirations are independent; both purge at cycle end
fn purge_expired(ctx: &mut Context, now: LedgerTime) {
    let due_kpi: Vec<_> = ctx
        .indexes
        .kpi_by_expiration
        .iter()
        .take_while(|(expiration, _)| *expiration <= now)
        .map(|(_, id)| *id)
        .collect();
    for id in due_kpi {
        ctx.remove_kpi(id);
    }
    let due_standby: Vec<_> = ctx
        .indexes
        .standby_by_expiration
        .iter()
        .take_while(|(expiration, _)| *expiration <= now)
        .map(|(_, id)| *id)
        .collect();
    for id in due_standby {
        ctx.remove_standby(id);
    }
}
