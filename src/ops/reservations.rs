//! Reservation lifecycle operations: reserve, cancel, resolve
//!
//! The stake leaves the player's balance the moment the reservation is
//! created and comes back whole on every non-resolution path: cancel,
//! expiry, or a bumped proposal. Resolution moves it into table cash
//! instead; the amount is conserved across all paths.

use crate::errors::{CroupierResult, ValidationError};
use crate::events::VirtualOperation;
use crate::ledger::Context;
use crate::model::{AccountId, Asset, Reservation, ReservationId, TableId, TablePhase};
use tracing::debug;
use uuid::Uuid;

pub(crate) fn reserve_buy_in(
    ctx: &mut Context,
    player: AccountId,
    uid: Uuid,
    amount: Asset,
    metadata: String,
    protocol_version: String,
) -> CroupierResult<()> {
    if amount.is_zero() {
        return Err(ValidationError::NonPositiveAmount.into());
    }
    if ctx.reservation_by_uid(&player, uid).is_some() {
        return Err(ValidationError::DuplicateReservation { player }.into());
    }
    let quota = ctx.config.reservations.slots_per_user;
    if ctx.open_reservations_of(&player).len() as u32 >= quota {
        return Err(ValidationError::ReservationQuotaExceeded { player, quota }.into());
    }

    ctx.debit(&player, &amount)?;
    let now = ctx.head_time();
    let expiration = now.plus_secs(ctx.config.reservations.lifetime_secs);
    let id = ctx.create_reservation(Reservation {
        player: player.clone(),
        uid,
        amount,
        metadata,
        protocol_version,
        created: now,
        expiration,
        table: None,
    });
    debug!(%player, reservation = %id, "buy-in reserved");
    Ok(())
}

pub(crate) fn cancel_reservation(
    ctx: &mut Context,
    player: AccountId,
    uid: Uuid,
) -> CroupierResult<()> {
    let id = ctx
        .reservation_by_uid(&player, uid)
        .ok_or(ValidationError::UnknownReservation { player })?;
    release(ctx, id, false)
}

pub(crate) fn cancel_all_reservations(ctx: &mut Context, player: AccountId) -> CroupierResult<()> {
    for id in ctx.open_reservations_of(&player) {
        release(ctx, id, false)?;
    }
    Ok(())
}

/// Take a reservation out of the world: detach it from its allocated
/// table (if any), drop its unresolved KPI measurement, and refund the
/// full reserved amount. `expired` additionally records the
/// reservation-expired virtual operation; used by the sweep and by
/// proposal-bump collisions.
pub(crate) fn release(ctx: &mut Context, id: ReservationId, expired: bool) -> CroupierResult<()> {
    let r = match ctx.remove_reservation(id) {
        Some(r) => r,
        None => return Ok(()),
    };

    if let Some(table_id) = r.table {
        if ctx.table(table_id).is_some() {
            ctx.with_table_mut(table_id, |t| {
                if t.pending_proposals.get(&r.player) == Some(&id) {
                    t.pending_proposals.remove(&r.player);
                    t.sync_occupancy();
                }
            })?;
        }
    }

    if let Some(kpi_id) = ctx.indexes.kpi_by_reservation.get(&id).copied() {
        let unresolved = ctx
            .kpi_measurements
            .get(&kpi_id)
            .map(|m| m.waiting_resolve)
            .unwrap_or(false);
        if unresolved {
            ctx.remove_kpi(kpi_id);
        }
    }

    ctx.credit(&r.player, &r.amount)?;
    if expired {
        ctx.emit(VirtualOperation::ReservationExpired {
            reservation: id,
            player: r.player,
            refunded: r.amount,
        });
    }
    Ok(())
}

pub(crate) fn resolve_reservation(
    ctx: &mut Context,
    player: AccountId,
    uid: Uuid,
    table: TableId,
) -> CroupierResult<()> {
    let id = ctx
        .reservation_by_uid(&player, uid)
        .ok_or_else(|| ValidationError::UnknownReservation {
            player: player.clone(),
        })?;
    let r = ctx
        .reservation(id)
        .expect("reservation listed in the uid index must exist")
        .clone();
    if r.table != Some(table) {
        return Err(ValidationError::NotAllocatedToTable {
            reservation: id,
            table,
        }
        .into());
    }

    ctx.with_table_mut(table, |t| -> CroupierResult<()> {
        if t.pending_proposals.get(&player) != Some(&id) {
            return Err(ValidationError::NotAllocatedToTable {
                reservation: id,
                table,
            }
            .into());
        }
        t.pending_proposals.remove(&player);
        let stake = match t.cash.get(&player) {
            Some(existing) => existing.checked_add(&r.amount)?,
            None => r.amount.clone(),
        };
        t.cash.insert(player.clone(), stake);
        if t.phase == TablePhase::Free {
            t.phase = TablePhase::Waiting;
        }
        t.sync_occupancy();
        Ok(())
    })??;

    if let Some(kpi_id) = ctx.indexes.kpi_by_reservation.get(&id).copied() {
        ctx.with_kpi_mut(kpi_id, |m| m.waiting_resolve = false);
    }
    ctx.refresh_buy_in(table, &player);
    ctx.remove_reservation(id);
    debug!(%player, %table, "reservation resolved into table cash");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::model::LedgerTime;

    fn setup() -> (Context, AccountId) {
        let mut ctx = Context::new(ChainConfig::default());
        ctx.begin_block(LedgerTime(10)).unwrap();
        let alice = AccountId::from("alice");
        ctx.deposit(alice.clone(), Asset::new(100, "CHP")).unwrap();
        (ctx, alice)
    }

    #[test]
    fn reserve_escrows_the_stake() {
        let (mut ctx, alice) = setup();
        let uid = Uuid::from_u128(1);
        reserve_buy_in(
            &mut ctx,
            alice.clone(),
            uid,
            Asset::new(40, "CHP"),
            "nl-holdem".into(),
            "1.0.0".into(),
        )
        .unwrap();
        assert_eq!(ctx.balance(&alice).unwrap().amount, 60);
        assert!(ctx.reservation_by_uid(&alice, uid).is_some());
    }

    #[test]
    fn duplicate_uid_is_rejected() {
        let (mut ctx, alice) = setup();
        let uid = Uuid::from_u128(1);
        reserve_buy_in(
            &mut ctx,
            alice.clone(),
            uid,
            Asset::new(10, "CHP"),
            String::new(),
            "1.0.0".into(),
        )
        .unwrap();
        let err = reserve_buy_in(
            &mut ctx,
            alice.clone(),
            uid,
            Asset::new(10, "CHP"),
            String::new(),
            "1.0.0".into(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn quota_limits_open_reservations() {
        let (mut ctx, alice) = setup();
        ctx.config.reservations.slots_per_user = 2;
        for i in 0..2u128 {
            reserve_buy_in(
                &mut ctx,
                alice.clone(),
                Uuid::from_u128(i),
                Asset::new(10, "CHP"),
                String::new(),
                "1.0.0".into(),
            )
            .unwrap();
        }
        assert!(reserve_buy_in(
            &mut ctx,
            alice.clone(),
            Uuid::from_u128(9),
            Asset::new(10, "CHP"),
            String::new(),
            "1.0.0".into(),
        )
        .is_err());
    }

    #[test]
    fn cancel_refunds_in_full() {
        let (mut ctx, alice) = setup();
        let uid = Uuid::from_u128(1);
        reserve_buy_in(
            &mut ctx,
            alice.clone(),
            uid,
            Asset::new(40, "CHP"),
            String::new(),
            "1.0.0".into(),
        )
        .unwrap();
        cancel_reservation(&mut ctx, alice.clone(), uid).unwrap();
        assert_eq!(ctx.balance(&alice).unwrap().amount, 100);
        assert!(ctx.reservation_by_uid(&alice, uid).is_none());
    }
}
