//! Table management, direct buy-ins and buy-outs
//!
//! Create/update double as the room's liveness heartbeat: they extend
//! the alive window, re-derive the table weight from the room rating
//! and mint the standby rating measurement for the window.

use crate::errors::{CroupierResult, ValidationError};
use crate::ledger::Context;
use crate::model::{AccountId, Asset, StandbyMeasurement, Table, TableId, TablePhase};
use tracing::debug;

pub(crate) fn create_table(
    ctx: &mut Context,
    owner: AccountId,
    room: crate::model::RoomId,
    metadata: String,
    required_witnesses: u32,
    min_accepted_proposal: Asset,
) -> CroupierResult<TableId> {
    let room_obj = ctx.room(room).ok_or(ValidationError::UnknownRoom(room))?;
    if room_obj.owner != owner {
        return Err(ValidationError::NotAuthorized { account: owner }.into());
    }
    if min_accepted_proposal.is_zero() {
        return Err(ValidationError::NonPositiveAmount.into());
    }

    let id = ctx.create_table(Table::new(room, metadata, required_witnesses, min_accepted_proposal));
    keep_alive(ctx, id)?;
    debug!(table = %id, %room, "table created");
    Ok(id)
}

pub(crate) fn update_table(
    ctx: &mut Context,
    owner: AccountId,
    table: TableId,
    metadata: Option<String>,
    required_witnesses: Option<u32>,
    min_accepted_proposal: Option<Asset>,
) -> CroupierResult<()> {
    let t = ctx.table(table).ok_or(ValidationError::UnknownTable(table))?;
    let room = ctx
        .room(t.room)
        .ok_or(ValidationError::UnknownRoom(t.room))?;
    if room.owner != owner {
        return Err(ValidationError::NotAuthorized { account: owner }.into());
    }
    if let Some(min) = &min_accepted_proposal {
        if min.is_zero() {
            return Err(ValidationError::NonPositiveAmount.into());
        }
    }

    ctx.with_table_mut(table, |t| {
        if let Some(meta) = metadata {
            t.metadata = meta;
        }
        if let Some(witnesses) = required_witnesses {
            t.required_witnesses = witnesses;
        }
        if let Some(min) = min_accepted_proposal {
            t.min_accepted_proposal = min;
        }
    })?;
    keep_alive(ctx, table)
}

/// Alive heartbeat: extend the liveness window, re-derive weight from
/// the room rating, and record the standby measurement for this window
pub(crate) fn keep_alive(ctx: &mut Context, table: TableId) -> CroupierResult<()> {
    let now = ctx.head_time();
    let alive_until = now.plus_secs(ctx.config.liveness.table_alive_secs);
    let (room_id, rating) = {
        let t = ctx.table(table).ok_or(ValidationError::UnknownTable(table))?;
        let rating = ctx.room(t.room).map(|r| r.rating).unwrap_or(0);
        (t.room, rating)
    };

    ctx.with_table_mut(table, |t| {
        t.alive_until = alive_until;
        t.weight = rating;
    })?;

    // one standby measurement per heartbeat window
    if ctx.last_standby_at.get(&table) != Some(&now) {
        let expiration = now.plus_secs(ctx.config.rating.standby_lifetime_secs);
        ctx.create_standby(StandbyMeasurement {
            room: room_id,
            table,
            weight: ctx.config.rating.standby_weight,
            created: now,
            expiration,
        });
        ctx.last_standby_at.insert(table, now);
    }
    Ok(())
}

/// Weight rule shared with the rating engine: alive tables carry the
/// room rating, quiet tables its negated magnitude
pub(crate) fn derived_weight(rating: i64, alive: bool) -> i64 {
    if alive {
        rating
    } else {
        -rating.abs()
    }
}

pub(crate) fn buy_in(
    ctx: &mut Context,
    player: AccountId,
    table: TableId,
    amount: Asset,
) -> CroupierResult<()> {
    if amount.is_zero() {
        return Err(ValidationError::NonPositiveAmount.into());
    }
    let t = ctx.table(table).ok_or(ValidationError::UnknownTable(table))?;
    let room = ctx
        .room(t.room)
        .ok_or(ValidationError::UnknownRoom(t.room))?;
    if room.owner == player {
        return Err(ValidationError::OwnTableProhibited.into());
    }
    if t.pending_proposals.contains_key(&player) {
        return Err(ValidationError::AlreadySeated { player, table }.into());
    }
    amount.same_symbol(&t.min_accepted_proposal)?;
    let topping_up = t.cash.contains_key(&player) || t.playing_cash.contains_key(&player);
    if !topping_up && amount < t.min_accepted_proposal {
        return Err(ValidationError::BelowMinimumStake {
            offered: amount.to_string(),
            minimum: t.min_accepted_proposal.to_string(),
        }
        .into());
    }

    ctx.debit(&player, &amount)?;
    ctx.with_table_mut(table, |t| -> CroupierResult<()> {
        let stake = match t.cash.get(&player) {
            Some(existing) => existing.checked_add(&amount)?,
            None => amount.clone(),
        };
        t.cash.insert(player.clone(), stake);
        if t.phase == TablePhase::Free {
            t.phase = TablePhase::Waiting;
        }
        t.sync_occupancy();
        Ok(())
    })??;
    ctx.refresh_buy_in(table, &player);
    Ok(())
}

pub(crate) fn buy_out(
    ctx: &mut Context,
    player: AccountId,
    table: TableId,
    amount: Asset,
) -> CroupierResult<()> {
    if amount.is_zero() {
        return Err(ValidationError::NonPositiveAmount.into());
    }
    let t = ctx.table(table).ok_or(ValidationError::UnknownTable(table))?;

    if t.playing_cash.contains_key(&player) {
        // mid-hand: only an intent record, honored at result resolution
        ctx.with_table_mut(table, |t| {
            t.buy_out_intents.insert(player.clone(), amount);
        })?;
        debug!(%player, %table, "buy-out intent recorded mid-hand");
        return Ok(());
    }

    let stake = t
        .cash
        .get(&player)
        .cloned()
        .ok_or_else(|| ValidationError::NotSeated {
            player: player.clone(),
            table,
        })?;
    let withdrawn = stake.checked_sub(&amount).map_err(|_| {
        ValidationError::InsufficientBalance {
            account: player.clone(),
            need: amount.to_string(),
            have: stake.to_string(),
        }
    })?;

    ctx.with_table_mut(table, |t| {
        if withdrawn.is_zero() {
            t.cash.remove(&player);
        } else {
            t.cash.insert(player.clone(), withdrawn.clone());
        }
        if t.cash.is_empty() && t.playing_cash.is_empty() && t.phase == TablePhase::Waiting {
            t.phase = TablePhase::Free;
        }
        t.sync_occupancy();
    })?;
    if withdrawn.is_zero() {
        ctx.remove_buy_in(table, &player);
    }
    ctx.credit(&player, &amount)?;
    Ok(())
}
