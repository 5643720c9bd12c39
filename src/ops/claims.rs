//! Game start/result claims and the owner's forced reset
//!
//! Claims may come from the room's game witnesses or from players with
//! an active stake at the table; everyone else is rejected before the
//! voting engine sees the payload.

use crate::errors::{CroupierResult, ValidationError};
use crate::events::{GameEventKind, VirtualOperation};
use crate::ledger::Context;
use crate::model::{
    AccountId, GameInitiation, GameResultData, TableId, TablePhase, VotePayload, VotingPhase,
};
use crate::voting;

pub(crate) fn game_start_claim(
    ctx: &mut Context,
    table: TableId,
    voter: AccountId,
    initiation: GameInitiation,
) -> CroupierResult<()> {
    check_claim_authority(ctx, table, &voter)?;
    voting::submit_claim(ctx, table, voter, VotePayload::GameStart(initiation))
}

pub(crate) fn game_result_claim(
    ctx: &mut Context,
    table: TableId,
    voter: AccountId,
    result: GameResultData,
) -> CroupierResult<()> {
    check_claim_authority(ctx, table, &voter)?;
    voting::submit_claim(ctx, table, voter, VotePayload::GameResult(result))
}

fn check_claim_authority(ctx: &Context, table: TableId, voter: &AccountId) -> CroupierResult<()> {
    let t = ctx.table(table).ok_or(ValidationError::UnknownTable(table))?;
    let room = ctx
        .room(t.room)
        .ok_or(ValidationError::UnknownRoom(t.room))?;
    let is_player = t.cash.contains_key(voter) || t.playing_cash.contains_key(voter);
    if !room.is_witness(voter) && !is_player {
        return Err(ValidationError::IneligibleVoter {
            voter: voter.clone(),
            table,
        }
        .into());
    }
    Ok(())
}

/// Forced rollback by the room owner: the hand is undone, every seat is
/// refunded to its player's balance and the table returns to free.
/// Pending proposals survive; they belong to the allocation engine.
pub(crate) fn reset_game(ctx: &mut Context, owner: AccountId, table: TableId) -> CroupierResult<()> {
    let t = ctx.table(table).ok_or(ValidationError::UnknownTable(table))?;
    let room = ctx
        .room(t.room)
        .ok_or(ValidationError::UnknownRoom(t.room))?;
    if room.owner != owner {
        return Err(ValidationError::NotAuthorized { account: owner }.into());
    }

    if ctx.voting(table).is_some() {
        ctx.remove_voting(table);
    }
    voting::rollback_round(ctx, table, VotingPhase::GameResult)?;

    let refunds = ctx.with_table_mut(table, |t| {
        let refunds: Vec<_> = t.cash.iter().map(|(p, a)| (p.clone(), a.clone())).collect();
        t.cash.clear();
        t.buy_out_intents.clear();
        t.voted_witnesses.clear();
        t.phase = TablePhase::Free;
        t.sync_occupancy();
        refunds
    })?;
    for (player, stake) in refunds {
        ctx.credit(&player, &stake)?;
        ctx.remove_buy_in(table, &player);
        ctx.emit(VirtualOperation::Game {
            table,
            event: GameEventKind::BuyInReturned {
                player,
                amount: stake,
            },
        });
    }
    ctx.emit(VirtualOperation::Game {
        table,
        event: GameEventKind::Rollback,
    });
    Ok(())
}
