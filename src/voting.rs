//! Voting consensus engine
//!
//! Decides a single agreed-upon outcome for "did the hand start as
//! claimed" and "did it end with this result" from independently
//! submitted claims, tolerating a minority of faulty or absent voters.
//! The first value to cross the quorum threshold becomes the etalon and
//! never changes; disagreeing voters are reported as fraud, and a round
//! that cannot reach quorum rolls the hand back: safety over liveness.

use crate::errors::{CroupierResult, ValidationError};
use crate::events::{GameEventKind, VirtualOperation};
use crate::ledger::Context;
use crate::model::{
    AccountId, Asset, GameInitiation, GameResultData, TableId, TablePhase, TableVoting,
    VotePayload, VotingPhase,
};
use tracing::{debug, warn};

/// Entry point for both claim kinds, called by the operation layer
/// after table-level authority checks
pub(crate) fn submit_claim(
    ctx: &mut Context,
    table_id: TableId,
    voter: AccountId,
    payload: VotePayload,
) -> CroupierResult<()> {
    let phase = payload.phase();
    if ctx.table(table_id).is_none() {
        return Err(ValidationError::UnknownTable(table_id).into());
    }

    // a lingering closed record of the previous phase finalizes when the
    // next phase's first claim arrives
    if let Some(record) = ctx.voting(table_id) {
        if record.phase != phase && record.etalon_vote.is_some() {
            ctx.remove_voting(table_id);
        }
    }

    match ctx.voting(table_id) {
        Some(record) if record.phase == phase => {
            if !record.is_eligible(&voter) {
                // eligible at the table but not drawn into this round:
                // an auditable rejection, not a hard failure
                ctx.emit(VirtualOperation::Game {
                    table: table_id,
                    event: GameEventKind::VoteRejected {
                        voter,
                        reason: "not in the required voter set of the open round".into(),
                    },
                });
                return Ok(());
            }
            if record.has_voted(&voter) {
                return Err(ValidationError::DuplicateVote { voter }.into());
            }
            // pre-etalon claims are checked against live table state;
            // once the outcome resolved, a vote is only compared to the
            // etalon (late disagreement = fraud, not rejection)
            if record.etalon_vote.is_none() {
                validate_payload(ctx, table_id, &payload)?;
            }
            admit_vote(ctx, table_id, voter, payload)
        }
        Some(_) => Err(ValidationError::WrongPhase { table: table_id }.into()),
        None => {
            validate_payload(ctx, table_id, &payload)?;
            open_round(ctx, table_id, phase)?;
            let record = ctx
                .voting(table_id)
                .expect("voting record inserted by open_round");
            if !record.is_eligible(&voter) {
                ctx.emit(VirtualOperation::Game {
                    table: table_id,
                    event: GameEventKind::VoteRejected {
                        voter,
                        reason: "not in the required voter set of the open round".into(),
                    },
                });
                return Ok(());
            }
            admit_vote(ctx, table_id, voter, payload)
        }
    }
}

/// Structural and phase validation against current table state.
/// These failures never enter the voting record.
fn validate_payload(ctx: &Context, table_id: TableId, payload: &VotePayload) -> CroupierResult<()> {
    let table = ctx
        .table(table_id)
        .ok_or(ValidationError::UnknownTable(table_id))?;
    match payload {
        VotePayload::GameStart(initiation) => {
            if !matches!(table.phase, TablePhase::Waiting | TablePhase::VotingForPlaying) {
                return Err(ValidationError::WrongPhase { table: table_id }.into());
            }
            if initiation.players.is_empty()
                || !initiation.players.iter().all(|p| table.cash.contains_key(p))
            {
                return Err(ValidationError::StartPlayersNotSeated.into());
            }
        }
        VotePayload::GameResult(result) => {
            if !matches!(table.phase, TablePhase::Playing | TablePhase::VotingForResults) {
                return Err(ValidationError::WrongPhase { table: table_id }.into());
            }
            let playing: Vec<&AccountId> = table.playing_cash.keys().collect();
            if result.balances.len() != playing.len()
                || !playing.iter().all(|p| result.balances.contains_key(*p))
            {
                return Err(ValidationError::ResultPlayersMismatch.into());
            }
            let claimed: u64 = result.balances.values().sum();
            if claimed != table.playing_total() {
                return Err(ValidationError::ResultNotConserved.into());
            }
            if !result.buy_outs.iter().all(|p| result.balances.contains_key(p)) {
                return Err(ValidationError::ResultPlayersMismatch.into());
            }
        }
    }
    Ok(())
}

/// Create the voting record for a table's first claim of a phase
fn open_round(ctx: &mut Context, table_id: TableId, phase: VotingPhase) -> CroupierResult<()> {
    let now = ctx.head_time();
    let expiration = now.plus_secs(ctx.config.voting.expiration_secs);
    let (players, witnesses, substitution_percent) = {
        let table = ctx
            .table(table_id)
            .ok_or(ValidationError::UnknownTable(table_id))?;
        let room = ctx
            .room(table.room)
            .ok_or(ValidationError::UnknownRoom(table.room))?;
        match phase {
            VotingPhase::GameStart => (
                table.active_players(),
                room.witness_draw(table.required_witnesses),
                ctx.config.voting.start_substitution_percent,
            ),
            VotingPhase::GameResult => {
                // the witness set committed at hand start votes the result
                let committed = if table.voted_witnesses.is_empty() {
                    room.witness_draw(table.required_witnesses)
                } else {
                    table.voted_witnesses.clone()
                };
                (
                    table.active_players(),
                    committed,
                    ctx.config.voting.result_substitution_percent,
                )
            }
        }
    };
    let allowed_substitutions = (witnesses.len() as u32 * substitution_percent) / 100;

    ctx.with_table_mut(table_id, |t| {
        t.phase = match phase {
            VotingPhase::GameStart => {
                t.voted_witnesses = witnesses.clone();
                TablePhase::VotingForPlaying
            }
            VotingPhase::GameResult => TablePhase::VotingForResults,
        };
    })?;
    ctx.insert_voting(
        table_id,
        TableVoting::new(phase, players, witnesses, allowed_substitutions, now, expiration),
    );
    debug!(table = %table_id, ?phase, "voting round opened");
    Ok(())
}

/// Record one admitted vote and drive the round forward
fn admit_vote(
    ctx: &mut Context,
    table_id: TableId,
    voter: AccountId,
    payload: VotePayload,
) -> CroupierResult<()> {
    let quorum_percent = match payload.phase() {
        VotingPhase::GameStart => ctx.config.voting.start_quorum_percent,
        VotingPhase::GameResult => ctx.config.voting.result_quorum_percent,
    };

    enum Outcome {
        Pending,
        QuorumReached,
        LateAgreement,
        LateDisagreement(VotePayload),
        Deadlocked,
    }

    let outcome = ctx
        .with_voting_mut(table_id, |record| {
            record.votes.push((voter.clone(), payload.clone()));
            match &record.etalon_vote {
                Some(etalon) if *etalon == payload => Outcome::LateAgreement,
                Some(etalon) => Outcome::LateDisagreement(etalon.clone()),
                None => {
                    if record.matching_votes(&payload) >= record.threshold(quorum_percent) {
                        record.etalon_vote = Some(payload.clone());
                        Outcome::QuorumReached
                    } else if record.all_voted() {
                        Outcome::Deadlocked
                    } else {
                        Outcome::Pending
                    }
                }
            }
        })
        .expect("voting record exists for an admitted vote");

    match outcome {
        Outcome::Pending => Ok(()),
        Outcome::LateAgreement => {
            finalize_if_complete(ctx, table_id);
            Ok(())
        }
        Outcome::LateDisagreement(etalon) => {
            emit_fraud(ctx, table_id, &voter, &payload, &etalon);
            finalize_if_complete(ctx, table_id);
            Ok(())
        }
        Outcome::QuorumReached => {
            // everyone recorded on the losing side before quorum closed
            let disagreeing = ctx
                .voting(table_id)
                .map(|r| r.disagreeing_voters())
                .unwrap_or_default();
            for (fraud_voter, failed) in disagreeing {
                emit_fraud(ctx, table_id, &fraud_voter, &failed, &payload);
            }
            match payload {
                VotePayload::GameStart(initiation) => apply_start(ctx, table_id, initiation)?,
                VotePayload::GameResult(result) => apply_result(ctx, table_id, result)?,
            }
            finalize_if_complete(ctx, table_id);
            Ok(())
        }
        Outcome::Deadlocked => {
            let phase = payload.phase();
            warn!(table = %table_id, ?phase, "all voters voted without quorum");
            ctx.emit(VirtualOperation::Game {
                table: table_id,
                event: match phase {
                    VotingPhase::GameStart => GameEventKind::ConsensusFailedForStart,
                    VotingPhase::GameResult => GameEventKind::ConsensusFailedForResult,
                },
            });
            rollback_round(ctx, table_id, phase)?;
            ctx.remove_voting(table_id);
            Ok(())
        }
    }
}

fn emit_fraud(
    ctx: &mut Context,
    table_id: TableId,
    voter: &AccountId,
    failed: &VotePayload,
    etalon: &VotePayload,
) {
    let event = match (failed, etalon) {
        (VotePayload::GameStart(f), VotePayload::GameStart(e)) => GameEventKind::FraudOnStart {
            voter: voter.clone(),
            failed: f.clone(),
            etalon: e.clone(),
        },
        (VotePayload::GameResult(f), VotePayload::GameResult(e)) => GameEventKind::FraudOnResult {
            voter: voter.clone(),
            failed: f.clone(),
            etalon: e.clone(),
        },
        // one record holds one phase; mixed payloads cannot be admitted
        _ => return,
    };
    warn!(table = %table_id, %voter, "fraudulent claim against resolved etalon");
    ctx.emit(VirtualOperation::Game {
        table: table_id,
        event,
    });
}

/// Delete the record once every required voter has spoken
fn finalize_if_complete(ctx: &mut Context, table_id: TableId) {
    let complete = ctx
        .voting(table_id)
        .map(|r| r.etalon_vote.is_some() && r.all_voted())
        .unwrap_or(false);
    if complete {
        ctx.remove_voting(table_id);
    }
}

/// Etalon start outcome: claimed players move cash into the hand
fn apply_start(ctx: &mut Context, table_id: TableId, initiation: GameInitiation) -> CroupierResult<()> {
    let now = ctx.head_time();
    let game_expiration = now.plus_secs(ctx.config.voting.game_lifetime_secs);
    let seated: Vec<AccountId> = ctx.with_table_mut(table_id, |t| {
        let mut seated = Vec::new();
        for player in &initiation.players {
            if let Some(stake) = t.cash.remove(player) {
                t.playing_cash.insert(player.clone(), stake);
                seated.push(player.clone());
            }
        }
        t.phase = TablePhase::Playing;
        t.game_created = now;
        t.game_expiration = game_expiration;
        t.sync_occupancy();
        seated
    })?;
    for player in &seated {
        ctx.refresh_buy_in(table_id, player);
    }
    ctx.emit(VirtualOperation::Game {
        table: table_id,
        event: GameEventKind::StartValidated,
    });
    debug!(table = %table_id, players = seated.len(), "hand started");
    Ok(())
}

/// Etalon result outcome: redistribute stakes, honor buy-outs, settle
/// the table back to waiting or free
fn apply_result(ctx: &mut Context, table_id: TableId, result: GameResultData) -> CroupierResult<()> {
    struct Payout {
        player: AccountId,
        amount: Asset,
        fraud: Option<Asset>,
    }

    let symbol = ctx
        .table(table_id)
        .ok_or(ValidationError::UnknownTable(table_id))?
        .min_accepted_proposal
        .symbol
        .clone();

    let (payouts, departed) = ctx.with_table_mut(table_id, |t| {
        let mut payouts: Vec<Payout> = Vec::new();
        let mut departed: Vec<AccountId> = Vec::new();

        for (player, final_stake) in &result.balances {
            t.playing_cash.remove(player);
            let intent = t.buy_out_intents.remove(player);
            let final_asset = Asset::new(*final_stake, &symbol);

            if result.buy_outs.contains(player) {
                let fraud = intent.filter(|i| i.amount != *final_stake);
                if *final_stake > 0 {
                    payouts.push(Payout {
                        player: player.clone(),
                        amount: final_asset,
                        fraud,
                    });
                } else if let Some(intended) = fraud {
                    payouts.push(Payout {
                        player: player.clone(),
                        amount: Asset::zero(&symbol),
                        fraud: Some(intended),
                    });
                }
            } else if let Some(intent) = intent {
                let paid = intent.amount.min(*final_stake);
                let remainder = *final_stake - paid;
                if paid > 0 {
                    payouts.push(Payout {
                        player: player.clone(),
                        amount: Asset::new(paid, &symbol),
                        fraud: None,
                    });
                }
                if remainder > 0 {
                    merge_cash(t, player, Asset::new(remainder, &symbol));
                }
            } else if *final_stake > 0 {
                merge_cash(t, player, final_asset);
            }

            if !t.cash.contains_key(player) {
                departed.push(player.clone());
            }
        }

        t.buy_out_intents.clear();
        t.voted_witnesses.clear();
        t.game_created = crate::model::LedgerTime::default();
        t.game_expiration = crate::model::LedgerTime::default();
        t.phase = if t.cash.is_empty() {
            TablePhase::Free
        } else {
            TablePhase::Waiting
        };
        t.sync_occupancy();
        (payouts, departed)
    })?;

    for payout in payouts {
        if !payout.amount.is_zero() {
            ctx.credit(&payout.player, &payout.amount)?;
            ctx.emit(VirtualOperation::Game {
                table: table_id,
                event: GameEventKind::BuyOutAllowed {
                    player: payout.player.clone(),
                    amount: payout.amount.clone(),
                },
            });
        }
        if let Some(intended) = payout.fraud {
            ctx.emit(VirtualOperation::Game {
                table: table_id,
                event: GameEventKind::FraudOnBuyOut {
                    player: payout.player.clone(),
                    claimed: payout.amount,
                    intended,
                },
            });
        }
    }
    for player in &departed {
        ctx.remove_buy_in(table_id, player);
    }
    let remaining: Vec<AccountId> = ctx
        .table(table_id)
        .map(|t| t.cash.keys().cloned().collect())
        .unwrap_or_default();
    for player in &remaining {
        ctx.refresh_buy_in(table_id, player);
    }
    refresh_weight(ctx, table_id)?;

    ctx.emit(VirtualOperation::Game {
        table: table_id,
        event: GameEventKind::ResultValidated,
    });
    debug!(table = %table_id, "hand result validated");
    Ok(())
}

fn merge_cash(t: &mut crate::model::Table, player: &AccountId, amount: Asset) {
    match t.cash.get(player) {
        Some(existing) => {
            let merged = Asset::new(existing.amount.saturating_add(amount.amount), &amount.symbol);
            t.cash.insert(player.clone(), merged);
        }
        None => {
            t.cash.insert(player.clone(), amount);
        }
    }
}

/// Return a table to its pre-round state after an expired or deadlocked
/// round. Start rounds moved nothing; result rounds restore the stakes.
pub(crate) fn rollback_round(
    ctx: &mut Context,
    table_id: TableId,
    phase: VotingPhase,
) -> CroupierResult<()> {
    if ctx.table(table_id).is_none() {
        return Ok(());
    }
    let returned = ctx.with_table_mut(table_id, |t| {
        let mut returned: Vec<(AccountId, Asset)> = Vec::new();
        if phase == VotingPhase::GameResult {
            let playing: Vec<(AccountId, Asset)> =
                t.playing_cash.iter().map(|(p, a)| (p.clone(), a.clone())).collect();
            for (player, stake) in playing {
                t.playing_cash.remove(&player);
                merge_cash(t, &player, stake.clone());
                returned.push((player, stake));
            }
        }
        t.buy_out_intents.clear();
        t.game_created = crate::model::LedgerTime::default();
        t.game_expiration = crate::model::LedgerTime::default();
        t.phase = if t.cash.is_empty() {
            TablePhase::Free
        } else {
            TablePhase::Waiting
        };
        t.sync_occupancy();
        returned
    })?;
    for (player, stake) in returned {
        ctx.emit(VirtualOperation::Game {
            table: table_id,
            event: GameEventKind::CashReturned {
                player,
                amount: stake,
            },
        });
    }
    refresh_weight(ctx, table_id)
}

/// Weight follows room rating and liveness after every hand resolution
fn refresh_weight(ctx: &mut Context, table_id: TableId) -> CroupierResult<()> {
    let now = ctx.head_time();
    let (rating, alive) = match ctx.table(table_id) {
        Some(t) => (
            ctx.room(t.room).map(|r| r.rating).unwrap_or(0),
            t.is_alive(now),
        ),
        None => return Ok(()),
    };
    ctx.with_table_mut(table_id, |t| {
        t.weight = crate::ops::tables::derived_weight(rating, alive);
    })
}

/// Per-block sweep: expire overdue voting rounds and overlong hands
pub(crate) fn sweep_expirations(ctx: &mut Context) {
    let now = ctx.head_time();

    let due_rounds: Vec<TableId> = ctx
        .indexes
        .votings_by_expiration
        .iter()
        .take_while(|(expiration, _)| *expiration <= now)
        .map(|(_, table)| *table)
        .collect();
    for table_id in due_rounds {
        let (phase, resolved) = match ctx.voting(table_id) {
            Some(r) => (r.phase, r.etalon_vote.is_some()),
            None => continue,
        };
        if resolved {
            // outcome already applied; the record only lingered for
            // late votes and missed-voter classification
            ctx.remove_voting(table_id);
            continue;
        }
        ctx.emit(VirtualOperation::Game {
            table: table_id,
            event: match phase {
                VotingPhase::GameStart => GameEventKind::ExpiredForStart,
                VotingPhase::GameResult => GameEventKind::ExpiredForResult,
            },
        });
        if rollback_round(ctx, table_id, phase).is_err() {
            warn!(table = %table_id, "rollback of expired round failed");
        }
        ctx.remove_voting(table_id);
    }

    let overlong: Vec<TableId> = ctx
        .indexes
        .playing_by_expiration
        .iter()
        .take_while(|(expiration, _)| *expiration <= now)
        .map(|(_, table)| *table)
        .collect();
    for table_id in overlong {
        ctx.emit(VirtualOperation::Game {
            table: table_id,
            event: GameEventKind::ExpiredLifetime,
        });
        if rollback_round(ctx, table_id, VotingPhase::GameResult).is_err() {
            warn!(table = %table_id, "rollback of overlong hand failed");
        }
    }
}
