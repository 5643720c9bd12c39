//! Voting statistics: the secondary index observing record deletion
//!
//! Every Table-Voting deletion (resolved, expired or rolled back) is
//! classified here: required players who appear among the votes count
//! as "voted", the rest as "missed". The classification lands on the
//! table (for the subscription snapshot) and as quality marks on the
//! room, the sole voting-behavior input the rating engine consumes.

use crate::ledger::Context;
use crate::model::{AccountId, StandbyMeasurement, TableId, TableVoting};
use tracing::debug;

pub(crate) fn on_voting_removed(ctx: &mut Context, table_id: TableId, record: &TableVoting) {
    let voted: Vec<AccountId> = record
        .required_player_voters
        .iter()
        .filter(|p| record.has_voted(p))
        .cloned()
        .collect();
    let missed: Vec<AccountId> = record
        .required_player_voters
        .iter()
        .filter(|p| !record.has_voted(p))
        .cloned()
        .collect();

    let room = match ctx.table(table_id) {
        Some(t) => t.room,
        None => return,
    };
    let result = ctx.with_table_mut(table_id, |t| {
        t.voted_last_round = voted.iter().cloned().collect();
        t.missed_last_round = missed.iter().cloned().collect();
    });
    if result.is_err() {
        return;
    }

    // one quality mark per required player: full weight for a vote,
    // zero weight for a miss; a miss still raises the count, diluting
    // the room's average
    let now = ctx.head_time();
    let expiration = now.plus_secs(ctx.config.rating.standby_lifetime_secs);
    let full = ctx.config.rating.standby_weight;
    for (players, weight) in [(&voted, full), (&missed, 0)] {
        for _ in players.iter() {
            ctx.create_standby(StandbyMeasurement {
                room,
                table: table_id,
                weight,
                created: now,
                expiration,
            });
        }
    }
    debug!(
        table = %table_id,
        voted = voted.len(),
        missed = missed.len(),
        "voting round classified"
    );
}
