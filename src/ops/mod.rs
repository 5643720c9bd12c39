//! Submitted operations of the transaction-application layer
//!
//! Each variant is an atomic, authority-checked record. Validation
//! happens before any state mutation; a failure rolls the whole
//! operation back (see `Context::apply`).

pub(crate) mod claims;
pub(crate) mod reservations;
pub(crate) mod rooms;
pub(crate) mod tables;

use crate::errors::CroupierResult;
use crate::ledger::Context;
use crate::model::{AccountId, Asset, GameInitiation, GameResultData, RoomId, TableId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Every submittable operation of the coordination core
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
    ReserveBuyIn {
        player: AccountId,
        uid: Uuid,
        amount: Asset,
        metadata: String,
        protocol_version: String,
    },
    CancelReservation {
        player: AccountId,
        uid: Uuid,
    },
    CancelAllReservations {
        player: AccountId,
    },
    ResolveReservation {
        player: AccountId,
        uid: Uuid,
        table: TableId,
    },
    BuyIn {
        player: AccountId,
        table: TableId,
        amount: Asset,
    },
    BuyOut {
        player: AccountId,
        table: TableId,
        amount: Asset,
    },
    CreateRoom {
        owner: AccountId,
        server_url: String,
        protocol_version: String,
        metadata: String,
    },
    UpdateRoom {
        owner: AccountId,
        room: RoomId,
        server_url: Option<String>,
        protocol_version: Option<String>,
        metadata: Option<String>,
        witnesses: Option<BTreeSet<AccountId>>,
    },
    CreateTable {
        owner: AccountId,
        room: RoomId,
        metadata: String,
        required_witnesses: u32,
        min_accepted_proposal: Asset,
    },
    UpdateTable {
        owner: AccountId,
        table: TableId,
        metadata: Option<String>,
        required_witnesses: Option<u32>,
        min_accepted_proposal: Option<Asset>,
    },
    GameStartClaim {
        table: TableId,
        voter: AccountId,
        initiation: GameInitiation,
    },
    GameResultClaim {
        table: TableId,
        voter: AccountId,
        result: GameResultData,
    },
    ResetGame {
        owner: AccountId,
        table: TableId,
    },
}

/// Route an operation to its evaluator
pub(crate) fn dispatch(ctx: &mut Context, op: Operation) -> CroupierResult<()> {
    match op {
        Operation::ReserveBuyIn {
            player,
            uid,
            amount,
            metadata,
            protocol_version,
        } => reservations::reserve_buy_in(ctx, player, uid, amount, metadata, protocol_version),
        Operation::CancelReservation { player, uid } => {
            reservations::cancel_reservation(ctx, player, uid)
        }
        Operation::CancelAllReservations { player } => {
            reservations::cancel_all_reservations(ctx, player)
        }
        Operation::ResolveReservation { player, uid, table } => {
            reservations::resolve_reservation(ctx, player, uid, table)
        }
        Operation::BuyIn { player, table, amount } => tables::buy_in(ctx, player, table, amount),
        Operation::BuyOut { player, table, amount } => tables::buy_out(ctx, player, table, amount),
        Operation::CreateRoom {
            owner,
            server_url,
            protocol_version,
            metadata,
        } => rooms::create_room(ctx, owner, server_url, protocol_version, metadata).map(|_| ()),
        Operation::UpdateRoom {
            owner,
            room,
            server_url,
            protocol_version,
            metadata,
            witnesses,
        } => rooms::update_room(ctx, owner, room, server_url, protocol_version, metadata, witnesses),
        Operation::CreateTable {
            owner,
            room,
            metadata,
            required_witnesses,
            min_accepted_proposal,
        } => tables::create_table(ctx, owner, room, metadata, required_witnesses, min_accepted_proposal)
            .map(|_| ()),
        Operation::UpdateTable {
            owner,
            table,
            metadata,
            required_witnesses,
            min_accepted_proposal,
        } => tables::update_table(ctx, owner, table, metadata, required_witnesses, min_accepted_proposal),
        Operation::GameStartClaim { table, voter, initiation } => {
            claims::game_start_claim(ctx, table, voter, initiation)
        }
        Operation::GameResultClaim { table, voter, result } => {
            claims::game_result_claim(ctx, table, voter, result)
        }
        Operation::ResetGame { owner, table } => claims::reset_game(ctx, owner, table),
    }
}
