//! Error types for the coordination core
//!
//! Validation failures reject an operation before any state mutation and
//! surface synchronously to the submitter. Consensus failures and fraud
//! are not errors; they are virtual events (see `events`). A corrupted
//! internal invariant is a panic, fatal to block processing.

use crate::model::{AccountId, ReservationId, RoomId, TableId};
use thiserror::Error;

/// Root error type for all coordination-core operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CroupierError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Malformed or unauthorized operations, rejected before any mutation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown room {0}")]
    UnknownRoom(RoomId),

    #[error("unknown table {0}")]
    UnknownTable(TableId),

    #[error("no reservation for player {player} with that uid")]
    UnknownReservation { player: AccountId },

    #[error("account {account} is not authorized for this operation")]
    NotAuthorized { account: AccountId },

    #[error("player {player} already has a reservation with this uid")]
    DuplicateReservation { player: AccountId },

    #[error("player {player} exceeded the open reservation quota of {quota}")]
    ReservationQuotaExceeded { player: AccountId, quota: u32 },

    #[error("player {player} is already waiting or playing at table {table}")]
    AlreadySeated { player: AccountId, table: TableId },

    #[error("player {player} is not seated at table {table}")]
    NotSeated { player: AccountId, table: TableId },

    #[error("table owners cannot play at their own tables")]
    OwnTableProhibited,

    #[error("amount {offered} is below the table minimum {minimum}")]
    BelowMinimumStake { offered: String, minimum: String },

    #[error("insufficient balance for {account}: need {need}, have {have}")]
    InsufficientBalance {
        account: AccountId,
        need: String,
        have: String,
    },

    #[error("asset symbol mismatch: {left} vs {right}")]
    SymbolMismatch { left: String, right: String },

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("reservation {reservation} is not allocated to table {table}")]
    NotAllocatedToTable {
        reservation: ReservationId,
        table: TableId,
    },

    #[error("table {table} is not in a phase that accepts this claim")]
    WrongPhase { table: TableId },

    #[error("account {voter} is not an eligible voter for table {table}")]
    IneligibleVoter { voter: AccountId, table: TableId },

    #[error("voter {voter} already voted in this round")]
    DuplicateVote { voter: AccountId },

    #[error("result payload must cover exactly the playing players")]
    ResultPlayersMismatch,

    #[error("result payload does not conserve the playing total")]
    ResultNotConserved,

    #[error("game start claim names players without table cash")]
    StartPlayersNotSeated,
}

/// Failures of the narrow ledger facade itself
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("block time {proposed} precedes head time {head}")]
    TimeWentBackwards { head: u64, proposed: u64 },

    #[error("unknown account {0}")]
    UnknownAccount(AccountId),
}

/// Configuration load/validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Convenience alias used throughout the crate
pub type CroupierResult<T> = Result<T, CroupierError>;
