//! Virtual operations emitted by the engines for audit and replay
//!
//! None of these are submittable; they record what the coordination core
//! decided. `GameEventKind` is a closed union so consumers match
//! exhaustively, so a new event kind cannot be silently ignored.

use crate::model::{AccountId, Asset, GameInitiation, GameResultData, ReservationId, TableId};
use serde::{Deserialize, Serialize};

/// Engine-emitted record appended to the per-block audit log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum VirtualOperation {
    ReservationAllocated {
        reservation: ReservationId,
        player: AccountId,
        table: TableId,
    },
    ReservationExpired {
        reservation: ReservationId,
        player: AccountId,
        refunded: Asset,
    },
    BuyInExpired {
        table: TableId,
        player: AccountId,
        refunded: Asset,
    },
    Game {
        table: TableId,
        event: GameEventKind,
    },
}

/// Everything that can happen to a hand, tagged for exhaustive matching
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum GameEventKind {
    StartValidated,
    ResultValidated,
    Rollback,
    ConsensusFailedForStart,
    ConsensusFailedForResult,
    ExpiredForStart,
    ExpiredForResult,
    ExpiredLifetime,
    FraudOnStart {
        voter: AccountId,
        failed: GameInitiation,
        etalon: GameInitiation,
    },
    FraudOnResult {
        voter: AccountId,
        failed: GameResultData,
        etalon: GameResultData,
    },
    BuyOutAllowed {
        player: AccountId,
        amount: Asset,
    },
    BuyInReturned {
        player: AccountId,
        amount: Asset,
    },
    CashReturned {
        player: AccountId,
        amount: Asset,
    },
    FraudOnBuyOut {
        player: AccountId,
        claimed: Asset,
        intended: Asset,
    },
    VoteRejected {
        voter: AccountId,
        reason: String,
    },
}

impl GameEventKind {
    /// Fraud events are informational for reputation, never reverted
    pub fn is_fraud(&self) -> bool {
        matches!(
            self,
            GameEventKind::FraudOnStart { .. }
                | GameEventKind::FraudOnResult { .. }
                | GameEventKind::FraudOnBuyOut { .. }
        )
    }
}
