//! Domain objects of the coordination core
//!
//! Canonical types shared across the engines. Everything here is plain
//! data with deterministic ordering; all mutation goes through the ledger
//! context so derived indexes stay consistent.

pub mod measurement;
pub mod reservation;
pub mod room;
pub mod table;
pub mod voting;

pub use measurement::{KpiMeasurement, StandbyMeasurement};
pub use reservation::{BuyInLiveness, Reservation};
pub use room::Room;
pub use table::{Table, TablePhase};
pub use voting::{GameInitiation, GameResultData, TableVoting, VotePayload, VotingPhase};

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic ledger clock value, seconds since the chain epoch.
///
/// The shared clock is the only notion of time in the core; no component
/// ever consults the wall clock.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LedgerTime(pub u64);

impl LedgerTime {
    pub fn secs(self) -> u64 {
        self.0
    }

    pub fn plus_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// Whole minutes elapsed since `earlier`, saturating at zero
    pub fn minutes_since(self, earlier: LedgerTime) -> u64 {
        self.0.saturating_sub(earlier.0) / 60
    }
}

impl fmt::Display for LedgerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::from_timestamp(self.0 as i64, 0) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%SZ")),
            None => write!(f, "t+{}", self.0),
        }
    }
}

/// Ledger account name
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl From<&str> for AccountId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! object_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone,
            Copy,
            Debug,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(
    /// Identity of a third-party game server
    RoomId
);
object_id!(
    /// Identity of a seating/session unit hosted by a room
    TableId
);
object_id!(
    /// Identity of a pending buy-in
    ReservationId
);
object_id!(
    /// Identity of a KPI rating measurement
    KpiMeasurementId
);
object_id!(
    /// Identity of a standby rating measurement
    StandbyMeasurementId
);

impl RoomId {
    /// Genesis bookkeeping sentinel; skipped by every engine.
    pub const NULL: RoomId = RoomId(0);
}

/// A quantity of a single asset
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub amount: u64,
    pub symbol: String,
}

impl Asset {
    pub fn new(amount: u64, symbol: &str) -> Self {
        Self {
            amount,
            symbol: symbol.to_string(),
        }
    }

    pub fn zero(symbol: &str) -> Self {
        Self::new(0, symbol)
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    pub fn same_symbol(&self, other: &Asset) -> Result<(), ValidationError> {
        if self.symbol != other.symbol {
            return Err(ValidationError::SymbolMismatch {
                left: self.symbol.clone(),
                right: other.symbol.clone(),
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Asset) -> Result<Asset, ValidationError> {
        self.same_symbol(other)?;
        Ok(Asset::new(self.amount.saturating_add(other.amount), &self.symbol))
    }

    pub fn checked_sub(&self, other: &Asset) -> Result<Asset, ValidationError> {
        self.same_symbol(other)?;
        match self.amount.checked_sub(other.amount) {
            Some(amount) => Ok(Asset::new(amount, &self.symbol)),
            None => Err(ValidationError::InsufficientBalance {
                account: AccountId::from(""),
                need: other.to_string(),
                have: self.to_string(),
            }),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_time_minutes() {
        let t0 = LedgerTime(1_000);
        let t1 = t0.plus_secs(185);
        assert_eq!(t1.minutes_since(t0), 3);
        assert_eq!(t0.minutes_since(t1), 0);
    }

    #[test]
    fn asset_checked_math() {
        let a = Asset::new(10, "CHP");
        let b = Asset::new(4, "CHP");
        assert_eq!(a.checked_add(&b).unwrap().amount, 14);
        assert_eq!(a.checked_sub(&b).unwrap().amount, 6);
        assert!(b.checked_sub(&a).is_err());
        assert!(a.checked_add(&Asset::new(1, "GLD")).is_err());
    }

    #[test]
    fn null_room_is_id_zero() {
        assert_eq!(RoomId::NULL, RoomId(0));
    }
}
