//! Pending buy-ins and seat liveness records

use super::{AccountId, Asset, LedgerTime, TableId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A player's open request to be seated at any compatible table.
///
/// Unique per (player, uid). Removed on cancellation, expiration, or
/// successful resolution into table cash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub player: AccountId,
    /// Client-supplied request id, the dedup key together with `player`
    pub uid: Uuid,
    pub amount: Asset,
    /// Matching key against table metadata
    pub metadata: String,
    pub protocol_version: String,
    pub created: LedgerTime,
    pub expiration: LedgerTime,
    /// Set once the allocation engine placed the reservation; must then
    /// correspond to an entry in that table's pending proposals
    pub table: Option<TableId>,
}

impl Reservation {
    pub fn is_allocated(&self) -> bool {
        self.table.is_some()
    }

    /// Index component: unallocated entries sort ahead of allocated ones
    pub fn allocation_status(&self) -> u8 {
        u8::from(self.table.is_some())
    }
}

/// Per (table, player) heartbeat detecting abandoned seats independent
/// of reservation state. Refreshed whenever the player is (re)placed at
/// the table; removed when the stake reaches zero or on forced expiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyInLiveness {
    pub expiration: LedgerTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_status_orders_unallocated_first() {
        let mut r = Reservation {
            player: AccountId::from("p"),
            uid: Uuid::nil(),
            amount: Asset::new(10, "CHP"),
            metadata: "nl-holdem".into(),
            protocol_version: "1.0.0".into(),
            created: LedgerTime(0),
            expiration: LedgerTime(60),
            table: None,
        };
        assert_eq!(r.allocation_status(), 0);
        r.table = Some(TableId(3));
        assert_eq!(r.allocation_status(), 1);
        assert!(r.is_allocated());
    }
}
