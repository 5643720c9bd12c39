//! Quality-signal records feeding the rating engine
//!
//! Ephemeral by design: created while tables are kept alive, consumed by
//! the maintenance cycle, purged on expiration.

use super::{LedgerTime, ReservationId, RoomId, TableId};
use serde::{Deserialize, Serialize};

/// KPI measurement: tied to a specific reservation placed at a table.
/// Its weight only enters the rating sums once the reservation resolved
/// into table cash (`waiting_resolve` cleared); an unresolved record is
/// dropped when its reservation expires or is cancelled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiMeasurement {
    pub room: RoomId,
    pub table: TableId,
    pub reservation: ReservationId,
    /// RATIO_SCALE units
    pub weight: i64,
    pub waiting_resolve: bool,
    pub created: LedgerTime,
    pub expiration: LedgerTime,
}

/// Standby measurement: ambient signal that a room keeps its table
/// alive, one per heartbeat window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandbyMeasurement {
    pub room: RoomId,
    pub table: TableId,
    /// RATIO_SCALE units
    pub weight: i64,
    pub created: LedgerTime,
    pub expiration: LedgerTime,
}

impl KpiMeasurement {
    /// Countable by the rating engine: resolved and not expired
    pub fn counts_at(&self, now: LedgerTime) -> bool {
        !self.waiting_resolve && self.expiration > now
    }
}

impl StandbyMeasurement {
    pub fn counts_at(&self, now: LedgerTime) -> bool {
        self.expiration > now
    }
}
