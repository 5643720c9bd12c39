//! Derived ordered indexes over the primary collections
//!
//! Maintained by explicit hooks on insert/modify/remove, never rebuilt
//! by full scan. Every key is a total order, which makes engine scan
//! results reproducible bit-for-bit across replicas.

use crate::model::{
    AccountId, KpiMeasurementId, LedgerTime, Reservation, ReservationId, RoomId,
    StandbyMeasurementId, Table, TableId, TablePhase,
};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Allocation search key: lower occupancy first, then higher weight,
/// then identity ascending, within one metadata class
pub type TableAllocationKey = (String, u32, Reverse<i64>, TableId);

/// Allocation scan key: unallocated first, then by expiration
pub type ReservationScanKey = (u8, LedgerTime, ReservationId);

#[derive(Clone, Debug, Default)]
pub struct Indexes {
    pub tables_by_allocation: BTreeSet<TableAllocationKey>,
    pub tables_by_room: BTreeMap<RoomId, BTreeSet<TableId>>,
    /// Playing tables ordered by hand expiration, for the lifetime sweep
    pub playing_by_expiration: BTreeSet<(LedgerTime, TableId)>,

    pub reservations_by_status: BTreeSet<ReservationScanKey>,
    pub reservation_by_player_uid: BTreeMap<(AccountId, Uuid), ReservationId>,
    pub reservations_by_player: BTreeMap<AccountId, BTreeSet<ReservationId>>,

    pub buy_ins_by_expiration: BTreeSet<(LedgerTime, TableId, AccountId)>,
    pub votings_by_expiration: BTreeSet<(LedgerTime, TableId)>,

    pub kpi_by_expiration: BTreeSet<(LedgerTime, KpiMeasurementId)>,
    pub standby_by_expiration: BTreeSet<(LedgerTime, StandbyMeasurementId)>,
    pub kpi_by_room: BTreeMap<RoomId, BTreeSet<KpiMeasurementId>>,
    pub standby_by_room: BTreeMap<RoomId, BTreeSet<StandbyMeasurementId>>,
    pub kpi_by_reservation: BTreeMap<ReservationId, KpiMeasurementId>,
}

impl Indexes {
    pub fn table_allocation_key(id: TableId, table: &Table) -> TableAllocationKey {
        (
            table.metadata.clone(),
            table.occupied_places,
            Reverse(table.weight),
            id,
        )
    }

    pub fn reservation_scan_key(id: ReservationId, r: &Reservation) -> ReservationScanKey {
        (r.allocation_status(), r.expiration, id)
    }

    pub fn on_table_created(&mut self, id: TableId, table: &Table) {
        self.tables_by_allocation
            .insert(Self::table_allocation_key(id, table));
        self.tables_by_room.entry(table.room).or_default().insert(id);
        if table.phase == TablePhase::Playing {
            self.playing_by_expiration.insert((table.game_expiration, id));
        }
    }

    /// Re-key a table after mutation; `before` is the pre-mutation state
    pub fn on_table_changed(&mut self, id: TableId, before: &Table, after: &Table) {
        let old_key = Self::table_allocation_key(id, before);
        let new_key = Self::table_allocation_key(id, after);
        if old_key != new_key {
            self.tables_by_allocation.remove(&old_key);
            self.tables_by_allocation.insert(new_key);
        }
        let was_playing = before.phase == TablePhase::Playing;
        let is_playing = after.phase == TablePhase::Playing;
        if was_playing {
            self.playing_by_expiration.remove(&(before.game_expiration, id));
        }
        if is_playing {
            self.playing_by_expiration.insert((after.game_expiration, id));
        }
    }

    pub fn on_reservation_created(&mut self, id: ReservationId, r: &Reservation) {
        self.reservations_by_status.insert(Self::reservation_scan_key(id, r));
        self.reservation_by_player_uid.insert((r.player.clone(), r.uid), id);
        self.reservations_by_player
            .entry(r.player.clone())
            .or_default()
            .insert(id);
    }

    pub fn on_reservation_changed(&mut self, id: ReservationId, before: &Reservation, after: &Reservation) {
        let old_key = Self::reservation_scan_key(id, before);
        let new_key = Self::reservation_scan_key(id, after);
        if old_key != new_key {
            self.reservations_by_status.remove(&old_key);
            self.reservations_by_status.insert(new_key);
        }
    }

    pub fn on_reservation_removed(&mut self, id: ReservationId, r: &Reservation) {
        self.reservations_by_status
            .remove(&Self::reservation_scan_key(id, r));
        self.reservation_by_player_uid.remove(&(r.player.clone(), r.uid));
        if let Some(set) = self.reservations_by_player.get_mut(&r.player) {
            set.remove(&id);
            if set.is_empty() {
                self.reservations_by_player.remove(&r.player);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Asset;

    #[test]
    fn allocation_key_prefers_emptier_then_heavier_tables() {
        let mut a = Table::new(RoomId(1), "nl-holdem".into(), 1, Asset::new(5, "CHP"));
        let mut b = a.clone();
        let mut c = a.clone();
        a.occupied_places = 1;
        a.weight = 100;
        b.occupied_places = 2;
        b.weight = 900;
        c.occupied_places = 1;
        c.weight = 500;

        let mut index = BTreeSet::new();
        index.insert(Indexes::table_allocation_key(TableId(1), &a));
        index.insert(Indexes::table_allocation_key(TableId(2), &b));
        index.insert(Indexes::table_allocation_key(TableId(3), &c));

        let order: Vec<TableId> = index.iter().map(|k| k.3).collect();
        // occupancy 1 before 2; within occupancy 1 the heavier table wins
        assert_eq!(order, vec![TableId(3), TableId(1), TableId(2)]);
    }

    #[test]
    fn reservation_scan_orders_unallocated_first() {
        let base = Reservation {
            player: AccountId::from("p"),
            uid: Uuid::nil(),
            amount: Asset::new(10, "CHP"),
            metadata: String::new(),
            protocol_version: "1.0.0".into(),
            created: LedgerTime(0),
            expiration: LedgerTime(50),
            table: None,
        };
        let mut allocated = base.clone();
        allocated.table = Some(TableId(1));
        allocated.expiration = LedgerTime(10);

        let mut index = BTreeSet::new();
        index.insert(Indexes::reservation_scan_key(ReservationId(1), &allocated));
        index.insert(Indexes::reservation_scan_key(ReservationId(2), &base));
        let first = index.iter().next().unwrap();
        // later expiration but unallocated still scans first
        assert_eq!(first.2, ReservationId(2));
    }
}
