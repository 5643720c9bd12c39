//! Narrow facade over the ledger engine: clock, balances, object
//! collections and the transactional apply primitive
//!
//! The generic ledger (block production, undo, signing) is an external
//! collaborator; this module models exactly the slice the coordination
//! core consumes: a deterministic clock, ordered indexed collections
//! with observer hooks, and all-or-nothing operation application.

pub(crate) mod indexes;

use crate::config::ChainConfig;
use crate::errors::{CroupierResult, LedgerError, ValidationError};
use crate::events::VirtualOperation;
use crate::model::{
    AccountId, Asset, BuyInLiveness, KpiMeasurement, KpiMeasurementId, LedgerTime, Reservation,
    ReservationId, Room, RoomId, StandbyMeasurement, StandbyMeasurementId, Table, TableId,
    TableVoting,
};
use crate::ops::Operation;
use crate::rating::{self, FeeDistributor, NoFees, RatingCycle};
use crate::{allocation, stats, voting};
use indexes::{Indexes, ReservationScanKey};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// The whole mutable state the coordination core operates on.
///
/// Cloning the context is the rollback primitive: `apply` snapshots the
/// state and restores it wholly when an operation fails, mirroring the
/// enclosing block transaction's all-or-nothing commit.
#[derive(Clone, Debug)]
pub struct Context {
    pub config: ChainConfig,
    pub(crate) head_time: LedgerTime,

    pub(crate) balances: BTreeMap<AccountId, Asset>,
    pub(crate) rooms: BTreeMap<RoomId, Room>,
    pub(crate) tables: BTreeMap<TableId, Table>,
    pub(crate) reservations: BTreeMap<ReservationId, Reservation>,
    pub(crate) buy_ins: BTreeMap<(TableId, AccountId), BuyInLiveness>,
    pub(crate) votings: BTreeMap<TableId, TableVoting>,
    pub(crate) kpi_measurements: BTreeMap<KpiMeasurementId, KpiMeasurement>,
    pub(crate) standby_measurements: BTreeMap<StandbyMeasurementId, StandbyMeasurement>,
    /// Last heartbeat a standby measurement was minted for, per table
    pub(crate) last_standby_at: BTreeMap<TableId, LedgerTime>,

    pub(crate) indexes: Indexes,

    next_room: u64,
    next_table: u64,
    next_reservation: u64,
    next_kpi: u64,
    next_standby: u64,

    pub(crate) virtual_ops: Vec<VirtualOperation>,
    pub(crate) changed_tables: BTreeSet<TableId>,
    pub(crate) allocation_cursor: Option<ReservationScanKey>,
    pub(crate) rating_cycle: Option<RatingCycle>,
    pub(crate) next_maintenance: LedgerTime,
}

impl Context {
    pub fn new(config: ChainConfig) -> Self {
        let mut rooms = BTreeMap::new();
        // genesis bookkeeping sentinel, never scored or matched
        rooms.insert(
            RoomId::NULL,
            Room::new(AccountId::from(""), String::new(), String::new(), String::new()),
        );
        Self {
            config,
            head_time: LedgerTime::default(),
            balances: BTreeMap::new(),
            rooms,
            tables: BTreeMap::new(),
            reservations: BTreeMap::new(),
            buy_ins: BTreeMap::new(),
            votings: BTreeMap::new(),
            kpi_measurements: BTreeMap::new(),
            standby_measurements: BTreeMap::new(),
            last_standby_at: BTreeMap::new(),
            indexes: Indexes::default(),
            next_room: 1,
            next_table: 1,
            next_reservation: 1,
            next_kpi: 1,
            next_standby: 1,
            virtual_ops: Vec::new(),
            changed_tables: BTreeSet::new(),
            allocation_cursor: None,
            rating_cycle: None,
            next_maintenance: LedgerTime::default(),
        }
    }

    // ---- clock & block driving ------------------------------------------

    pub fn head_time(&self) -> LedgerTime {
        self.head_time
    }

    /// Advance the shared clock to the incoming block's timestamp
    pub fn begin_block(&mut self, time: LedgerTime) -> CroupierResult<()> {
        if time < self.head_time {
            return Err(LedgerError::TimeWentBackwards {
                head: self.head_time.secs(),
                proposed: time.secs(),
            }
            .into());
        }
        self.head_time = time;
        Ok(())
    }

    /// Apply one submitted operation transactionally
    pub fn apply(&mut self, op: Operation) -> CroupierResult<()> {
        let checkpoint = self.clone();
        match crate::ops::dispatch(self, op) {
            Ok(()) => Ok(()),
            Err(e) => {
                *self = checkpoint;
                debug!(error = %e, "operation rejected, state rolled back");
                Err(e)
            }
        }
    }

    /// Per-block engine work: expiry sweeps, allocation, and the
    /// maintenance cycle when its interval elapsed
    pub fn end_block(&mut self) {
        self.end_block_with(&mut NoFees);
    }

    pub fn end_block_with(&mut self, fees: &mut dyn FeeDistributor) {
        voting::sweep_expirations(self);
        allocation::process_block(self);

        let interval = self.config.rating.maintenance_interval_secs;
        if self.next_maintenance == LedgerTime::default() {
            self.next_maintenance = self.head_time.plus_secs(interval);
        } else if self.head_time >= self.next_maintenance {
            rating::run_cycle(self, fees);
            self.next_maintenance = self.head_time.plus_secs(interval);
        }
    }

    /// Run one maintenance slice immediately, regardless of schedule
    pub fn run_maintenance(&mut self) {
        rating::run_cycle(self, &mut NoFees);
    }

    // ---- balances (narrow interface to the asset layer) -----------------

    pub fn balance(&self, account: &AccountId) -> Option<&Asset> {
        self.balances.get(account)
    }

    /// Credit an account, creating it on first deposit
    pub fn deposit(&mut self, account: AccountId, amount: Asset) -> CroupierResult<()> {
        self.credit(&account, &amount)
    }

    pub(crate) fn credit(&mut self, account: &AccountId, amount: &Asset) -> CroupierResult<()> {
        match self.balances.get_mut(account) {
            Some(balance) => {
                *balance = balance.checked_add(amount)?;
            }
            None => {
                self.balances.insert(account.clone(), amount.clone());
            }
        }
        Ok(())
    }

    pub(crate) fn debit(&mut self, account: &AccountId, amount: &Asset) -> CroupierResult<()> {
        let balance = self
            .balances
            .get_mut(account)
            .ok_or_else(|| LedgerError::UnknownAccount(account.clone()))?;
        balance.same_symbol(amount)?;
        if balance.amount < amount.amount {
            return Err(ValidationError::InsufficientBalance {
                account: account.clone(),
                need: amount.to_string(),
                have: balance.to_string(),
            }
            .into());
        }
        balance.amount -= amount.amount;
        Ok(())
    }

    // ---- rooms -----------------------------------------------------------

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = (RoomId, &Room)> {
        self.rooms.iter().map(|(id, r)| (*id, r))
    }

    pub(crate) fn create_room(&mut self, room: Room) -> RoomId {
        let id = RoomId(self.next_room);
        self.next_room += 1;
        self.rooms.insert(id, room);
        id
    }

    pub(crate) fn room_mut(&mut self, id: RoomId) -> CroupierResult<&mut Room> {
        self.rooms
            .get_mut(&id)
            .ok_or_else(|| ValidationError::UnknownRoom(id).into())
    }

    // ---- tables ----------------------------------------------------------

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableId, &Table)> {
        self.tables.iter().map(|(id, t)| (*id, t))
    }

    pub(crate) fn create_table(&mut self, table: Table) -> TableId {
        let id = TableId(self.next_table);
        self.next_table += 1;
        self.indexes.on_table_created(id, &table);
        self.tables.insert(id, table);
        self.changed_tables.insert(id);
        id
    }

    /// Mutate a table through the observer hooks: re-keys the derived
    /// indexes and queues the table for subscription snapshots.
    ///
    /// Panics if the mutation left the occupancy counter inconsistent;
    /// a programmer invariant, fatal to block processing by design of
    /// the enclosing ledger.
    pub(crate) fn with_table_mut<R>(
        &mut self,
        id: TableId,
        f: impl FnOnce(&mut Table) -> R,
    ) -> CroupierResult<R> {
        let table = self
            .tables
            .get_mut(&id)
            .ok_or(ValidationError::UnknownTable(id))?;
        let before = table.clone();
        let result = f(table);
        let recount = table.distinct_players().len() as u32;
        assert!(
            table.occupied_places == recount,
            "occupancy counter corrupted for table {id}: counter {} vs recount {recount}",
            table.occupied_places,
        );
        let after = table.clone();
        self.indexes.on_table_changed(id, &before, &after);
        self.changed_tables.insert(id);
        Ok(result)
    }

    // ---- reservations ----------------------------------------------------

    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.get(&id)
    }

    pub fn reservation_by_uid(&self, player: &AccountId, uid: uuid::Uuid) -> Option<ReservationId> {
        self.indexes
            .reservation_by_player_uid
            .get(&(player.clone(), uid))
            .copied()
    }

    pub fn open_reservations_of(&self, player: &AccountId) -> Vec<ReservationId> {
        self.indexes
            .reservations_by_player
            .get(player)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn create_reservation(&mut self, r: Reservation) -> ReservationId {
        let id = ReservationId(self.next_reservation);
        self.next_reservation += 1;
        self.indexes.on_reservation_created(id, &r);
        self.reservations.insert(id, r);
        id
    }

    pub(crate) fn with_reservation_mut<R>(
        &mut self,
        id: ReservationId,
        f: impl FnOnce(&mut Reservation) -> R,
    ) -> CroupierResult<R> {
        let r = self.reservations.get_mut(&id).ok_or_else(|| {
            ValidationError::UnknownReservation {
                player: AccountId::from(""),
            }
        })?;
        let before = r.clone();
        let result = f(r);
        let after = r.clone();
        self.indexes.on_reservation_changed(id, &before, &after);
        Ok(result)
    }

    pub(crate) fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let r = self.reservations.remove(&id)?;
        self.indexes.on_reservation_removed(id, &r);
        Some(r)
    }

    // ---- buy-in liveness -------------------------------------------------

    pub fn buy_in(&self, table: TableId, player: &AccountId) -> Option<&BuyInLiveness> {
        self.buy_ins.get(&(table, player.clone()))
    }

    pub(crate) fn refresh_buy_in(&mut self, table: TableId, player: &AccountId) {
        let expiration = self.head_time.plus_secs(self.config.liveness.buy_in_secs);
        let key = (table, player.clone());
        if let Some(old) = self.buy_ins.get(&key) {
            self.indexes
                .buy_ins_by_expiration
                .remove(&(old.expiration, table, player.clone()));
        }
        self.indexes
            .buy_ins_by_expiration
            .insert((expiration, table, player.clone()));
        self.buy_ins.insert(key, BuyInLiveness { expiration });
    }

    pub(crate) fn remove_buy_in(&mut self, table: TableId, player: &AccountId) {
        if let Some(old) = self.buy_ins.remove(&(table, player.clone())) {
            self.indexes
                .buy_ins_by_expiration
                .remove(&(old.expiration, table, player.clone()));
        }
    }

    // ---- voting records --------------------------------------------------

    pub fn voting(&self, table: TableId) -> Option<&TableVoting> {
        self.votings.get(&table)
    }

    pub(crate) fn insert_voting(&mut self, table: TableId, record: TableVoting) {
        self.indexes
            .votings_by_expiration
            .insert((record.expiration, table));
        self.votings.insert(table, record);
    }

    pub(crate) fn with_voting_mut<R>(
        &mut self,
        table: TableId,
        f: impl FnOnce(&mut TableVoting) -> R,
    ) -> Option<R> {
        self.votings.get_mut(&table).map(f)
    }

    /// Delete a voting record. The statistics index observes every
    /// deletion and classifies required players as voted or missed.
    pub(crate) fn remove_voting(&mut self, table: TableId) -> Option<TableVoting> {
        let record = self.votings.remove(&table)?;
        self.indexes
            .votings_by_expiration
            .remove(&(record.expiration, table));
        stats::on_voting_removed(self, table, &record);
        Some(record)
    }

    // ---- rating measurements --------------------------------------------

    pub(crate) fn create_kpi(&mut self, m: KpiMeasurement) -> KpiMeasurementId {
        let id = KpiMeasurementId(self.next_kpi);
        self.next_kpi += 1;
        self.indexes.kpi_by_expiration.insert((m.expiration, id));
        self.indexes.kpi_by_room.entry(m.room).or_default().insert(id);
        self.indexes.kpi_by_reservation.insert(m.reservation, id);
        self.kpi_measurements.insert(id, m);
        id
    }

    pub(crate) fn with_kpi_mut<R>(
        &mut self,
        id: KpiMeasurementId,
        f: impl FnOnce(&mut KpiMeasurement) -> R,
    ) -> Option<R> {
        self.kpi_measurements.get_mut(&id).map(f)
    }

    pub(crate) fn remove_kpi(&mut self, id: KpiMeasurementId) -> Option<KpiMeasurement> {
        let m = self.kpi_measurements.remove(&id)?;
        self.indexes.kpi_by_expiration.remove(&(m.expiration, id));
        if let Some(set) = self.indexes.kpi_by_room.get_mut(&m.room) {
            set.remove(&id);
        }
        self.indexes.kpi_by_reservation.remove(&m.reservation);
        Some(m)
    }

    pub(crate) fn create_standby(&mut self, m: StandbyMeasurement) -> StandbyMeasurementId {
        let id = StandbyMeasurementId(self.next_standby);
        self.next_standby += 1;
        self.indexes.standby_by_expiration.insert((m.expiration, id));
        self.indexes.standby_by_room.entry(m.room).or_default().insert(id);
        self.standby_measurements.insert(id, m);
        id
    }

    pub(crate) fn remove_standby(&mut self, id: StandbyMeasurementId) -> Option<StandbyMeasurement> {
        let m = self.standby_measurements.remove(&id)?;
        self.indexes.standby_by_expiration.remove(&(m.expiration, id));
        if let Some(set) = self.indexes.standby_by_room.get_mut(&m.room) {
            set.remove(&id);
        }
        Some(m)
    }

    // ---- audit log & subscription queue ----------------------------------

    pub(crate) fn emit(&mut self, op: VirtualOperation) {
        self.virtual_ops.push(op);
    }

    pub fn virtual_operations(&self) -> &[VirtualOperation] {
        &self.virtual_ops
    }

    pub fn take_virtual_operations(&mut self) -> Vec<VirtualOperation> {
        std::mem::take(&mut self.virtual_ops)
    }

    /// Drain the set of tables mutated since the last drain; the
    /// subscription surface turns these into snapshots
    pub fn take_changed_tables(&mut self) -> BTreeSet<TableId> {
        std::mem::take(&mut self.changed_tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new(ChainConfig::default())
    }

    #[test]
    fn clock_is_monotonic() {
        let mut ctx = ctx();
        ctx.begin_block(LedgerTime(100)).unwrap();
        assert!(ctx.begin_block(LedgerTime(99)).is_err());
        ctx.begin_block(LedgerTime(100)).unwrap();
        assert_eq!(ctx.head_time(), LedgerTime(100));
    }

    #[test]
    fn debit_rejects_overdraw_and_symbol_mismatch() {
        let mut ctx = ctx();
        let alice = AccountId::from("alice");
        ctx.deposit(alice.clone(), Asset::new(50, "CHP")).unwrap();
        assert!(ctx.debit(&alice, &Asset::new(60, "CHP")).is_err());
        assert!(ctx.debit(&alice, &Asset::new(10, "GLD")).is_err());
        ctx.debit(&alice, &Asset::new(20, "CHP")).unwrap();
        assert_eq!(ctx.balance(&alice).unwrap().amount, 30);
    }

    #[test]
    fn genesis_has_null_room() {
        let ctx = ctx();
        assert!(ctx.room(RoomId::NULL).is_some());
        assert_eq!(ctx.rooms().count(), 1);
    }

    #[test]
    #[should_panic(expected = "occupancy counter corrupted")]
    fn corrupted_occupancy_counter_is_fatal() {
        let mut ctx = ctx();
        let id = ctx.create_table(Table::new(
            RoomId(1),
            "nl-holdem".into(),
            1,
            Asset::new(5, "CHP"),
        ));
        let _ = ctx.with_table_mut(id, |t| {
            t.cash.insert(AccountId::from("p"), Asset::new(10, "CHP"));
            // deliberately skip sync_occupancy()
        });
    }
}
