//! End-to-end scenarios driven through the public operation API:
//! matchmaking placement, result quorum with a fraudulent voter,
//! reservation expiry, and small-sample rating behavior

mod common;

use common::{acct, chips, Harness};
use croupier::{
    ChainConfig, GameEventKind, Operation, TablePhase, VirtualOperation,
};
use uuid::Uuid;

/// A compatible reservation is placed at the next block boundary and
/// recorded as an allocation event
#[test]
fn reservation_is_allocated_to_matching_table() {
    let mut h = Harness::new();
    let room = h.room("host");
    let table = h.table("host", room, "nl-holdem", 1, 5);

    h.fund("alice", 10);
    let uid = Uuid::from_u128(7);
    h.ctx
        .apply(Operation::ReserveBuyIn {
            player: acct("alice"),
            uid,
            amount: chips(10),
            metadata: "nl-holdem".into(),
            protocol_version: "1.0.0".into(),
        })
        .unwrap();
    assert_eq!(h.balance_of("alice"), 0, "stake escrowed on reserve");

    h.ctx.end_block();

    let reservation = h.ctx.reservation_by_uid(&acct("alice"), uid).unwrap();
    let t = h.ctx.table(table).unwrap();
    assert_eq!(t.pending_proposals.get(&acct("alice")), Some(&reservation));
    assert_eq!(t.occupied_places, 1);
    assert_eq!(h.ctx.reservation(reservation).unwrap().table, Some(table));
    assert!(h.ctx.virtual_operations().iter().any(|op| matches!(
        op,
        VirtualOperation::ReservationAllocated { reservation: r, table: tb, .. }
            if *r == reservation && *tb == table
    )));
}

/// Result voting with 3 players and 2 witnesses at 60% quorum and no
/// substitution: the majority value becomes the etalon and the
/// disagreeing third player is reported exactly once for fraud
#[test]
fn result_quorum_and_fraud_report() {
    let mut config = ChainConfig::default();
    config.voting.result_substitution_percent = 0;
    let mut h = Harness::with_config(config);

    let room = h.room("host");
    // owner plus one registered witness; the table commits both
    h.witnesses("host", room, &["w-a"]);
    let table = h.table("host", room, "nl-holdem", 2, 5);
    for p in ["p1", "p2", "p3"] {
        h.seat(p, table, 10);
    }

    // hand start reaches its own quorum (3 of 5 required voters)
    h.start_claim("host", table, &["p1", "p2", "p3"]).unwrap();
    h.start_claim("p1", table, &["p1", "p2", "p3"]).unwrap();
    h.start_claim("p2", table, &["p1", "p2", "p3"]).unwrap();
    assert_eq!(h.ctx.table(table).unwrap().phase, TablePhase::Playing);

    // two players and one witness agree on the result
    let majority = [("p1", 15u64), ("p2", 10u64), ("p3", 5u64)];
    h.result_claim("p1", table, &majority, &[]).unwrap();
    h.result_claim("p2", table, &majority, &[]).unwrap();
    h.result_claim("host", table, &majority, &[]).unwrap();

    let t = h.ctx.table(table).unwrap();
    assert_eq!(t.phase, TablePhase::Waiting);
    assert_eq!(t.cash.get(&acct("p1")).unwrap().amount, 15);
    assert_eq!(t.cash.get(&acct("p2")).unwrap().amount, 10);
    assert_eq!(t.cash.get(&acct("p3")).unwrap().amount, 5);

    // the third player disagrees after quorum closed
    let minority = [("p1", 5u64), ("p2", 10u64), ("p3", 15u64)];
    h.result_claim("p3", table, &minority, &[]).unwrap();

    let frauds: Vec<_> = h
        .game_events()
        .into_iter()
        .filter(|e| matches!(e, GameEventKind::FraudOnResult { voter, .. } if *voter == acct("p3")))
        .collect();
    assert_eq!(frauds.len(), 1);
    // the etalon never changed
    let record = h.ctx.voting(table).unwrap();
    assert!(record.etalon_vote.is_some());
    assert_eq!(h.ctx.table(table).unwrap().cash.get(&acct("p1")).unwrap().amount, 15);
}

/// An unresolved reservation expires at the sweep after T: full refund,
/// and an allocated one also vacates its proposal slot
#[test]
fn expiration_sweep_refunds_and_vacates() {
    let mut h = Harness::new();
    let room = h.room("host");
    let table = h.table("host", room, "nl-holdem", 1, 5);

    h.fund("alice", 10);
    let uid = Uuid::from_u128(3);
    h.ctx
        .apply(Operation::ReserveBuyIn {
            player: acct("alice"),
            uid,
            amount: chips(10),
            metadata: "nl-holdem".into(),
            protocol_version: "1.0.0".into(),
        })
        .unwrap();
    h.ctx.end_block();

    let reservation = h.ctx.reservation_by_uid(&acct("alice"), uid).unwrap();
    let expiration = h.ctx.reservation(reservation).unwrap().expiration;
    assert_eq!(h.ctx.table(table).unwrap().occupied_places, 1);

    h.advance(expiration.secs() + 1);
    h.ctx.end_block();

    assert!(h.ctx.reservation(reservation).is_none());
    let t = h.ctx.table(table).unwrap();
    assert!(t.pending_proposals.is_empty());
    assert_eq!(t.occupied_places, 0);
    assert_eq!(h.balance_of("alice"), 10);
    assert!(h.ctx.virtual_operations().iter().any(|op| matches!(
        op,
        VirtualOperation::ReservationExpired { reservation: r, .. } if *r == reservation
    )));
}

/// A room with a single resolved KPI measurement is scored against the
/// cross-room baseline: positive, but below a room with a deeper sample
#[test]
fn small_sample_rating_is_anchored_by_the_baseline() {
    let mut h = Harness::new();

    let anchor = h.room("anchor");
    let anchor_table = h.table("anchor", anchor, "nl-holdem", 1, 5);
    let host = h.room("host");
    let host_table = h.table("host", host, "plo", 1, 5);

    // four resolved placements at the anchor room
    for (i, p) in ["a1", "a2", "a3", "a4"].iter().enumerate() {
        h.fund(p, 10);
        h.ctx
            .apply(Operation::ReserveBuyIn {
                player: acct(p),
                uid: Uuid::from_u128(i as u128),
                amount: chips(10),
                metadata: "nl-holdem".into(),
                protocol_version: "1.0.0".into(),
            })
            .unwrap();
    }
    // one resolved placement at the host room
    h.fund("solo", 10);
    h.ctx
        .apply(Operation::ReserveBuyIn {
            player: acct("solo"),
            uid: Uuid::from_u128(99),
            amount: chips(10),
            metadata: "plo".into(),
            protocol_version: "1.0.0".into(),
        })
        .unwrap();
    h.ctx.end_block();

    for p in ["a1", "a2", "a3", "a4"] {
        let uid = h.ctx.open_reservations_of(&acct(p))[0];
        let uid = h.ctx.reservation(uid).unwrap().uid;
        h.ctx
            .apply(Operation::ResolveReservation {
                player: acct(p),
                uid,
                table: anchor_table,
            })
            .unwrap();
    }
    let solo_uid = Uuid::from_u128(99);
    h.ctx
        .apply(Operation::ResolveReservation {
            player: acct("solo"),
            uid: solo_uid,
            table: host_table,
        })
        .unwrap();

    h.ctx.run_maintenance();

    let host_room = h.ctx.room(host).unwrap();
    let anchor_room = h.ctx.room(anchor).unwrap();
    assert!(host_room.rating > 0, "host rating {}", host_room.rating);
    assert!(
        host_room.rating < anchor_room.rating,
        "deeper sample must outscore the single measurement: {} vs {}",
        host_room.rating,
        anchor_room.rating
    );
    // aggregates recorded on the room
    assert_eq!(host_room.measurement_quantity, 2); // one KPI + creation heartbeat
    assert_eq!(anchor_room.measurement_quantity, 5);
}
