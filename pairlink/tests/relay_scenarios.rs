//! End-to-end relay scenarios over the in-memory socket service.
//!
//! Each scenario drives `RelayServer::tick` with a controlled clock and
//! checks the pairing state machine's invariants after every step:
//! pair-map symmetry, disjointness of the waiting sets, the freeze
//! discipline for unmatched peers, and activity tracking for every live
//! descriptor. No scenario may ever trip a forbidden condition.

use std::collections::{HashMap, HashSet};

use pairlink::config::Settings;
use pairlink::relay::RelayServer;
use pairlink::socket::{Descriptor, MemorySocketService, SocketService};

const SUPPLY: u16 = 4501;
const DEMAND: u16 = 4502;
const DRIVER: u16 = 4503;

fn relay(settings: Settings) -> (RelayServer, MemorySocketService) {
    let mut service = MemorySocketService::new();
    let mut server = RelayServer::new(settings);
    server.listen(&mut service).expect("listen");
    (server, service)
}

fn plain_relay() -> (RelayServer, MemorySocketService) {
    relay(Settings::new(SUPPLY, DEMAND))
}

fn driver_relay(period: u32) -> (RelayServer, MemorySocketService) {
    relay(
        Settings::new(SUPPLY, DEMAND)
            .with_driver_port(DRIVER)
            .with_driver_period(period),
    )
}

/// One event-loop iteration: advance I/O, then process queues.
fn step(server: &mut RelayServer, service: &mut MemorySocketService, now: i64, alarmed: bool) {
    service.serve(None);
    server.tick(service, now, alarmed);
    assert_invariants(server, service);
    assert_eq!(
        server.stats().forbidden_conditions,
        0,
        "no forbidden condition may fire under valid inputs"
    );
}

/// Structural invariants that must hold in every reachable state.
fn assert_invariants(server: &RelayServer, service: &MemorySocketService) {
    let entries = server.pair_entries();
    let pairs: HashMap<Descriptor, Option<Descriptor>> = entries.iter().copied().collect();

    // Pair map is symmetric modulo the teardown sentinel.
    for &(a, partner) in &entries {
        if let Some(b) = partner {
            assert_eq!(
                pairs.get(&b),
                Some(&Some(a)),
                "pair {a} -> {b} must be mirrored"
            );
        }
    }

    // Waiting sets are disjoint from each other, the pair map, and the
    // driver roster.
    let supply: HashSet<Descriptor> = server.queued_supply().into_iter().collect();
    let demand: HashSet<Descriptor> = server.queued_demand().into_iter().collect();
    assert!(supply.is_disjoint(&demand));
    for d in supply.union(&demand) {
        assert!(!pairs.contains_key(d), "{d} is both queued and paired");
        assert!(!server.is_driver(*d), "{d} is both queued and a driver");
    }

    // A queued peer is frozen; an intact pair half is not.
    for d in supply.union(&demand) {
        assert!(service.is_frozen(*d), "queued peer {d} must be frozen");
    }
    for &(a, partner) in &entries {
        if partner.is_some() {
            assert!(!service.is_frozen(a), "paired peer {a} must not be frozen");
        }
    }

    // Activity is tracked for exactly the live non-listener descriptors.
    let tracked: HashSet<Descriptor> = server.tracked().into_iter().collect();
    let live: HashSet<Descriptor> = service.live_connections().into_iter().collect();
    assert_eq!(tracked, live, "activity tracking must match live peers");
}

// ---------------------------------------------------------------------
// Pairing and relaying
// ---------------------------------------------------------------------

#[test]
fn s1_supply_then_demand_pair_and_relay() {
    let (mut server, mut service) = plain_relay();

    let supply = service.connect(SUPPLY);
    step(&mut server, &mut service, 1000, false);
    assert!(server.is_queued(supply));

    let demand = service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);
    assert_eq!(server.partner(supply), Some(demand));

    service.push_incoming(demand, b"hello");
    step(&mut server, &mut service, 1001, false);

    assert_eq!(service.outgoing(supply), b"hello");
    assert_eq!(server.stats().bytes_forwarded, 5);
}

#[test]
fn s2_unmet_demand_queues_and_freezes() {
    let (mut server, mut service) = plain_relay();

    let demands = [
        service.connect(DEMAND),
        service.connect(DEMAND),
        service.connect(DEMAND),
    ];
    step(&mut server, &mut service, 1000, false);

    assert_eq!(server.backlog(), 3);
    for d in demands {
        assert!(service.is_frozen(d));
    }

    let supply = service.connect(SUPPLY);
    step(&mut server, &mut service, 1001, false);

    // Exactly one demand peer was paired; which one is unspecified.
    let partner = server.partner(supply).expect("supply must be paired");
    assert!(demands.contains(&partner));
    assert_eq!(server.backlog(), 2);

    let still_waiting: Vec<Descriptor> =
        demands.into_iter().filter(|&d| d != partner).collect();
    for d in still_waiting {
        assert!(server.is_queued(d));
        assert!(service.is_frozen(d));
    }
}

#[test]
fn s3_disconnect_cascades_to_the_partner() {
    let (mut server, mut service) = plain_relay();

    let supply = service.connect(SUPPLY);
    let demand = service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);
    assert_eq!(server.partner(supply), Some(demand));

    service.hang_up(supply);
    step(&mut server, &mut service, 1001, false);
    // The cascade's second half surfaces one iteration later.
    step(&mut server, &mut service, 1002, false);

    assert!(server.pair_entries().is_empty());
    assert!(server.tracked().is_empty());
    assert!(service.live_connections().is_empty());
}

#[test]
fn relay_preserves_byte_order_across_chunks() {
    let (mut server, mut service) = plain_relay();

    let supply = service.connect(SUPPLY);
    let demand = service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);

    service.push_incoming(demand, b"one ");
    step(&mut server, &mut service, 1001, false);
    service.push_incoming(demand, b"two ");
    service.push_incoming(demand, b"three");
    step(&mut server, &mut service, 1002, false);

    assert_eq!(service.outgoing(supply), b"one two three");
}

#[test]
fn relay_is_bidirectional() {
    let (mut server, mut service) = plain_relay();

    let supply = service.connect(SUPPLY);
    let demand = service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);

    service.push_incoming(demand, b"request");
    service.push_incoming(supply, b"response");
    step(&mut server, &mut service, 1001, false);

    assert_eq!(service.outgoing(supply), b"request");
    assert_eq!(service.outgoing(demand), b"response");
}

#[test]
fn bytes_sent_before_pairing_arrive_after_unfreeze() {
    let (mut server, mut service) = plain_relay();

    let demand = service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);
    // Frozen: these bytes stay in the OS for now.
    service.push_incoming(demand, b"early bird");

    let supply = service.connect(SUPPLY);
    step(&mut server, &mut service, 1001, false);
    assert!(service.outgoing(supply).is_empty());

    // The first wait after the unfreeze delivers the held bytes.
    step(&mut server, &mut service, 1002, false);
    assert_eq!(service.outgoing(supply), b"early bird");
}

// ---------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------

#[test]
fn s4_driver_hears_about_new_demand() {
    let (mut server, mut service) = driver_relay(0);

    let driver = service.connect(DRIVER);
    step(&mut server, &mut service, 1000, false);
    assert_eq!(service.take_outgoing(driver), b"0\n");

    // New unmet demand is reported in the iteration it arrives.
    service.connect(DEMAND);
    step(&mut server, &mut service, 1001, false);
    assert_eq!(service.take_outgoing(driver), b"1\n");

    // Pairing satisfies the demand: nothing new to report.
    service.connect(SUPPLY);
    step(&mut server, &mut service, 1002, false);
    assert_eq!(service.take_outgoing(driver), b"");
}

#[test]
fn s5_driver_receives_periodic_backlog_reports() {
    let (mut server, mut service) = driver_relay(3);

    let driver = service.connect(DRIVER);
    step(&mut server, &mut service, 1000, false);
    assert_eq!(service.take_outgoing(driver), b"0\n");

    // Quiet system: reports only once the period has elapsed.
    for now in 1001..1004 {
        step(&mut server, &mut service, now, true);
        assert_eq!(service.outgoing(driver), b"", "too early at {now}");
    }
    step(&mut server, &mut service, 1004, true);
    assert_eq!(service.take_outgoing(driver), b"0\n");

    // And again one period later.
    for now in 1005..1007 {
        step(&mut server, &mut service, now, true);
        assert_eq!(service.outgoing(driver), b"", "too early at {now}");
    }
    step(&mut server, &mut service, 1007, true);
    assert_eq!(service.take_outgoing(driver), b"0\n");
}

#[test]
fn fresh_driver_is_not_double_notified_in_its_accept_second() {
    let (mut server, mut service) = driver_relay(0);

    service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);

    let driver = service.connect(DRIVER);
    step(&mut server, &mut service, 1000, false);
    // The greeting already reported the backlog of one.
    assert_eq!(service.take_outgoing(driver), b"1\n");

    // Same second, more demand: the marker suppresses this pass.
    service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);
    assert_eq!(service.take_outgoing(driver), b"");

    // The marker is gone; the next pass reports normally.
    service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);
    assert_eq!(service.take_outgoing(driver), b"1\n");
}

#[test]
fn driver_bytes_are_discarded_without_closing() {
    let (mut server, mut service) = driver_relay(0);

    let driver = service.connect(DRIVER);
    step(&mut server, &mut service, 1000, false);
    service.take_outgoing(driver);

    service.push_incoming(driver, b"spawn 3 please\n");
    step(&mut server, &mut service, 1005, false);

    // Still connected, nothing echoed anywhere, activity refreshed.
    assert!(server.is_driver(driver));
    assert!(service.is_connected(driver));
    assert_eq!(service.outgoing(driver), b"");
    assert_eq!(server.last_activity_of(driver), Some(1005));
    assert_eq!(server.stats().bytes_forwarded, 0);
}

#[test]
fn departed_driver_is_forgotten() {
    let (mut server, mut service) = driver_relay(0);

    let driver = service.connect(DRIVER);
    step(&mut server, &mut service, 1000, false);
    assert_eq!(server.driver_count(), 1);

    service.hang_up(driver);
    step(&mut server, &mut service, 1001, false);

    assert_eq!(server.driver_count(), 0);
    assert!(server.tracked().is_empty());
}

// ---------------------------------------------------------------------
// Idle reaping
// ---------------------------------------------------------------------

#[test]
fn s6_idle_pair_is_reaped_on_the_tick() {
    let settings = Settings::new(SUPPLY, DEMAND).with_idle_timeout(5);
    let (mut server, mut service) = relay(settings);

    let supply = service.connect(SUPPLY);
    let demand = service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);
    assert_eq!(server.partner(supply), Some(demand));

    // Quiet ticks before the threshold leave the pair alone.
    step(&mut server, &mut service, 1004, true);
    assert!(service.is_connected(supply));

    // Age reaches the timeout: both ends are disconnected.
    step(&mut server, &mut service, 1005, true);
    step(&mut server, &mut service, 1005, false);

    assert!(service.live_connections().is_empty());
    assert!(server.tracked().is_empty());
    assert!(server.pair_entries().is_empty());
    assert_eq!(server.stats().connections_reaped, 2);
}

#[test]
fn traffic_defers_the_reaper() {
    let settings = Settings::new(SUPPLY, DEMAND).with_idle_timeout(5);
    let (mut server, mut service) = relay(settings);

    let supply = service.connect(SUPPLY);
    let demand = service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);

    // Bytes at 1003 refresh both ends.
    service.push_incoming(demand, b"ping");
    step(&mut server, &mut service, 1003, false);

    step(&mut server, &mut service, 1005, true);
    assert!(service.is_connected(supply));
    assert!(service.is_connected(demand));

    // Five quiet seconds after the last traffic, the pair goes.
    step(&mut server, &mut service, 1008, true);
    step(&mut server, &mut service, 1008, false);
    assert!(service.live_connections().is_empty());
}

#[test]
fn zero_idle_timeout_disables_reaping() {
    let (mut server, mut service) = plain_relay();

    let supply = service.connect(SUPPLY);
    let demand = service.connect(DEMAND);
    step(&mut server, &mut service, 1000, false);

    step(&mut server, &mut service, 5000, true);
    assert!(service.is_connected(supply));
    assert!(service.is_connected(demand));
    assert_eq!(server.stats().connections_reaped, 0);
}

#[test]
fn idle_driver_is_reaped_like_any_peer() {
    let settings = Settings::new(SUPPLY, DEMAND)
        .with_driver_port(DRIVER)
        .with_idle_timeout(5);
    let (mut server, mut service) = relay(settings);

    let driver = service.connect(DRIVER);
    step(&mut server, &mut service, 1000, false);
    service.take_outgoing(driver);

    step(&mut server, &mut service, 1006, true);
    step(&mut server, &mut service, 1006, false);

    assert_eq!(server.driver_count(), 0);
    assert!(service.live_connections().is_empty());
}
