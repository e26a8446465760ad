//! The relay event loop.
//!
//! [`RelayServer`] accepts connections on the supply and demand ports
//! (plus the optional driver port), pairs each supply peer with a demand
//! peer, and forwards bytes between the two halves of every pair without
//! inspecting them. Unmatched peers are frozen (their bytes stay in the
//! OS until a counterpart arrives) and drivers are told how many demand
//! peers are still waiting.
//!
//! # Iteration order
//!
//! Each loop iteration performs, in this order: signal drain, termination
//! check, one multiplexer wait, then the three queue drains
//! (disconnections, new connections, incoming bytes) interleaved with
//! driver notification and, on tick iterations, idle reaping.
//! Disconnections are processed before new connections so a descriptor
//! value recycled by the service cannot be confused with a dying one.
//!
//! ```text
//!                          accept
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │                           │
//!     (no counterpart)               (counterpart ready)
//!              │                           │
//!            UNMET ──── counterpart ────► PAIRED
//!              │         arrives           │
//!              └──── disconnect ───────► CLOSED ◄── disconnect
//!                                                     │
//!                                          (cascades to partner)
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tracing::{error, info, warn};

use super::drivers::DriverRoster;
use super::pairing::PairingTable;
use super::ticker::Ticker;
use super::RelayError;
use crate::config::Settings;
use crate::signals::SignalArbiter;
use crate::socket::{Descriptor, SocketService};

/// Interval of the periodic tick driving reaping and quiet-period driver
/// reports.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// The three listening endpoints, recorded to classify accepts.
#[derive(Debug, Clone, Copy)]
struct Listeners {
    supply: Descriptor,
    demand: Descriptor,
    driver: Option<Descriptor>,
}

/// Running counters, observational only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayStats {
    /// Pairs formed since startup.
    pub pairs_made: u64,
    /// Bytes moved between paired peers.
    pub bytes_forwarded: u64,
    /// Connections closed by the idle reaper.
    pub connections_reaped: u64,
    /// Internal invariant violations observed. Always zero under valid
    /// inputs; a nonzero value indicates a bug, not peer misbehavior.
    pub forbidden_conditions: u64,
}

/// The rendezvous/relay state machine.
///
/// Generic over the [`SocketService`] so the same loop runs against real
/// TCP sockets in production and the in-memory service in tests.
///
/// # Example
///
/// ```no_run
/// use pairlink::config::Settings;
/// use pairlink::relay::RelayServer;
/// use pairlink::socket::TcpSocketService;
///
/// let mut service = TcpSocketService::new().expect("poll");
/// let mut server = RelayServer::new(Settings::default());
/// server.run(&mut service).expect("relay");
/// ```
pub struct RelayServer {
    settings: Settings,
    listeners: Option<Listeners>,
    pairing: PairingTable,
    drivers: DriverRoster,
    last_activity: HashMap<Descriptor, i64>,
    stats: RelayStats,
    /// Reused chunk buffer for relay forwarding.
    scratch: Vec<u8>,
}

impl RelayServer {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            listeners: None,
            pairing: PairingTable::new(),
            drivers: DriverRoster::new(),
            last_activity: HashMap::new(),
            stats: RelayStats::default(),
            scratch: Vec::new(),
        }
    }

    /// Opens the listening endpoints and logs the startup line.
    pub fn listen<S: SocketService>(&mut self, service: &mut S) -> Result<(), RelayError> {
        let supply_port = self.settings.supply_port;
        let demand_port = self.settings.demand_port;
        let driver_port = self.settings.driver_port;

        let supply = service
            .listen(supply_port)
            .ok_or(RelayError::Listen { port: supply_port })?;
        let demand = service
            .listen(demand_port)
            .ok_or(RelayError::Listen { port: demand_port })?;
        let driver = if driver_port != 0 {
            Some(
                service
                    .listen(driver_port)
                    .ok_or(RelayError::Listen { port: driver_port })?,
            )
        } else {
            None
        };

        if driver.is_none() {
            info!("Listening on ports {} and {}...", supply_port, demand_port);
        } else {
            info!(
                "Listening on ports {}, {} and {}...",
                supply_port, demand_port, driver_port
            );
        }

        self.listeners = Some(Listeners {
            supply,
            demand,
            driver,
        });
        Ok(())
    }

    /// Runs the event loop until a termination signal or a fatal service
    /// error. Opens the listeners first if [`listen`](Self::listen) has
    /// not been called.
    pub fn run<S: SocketService>(&mut self, service: &mut S) -> Result<(), RelayError> {
        if self.listeners.is_none() {
            self.listen(service)?;
        }
        let arbiter = SignalArbiter::install()?;
        let mut ticker = Ticker::new(TICK_INTERVAL);
        let mut terminated = false;
        let mut failed = false;

        loop {
            let alarmed = ticker.fired();
            if arbiter.drain() {
                terminated = true;
            }

            if terminated {
                self.close_listeners(service);
                break;
            }

            // The expired tick already ended the previous wait; go
            // straight to the timer-driven work.
            if !alarmed && !service.serve(Some(ticker.remaining())) {
                error!("Error while serving the listening descriptors.");
                failed = true;
                terminated = true;
            }

            let now = Self::timestamp();
            self.tick(service, now, alarmed);

            if terminated {
                break;
            }
        }

        if failed {
            Err(RelayError::Serve)
        } else {
            Ok(())
        }
    }

    /// One iteration of queue processing: drains disconnections, new
    /// connections, and incoming bytes, notifies drivers, and reaps idle
    /// descriptors on tick iterations.
    ///
    /// `now` is the wall clock in seconds; `alarmed` marks a tick
    /// iteration. Exposed so tests and embedders can drive the loop with
    /// a controlled clock; [`run`](Self::run) calls it once per wait.
    pub fn tick<S: SocketService>(&mut self, service: &mut S, now: i64, alarmed: bool) {
        self.drain_disconnections(service);
        let new_demand = self.drain_connections(service, now);

        if new_demand > 0 || alarmed {
            self.drivers.notify(
                service,
                &mut self.last_activity,
                now,
                new_demand,
                self.pairing.unmet_demand_count(),
                self.settings.driver_period,
            );
        }

        self.drain_incoming(service, now);

        if alarmed {
            self.reap_idle(service, now);
        }
    }

    fn drain_disconnections<S: SocketService>(&mut self, service: &mut S) {
        while let Some(d) = service.next_disconnection() {
            info!(
                "Disconnected {}:{} (descriptor {}).",
                service.host(d),
                service.port(d),
                d
            );

            self.last_activity.remove(&d);

            if self.drivers.remove(d) {
                continue;
            }

            if let Some(partner) = self.pairing.remove(d) {
                // Break the cycle before requesting the partner's close so
                // the second pass finds nothing left to tear down.
                self.pairing.sever(partner);
                service.disconnect(partner);
            }
        }
    }

    /// Returns the number of demand peers queued unmatched this pass.
    fn drain_connections<S: SocketService>(&mut self, service: &mut S, now: i64) -> usize {
        let Some(listeners) = self.listeners else {
            return 0;
        };
        let mut new_demand = 0;

        while let Some(d) = service.next_connection() {
            info!(
                "New connection from {}:{} (descriptor {}).",
                service.host(d),
                service.port(d),
                d
            );

            self.last_activity.insert(d, now);
            let listener = service.listener_of(d);

            if listener == Some(listeners.supply) {
                match self.pairing.take_unmet_demand() {
                    None => {
                        self.pairing.queue_supply(d);
                        service.freeze(d);
                    }
                    Some(other) => self.couple(service, d, other, now),
                }
            } else if listener == Some(listeners.demand) {
                match self.pairing.take_unmet_supply() {
                    None => {
                        self.pairing.queue_demand(d);
                        service.freeze(d);
                        new_demand += 1;
                    }
                    Some(other) => self.couple(service, d, other, now),
                }
            } else if listeners.driver.is_some() && listener == listeners.driver {
                self.drivers.insert(d);
                // One-second-ahead marker: the greeting below already
                // reports the backlog, so the next notification pass must
                // not repeat it.
                self.last_activity.insert(d, now + 1);
                let backlog = self.pairing.unmet_demand_count();
                service.write_fmt(d, format_args!("{}\n", backlog));
            } else {
                self.forbidden_condition(file!(), line!());
            }
        }

        new_demand
    }

    /// Installs a fresh pair: `accepted` just arrived, `waiting` leaves
    /// its unmet set and may speak again.
    fn couple<S: SocketService>(
        &mut self,
        service: &mut S,
        accepted: Descriptor,
        waiting: Descriptor,
        now: i64,
    ) {
        self.pairing.insert_pair(accepted, waiting);
        service.unfreeze(waiting);
        self.last_activity.insert(waiting, now);
        self.stats.pairs_made += 1;
    }

    fn drain_incoming<S: SocketService>(&mut self, service: &mut S, now: i64) {
        while let Some(d) = service.next_incoming() {
            service.swap_incoming(d, &mut self.scratch);

            if !self.drivers.contains(d) {
                match self.pairing.partner(d) {
                    // Not paired, not queued, not a driver: nothing should
                    // ever read from such a descriptor.
                    None => self.forbidden_condition(file!(), line!()),
                    // Partner mid-teardown; the bytes have nowhere to go.
                    Some(None) => {}
                    Some(Some(forward_to)) => {
                        if self.settings.verbose {
                            let count = self.scratch.len();
                            info!(
                                "{} byte{} from {}:{} {} sent to {}:{}.",
                                count,
                                if count == 1 { "" } else { "s" },
                                service.host(d),
                                service.port(d),
                                if count == 1 { "is" } else { "are" },
                                service.host(forward_to),
                                service.port(forward_to)
                            );
                        }
                        service.append_outgoing(forward_to, &self.scratch);
                        self.last_activity.insert(forward_to, now);
                        self.stats.bytes_forwarded += self.scratch.len() as u64;
                    }
                }
            }

            // Activity counts even when the bytes were discarded.
            self.last_activity.insert(d, now);
        }
    }

    fn reap_idle<S: SocketService>(&mut self, service: &mut S, now: i64) {
        if self.settings.idle_timeout == 0 {
            return;
        }
        let idle_timeout = i64::from(self.settings.idle_timeout);

        // Snapshot first: disconnects only enqueue events, but the sweep
        // must not iterate a map the drain is about to mutate.
        let expired: Vec<Descriptor> = self
            .last_activity
            .iter()
            .filter(|&(_, &stamp)| now - stamp >= idle_timeout)
            .map(|(&d, _)| d)
            .collect();

        for d in expired {
            if self.settings.verbose {
                info!(
                    "Connection {}:{} has timed out (descriptor {}).",
                    service.host(d),
                    service.port(d),
                    d
                );
            }
            service.disconnect(d);
            self.stats.connections_reaped += 1;
        }
    }

    fn close_listeners<S: SocketService>(&mut self, service: &mut S) {
        if let Some(listeners) = self.listeners.take() {
            service.disconnect(listeners.demand);
            service.disconnect(listeners.supply);
            if let Some(driver) = listeners.driver {
                service.disconnect(driver);
            }
        }
    }

    fn forbidden_condition(&mut self, file: &str, line: u32) {
        warn!("Forbidden condition met ({}:{}).", file, line);
        self.stats.forbidden_conditions += 1;
    }

    fn timestamp() -> i64 {
        chrono::Utc::now().timestamp()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Number of demand peers currently waiting for a supply peer.
    pub fn backlog(&self) -> usize {
        self.pairing.unmet_demand_count()
    }

    /// Number of supply peers currently waiting for a demand peer.
    pub fn surplus(&self) -> usize {
        self.pairing.unmet_supply_count()
    }

    /// Number of connected drivers.
    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    /// Whether `d` is a connected driver.
    pub fn is_driver(&self, d: Descriptor) -> bool {
        self.drivers.contains(d)
    }

    /// Whether `d` waits in an unmet set.
    pub fn is_queued(&self, d: Descriptor) -> bool {
        self.pairing.is_queued(d)
    }

    /// The live partner of `d`, if `d` is one half of an intact pair.
    pub fn partner(&self, d: Descriptor) -> Option<Descriptor> {
        self.pairing.partner(d).flatten()
    }

    /// Queued supply peers, in no particular order.
    pub fn queued_supply(&self) -> Vec<Descriptor> {
        self.pairing.queued_supply_peers()
    }

    /// Queued demand peers, in no particular order.
    pub fn queued_demand(&self) -> Vec<Descriptor> {
        self.pairing.queued_demand_peers()
    }

    /// Every pair-map entry, including mid-cascade sentinel halves.
    pub fn pair_entries(&self) -> Vec<(Descriptor, Option<Descriptor>)> {
        self.pairing.entries()
    }

    /// Descriptors with a recorded activity timestamp.
    pub fn tracked(&self) -> Vec<Descriptor> {
        self.last_activity.keys().copied().collect()
    }

    /// Activity timestamp of `d`, if tracked.
    pub fn last_activity_of(&self, d: Descriptor) -> Option<i64> {
        self.last_activity.get(&d).copied()
    }
}
