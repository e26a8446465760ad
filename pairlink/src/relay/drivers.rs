//! Driver connections and backlog notifications.
//!
//! Drivers are out-of-band clients that receive unmet-demand counts as
//! ASCII decimal lines and are expected to react by spawning supply peers.
//! They are never paired, never frozen, and never have bytes relayed.
//!
//! Two triggers produce a notification:
//!
//! - new demand was queued this iteration: every driver is told the
//!   per-iteration count;
//! - the periodic tick fired with no new demand: drivers whose configured
//!   period has elapsed are told the absolute backlog.
//!
//! A freshly accepted driver already received the backlog in its greeting,
//! so its activity timestamp carries a one-second-in-the-future marker;
//! the first notification pass resets the marker and skips the driver
//! instead of double-reporting.

use std::collections::{HashMap, HashSet};

use crate::socket::{Descriptor, SocketService};

/// The set of connected drivers plus the notification policy.
#[derive(Debug, Default)]
pub(crate) struct DriverRoster {
    drivers: HashSet<Descriptor>,
}

impl DriverRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, d: Descriptor) {
        self.drivers.insert(d);
    }

    /// Removes `d`; returns whether it was a driver.
    pub fn remove(&mut self, d: Descriptor) -> bool {
        self.drivers.remove(&d)
    }

    pub fn contains(&self, d: Descriptor) -> bool {
        self.drivers.contains(&d)
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Runs one notification pass.
    ///
    /// `new_demand` is this iteration's count of freshly queued demand
    /// peers; `backlog` is the absolute unmet-demand count; `period` is
    /// the configured reporting period for the quiet case (0 disables it).
    /// Notified drivers have their activity refreshed to `now`.
    pub fn notify<S: SocketService>(
        &self,
        service: &mut S,
        last_activity: &mut HashMap<Descriptor, i64>,
        now: i64,
        new_demand: usize,
        backlog: usize,
        period: u32,
    ) {
        for &driver in &self.drivers {
            let stamp = last_activity.entry(driver).or_insert(0);

            if *stamp > now {
                // Fresh acceptance: the greeting already carried the
                // backlog, so clear the marker and say nothing more.
                *stamp = now;
                continue;
            }

            if new_demand == 0 {
                if period == 0 || now - *stamp < i64::from(period) {
                    continue;
                }
                service.write_fmt(driver, format_args!("{}\n", backlog));
            } else {
                service.write_fmt(driver, format_args!("{}\n", new_demand));
            }

            *stamp = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::MemorySocketService;

    const DRIVER_PORT: u16 = 4503;

    fn driver_setup() -> (MemorySocketService, DriverRoster, HashMap<Descriptor, i64>, Descriptor) {
        let mut service = MemorySocketService::new();
        service.listen(DRIVER_PORT).expect("listen");
        let driver = service.connect(DRIVER_PORT);

        let mut roster = DriverRoster::new();
        roster.insert(driver);

        (service, roster, HashMap::new(), driver)
    }

    #[test]
    fn new_demand_is_reported_to_every_driver() {
        let (mut service, mut roster, mut activity, first) = driver_setup();
        let second = service.connect(DRIVER_PORT);
        roster.insert(second);
        activity.insert(first, 1000);
        activity.insert(second, 1000);

        roster.notify(&mut service, &mut activity, 1000, 2, 5, 0);

        assert_eq!(service.outgoing(first), b"2\n");
        assert_eq!(service.outgoing(second), b"2\n");
    }

    #[test]
    fn quiet_pass_respects_the_period() {
        let (mut service, roster, mut activity, driver) = driver_setup();
        activity.insert(driver, 1000);

        // Not enough time elapsed.
        roster.notify(&mut service, &mut activity, 1002, 0, 7, 3);
        assert!(service.outgoing(driver).is_empty());

        // Period reached: absolute backlog goes out.
        roster.notify(&mut service, &mut activity, 1003, 0, 7, 3);
        assert_eq!(service.outgoing(driver), b"7\n");
        assert_eq!(activity[&driver], 1003);
    }

    #[test]
    fn zero_period_disables_quiet_reports() {
        let (mut service, roster, mut activity, driver) = driver_setup();
        activity.insert(driver, 0);

        roster.notify(&mut service, &mut activity, 1000, 0, 7, 0);
        assert!(service.outgoing(driver).is_empty());
    }

    #[test]
    fn fresh_driver_marker_suppresses_one_pass() {
        let (mut service, roster, mut activity, driver) = driver_setup();
        // Accepted this very second: marker points one second ahead.
        activity.insert(driver, 1001);

        roster.notify(&mut service, &mut activity, 1000, 3, 3, 0);
        assert!(service.outgoing(driver).is_empty());
        assert_eq!(activity[&driver], 1000);

        // The marker is gone; the next pass reports normally.
        roster.notify(&mut service, &mut activity, 1000, 1, 4, 0);
        assert_eq!(service.outgoing(driver), b"1\n");
    }

    #[test]
    fn remove_reports_membership() {
        let (_service, mut roster, _activity, driver) = driver_setup();
        assert!(roster.remove(driver));
        assert!(!roster.remove(driver));
        assert_eq!(roster.len(), 0);
    }
}
