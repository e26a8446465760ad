//! Monotonic periodic tick for the event loop.
//!
//! Stands in for a POSIX interval timer: the remaining time until the next
//! deadline bounds the I/O wait, and the expired deadline is observed (and
//! rearmed) at the top of the following iteration. At most one tick fires
//! per interval of wall-clock time.

use std::time::{Duration, Instant};

/// One-second (by default) deadline driving periodic work.
#[derive(Debug)]
pub struct Ticker {
    interval: Duration,
    deadline: Instant,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: Instant::now() + interval,
        }
    }

    /// Time left until the next tick; zero once the deadline has passed.
    /// Used as the upper bound for the multiplexer wait.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed. Observing an expired deadline
    /// rearms it, so consecutive calls within one interval fire once.
    pub fn fired(&mut self) -> bool {
        let now = Instant::now();
        if now < self.deadline {
            return false;
        }
        self.deadline = now + self.interval;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn does_not_fire_before_the_interval() {
        let mut ticker = Ticker::new(Duration::from_secs(60));
        assert!(!ticker.fired());
        assert!(ticker.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn fires_once_per_interval() {
        let mut ticker = Ticker::new(Duration::from_millis(20));
        thread::sleep(Duration::from_millis(30));

        assert!(ticker.fired());
        // Rearmed: a second observation within the new interval is quiet.
        assert!(!ticker.fired());

        thread::sleep(Duration::from_millis(30));
        assert!(ticker.fired());
    }

    #[test]
    fn remaining_reaches_zero_after_expiry() {
        let ticker = Ticker::new(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ticker.remaining(), Duration::ZERO);
    }
}
