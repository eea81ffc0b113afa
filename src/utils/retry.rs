//! Retry schedules.
//!
//! Uses `backon` builders so loops can pull delays from a backoff iterator.

use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};

/// Fixed-interval, unbounded schedule for relay channel registration.
pub fn relay_backoff(interval: Duration) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(interval)
        .without_max_times()
}

/// Next delay from `schedule`, falling back to `interval` once it runs dry.
pub fn next_delay(schedule: &mut impl Iterator<Item = Duration>, interval: Duration) -> Duration {
    schedule.next().unwrap_or(interval)
}

/// Build the iterator of a relay schedule.
pub fn relay_schedule(interval: Duration) -> impl Iterator<Item = Duration> + Send {
    relay_backoff(interval).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_schedule_is_constant_and_unbounded() {
        let interval = Duration::from_secs(10);
        let delays: Vec<_> = relay_schedule(interval).take(50).collect();
        assert_eq!(delays.len(), 50);
        assert!(delays.iter().all(|d| *d == interval));
    }

    #[test]
    fn test_next_delay_falls_back_when_exhausted() {
        let interval = Duration::from_millis(250);
        let mut empty = std::iter::empty();
        assert_eq!(next_delay(&mut empty, interval), interval);
    }
}
