//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings shared by the channel endpoints,
//! the watchdog and the process supervisor.
//!
//! ## Sentinel values
//! - `request_timeout = 0s` → no transport timeout on client round trips
//! - `stop_timeout = 0s` → stop kills immediately (no graceful window)
//! - `bus_capacity = 0` → clamped to 1
//! - `watchdog_poll` below 10ms → clamped to 10ms

use std::time::Duration;

/// Smallest polling interval the watchdog accepts.
const MIN_WATCHDOG_POLL: Duration = Duration::from_millis(10);

/// Global configuration for supervisors and channel endpoints.
///
/// ## Field semantics
/// - `bus_capacity`: Event bus ring buffer size (min 1)
/// - `request_timeout`: Client round-trip timeout (`0s` = none)
/// - `watchdog_poll`: Interval at which a watched pid is re-probed
/// - `stop_timeout`: Default graceful window for `stop_default` / host dispose
/// - `ack_body`: Acknowledgement body written by the channel server
/// - `max_port_attempts`: Re-probe budget when a partner port collides
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the supervisor event bus broadcast channel.
    ///
    /// Slow receivers that lag behind more than `bus_capacity` messages will
    /// receive `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Transport timeout for one client request/response round trip.
    pub request_timeout: Duration,

    /// How often the watchdog re-checks a watched pid.
    pub watchdog_poll: Duration,

    /// Graceful window used when no explicit stop timeout is given.
    ///
    /// - `Duration::ZERO` = kill immediately
    /// - `> 0` = signal exit over the channel, kill when the window elapses
    pub stop_timeout: Duration,

    /// Plain-text acknowledgement body sent for every accepted message.
    pub ack_body: String,

    /// Maximum number of port probes before giving up on a collision-free port.
    pub max_port_attempts: usize,
}

impl Config {
    /// Returns the client timeout as an `Option` (`None` → no timeout).
    #[inline]
    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout == Duration::ZERO {
            None
        } else {
            Some(self.request_timeout)
        }
    }

    /// Returns the default stop timeout as an `Option` (`None` → kill immediately).
    #[inline]
    pub fn stop_timeout(&self) -> Option<Duration> {
        if self.stop_timeout == Duration::ZERO {
            None
        } else {
            Some(self.stop_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the watchdog poll interval clamped to a sane minimum.
    #[inline]
    pub fn watchdog_poll_clamped(&self) -> Duration {
        self.watchdog_poll.max(MIN_WATCHDOG_POLL)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `bus_capacity = 1024`
    /// - `request_timeout = 5s`
    /// - `watchdog_poll = 250ms`
    /// - `stop_timeout = 0s` (kill immediately)
    /// - `ack_body = "received"`
    /// - `max_port_attempts = 64`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            request_timeout: Duration::from_secs(5),
            watchdog_poll: Duration::from_millis(250),
            stop_timeout: Duration::ZERO,
            ack_body: "received".to_string(),
            max_port_attempts: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinels_map_to_none() {
        let cfg = Config {
            request_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(cfg.request_timeout(), None);
        assert_eq!(cfg.stop_timeout(), None);
    }

    #[test]
    fn clamps_lower_bounds() {
        let cfg = Config {
            bus_capacity: 0,
            watchdog_poll: Duration::from_millis(1),
            ..Config::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.watchdog_poll_clamped(), Duration::from_millis(10));
    }
}
