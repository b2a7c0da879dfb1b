//! # Restart trigger sources.
//!
//! Long-running watchers that detect conditions an SSH tunnel does not
//! survive: the machine sleeping and waking, and the active network
//! interfaces changing. Each watcher emits a plain `(reason)` string
//! into the supervisor's trigger gate; debouncing and state checks
//! happen there, not here.
//!
//! Watchers are cancellable tasks: the supervisor starts them when its
//! loop begins and cancels them when it returns. A watcher that fails
//! to read its inputs logs the problem and keeps polling; partial
//! failure never stops the supervisor.

mod network;
mod sleep;

pub(crate) use network::network_watcher;
pub(crate) use sleep::sleep_watcher;

use std::time::Duration;

/// Polling intervals for the sleep and network watchers.
///
/// A zero interval disables the corresponding watcher.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the sleep watcher samples the wall clock.
    pub sleep_check: Duration,
    /// Wall-clock gap treated as a wake; zero derives `2 × sleep_check`.
    pub sleep_gap: Duration,
    /// How often the network watcher recomputes the fingerprint.
    pub network_poll: Duration,
}

impl Default for MonitorConfig {
    /// Defaults: sample the clock and the interfaces every 5 s, derive
    /// the sleep gap from the interval.
    fn default() -> Self {
        Self {
            sleep_check: Duration::from_secs(5),
            sleep_gap: Duration::ZERO,
            network_poll: Duration::from_secs(5),
        }
    }
}
