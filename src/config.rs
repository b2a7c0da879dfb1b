//! # Runtime configuration for a supervised tunnel role.
//!
//! [`RoleConfig`] bundles everything one role (agent or client) needs:
//! restart policy, backoff parameters, trigger debounce, monitor
//! intervals, and the optional TCP reachability probe. Parsing these
//! values from a file is the embedder's job; this module only defines
//! the shapes and their defaults.

use std::time::Duration;

use crate::monitor::MonitorConfig;

/// Policy controlling whether the child is respawned after it exits.
///
/// Terminal exit classes (auth, host key) stop the loop regardless of
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart unconditionally (default for tunnel roles).
    Always,
    /// Restart only when the child exited with a failure.
    OnFailure,
}

impl RestartPolicy {
    /// Parses a policy name; unknown names fall back to `Always`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "on_failure" | "on-failure" | "onfailure" => RestartPolicy::OnFailure,
            _ => RestartPolicy::Always,
        }
    }

    /// Returns the stable policy name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on_failure",
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::Always
    }
}

/// Backoff and debounce parameters for the restart loop.
#[derive(Debug, Clone)]
pub struct RestartConfig {
    /// Initial restart delay in milliseconds.
    pub min_delay_ms: u64,
    /// Maximum restart delay in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplicative growth factor (`>= 1.0`).
    pub factor: f64,
    /// Jitter fraction in `[0, 1]` applied to returned delays.
    pub jitter: f64,
    /// Minimum interval between two accepted restart triggers.
    pub debounce_ms: u64,
}

impl Default for RestartConfig {
    /// Defaults: 2 s initial delay doubling up to 30 s, 20% jitter,
    /// 2 s trigger debounce.
    fn default() -> Self {
        Self {
            min_delay_ms: 2_000,
            max_delay_ms: 30_000,
            factor: 2.0,
            jitter: 0.2,
            debounce_ms: 2_000,
        }
    }
}

impl RestartConfig {
    /// Returns the debounce window as a duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Full configuration for one supervised role.
#[derive(Debug, Clone, Default)]
pub struct RoleConfig {
    /// Restart policy applied after each exit.
    pub restart_policy: RestartPolicy,
    /// Backoff and debounce parameters.
    pub restart: RestartConfig,
    /// Interval for unconditional periodic restarts; zero disables.
    pub periodic_restart: Duration,
    /// Sleep and network monitor intervals.
    pub monitor: MonitorConfig,
    /// Interval for the diagnostic TCP reachability probe; zero disables.
    pub tcp_check: Duration,
    /// Address probed by the TCP reachability check.
    pub tcp_check_addr: String,
}
