//! # Read views for status tooling.
//!
//! [`StatusReport`] is the flat view a status command or IPC adapter
//! renders for one role. It is assembled from the supervisor's
//! accessors in one pass so all fields are consistent.

use std::time::Duration;

use serde::Serialize;

/// Point-in-time status of one supervised role.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Connection state name (`stopped` / `connecting` / `connected`).
    pub state: String,
    /// Human-readable endpoint summary, e.g. `user@host:22`.
    pub summary: String,
    /// Active forward specs, comma-joined.
    pub forwards: String,
    /// Time since the supervisor loop started, e.g. `1h23m45s`.
    pub uptime: String,
    /// Control socket path of the owning service.
    pub socket: String,
    /// Restarts performed since the loop started.
    pub restarts: u64,
    /// Human-readable reason of the last exit.
    pub last_exit: String,
    /// Classification label of the last exit.
    pub last_class: String,
    /// Reason of the last restart trigger.
    pub last_trigger: String,
    /// Unix time the child last survived the success grace period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_unix: Option<i64>,
    /// Current unjittered backoff delay in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

/// Renders a duration the way operators read uptimes: `2h3m4s`.
pub(crate) fn format_uptime(d: Duration) -> String {
    let secs = d.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0s");
        assert_eq!(format_uptime(Duration::from_secs(59)), "59s");
        assert_eq!(format_uptime(Duration::from_secs(61)), "1m1s");
        assert_eq!(format_uptime(Duration::from_secs(3_600)), "1h0m0s");
        assert_eq!(format_uptime(Duration::from_secs(7_384)), "2h3m4s");
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let report = StatusReport {
            state: "stopped".to_string(),
            summary: String::new(),
            forwards: String::new(),
            uptime: "0s".to_string(),
            socket: String::new(),
            restarts: 0,
            last_exit: String::new(),
            last_class: String::new(),
            last_trigger: String::new(),
            last_success_unix: None,
            backoff_ms: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("last_success_unix"));
        assert!(!json.contains("backoff_ms"));
    }
}
