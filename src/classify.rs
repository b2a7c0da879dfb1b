//! # Exit classification for the supervised child.
//!
//! [`classify`] maps the tail of the child's stderr plus its exit status
//! to an [`ExitClass`]. The class drives the restart decision: transient
//! network trouble is retried with backoff, credential and host-key
//! problems stop the loop until an operator intervenes.
//!
//! Rules are checked in priority order and the first match wins. A line
//! mentioning both an auth failure and an unreachable network therefore
//! classifies as [`ExitClass::Auth`].
//!
//! # Example
//! ```rust
//! use sshvisor::ExitClass;
//! use sshvisor::classify;
//!
//! let tail = vec!["Permission denied (publickey).".to_string()];
//! assert_eq!(classify(&tail, 255, true), ExitClass::Auth);
//! assert_eq!(classify(&[], 0, false), ExitClass::Clean);
//! assert_eq!(classify(&[], 255, true), ExitClass::Unknown);
//! ```

use std::fmt;

/// Categorized reason the child exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Exit code 0 with no process-level failure.
    Clean,
    /// Authentication or permission failure. Terminal.
    Auth,
    /// Host key verification failure. Terminal.
    Hostkey,
    /// Hostname resolution failure.
    Dns,
    /// Network unreachable or no route to host.
    Network,
    /// Connection refused by the peer.
    Refused,
    /// Connection or operation timed out.
    Timeout,
    /// Anything that matched no rule.
    Unknown,
}

impl ExitClass {
    /// Returns the lowercase label used in logs, metrics, and snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitClass::Clean => "clean",
            ExitClass::Auth => "auth",
            ExitClass::Hostkey => "hostkey",
            ExitClass::Dns => "dns",
            ExitClass::Network => "network",
            ExitClass::Refused => "refused",
            ExitClass::Timeout => "timeout",
            ExitClass::Unknown => "unknown",
        }
    }

    /// Terminal classes stop the loop; retrying cannot help without
    /// operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExitClass::Auth | ExitClass::Hostkey)
    }
}

impl fmt::Display for ExitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Substring rules in priority order; the first rule with any matching
/// tail line wins.
const RULES: &[(&[&str], ExitClass)] = &[
    (&["permission denied", "auth"], ExitClass::Auth),
    (&["host key", "known_hosts"], ExitClass::Hostkey),
    (
        &["name or service not known", "could not resolve"],
        ExitClass::Dns,
    ),
    (&["connection refused"], ExitClass::Refused),
    (&["timed out"], ExitClass::Timeout),
    (
        &["network is unreachable", "no route to host"],
        ExitClass::Network,
    ),
];

/// Classifies a child exit from its stderr tail and exit status.
///
/// - `tail`: the last lines of stderr, oldest first.
/// - `code`: numeric exit code; `-1` when the process died without one.
/// - `failed`: whether the wait reported a process-level failure.
///
/// Pure and total: every input maps to exactly one class.
pub fn classify(tail: &[String], code: i32, failed: bool) -> ExitClass {
    if !failed && code == 0 {
        return ExitClass::Clean;
    }
    let lowered: Vec<String> = tail.iter().map(|l| l.to_ascii_lowercase()).collect();
    for (patterns, class) in RULES {
        for line in &lowered {
            if patterns.iter().any(|p| line.contains(p)) {
                return *class;
            }
        }
    }
    ExitClass::Unknown
}

/// Renders the numeric exit reason for operators.
///
/// The supervisor appends the class tag (e.g. `" (auth)"`) when the
/// class is not clean.
pub fn format_exit(code: i32, failed: bool) -> String {
    if !failed {
        return "exit status 0".to_string();
    }
    if code >= 0 {
        format!("exit status {code}")
    } else {
        "terminated by signal".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tail(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn clean_requires_zero_and_no_failure() {
        assert_eq!(classify(&[], 0, false), ExitClass::Clean);
        assert_eq!(classify(&[], 0, true), ExitClass::Unknown);
        assert_eq!(classify(&[], 255, true), ExitClass::Unknown);
    }

    #[test]
    fn ssh_stderr_samples() {
        assert_eq!(
            classify(&tail(&["Permission denied (publickey)."]), 255, true),
            ExitClass::Auth
        );
        assert_eq!(
            classify(&tail(&["Host key verification failed."]), 255, true),
            ExitClass::Hostkey
        );
        assert_eq!(
            classify(
                &tail(&["ssh: Could not resolve hostname x: Name or service not known"]),
                255,
                true
            ),
            ExitClass::Dns
        );
        assert_eq!(
            classify(
                &tail(&["connect to host foo port 22: Connection refused"]),
                255,
                true
            ),
            ExitClass::Refused
        );
        assert_eq!(
            classify(&tail(&["connect to host foo port 22: Operation timed out"]), 255, true),
            ExitClass::Timeout
        );
        assert_eq!(
            classify(&tail(&["connect to host foo: Network is unreachable"]), 255, true),
            ExitClass::Network
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(
            classify(&tail(&["PERMISSION DENIED"]), 255, true),
            ExitClass::Auth
        );
        assert_eq!(
            classify(&tail(&["No Route To Host"]), 255, true),
            ExitClass::Network
        );
    }

    #[test]
    fn auth_outranks_network() {
        // One run can print both; the higher-priority rule must win.
        let lines = tail(&[
            "connect to host foo: Network is unreachable",
            "Permission denied (publickey).",
        ]);
        assert_eq!(classify(&lines, 255, true), ExitClass::Auth);
    }

    #[test]
    fn hostkey_outranks_timeout() {
        let lines = tail(&[
            "Connection timed out during banner exchange",
            "Host key verification failed.",
        ]);
        assert_eq!(classify(&lines, 255, true), ExitClass::Hostkey);
    }

    #[test]
    fn every_input_yields_a_label() {
        let inputs: [(&[&str], i32, bool); 4] = [
            (&[], -1, true),
            (&["garbage"], 1, true),
            (&[""], 127, true),
            (&["kex_exchange_identification: read: reset"], 255, true),
        ];
        for (lines, code, failed) in inputs {
            // Must never panic, must always return a class.
            let _ = classify(&tail(lines), code, failed);
        }
    }

    #[test]
    fn exit_formatting() {
        assert_eq!(format_exit(0, false), "exit status 0");
        assert_eq!(format_exit(255, true), "exit status 255");
        assert_eq!(format_exit(-1, true), "terminated by signal");
    }
}
