//! # sshvisor
//!
//! **sshvisor** keeps a long-lived SSH tunnel process alive under
//! unstable local conditions: laptop sleep/wake, network roaming, and
//! transient auth or DNS failures.
//!
//! It provides a per-role supervisor that owns exactly one child
//! process at a time, classifies every exit from the stderr tail,
//! applies a restart policy with debounced exponential backoff, and
//! re-establishes the tunnel when the machine wakes or the network
//! changes.
//!
//! ## Features
//!
//! | Area | Description | Key types |
//! |------|-------------|-----------|
//! | **Supervision** | Spawn → wait → classify → decide loop, one child at a time. | [`Supervisor`], [`Options`] |
//! | **Roles** | Remote-forward agent and local-forward client façades. | [`Agent`], [`Client`] |
//! | **Classification** | Pure mapping from stderr tail + exit code to a reason class. | [`ExitClass`], [`classify`] |
//! | **Backoff** | Exponential restart delays with bounded jitter. | [`Backoff`], [`RestartConfig`] |
//! | **Triggers** | Sleep, network-change, and periodic restart sources. | [`MonitorConfig`] |
//! | **Observability** | Structured events, metrics map, status view, durable snapshot. | [`EventSink`], [`StatusReport`], [`Snapshot`] |
//!
//! ```no_run
//! use std::sync::Arc;
//! use sshvisor::{Agent, ChildSpec, RoleConfig, TracingSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent = Agent::new(
//!         RoleConfig::default(),
//!         vec!["0.0.0.0:2222:localhost:22".to_string()],
//!         Arc::new(|| "user@relay:22".to_string()),
//!         Arc::new(|forwards: &[String]| {
//!             let mut spec = ChildSpec::new("ssh").args(["-N", "user@relay"]);
//!             for forward in forwards {
//!                 spec = spec.args(["-R", forward.as_str()]);
//!             }
//!             Ok(spec)
//!         }),
//!     );
//!
//!     agent.run(Arc::new(TracingSink)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod agent;
mod backoff;
mod child;
mod classify;
mod client;
mod config;
mod error;
mod log;
mod monitor;
mod report;
mod signal;
mod snapshot;
mod state;
mod supervisor;
mod tail;

// ---- Public re-exports ----

pub use agent::{Agent, TunnelBuildFn};
pub use backoff::Backoff;
pub use child::{BuildError, BuildResult, ChildSpec};
pub use classify::{classify, format_exit, ExitClass};
pub use client::Client;
pub use config::{RestartConfig, RestartPolicy, RoleConfig};
pub use error::SupervisorError;
pub use log::{EventSink, Level, TracingSink};
pub use monitor::MonitorConfig;
pub use report::StatusReport;
pub use signal::{stop_on_shutdown_signal, wait_for_shutdown_signal};
pub use snapshot::{read as read_snapshot, Snapshot, SnapshotFile, SnapshotSink};
pub use state::State;
pub use supervisor::{BuildFn, Options, Supervisor, SummaryFn, TcpCheck, TcpStatus};
