//! # Remote-forward agent role.
//!
//! [`Agent`] wraps one [`Supervisor`] for the tunnel role that pushes
//! remote forwards to the peer (`ssh -R`). It injects the role's event
//! names, metrics prefix, monitor configuration, and build callback;
//! all supervision semantics live in the core.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::backoff::Backoff;
use crate::child::BuildResult;
use crate::classify::ExitClass;
use crate::config::RoleConfig;
use crate::error::SupervisorError;
use crate::log::EventSink;
use crate::report::StatusReport;
use crate::snapshot::SnapshotSink;
use crate::state::State;
use crate::supervisor::{BuildFn, Options, Supervisor, SummaryFn, TcpCheck};

/// Build callback receiving the current forward sequence.
pub type TunnelBuildFn = Arc<dyn Fn(&[String]) -> BuildResult + Send + Sync>;

const METRICS_PREFIX: &str = "rpa_agent";

/// Supervised remote-forward tunnel.
pub struct Agent {
    cfg: RoleConfig,
    runner: Arc<Supervisor>,
    summary: SummaryFn,
    build: TunnelBuildFn,
}

impl Agent {
    /// Creates an agent with its initial forward sequence.
    ///
    /// `build` is invoked once per spawn with the forwards current at
    /// that moment; `summary` renders the endpoint for logs and status.
    pub fn new(
        cfg: RoleConfig,
        forwards: Vec<String>,
        summary: SummaryFn,
        build: TunnelBuildFn,
    ) -> Self {
        let runner = Arc::new(Supervisor::new(
            cfg.restart_policy,
            Backoff::new(&cfg.restart),
        ));
        runner.set_forwards(forwards);
        Self {
            cfg,
            runner,
            summary,
            build,
        }
    }

    /// Installs the durable snapshot sink.
    pub fn set_snapshot_sink(&self, sink: Arc<dyn SnapshotSink>) {
        self.runner.set_snapshot_sink(sink);
    }

    /// Runs the supervision loop until stopped.
    pub async fn run(&self, logger: Arc<dyn EventSink>) -> Result<(), SupervisorError> {
        self.runner.run(logger, self.build_fn(), self.options()).await
    }

    /// One-shot spawn without the loop.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        self.runner.start(&self.build_fn()).await
    }

    /// Latches the stop signal. Idempotent.
    pub fn request_stop(&self) {
        self.runner.request_stop();
    }

    /// Requests a debounced restart of the tunnel.
    pub fn request_restart(&self, reason: &str) {
        self.runner.request_restart(reason, self.cfg.restart.debounce());
    }

    // ---- Forward mutation ----

    pub fn add_forward(&self, spec: &str) -> Result<bool, SupervisorError> {
        self.runner
            .add_forward(spec, "remote forward added", self.cfg.restart.debounce())
    }

    pub fn remove_forward(&self, spec: &str) -> Result<bool, SupervisorError> {
        self.runner
            .remove_forward(spec, "remote forward removed", self.cfg.restart.debounce())
    }

    pub fn clear_forwards(&self) -> bool {
        self.runner.clear_forwards()
    }

    pub fn forwards(&self) -> Vec<String> {
        self.runner.forwards()
    }

    // ---- Read surface ----

    pub fn state(&self) -> State {
        self.runner.state()
    }

    pub fn restart_count(&self) -> u64 {
        self.runner.restart_count()
    }

    pub fn last_exit(&self) -> String {
        self.runner.last_exit()
    }

    pub fn last_class(&self) -> Option<ExitClass> {
        self.runner.last_class()
    }

    pub fn last_trigger_reason(&self) -> String {
        self.runner.last_trigger_reason()
    }

    pub fn last_success(&self) -> Option<SystemTime> {
        self.runner.last_success()
    }

    pub fn current_backoff(&self) -> Duration {
        self.runner.current_backoff()
    }

    pub fn tcp_check(&self) -> TcpCheck {
        self.runner.tcp_check()
    }

    /// Endpoint summary, e.g. `user@host:22`.
    pub fn summary(&self) -> String {
        (self.summary)()
    }

    /// Metrics map with `rpa_agent_*` keys.
    pub fn metrics(&self) -> BTreeMap<String, String> {
        self.runner.metrics(METRICS_PREFIX)
    }

    /// Status view for the status command and IPC adapter.
    pub fn status(&self, socket: &str) -> StatusReport {
        self.runner.status_report(self.summary(), socket.to_string())
    }

    /// The underlying supervisor, for signal wiring.
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.runner
    }

    fn build_fn(&self) -> BuildFn {
        let runner = Arc::clone(&self.runner);
        let build = Arc::clone(&self.build);
        Arc::new(move || build(&runner.forwards()))
    }

    fn options(&self) -> Options {
        Options {
            kind: "agent".to_string(),
            summary: Arc::clone(&self.summary),
            monitor: self.cfg.monitor.clone(),
            periodic_restart: self.cfg.periodic_restart,
            debounce: self.cfg.restart.debounce(),
            tcp_check: self.cfg.tcp_check,
            tcp_check_addr: self.cfg.tcp_check_addr.clone(),
        }
    }
}
