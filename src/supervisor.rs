//! # Supervisor: owns one child process and its restart loop.
//!
//! The supervisor drives a spawn → wait → classify → decide cycle until
//! an operator stops it, a terminal exit class is seen, or the restart
//! policy declines. Restart triggers arrive asynchronously from the
//! watchers and the operator; a debounce gate keeps them from storming
//! the child.
//!
//! ## Architecture
//! ```text
//! timer / sleep / network / operator
//!        │ (reason)
//!        ▼
//!  ┌─ debounce gate ─┐        spawn
//!  │   Supervisor    │──► child process ──► single waiter
//!  └──────┬──────────┘                          │ completion token
//!         │ ◄───────────────────────────────────┘
//!         ▼ exit
//!   classifier ──► restart decision ──► backoff sleep ──► spawn …
//! ```
//!
//! ## Rules
//! - At most **one** child process exists at any time.
//! - Exactly **one** waiter observes each spawn; the stop sequence and
//!   the loop both consume its completion token.
//! - State transitions are visible before any sink sees the snapshot.
//! - Sinks are invoked with no supervisor lock held.
//! - A rejected state transition aborts the loop; it is a bug, not a
//!   condition to retry.

use std::collections::BTreeMap;
use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::child::{self, BuildResult, SpawnHandle};
use crate::classify::{classify, format_exit, ExitClass};
use crate::config::RestartPolicy;
use crate::error::SupervisorError;
use crate::log::{EventSink, Level};
use crate::monitor::{self, MonitorConfig};
use crate::report::{format_uptime, StatusReport};
use crate::snapshot::{Snapshot, SnapshotSink};
use crate::state::{State, StateMachine};

/// Caller-supplied builder invoked once per spawn.
pub type BuildFn = Arc<dyn Fn() -> BuildResult + Send + Sync>;

/// Produces the endpoint summary shown in logs and status output.
pub type SummaryFn = Arc<dyn Fn() -> String + Send + Sync>;

/// How long a child must stay connected before the run counts as a
/// successful session.
const SUCCESS_GRACE: Duration = Duration::from_secs(2);
/// Graceful reap budget after an interrupt.
const REAP_GRACE: Duration = Duration::from_secs(3);
/// Additional budget after a force-kill.
const KILL_GRACE: Duration = Duration::from_secs(1);
/// Connect timeout of the diagnostic TCP probe.
const TCP_CHECK_TIMEOUT: Duration = Duration::from_secs(3);
/// Maximum stderr characters attached to `ssh_exited` events.
const STDERR_SUMMARY_CHARS: usize = 200;

/// Per-run options handed to [`Supervisor::run`].
pub struct Options {
    /// Role name prefixed to lifecycle events (`agent`, `client`).
    pub kind: String,
    /// Endpoint summary closure.
    pub summary: SummaryFn,
    /// Sleep and network watcher intervals.
    pub monitor: MonitorConfig,
    /// Unconditional restart interval; zero disables.
    pub periodic_restart: Duration,
    /// Debounce window applied to all restart triggers.
    pub debounce: Duration,
    /// TCP reachability probe interval; zero disables.
    pub tcp_check: Duration,
    /// Address probed by the TCP reachability check.
    pub tcp_check_addr: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            kind: String::new(),
            summary: Arc::new(String::new),
            monitor: MonitorConfig::default(),
            periodic_restart: Duration::ZERO,
            debounce: Duration::ZERO,
            tcp_check: Duration::ZERO,
            tcp_check_addr: String::new(),
        }
    }
}

/// Outcome of the diagnostic TCP reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpStatus {
    /// No probe has completed yet.
    Unknown,
    /// The last probe connected.
    Ok,
    /// The last probe failed or timed out.
    Failed,
}

impl TcpStatus {
    /// Returns the lowercase label used in status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            TcpStatus::Unknown => "unknown",
            TcpStatus::Ok => "ok",
            TcpStatus::Failed => "failed",
        }
    }
}

/// Published state of the TCP reachability probe.
#[derive(Debug, Clone)]
pub struct TcpCheck {
    pub status: TcpStatus,
    pub error: String,
    pub last_checked: Option<SystemTime>,
}

/// Mutable supervisor state behind the single observation mutex.
struct Inner {
    spawn: Option<Arc<SpawnHandle>>,
    epoch: u64,
    restart_count: u64,
    start_success: u64,
    start_failure: u64,
    exit_success: u64,
    exit_failure: u64,
    last_exit: String,
    last_class: Option<ExitClass>,
    last_success: Option<SystemTime>,
    last_trigger_reason: String,
    last_trigger_at: Option<Instant>,
    backoff: Backoff,
    logger: Option<Arc<dyn EventSink>>,
    snapshots: Option<Arc<dyn SnapshotSink>>,
    stop_reason: Option<String>,
    started_at: Option<Instant>,
    tcp: TcpCheck,
}

/// Owns one child process at a time and restarts it per policy.
///
/// Construct with [`Supervisor::new`], seed the forward specs, then
/// either drive the full loop with [`run`](Supervisor::run) or perform
/// a one-shot spawn with [`start`](Supervisor::start).
pub struct Supervisor {
    sm: StateMachine,
    inner: Mutex<Inner>,
    forwards: Mutex<Vec<String>>,
    stop: CancellationToken,
    running: AtomicBool,
    policy: RestartPolicy,
}

impl Supervisor {
    /// Creates a stopped supervisor with the given policy and backoff.
    pub fn new(policy: RestartPolicy, backoff: Backoff) -> Self {
        Self {
            sm: StateMachine::new(),
            inner: Mutex::new(Inner {
                spawn: None,
                epoch: 0,
                restart_count: 0,
                start_success: 0,
                start_failure: 0,
                exit_success: 0,
                exit_failure: 0,
                last_exit: String::new(),
                last_class: None,
                last_success: None,
                last_trigger_reason: String::new(),
                last_trigger_at: None,
                backoff,
                logger: None,
                snapshots: None,
                stop_reason: None,
                started_at: None,
                tcp: TcpCheck {
                    status: TcpStatus::Unknown,
                    error: String::new(),
                    last_checked: None,
                },
            }),
            forwards: Mutex::new(Vec::new()),
            stop: CancellationToken::new(),
            running: AtomicBool::new(false),
            policy,
        }
    }

    /// Installs the durable snapshot sink.
    pub fn set_snapshot_sink(&self, sink: Arc<dyn SnapshotSink>) {
        self.inner.lock().snapshots = Some(sink);
    }

    // ---- Forward sequence ----

    /// Replaces the forward sequence, trimming and de-duplicating.
    pub fn set_forwards(&self, specs: impl IntoIterator<Item = String>) {
        let mut cleaned: Vec<String> = Vec::new();
        for spec in specs {
            let trimmed = spec.trim();
            if trimmed.is_empty() || cleaned.iter().any(|f| f == trimmed) {
                continue;
            }
            cleaned.push(trimmed.to_string());
        }
        *self.forwards.lock() = cleaned;
    }

    /// Returns the current forward sequence.
    pub fn forwards(&self) -> Vec<String> {
        self.forwards.lock().clone()
    }

    /// Adds a forward spec; a restart is requested so the next spawn
    /// sees it.
    ///
    /// Returns `Ok(false)` when the spec was already present.
    pub fn add_forward(
        &self,
        spec: &str,
        reason: &str,
        debounce: Duration,
    ) -> Result<bool, SupervisorError> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(SupervisorError::ForwardRequired);
        }
        {
            let mut forwards = self.forwards.lock();
            if forwards.iter().any(|f| f == trimmed) {
                return Ok(false);
            }
            forwards.push(trimmed.to_string());
        }
        self.request_restart(reason, debounce);
        Ok(true)
    }

    /// Removes a forward spec; refuses to remove the last one.
    ///
    /// Returns `Ok(false)` when the spec was not present.
    pub fn remove_forward(
        &self,
        spec: &str,
        reason: &str,
        debounce: Duration,
    ) -> Result<bool, SupervisorError> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(SupervisorError::ForwardRequired);
        }
        {
            let mut forwards = self.forwards.lock();
            let Some(pos) = forwards.iter().position(|f| f == trimmed) else {
                return Ok(false);
            };
            if forwards.len() == 1 {
                return Err(SupervisorError::LastForward);
            }
            forwards.remove(pos);
        }
        self.request_restart(reason, debounce);
        Ok(true)
    }

    /// Clears all forwards and stops the supervisor: no forwards means
    /// no tunnel.
    ///
    /// Returns `false` when there was nothing to clear.
    pub fn clear_forwards(self: &Arc<Self>) -> bool {
        {
            let mut forwards = self.forwards.lock();
            if forwards.is_empty() {
                return false;
            }
            forwards.clear();
        }
        self.request_stop_with_reason("cleared");
        true
    }

    // ---- Operator entry points ----

    /// Latches the stop signal and interrupts the current child.
    /// Idempotent.
    pub fn request_stop(self: &Arc<Self>) {
        self.request_stop_with_reason("");
    }

    fn request_stop_with_reason(self: &Arc<Self>, reason: &str) {
        if self.stop.is_cancelled() {
            return;
        }
        if !reason.is_empty() {
            self.inner.lock().stop_reason = Some(reason.to_string());
        }
        self.stop.cancel();
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            sup.stop().await;
        });
    }

    /// External restart trigger; only acts while connected and obeys
    /// the debounce gate.
    pub fn request_restart(&self, reason: &str, debounce: Duration) {
        self.trigger_restart(reason, debounce);
    }

    // ---- Lifecycle ----

    /// One-shot spawn: transitions Stopped → Connecting → Connected.
    ///
    /// On any failure within the sequence the supervisor is back in
    /// Stopped and the error is returned. The spawned child is never
    /// leaked: a rejected transition to Connected interrupts it and
    /// waits for the reap before returning.
    pub async fn start(self: &Arc<Self>, build: &BuildFn) -> Result<(), SupervisorError> {
        self.sm.transition(State::Connecting)?;

        if self.forwards.lock().is_empty() {
            let _ = self.sm.transition(State::Stopped);
            self.record_start_failure();
            return Err(SupervisorError::ForwardRequired);
        }

        let spec = match build() {
            Ok(spec) => spec,
            Err(e) => {
                let _ = self.sm.transition(State::Stopped);
                self.record_start_failure();
                return Err(SupervisorError::Build {
                    reason: e.to_string(),
                });
            }
        };

        let epoch = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            inner.epoch
        };
        let handle = match child::spawn(&spec, epoch) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self.sm.transition(State::Stopped);
                self.record_start_failure();
                return Err(e);
            }
        };
        self.inner.lock().spawn = Some(handle.clone());

        if let Err(e) = self.sm.transition(State::Connected) {
            handle.interrupt();
            self.reap(&handle).await;
            self.clear_spawn(&handle);
            return Err(e);
        }

        self.record_start_success();
        self.schedule_success_mark(handle.epoch());
        Ok(())
    }

    /// Runs the restart loop until stop is requested, a terminal class
    /// is seen, or the policy declines a restart.
    ///
    /// May be called at most once per supervisor. Returns the first
    /// fatal error, otherwise `Ok`.
    pub async fn run(
        self: &Arc<Self>,
        logger: Arc<dyn EventSink>,
        build: BuildFn,
        opts: Options,
    ) -> Result<(), SupervisorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyRunning);
        }

        let names = EventNames::for_kind(&opts.kind);
        logger.event(
            Level::Info,
            &names.start,
            &[("summary", json!((opts.summary)()))],
        );
        {
            let mut inner = self.inner.lock();
            inner.logger = Some(logger.clone());
            inner.started_at = Some(Instant::now());
        }

        let watchers = CancellationToken::new();
        let mut tasks = Vec::new();

        {
            let sup = Arc::clone(self);
            let debounce = opts.debounce;
            tasks.push(tokio::spawn(monitor::sleep_watcher(
                watchers.child_token(),
                opts.monitor.sleep_check,
                opts.monitor.sleep_gap,
                logger.clone(),
                move |reason| sup.trigger_restart(reason, debounce),
            )));
        }
        {
            let sup = Arc::clone(self);
            let debounce = opts.debounce;
            tasks.push(tokio::spawn(monitor::network_watcher(
                watchers.child_token(),
                opts.monitor.network_poll,
                logger.clone(),
                move |reason| sup.trigger_restart(reason, debounce),
            )));
        }
        if !opts.periodic_restart.is_zero() {
            tasks.push(tokio::spawn(periodic_restart_loop(
                Arc::clone(self),
                watchers.child_token(),
                opts.periodic_restart,
                opts.debounce,
            )));
        }
        if !opts.tcp_check.is_zero() && !opts.tcp_check_addr.trim().is_empty() {
            tasks.push(tokio::spawn(tcp_check_loop(
                Arc::clone(self),
                watchers.child_token(),
                opts.tcp_check,
                opts.tcp_check_addr.trim().to_string(),
            )));
        }
        {
            // Latching stop cancels the watchers without waiting for
            // the loop to notice.
            let stop = self.stop.clone();
            let watchers = watchers.clone();
            tasks.push(tokio::spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => watchers.cancel(),
                    _ = watchers.cancelled() => {}
                }
            }));
        }

        let result = self.run_loop(&logger, &build, &opts, &names).await;

        watchers.cancel();
        for task in tasks {
            let _ = task.await;
        }
        self.inner.lock().logger = None;
        logger.event(Level::Info, &names.stop, &[]);
        result
    }

    async fn run_loop(
        self: &Arc<Self>,
        logger: &Arc<dyn EventSink>,
        build: &BuildFn,
        opts: &Options,
        names: &EventNames,
    ) -> Result<(), SupervisorError> {
        loop {
            if self.stop.is_cancelled() {
                logger.event(Level::Info, &names.stop_requested, &[]);
                let stop_reason = self.inner.lock().stop_reason.take();
                if let Some(reason) = stop_reason {
                    logger.event(
                        Level::Info,
                        "restart_policy_stop",
                        &[
                            ("policy", json!(self.policy.name())),
                            ("reason", json!(reason)),
                        ],
                    );
                }
                self.stop().await;
                return Ok(());
            }

            if let Err(err) = self.start(build).await {
                if self.stop.is_cancelled() {
                    continue;
                }
                if !err.is_retryable() {
                    return Err(err);
                }
                self.record_exit(format!("start failed: {err}"));
                self.set_last_trigger_reason("start failed");
                logger.event(
                    Level::Error,
                    "ssh_start_failed",
                    &[("error", json!(err.to_string()))],
                );
                self.inner.lock().restart_count += 1;
                self.sleep_with_backoff(logger).await;
                continue;
            }

            logger.event(
                Level::Info,
                "ssh_started",
                &[("summary", json!((opts.summary)()))],
            );

            let spawned = self.inner.lock().spawn.clone();
            let Some(handle) = spawned else {
                self.record_exit("ssh command not started".to_string());
                logger.event(
                    Level::Error,
                    "ssh_start_failed",
                    &[("error", json!("ssh command not started"))],
                );
                let _ = self.sm.transition(State::Stopped);
                time::sleep(Duration::from_secs(2)).await;
                continue;
            };

            handle.wait_done().await;
            let outcome = handle.take_outcome();
            let (code, failed) = exit_code_of(&outcome);
            self.record_exit_counter(failed);

            let tail = handle.tail.lines();
            let class = classify(&tail, code, failed);
            self.set_last_class(class);

            let mut exit_msg = format_exit(code, failed);
            if class != ExitClass::Clean {
                exit_msg = format!("{exit_msg} ({class})");
            }
            self.record_exit(exit_msg.clone());

            if failed {
                match handle.tail.summary(STDERR_SUMMARY_CHARS) {
                    Some(stderr) => logger.event(
                        Level::Error,
                        "ssh_exited",
                        &[
                            ("exit", json!(exit_msg)),
                            ("class", json!(class.as_str())),
                            ("stderr", json!(stderr)),
                        ],
                    ),
                    None => logger.event(
                        Level::Error,
                        "ssh_exited",
                        &[("exit", json!(exit_msg)), ("class", json!(class.as_str()))],
                    ),
                }
            } else {
                logger.event(
                    Level::Info,
                    "ssh_exited",
                    &[("exit", json!(exit_msg)), ("class", json!(class.as_str()))],
                );
            }

            self.sm.settle_stopped();
            self.inner.lock().spawn = None;

            if class.is_terminal() {
                logger.event(
                    Level::Error,
                    "restart_policy_stop",
                    &[
                        ("policy", json!(self.policy.name())),
                        ("class", json!(class.as_str())),
                        ("reason", json!("manual intervention required")),
                    ],
                );
                return Ok(());
            }
            if !self.should_restart(failed) {
                logger.event(
                    Level::Info,
                    "restart_policy_stop",
                    &[
                        ("policy", json!(self.policy.name())),
                        ("class", json!(class.as_str())),
                    ],
                );
                return Ok(());
            }

            if !failed {
                self.inner.lock().backoff.reset();
            }
            self.inner.lock().restart_count += 1;
            self.sleep_with_backoff(logger).await;
        }
    }

    /// Interrupts the child, reaps it within the grace budget, and
    /// moves to Stopped.
    ///
    /// Consumes the same completion token as the loop's normal exit
    /// path; this is the only other place that blocks on the waiter.
    pub(crate) async fn stop(&self) {
        let handle = self.inner.lock().spawn.clone();
        if let Some(handle) = handle {
            handle.interrupt();
            self.reap(&handle).await;
            self.clear_spawn(&handle);
        }
        self.sm.settle_stopped();
    }

    async fn reap(&self, handle: &Arc<SpawnHandle>) {
        if time::timeout(REAP_GRACE, handle.wait_done()).await.is_err() {
            handle.kill();
            let _ = time::timeout(KILL_GRACE, handle.wait_done()).await;
        }
    }

    fn clear_spawn(&self, handle: &Arc<SpawnHandle>) {
        let mut inner = self.inner.lock();
        if inner
            .spawn
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            inner.spawn = None;
        }
    }

    fn should_restart(&self, failed: bool) -> bool {
        match self.policy {
            RestartPolicy::OnFailure => failed,
            RestartPolicy::Always => true,
        }
    }

    async fn sleep_with_backoff(&self, logger: &Arc<dyn EventSink>) {
        let delay = self.inner.lock().backoff.next();
        if delay.is_zero() {
            return;
        }
        logger.event(
            Level::Info,
            "restart_scheduled",
            &[("delay_ms", json!(delay.as_millis() as u64))],
        );
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = self.stop.cancelled() => {
                logger.event(Level::Info, "stop_during_backoff", &[]);
                self.stop().await;
            }
        }
    }

    // ---- Triggers ----

    fn trigger_restart(&self, reason: &str, debounce: Duration) {
        if self.sm.state() != State::Connected {
            return;
        }
        self.set_last_trigger_reason(reason);
        let logger = self.inner.lock().logger.clone();
        if !self.allow_trigger(debounce) {
            if let Some(logger) = &logger {
                logger.event(
                    Level::Info,
                    "restart_skipped",
                    &[("reason", json!(reason)), ("detail", json!("debounced"))],
                );
            }
            return;
        }
        if let Some(logger) = &logger {
            logger.event(Level::Info, "restart_triggered", &[("reason", json!(reason))]);
        }
        let handle = self.inner.lock().spawn.clone();
        if let Some(handle) = handle {
            handle.terminate();
        }
    }

    fn allow_trigger(&self, window: Duration) -> bool {
        if window.is_zero() {
            return true;
        }
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if let Some(last) = inner.last_trigger_at {
            if now.duration_since(last) < window {
                return false;
            }
        }
        inner.last_trigger_at = Some(now);
        true
    }

    // ---- Recorded state & snapshots ----

    fn schedule_success_mark(self: &Arc<Self>, epoch: u64) {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            time::sleep(SUCCESS_GRACE).await;
            let write = {
                let mut inner = sup.inner.lock();
                if inner.epoch != epoch || sup.sm.state() != State::Connected {
                    None
                } else {
                    inner.last_success = Some(SystemTime::now());
                    Some((inner.snapshots.clone(), snapshot_of(&inner)))
                }
            };
            if let Some((sink, snap)) = write {
                write_snapshot(sink, snap);
            }
        });
    }

    fn record_exit(&self, reason: String) {
        let (sink, snap) = {
            let mut inner = self.inner.lock();
            inner.last_exit = reason;
            (inner.snapshots.clone(), snapshot_of(&inner))
        };
        write_snapshot(sink, snap);
    }

    fn set_last_class(&self, class: ExitClass) {
        let (sink, snap) = {
            let mut inner = self.inner.lock();
            inner.last_class = Some(class);
            (inner.snapshots.clone(), snapshot_of(&inner))
        };
        write_snapshot(sink, snap);
    }

    fn set_last_trigger_reason(&self, reason: &str) {
        let (sink, snap) = {
            let mut inner = self.inner.lock();
            inner.last_trigger_reason = reason.to_string();
            (inner.snapshots.clone(), snapshot_of(&inner))
        };
        write_snapshot(sink, snap);
    }

    fn record_start_success(&self) {
        self.inner.lock().start_success += 1;
    }

    fn record_start_failure(&self) {
        self.inner.lock().start_failure += 1;
    }

    fn record_exit_counter(&self, failed: bool) {
        let mut inner = self.inner.lock();
        if failed {
            inner.exit_failure += 1;
        } else {
            inner.exit_success += 1;
        }
    }

    fn record_tcp_check(&self, result: Result<(), String>) {
        let mut inner = self.inner.lock();
        inner.tcp.last_checked = Some(SystemTime::now());
        match result {
            Ok(()) => {
                inner.tcp.status = TcpStatus::Ok;
                inner.tcp.error.clear();
            }
            Err(error) => {
                inner.tcp.status = TcpStatus::Failed;
                inner.tcp.error = error;
            }
        }
    }

    // ---- Read surface ----

    /// Current connection state.
    pub fn state(&self) -> State {
        self.sm.state()
    }

    /// Restarts performed since the loop started.
    pub fn restart_count(&self) -> u64 {
        self.inner.lock().restart_count
    }

    /// Human-readable reason of the last exit.
    pub fn last_exit(&self) -> String {
        self.inner.lock().last_exit.clone()
    }

    /// Classification of the last exit, if any child exited yet.
    pub fn last_class(&self) -> Option<ExitClass> {
        self.inner.lock().last_class
    }

    /// Reason of the last restart trigger, accepted or dropped.
    pub fn last_trigger_reason(&self) -> String {
        self.inner.lock().last_trigger_reason.clone()
    }

    /// Time the child last survived the success grace period.
    pub fn last_success(&self) -> Option<SystemTime> {
        self.inner.lock().last_success
    }

    pub fn start_success_count(&self) -> u64 {
        self.inner.lock().start_success
    }

    pub fn start_failure_count(&self) -> u64 {
        self.inner.lock().start_failure
    }

    pub fn exit_success_count(&self) -> u64 {
        self.inner.lock().exit_success
    }

    pub fn exit_failure_count(&self) -> u64 {
        self.inner.lock().exit_failure
    }

    /// Unjittered delay the next restart would wait.
    pub fn current_backoff(&self) -> Duration {
        self.inner.lock().backoff.current()
    }

    /// State of the diagnostic TCP probe.
    pub fn tcp_check(&self) -> TcpCheck {
        self.inner.lock().tcp.clone()
    }

    /// Time since the loop started; zero before `run`.
    pub fn uptime(&self) -> Duration {
        self.inner
            .lock()
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    /// Flat metrics map with `prefix`-qualified keys.
    pub fn metrics(&self, prefix: &str) -> BTreeMap<String, String> {
        let inner = self.inner.lock();
        let mut metrics = BTreeMap::new();
        metrics.insert(
            format!("{prefix}_state"),
            self.sm.state().as_metric().to_string(),
        );
        metrics.insert(
            format!("{prefix}_restart_total"),
            inner.restart_count.to_string(),
        );
        metrics.insert(
            format!("{prefix}_uptime_sec"),
            inner
                .started_at
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0)
                .to_string(),
        );
        metrics.insert(
            format!("{prefix}_start_success_total"),
            inner.start_success.to_string(),
        );
        metrics.insert(
            format!("{prefix}_start_failure_total"),
            inner.start_failure.to_string(),
        );
        metrics.insert(
            format!("{prefix}_exit_success_total"),
            inner.exit_success.to_string(),
        );
        metrics.insert(
            format!("{prefix}_exit_failure_total"),
            inner.exit_failure.to_string(),
        );
        metrics.insert(
            format!("{prefix}_last_trigger"),
            inner.last_trigger_reason.clone(),
        );
        if let Some(t) = inner.last_success {
            metrics.insert(
                format!("{prefix}_last_success_unix"),
                unix_secs(t).to_string(),
            );
        }
        let backoff = inner.backoff.current();
        if !backoff.is_zero() {
            metrics.insert(
                format!("{prefix}_backoff_ms"),
                backoff.as_millis().to_string(),
            );
        }
        metrics
    }

    /// Consistent status view for status commands and IPC adapters.
    pub fn status_report(&self, summary: String, socket: String) -> StatusReport {
        let forwards = self.forwards.lock().join(",");
        let inner = self.inner.lock();
        let backoff = inner.backoff.current();
        StatusReport {
            state: self.sm.state().as_str().to_string(),
            summary,
            forwards,
            uptime: format_uptime(
                inner
                    .started_at
                    .map(|t| t.elapsed())
                    .unwrap_or_default(),
            ),
            socket,
            restarts: inner.restart_count,
            last_exit: inner.last_exit.clone(),
            last_class: inner
                .last_class
                .map(|c| c.as_str().to_string())
                .unwrap_or_default(),
            last_trigger: inner.last_trigger_reason.clone(),
            last_success_unix: inner.last_success.map(unix_secs),
            backoff_ms: (!backoff.is_zero()).then(|| backoff.as_millis() as u64),
        }
    }
}

/// Lifecycle event names derived from the role kind.
struct EventNames {
    start: String,
    stop: String,
    stop_requested: String,
}

impl EventNames {
    fn for_kind(kind: &str) -> Self {
        if kind.is_empty() {
            return Self {
                start: "start".to_string(),
                stop: "stop".to_string(),
                stop_requested: "stop_requested".to_string(),
            };
        }
        Self {
            start: format!("{kind}_start"),
            stop: format!("{kind}_stop"),
            stop_requested: format!("{kind}_stop_requested"),
        }
    }
}

fn exit_code_of(outcome: &Option<io::Result<ExitStatus>>) -> (i32, bool) {
    match outcome {
        Some(Ok(status)) if status.success() => (0, false),
        Some(Ok(status)) => (status.code().unwrap_or(-1), true),
        Some(Err(_)) | None => (-1, true),
    }
}

fn snapshot_of(inner: &Inner) -> Snapshot {
    Snapshot {
        last_exit: inner.last_exit.clone(),
        last_class: inner
            .last_class
            .map(|c| c.as_str().to_string())
            .unwrap_or_default(),
        last_trigger: inner.last_trigger_reason.clone(),
        last_success_unix: inner.last_success.map(unix_secs),
        updated_unix: 0,
    }
}

fn write_snapshot(sink: Option<Arc<dyn SnapshotSink>>, snap: Snapshot) {
    if let Some(sink) = sink {
        sink.write(&snap);
    }
}

fn unix_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn periodic_restart_loop(
    sup: Arc<Supervisor>,
    token: CancellationToken,
    interval: Duration,
    debounce: Duration,
) {
    if interval.is_zero() {
        return;
    }
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        sup.trigger_restart("periodic", debounce);
    }
}

async fn tcp_check_loop(
    sup: Arc<Supervisor>,
    token: CancellationToken,
    interval: Duration,
    addr: String,
) {
    if interval.is_zero() || addr.is_empty() {
        return;
    }
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if sup.state() != State::Connected {
            continue;
        }
        let result = match time::timeout(TCP_CHECK_TIMEOUT, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("connect to {addr} timed out")),
        };
        sup.record_tcp_check(result);
    }
}
