//! End-to-end supervision loop tests driving real shell children.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use sshvisor::{
    Agent, Backoff, BuildFn, ChildSpec, EventSink, ExitClass, Level, MonitorConfig, Options,
    RestartConfig, RestartPolicy, RoleConfig, State, Supervisor, SupervisorError,
};

struct RecordingSink {
    events: Mutex<Vec<(Level, String, Value)>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|(_, n, _)| n.clone()).collect()
    }

    fn has(&self, name: &str) -> bool {
        self.events.lock().iter().any(|(_, n, _)| n == name)
    }

    fn find(&self, name: &str) -> Option<(Level, Value)> {
        self.events
            .lock()
            .iter()
            .find(|(_, n, _)| n == name)
            .map(|(level, _, fields)| (*level, fields.clone()))
    }
}

impl EventSink for RecordingSink {
    fn event(&self, level: Level, event: &str, fields: &[(&str, Value)]) {
        let mut map = serde_json::Map::new();
        for (key, value) in fields {
            map.insert((*key).to_string(), value.clone());
        }
        self.events
            .lock()
            .push((level, event.to_string(), Value::Object(map)));
    }
}

fn shell_build(script: &str, spawns: Arc<AtomicUsize>) -> BuildFn {
    let script = script.to_string();
    Arc::new(move || {
        spawns.fetch_add(1, Ordering::SeqCst);
        Ok(ChildSpec::new("sh").args(["-c", script.as_str()]))
    })
}

fn supervisor(policy: RestartPolicy, min_ms: u64, max_ms: u64) -> Arc<Supervisor> {
    let cfg = RestartConfig {
        min_delay_ms: min_ms,
        max_delay_ms: max_ms,
        factor: 2.0,
        jitter: 0.0,
        debounce_ms: 0,
    };
    let sup = Arc::new(Supervisor::new(policy, Backoff::new(&cfg)));
    sup.set_forwards(vec!["0.0.0.0:2222:localhost:22".to_string()]);
    sup
}

fn quiet_options() -> Options {
    Options {
        kind: "agent".to_string(),
        summary: Arc::new(|| "test@relay:22".to_string()),
        monitor: MonitorConfig {
            sleep_check: Duration::ZERO,
            sleep_gap: Duration::ZERO,
            network_poll: Duration::ZERO,
        },
        ..Options::default()
    }
}

async fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clean_exit_stops_under_on_failure_policy() {
    let sup = supervisor(RestartPolicy::OnFailure, 50, 100);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    sup.run(
        sink.clone(),
        shell_build("exit 0", spawns.clone()),
        quiet_options(),
    )
    .await
    .unwrap();

    assert_eq!(spawns.load(Ordering::SeqCst), 1);
    assert_eq!(sup.state(), State::Stopped);
    assert_eq!(sup.exit_success_count(), 1);
    assert_eq!(sup.last_class(), Some(ExitClass::Clean));
    assert_eq!(sup.last_exit(), "exit status 0");
    assert!(sink.has("agent_start"));
    assert!(sink.has("ssh_started"));
    assert!(sink.has("ssh_exited"));
    assert!(sink.has("restart_policy_stop"));
    assert!(sink.has("agent_stop"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_child_restarts_until_stopped() {
    let sup = supervisor(RestartPolicy::Always, 40, 80);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    let runner = sup.clone();
    let build = shell_build("exit 1", spawns.clone());
    let run_sink = sink.clone();
    let handle = tokio::spawn(async move { runner.run(run_sink, build, quiet_options()).await });

    assert!(
        wait_for(|| spawns.load(Ordering::SeqCst) >= 3, Duration::from_secs(5)).await,
        "child was not respawned"
    );
    sup.request_stop();
    handle.await.unwrap().unwrap();

    let total_spawns = spawns.load(Ordering::SeqCst) as u64;
    assert_eq!(sup.state(), State::Stopped);
    // Every spawn is reaped; at most the final one (interrupted by the
    // stop sequence) can be missing from the exit counters.
    assert!(sup.exit_failure_count() >= total_spawns - 1);
    assert!(sup.restart_count() >= 2);
    assert!(sink.has("restart_scheduled"));
    assert!(sink.has("agent_stop_requested"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn auth_class_is_terminal_regardless_of_policy() {
    let sup = supervisor(RestartPolicy::Always, 10, 20);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    sup.run(
        sink.clone(),
        shell_build(
            "echo 'Permission denied (publickey).' 1>&2; exit 255",
            spawns.clone(),
        ),
        quiet_options(),
    )
    .await
    .unwrap();

    assert_eq!(spawns.load(Ordering::SeqCst), 1, "auth exit must not respawn");
    assert_eq!(sup.last_class(), Some(ExitClass::Auth));
    assert_eq!(sup.last_exit(), "exit status 255 (auth)");

    let (level, fields) = sink.find("restart_policy_stop").unwrap();
    assert_eq!(level, Level::Error);
    assert_eq!(fields["class"], "auth");
    assert_eq!(fields["reason"], "manual intervention required");

    let (_, exited) = sink.find("ssh_exited").unwrap();
    assert!(
        exited["stderr"]
            .as_str()
            .unwrap()
            .contains("Permission denied"),
        "ssh_exited must carry the stderr tail"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hostkey_class_is_terminal() {
    let sup = supervisor(RestartPolicy::Always, 10, 20);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    sup.run(
        sink.clone(),
        shell_build(
            "echo 'Host key verification failed.' 1>&2; exit 255",
            spawns.clone(),
        ),
        quiet_options(),
    )
    .await
    .unwrap();

    assert_eq!(spawns.load(Ordering::SeqCst), 1);
    assert_eq!(sup.last_class(), Some(ExitClass::Hostkey));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_lived_child_never_marks_success() {
    let sup = supervisor(RestartPolicy::OnFailure, 10, 20);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    sup.run(sink, shell_build("exit 0", spawns), quiet_options())
        .await
        .unwrap();

    assert!(sup.last_success().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn surviving_the_grace_period_marks_success() {
    let sup = supervisor(RestartPolicy::OnFailure, 10, 20);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    let runner = sup.clone();
    let build = shell_build("sleep 3", spawns);
    let handle = tokio::spawn(async move { runner.run(sink, build, quiet_options()).await });

    assert!(
        wait_for(|| sup.last_success().is_some(), Duration::from_secs(4)).await,
        "success mark not set after grace period"
    );
    assert_eq!(sup.state(), State::Connected);

    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_before_the_grace_period_leaves_no_success() {
    let sup = supervisor(RestartPolicy::Always, 10, 20);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    let runner = sup.clone();
    let build = shell_build("sleep 10", spawns);
    let handle = tokio::spawn(async move { runner.run(sink, build, quiet_options()).await });

    assert!(wait_for(|| sup.state() == State::Connected, Duration::from_secs(3)).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    sup.request_stop();
    handle.await.unwrap().unwrap();

    assert!(sup.last_success().is_none(), "killed child must not mark success");
    assert_eq!(sup.state(), State::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_during_backoff_returns_promptly() {
    let sup = supervisor(RestartPolicy::Always, 5_000, 5_000);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    let runner = sup.clone();
    let build = shell_build("exit 1", spawns);
    let run_sink = sink.clone();
    let handle = tokio::spawn(async move { runner.run(run_sink, build, quiet_options()).await });

    assert!(
        wait_for(|| sink.has("restart_scheduled"), Duration::from_secs(3)).await,
        "loop never reached backoff"
    );
    let stopped_at = Instant::now();
    sup.request_stop();
    handle.await.unwrap().unwrap();

    assert!(
        stopped_at.elapsed() < Duration::from_secs(2),
        "stop during backoff must not wait out the delay"
    );
    assert!(sink.has("stop_during_backoff"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accepted_trigger_restarts_the_child() {
    let sup = supervisor(RestartPolicy::Always, 20, 40);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    let runner = sup.clone();
    let build = shell_build("sleep 10", spawns.clone());
    let run_sink = sink.clone();
    let handle = tokio::spawn(async move { runner.run(run_sink, build, quiet_options()).await });

    assert!(wait_for(|| sup.state() == State::Connected, Duration::from_secs(3)).await);
    sup.request_restart("network change", Duration::ZERO);

    assert!(
        wait_for(|| spawns.load(Ordering::SeqCst) >= 2, Duration::from_secs(5)).await,
        "trigger did not produce a respawn"
    );
    assert!(sink.has("restart_triggered"));
    assert_eq!(sup.last_trigger_reason(), "network change");

    sup.request_stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_failures_count_and_retry() {
    let sup = supervisor(RestartPolicy::Always, 30, 60);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    let runner = sup.clone();
    let build = shell_build("exit 0", spawns);
    // Point at a binary that cannot exist.
    let build: BuildFn = {
        let inner = build;
        Arc::new(move || {
            inner()?;
            Ok(ChildSpec::new("/nonexistent/sshvisor-test-binary"))
        })
    };
    let run_sink = sink.clone();
    let handle = tokio::spawn(async move { runner.run(run_sink, build, quiet_options()).await });

    assert!(
        wait_for(|| sup.start_failure_count() >= 2, Duration::from_secs(5)).await,
        "spawn failures must be retried"
    );
    sup.request_stop();
    handle.await.unwrap().unwrap();

    assert!(sink.has("ssh_start_failed"));
    assert!(sup.last_exit().starts_with("start failed:"));
    assert_eq!(sup.last_trigger_reason(), "start failed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_may_be_called_at_most_once() {
    let sup = supervisor(RestartPolicy::OnFailure, 10, 20);
    let spawns = Arc::new(AtomicUsize::new(0));

    sup.run(
        RecordingSink::new(),
        shell_build("exit 0", spawns.clone()),
        quiet_options(),
    )
    .await
    .unwrap();

    let err = sup
        .run(
            RecordingSink::new(),
            shell_build("exit 0", spawns),
            quiet_options(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning));
}

fn test_role_config() -> RoleConfig {
    RoleConfig {
        restart_policy: RestartPolicy::Always,
        restart: RestartConfig {
            min_delay_ms: 30,
            max_delay_ms: 60,
            factor: 2.0,
            jitter: 0.0,
            debounce_ms: 0,
        },
        periodic_restart: Duration::ZERO,
        monitor: MonitorConfig {
            sleep_check: Duration::ZERO,
            sleep_gap: Duration::ZERO,
            network_poll: Duration::ZERO,
        },
        tcp_check: Duration::ZERO,
        tcp_check_addr: String::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clearing_forwards_stops_the_agent() {
    let agent = Arc::new(Agent::new(
        test_role_config(),
        vec!["0.0.0.0:2222:localhost:22".to_string()],
        Arc::new(|| "user@relay:22".to_string()),
        Arc::new(|_forwards: &[String]| Ok(ChildSpec::new("sh").args(["-c", "sleep 10"]))),
    ));
    let sink = RecordingSink::new();

    let runner = agent.clone();
    let run_sink = sink.clone();
    let handle = tokio::spawn(async move { runner.run(run_sink).await });

    assert!(wait_for(|| agent.state() == State::Connected, Duration::from_secs(3)).await);
    assert!(agent.clear_forwards());
    handle.await.unwrap().unwrap();

    assert!(agent.forwards().is_empty());
    assert_eq!(agent.state(), State::Stopped);
    assert!(sink.has("agent_stop_requested"));
    let (_, fields) = sink.find("restart_policy_stop").unwrap();
    assert_eq!(fields["reason"], "cleared");

    // Nothing left to clear.
    assert!(!agent.clear_forwards());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agent_metrics_and_status_views() {
    let agent = Agent::new(
        test_role_config(),
        vec!["0.0.0.0:2222:localhost:22".to_string()],
        Arc::new(|| "user@relay:22".to_string()),
        Arc::new(|_forwards: &[String]| Ok(ChildSpec::new("sh").args(["-c", "exit 0"]))),
    );

    let metrics = agent.metrics();
    assert_eq!(metrics["rpa_agent_state"], "0");
    assert_eq!(metrics["rpa_agent_restart_total"], "0");
    assert!(metrics.contains_key("rpa_agent_uptime_sec"));

    let status = agent.status("/tmp/agent.sock");
    assert_eq!(status.state, "stopped");
    assert_eq!(status.summary, "user@relay:22");
    assert_eq!(status.forwards, "0.0.0.0:2222:localhost:22");
    assert_eq!(status.socket, "/tmp/agent.sock");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debounce_window_drops_the_second_trigger() {
    let sup = supervisor(RestartPolicy::Always, 20, 40);
    let sink = RecordingSink::new();
    let spawns = Arc::new(AtomicUsize::new(0));

    // Child that survives SIGTERM so the state stays Connected across
    // triggers; the stop sequence escalates to SIGKILL.
    let runner = sup.clone();
    let build = shell_build("trap '' TERM; sleep 30", spawns.clone());
    let run_sink = sink.clone();
    let handle = tokio::spawn(async move { runner.run(run_sink, build, quiet_options()).await });

    assert!(wait_for(|| sup.state() == State::Connected, Duration::from_secs(3)).await);

    let window = Duration::from_secs(2);
    sup.request_restart("periodic", window);
    tokio::time::sleep(Duration::from_millis(500)).await;
    sup.request_restart("wake", window);
    tokio::time::sleep(Duration::from_secs(2)).await;
    sup.request_restart("network change", window);

    let names: Vec<String> = sink
        .names()
        .into_iter()
        .filter(|n| n == "restart_triggered" || n == "restart_skipped")
        .collect();
    assert_eq!(
        names,
        vec!["restart_triggered", "restart_skipped", "restart_triggered"]
    );
    let (_, skipped) = sink.find("restart_skipped").unwrap();
    assert_eq!(skipped["reason"], "wake");
    assert_eq!(skipped["detail"], "debounced");

    sup.request_stop();
    handle.await.unwrap().unwrap();
}
