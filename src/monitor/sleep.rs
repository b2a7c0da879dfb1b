//! # Sleep detection by wall-clock gap polling.
//!
//! Samples the wall clock on a fixed interval. A tick that arrives far
//! later than the previous one means the process was suspended (laptop
//! lid closed, VM paused); the watcher then emits a `"wake"` trigger so
//! the tunnel is re-established on the fresh network.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::log::EventSink;

/// Polls the wall clock and emits `"wake"` when a gap exceeds `gap`.
///
/// An empty `interval` disables the watcher. A zero `gap` defaults to
/// twice the interval.
pub(crate) async fn sleep_watcher(
    token: CancellationToken,
    interval: Duration,
    gap: Duration,
    log: Arc<dyn EventSink>,
    on_event: impl Fn(&str) + Send,
) {
    if interval.is_zero() {
        return;
    }
    let gap = if gap.is_zero() { interval * 2 } else { gap };
    log.info("sleep monitor: using wall-clock polling");

    let mut last = SystemTime::now();
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let now = SystemTime::now();
        // A clock stepped backwards reads as no gap at all.
        let observed = now.duration_since(last).unwrap_or_default();
        if observed > gap {
            log.info(&format!("wake detected (gap={}s)", observed.as_secs()));
            on_event("wake");
        }
        last = now;
    }
}
