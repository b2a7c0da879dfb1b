//! # Network change detection by interface fingerprinting.
//!
//! Every poll computes a **fingerprint**: the sorted, comma-joined set
//! of `"<interface>|<address>/<prefix>"` pairs for all non-loopback
//! interfaces that currently hold an address. Roaming between networks,
//! toggling Wi-Fi, or plugging a cable all change the fingerprint; the
//! watcher then emits a `"network change"` trigger exactly once per
//! transition.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use if_addrs::IfAddr;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::log::EventSink;

/// Polls the interface set and emits `"network change"` on transitions.
///
/// An empty `interval` disables the watcher. Fingerprint failures are
/// logged and polling continues with the previous value.
pub(crate) async fn network_watcher(
    token: CancellationToken,
    interval: Duration,
    log: Arc<dyn EventSink>,
    on_event: impl Fn(&str) + Send,
) {
    if interval.is_zero() {
        return;
    }
    log.info("network monitor: using interface polling");

    let mut prev = fingerprint().unwrap_or_default();
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match fingerprint() {
            Err(e) => {
                log.error(&format!("network fingerprint failed: {e}"));
            }
            Ok(next) => {
                if next != prev {
                    log.info("network change detected");
                    on_event("network change");
                    prev = next;
                }
            }
        }
    }
}

/// Computes the current interface fingerprint.
///
/// Down interfaces hold no addresses and therefore do not contribute;
/// loopback entries are skipped.
pub(crate) fn fingerprint() -> io::Result<String> {
    let entries = if_addrs::get_if_addrs()?
        .iter()
        .filter(|iface| !iface.is_loopback())
        .map(|iface| {
            format!(
                "{}|{}/{}",
                iface.name,
                iface.ip(),
                prefix_len(&iface.addr)
            )
        })
        .collect();
    Ok(join_fingerprint(entries))
}

/// Canonicalizes a set of interface entries: sorted, comma-joined.
pub(crate) fn join_fingerprint(mut entries: Vec<String>) -> String {
    entries.sort();
    entries.join(",")
}

fn prefix_len(addr: &IfAddr) -> u32 {
    match netmask(addr) {
        IpAddr::V4(mask) => u32::from(mask).count_ones(),
        IpAddr::V6(mask) => u128::from(mask).count_ones(),
    }
}

fn netmask(addr: &IfAddr) -> IpAddr {
    match addr {
        IfAddr::V4(v4) => IpAddr::V4(v4.netmask),
        IfAddr::V6(v6) => IpAddr::V6(v6.netmask),
    }
}
