//! Cross-platform OS signal handling utilities.
//!
//! [`wait_for_shutdown_signal`] completes when the process receives a
//! termination signal; [`stop_on_shutdown_signal`] wires that into a
//! supervisor's stop latch.
//!
//! ## Unix
//! SIGINT (Ctrl-C), SIGTERM (service managers), and SIGQUIT are
//! handled, with [`tokio::signal::ctrl_c`] awaited as a fallback.
//!
//! ## Windows
//! Only [`tokio::signal::ctrl_c`] is awaited.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::supervisor::Supervisor;

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Spawns a task that translates the first termination signal into
/// [`Supervisor::request_stop`].
pub fn stop_on_shutdown_signal(supervisor: Arc<Supervisor>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            supervisor.request_stop();
        }
    })
}
