//! # Error types used by the supervision core.
//!
//! [`SupervisorError`] covers failures raised while driving the child
//! process lifecycle. Most variants are recoverable through the restart
//! loop; [`SupervisorError::InvalidTransition`] is not: it indicates a
//! state-machine rule violation and aborts the loop.
//!
//! Each variant provides [`as_label`](SupervisorError::as_label) for
//! logs and metrics.

use thiserror::Error;

use crate::state::State;

/// Errors produced by the supervisor and its spawn sequence.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The state machine rejected a transition. This is a programming
    /// bug, never retried.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// State the machine was in.
        from: State,
        /// State the caller asked for.
        to: State,
    },

    /// The build callback failed to produce a child specification.
    #[error("build command failed: {reason}")]
    Build {
        /// Stringified cause from the caller-supplied builder.
        reason: String,
    },

    /// The OS refused to start the child process, or its pipes could
    /// not be wired.
    #[error("failed to spawn child: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    /// `run` was called a second time on the same supervisor.
    #[error("supervisor is already running")]
    AlreadyRunning,

    /// A forward specification was empty after trimming.
    #[error("forward spec is required")]
    ForwardRequired,

    /// Removing the forward would leave the sequence empty.
    #[error("at least one forward is required")]
    LastForward,
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::InvalidTransition { .. } => "invalid_transition",
            SupervisorError::Build { .. } => "build_failed",
            SupervisorError::Spawn { .. } => "spawn_error",
            SupervisorError::AlreadyRunning => "already_running",
            SupervisorError::ForwardRequired => "forward_invalid",
            SupervisorError::LastForward => "forward_invalid",
        }
    }

    /// Indicates whether the restart loop may retry after this error.
    ///
    /// Transition violations are fatal; everything else is retried
    /// through backoff as a start failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SupervisorError::InvalidTransition { .. })
    }
}
