//! Error types for transfer-task
//!
//! The cancellation core (`task` module) never fails: `cancel()` and
//! `register_nested()` only touch in-memory bookkeeping. Errors in this module
//! are produced by the step driver and its configuration layer, which need to
//! tell a cancelled operation apart from a failed one.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for transfer-task operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for transfer-task
#[derive(Debug, Error)]
pub enum Error {
    /// The operation (or one of its steps) was cancelled before it settled
    #[error("{}", cancelled_message(.step))]
    Cancelled {
        /// Name of the step that observed the cancellation, if any step was running
        step: Option<String>,
    },

    /// A step did not settle within the configured step timeout
    #[error("step '{step}' timed out after {}ms", .timeout.as_millis())]
    StepTimeout {
        /// Name of the step that timed out
        step: String,
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// The underlying transport reported a failure for a step
    #[error("transport error: {0}")]
    Transport(String),

    /// The spawned orchestration task panicked or was aborted
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_parallel_steps")
        key: Option<String>,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn cancelled_message(step: &Option<String>) -> String {
    match step {
        Some(step) => format!("operation cancelled during step '{step}'"),
        None => "operation cancelled".to_string(),
    }
}

impl Error {
    /// Cancellation observed while `step` was being started or awaited
    pub fn cancelled_at(step: impl Into<String>) -> Self {
        Error::Cancelled {
            step: Some(step.into()),
        }
    }

    /// Returns true if this error is a cancellation-flavoured outcome
    ///
    /// An aborted orchestration task (`JoinError::is_cancelled`) counts as a
    /// cancellation too: aborting is how `CompositeTask::cancel` stops a
    /// spawned operation that is between steps.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled { .. } => true,
            Error::Join(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
