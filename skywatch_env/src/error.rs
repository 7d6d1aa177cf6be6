//! Error types for the Skywatch environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A spawned task panicked or failed to join
    #[error("Task '{name}' failed: {reason}")]
    TaskFailed { name: String, reason: String },

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a task failure error.
    pub fn task(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::TaskFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}
