//! Error types for fleetexec-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while building or executing a command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Transport-level failure reported by the connection provider
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Command exited non-zero while `raise_on_nonzero_exit` was set
    #[error("command `{command}` failed on {host} with exit status {status}: {stderr}")]
    CommandFailed {
        /// Host the command ran on
        host: String,
        /// Rendered command line
        command: String,
        /// Exit status code
        status: i32,
        /// Captured stderr
        stderr: String,
    },

    /// Capability not implemented by the active backend
    #[error("{backend} backend does not implement `{capability}`")]
    MethodUnavailable {
        /// Backend type that refused the call
        backend: &'static str,
        /// Name of the missing capability
        capability: &'static str,
    },

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Command could not be built
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Option key is not recognized
    #[error("unknown option: {0}")]
    UnknownOption(String),

    /// Option value is malformed or used in an unsupported combination
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// SSH key error
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),

    /// Exit status requested before the command finished
    #[error("command has not completed: {0}")]
    NotCompleted(String),

    /// Exit status requested for a command that was detached
    #[error("exit status is not available for background command: {0}")]
    BackgroundStatus(String),

    /// Backend tried to record a second result for one command
    #[error("command already completed: {0}")]
    AlreadyCompleted(String),

    /// Failure raised by caller code inside a unit of work
    #[error("{0}")]
    Unit(String),
}

impl ExecError {
    /// Failure raised by caller code inside a unit of work
    pub fn unit(message: impl std::fmt::Display) -> Self {
        ExecError::Unit(message.to_string())
    }

    /// Check if error is retryable
    ///
    /// Nothing in this workspace retries; the flag is for callers that do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionError(_) | ExecError::Timeout { .. }
        )
    }

    /// Exit status carried by a `CommandFailed` error
    #[must_use]
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            ExecError::CommandFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}
