//! Core error types

use std::fmt;
use std::sync::Arc;

use fleetexec_exec::{ExecError, Host};
use thiserror::Error;

/// Errors from coordinating a run
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// A sequential run stopped on this unit's failure
    #[error(transparent)]
    Unit(#[from] ExecError),

    /// One or more hosts failed in a concurrent run
    #[error(transparent)]
    Aggregate(#[from] AggregateFailure),

    #[error("invalid strategy: {0}")]
    InvalidStrategy(String),
}

/// A single host's failure
#[derive(Debug, Clone)]
pub struct HostFailure {
    pub host: Arc<Host>,
    pub error: ExecError,
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.host, self.error)
    }
}

/// Every failure of a concurrent run, in host order
///
/// `skipped` lists hosts in groups that never started because an earlier
/// group failed.
#[derive(Debug, Clone, Default)]
pub struct AggregateFailure {
    pub failures: Vec<HostFailure>,
    pub succeeded: Vec<Arc<Host>>,
    pub skipped: Vec<Arc<Host>>,
}

impl AggregateFailure {
    /// Hosts that failed
    pub fn failed_hosts(&self) -> impl Iterator<Item = &Host> {
        self.failures.iter().map(|f| f.host.as_ref())
    }

    /// The error recorded for `host`, if it failed
    #[must_use]
    pub fn error_for(&self, host: &Host) -> Option<&ExecError> {
        self.failures
            .iter()
            .find(|f| f.host.as_ref() == host)
            .map(|f| &f.error)
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.failures.len() + self.succeeded.len() + self.skipped.len();
        write!(f, "{} of {total} hosts failed", self.failures.len())?;
        if !self.skipped.is_empty() {
            write!(f, " ({} skipped)", self.skipped.len())?;
        }
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateFailure {}
