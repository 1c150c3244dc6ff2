//! Concurrency strategies and the execution policy they map to

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How a run fans out over its hosts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Strategy {
    /// One host at a time, stop at the first failure
    #[default]
    Sequential,
    /// Every host at once
    Parallel,
    /// At most `n` hosts at once
    ParallelLimited(usize),
    /// Consecutive groups of `size`, each group in parallel
    Grouped(usize),
}

/// What happens to the rest of the run when a unit fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Do not start further units; return the failure as-is
    Abort,
    /// Let started units finish; aggregate every failure
    Collect,
}

/// The knobs the coordinator actually runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub on_failure: FailureMode,
    /// Concurrent units; `None` is unbounded
    pub concurrency: Option<usize>,
    /// Barrier every `n` hosts; `None` is a single group
    pub group_size: Option<usize>,
}

impl Strategy {
    /// Resolve the strategy into a policy
    ///
    /// # Errors
    /// Returns `CoreError::InvalidStrategy` for a zero limit or group size
    pub fn policy(self) -> Result<Policy, CoreError> {
        match self {
            Strategy::Sequential => Ok(Policy {
                on_failure: FailureMode::Abort,
                concurrency: Some(1),
                group_size: None,
            }),
            Strategy::Parallel => Ok(Policy {
                on_failure: FailureMode::Collect,
                concurrency: None,
                group_size: None,
            }),
            Strategy::ParallelLimited(0) => Err(CoreError::InvalidStrategy(
                "parallel limit must be at least 1".to_string(),
            )),
            Strategy::ParallelLimited(n) => Ok(Policy {
                on_failure: FailureMode::Collect,
                concurrency: Some(n),
                group_size: None,
            }),
            Strategy::Grouped(0) => Err(CoreError::InvalidStrategy(
                "group size must be at least 1".to_string(),
            )),
            Strategy::Grouped(size) => Ok(Policy {
                on_failure: FailureMode::Collect,
                concurrency: None,
                group_size: Some(size),
            }),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Sequential => f.write_str("sequential"),
            Strategy::Parallel => f.write_str("parallel"),
            Strategy::ParallelLimited(n) => write!(f, "limited:{n}"),
            Strategy::Grouped(size) => write!(f, "groups:{size}"),
        }
    }
}

/// Accepts `sequential`, `parallel`, `limited:N` and `groups:N`
impl FromStr for Strategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (s.as_str(), None),
        };

        let count = |arg: Option<&str>| -> Result<usize, CoreError> {
            let arg = arg.ok_or_else(|| {
                CoreError::InvalidStrategy(format!("`{name}` needs a count, e.g. `{name}:4`"))
            })?;
            arg.parse()
                .map_err(|_| CoreError::InvalidStrategy(format!("invalid count `{arg}`")))
        };

        let strategy = match (name, arg) {
            ("sequential", None) => Strategy::Sequential,
            ("parallel", None) => Strategy::Parallel,
            ("limited" | "parallel", Some(_)) => Strategy::ParallelLimited(count(arg)?),
            ("groups" | "grouped", _) => Strategy::Grouped(count(arg)?),
            ("limited", None) => Strategy::ParallelLimited(count(arg)?),
            _ => return Err(CoreError::InvalidStrategy(format!("unknown strategy `{s}`"))),
        };
        strategy.policy()?;
        Ok(strategy)
    }
}

impl TryFrom<String> for Strategy {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Strategy> for String {
    fn from(strategy: Strategy) -> Self {
        strategy.to_string()
    }
}
