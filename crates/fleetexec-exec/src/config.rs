//! Process-wide backend configuration
//!
//! Built once at startup and handed to every backend as `Arc<BackendConfig>`.
//! Nothing mutates it after that.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Launcher used for verbs that have no explicit mapping
pub const DEFAULT_LAUNCHER: &str = "/usr/bin/env";

/// How much command output gets logged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Output is captured but never logged
    Quiet,
    /// Output is logged at info level
    #[default]
    Info,
    /// Output is logged at debug level
    Debug,
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
        })
    }
}

impl FromStr for Verbosity {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quiet" => Ok(Verbosity::Quiet),
            "info" => Ok(Verbosity::Info),
            "debug" => Ok(Verbosity::Debug),
            other => Err(ExecError::InvalidOption(format!("unknown verbosity `{other}`"))),
        }
    }
}

/// Defaults shared by every backend in the process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// Environment merged under each command's own environment
    pub default_env: BTreeMap<String, String>,
    /// How command output is logged unless a command overrides it
    pub output_verbosity: Verbosity,
    /// Verb to executable path, replacing the `/usr/bin/env` launcher
    pub command_map_overrides: BTreeMap<String, String>,
    /// Octal umask applied before every command
    pub umask: Option<String>,
    /// Upper bound on a single command's runtime
    pub command_timeout_secs: Option<u64>,
}

impl BackendConfig {
    /// Check values that cannot be expressed in the type
    ///
    /// # Errors
    /// Returns `ExecError::InvalidOption` for a malformed umask, env key or
    /// empty override path
    pub fn validate(&self) -> Result<(), ExecError> {
        if let Some(umask) = &self.umask {
            let octal = umask.len() <= 4 && !umask.is_empty() && umask.chars().all(|c| ('0'..='7').contains(&c));
            if !octal {
                return Err(ExecError::InvalidOption(format!("umask `{umask}` is not octal")));
            }
        }
        crate::escape::validate_env_keys(self.default_env.keys())?;
        for (verb, path) in &self.command_map_overrides {
            if path.trim().is_empty() {
                return Err(ExecError::InvalidOption(format!("empty command map entry for `{verb}`")));
            }
        }
        Ok(())
    }

    /// Executable prefix for a bare verb
    #[must_use]
    pub fn resolve_verb(&self, verb: &str) -> String {
        match self.command_map_overrides.get(verb) {
            Some(path) => path.clone(),
            None => format!("{DEFAULT_LAUNCHER} {verb}"),
        }
    }

    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}
