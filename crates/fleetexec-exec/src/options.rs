//! Command options
//!
//! Every field has a documented default. String-keyed configuration goes
//! through [`CommandOptions::set`] or [`CommandOptions::from_value`], both of
//! which reject keys they do not recognize.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Verbosity;
use crate::error::ExecError;
use crate::escape::{validate_env_key, validate_env_keys};

/// Keys accepted by [`CommandOptions::set`] and [`CommandOptions::from_value`]
pub const RECOGNIZED_KEYS: &[&str] = &[
    "working_directory",
    "in",
    "environment",
    "env",
    "running_user",
    "user",
    "running_group",
    "group",
    "run_in_background",
    "raise_on_nonzero_exit",
    "verbosity",
];

/// Options applied when building and running a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandOptions {
    /// Directory to `cd` into first (default: none)
    #[serde(alias = "in")]
    pub working_directory: Option<PathBuf>,
    /// Extra environment, keys upper-cased on render (default: none)
    #[serde(alias = "env")]
    pub environment: Option<BTreeMap<String, String>>,
    /// Run the whole pipeline as this user via `sudo -u` (default: none)
    #[serde(alias = "user")]
    pub running_user: Option<String>,
    /// Run the whole pipeline under this group via `sg` (default: none)
    #[serde(alias = "group")]
    pub running_group: Option<String>,
    /// Detach the command and do not wait for it (default: false)
    pub run_in_background: bool,
    /// Turn a non-zero exit into `CommandFailed` (default: true)
    pub raise_on_nonzero_exit: bool,
    /// Output logging override (default: the process-wide verbosity)
    pub verbosity: Option<Verbosity>,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            working_directory: None,
            environment: None,
            running_user: None,
            running_group: None,
            run_in_background: false,
            raise_on_nonzero_exit: true,
            verbosity: None,
        }
    }
}

impl CommandOptions {
    /// Set working directory
    #[must_use]
    pub fn within(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Add one environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Run as user
    #[must_use]
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.running_user = Some(user.into());
        self
    }

    /// Run under group
    #[must_use]
    pub fn as_group(mut self, group: impl Into<String>) -> Self {
        self.running_group = Some(group.into());
        self
    }

    /// Detach from the shell
    #[must_use]
    pub fn in_background(mut self) -> Self {
        self.run_in_background = true;
        self
    }

    #[must_use]
    pub fn raise_on_nonzero_exit(mut self, raise: bool) -> Self {
        self.raise_on_nonzero_exit = raise;
        self
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = Some(verbosity);
        self
    }

    /// Set one option from its string form
    ///
    /// `env`/`environment` takes `KEY=VALUE` and adds to the existing map.
    ///
    /// # Errors
    /// Returns `ExecError::UnknownOption` for an unrecognized key and
    /// `ExecError::InvalidOption` for a value that does not parse
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ExecError> {
        match key {
            "working_directory" | "in" => self.working_directory = Some(PathBuf::from(value)),
            "environment" | "env" => {
                let (k, v) = value.split_once('=').ok_or_else(|| {
                    ExecError::InvalidOption(format!("{key} expects KEY=VALUE, got `{value}`"))
                })?;
                validate_env_key(k)?;
                let env = self.environment.get_or_insert_with(BTreeMap::new);
                if let Some(existing) = env.keys().find(|e| *e != k && e.eq_ignore_ascii_case(k)) {
                    return Err(ExecError::InvalidOption(format!(
                        "environment keys `{existing}` and `{k}` collide"
                    )));
                }
                env.insert(k.to_string(), v.to_string());
            }
            "running_user" | "user" => self.running_user = Some(value.to_string()),
            "running_group" | "group" => self.running_group = Some(value.to_string()),
            "run_in_background" => self.run_in_background = parse_bool(key, value)?,
            "raise_on_nonzero_exit" => self.raise_on_nonzero_exit = parse_bool(key, value)?,
            "verbosity" => self.verbosity = Some(value.parse()?),
            other => return Err(ExecError::UnknownOption(other.to_string())),
        }
        Ok(())
    }

    /// Build options from a JSON object
    ///
    /// # Errors
    /// Returns `ExecError::UnknownOption` naming the first unrecognized key,
    /// or `ExecError::InvalidOption` when a value has the wrong type
    pub fn from_value(value: serde_json::Value) -> Result<Self, ExecError> {
        let Some(map) = value.as_object() else {
            return Err(ExecError::InvalidOption(
                "options must be an object".to_string(),
            ));
        };
        if let Some(unknown) = map.keys().find(|k| !RECOGNIZED_KEYS.contains(&k.as_str())) {
            return Err(ExecError::UnknownOption(unknown.clone()));
        }
        let options: Self =
            serde_json::from_value(value).map_err(|e| ExecError::InvalidOption(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Check values before a command is rendered
    ///
    /// # Errors
    /// Returns `ExecError::InvalidOption` for empty identities, bad env keys or
    /// env keys that differ only in case
    pub fn validate(&self) -> Result<(), ExecError> {
        if let Some(env) = &self.environment {
            validate_env_keys(env.keys())?;
        }
        if self.running_user.as_deref().is_some_and(str::is_empty) {
            return Err(ExecError::InvalidOption("running_user is empty".to_string()));
        }
        if self.running_group.as_deref().is_some_and(str::is_empty) {
            return Err(ExecError::InvalidOption("running_group is empty".to_string()));
        }
        if self
            .working_directory
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            return Err(ExecError::InvalidOption("working_directory is empty".to_string()));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ExecError> {
    match value {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ExecError::InvalidOption(format!(
            "{key} expects a boolean, got `{value}`"
        ))),
    }
}
