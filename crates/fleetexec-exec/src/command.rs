//! Command construction and rendering
//!
//! A [`Command`] is a verb, its arguments and a set of [`CommandOptions`],
//! rendered once at construction into a shell-safe string. Wrappers nest from
//! the inside out as environment, umask, directory, group, user, background,
//! so `sudo -u`/`sg` always see the fully scoped pipeline.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendConfig, Verbosity};
use crate::error::ExecError;
use crate::escape::{shell_escape, shell_escape_path};
use crate::host::Host;
use crate::options::CommandOptions;
use crate::result::{ExitStatus, OutputStream};

/// A rendered command plus its execution results
#[derive(Debug, Clone)]
pub struct Command {
    verb: String,
    args: Vec<String>,
    options: CommandOptions,
    host: Arc<Host>,
    rendered: String,
    verbosity: Verbosity,
    status: Option<ExitStatus>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    duration: Option<Duration>,
}

impl Command {
    /// Build and render a command
    ///
    /// # Errors
    /// Returns `ExecError::InvalidCommand` for an empty verb and
    /// `ExecError::InvalidOption` when an option value is malformed
    pub fn new<I, S>(
        verb: impl Into<String>,
        args: I,
        options: CommandOptions,
        host: Arc<Host>,
        config: &BackendConfig,
    ) -> Result<Self, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let verb = verb.into();
        if verb.trim().is_empty() {
            return Err(ExecError::InvalidCommand("verb is empty".to_string()));
        }
        options.validate()?;

        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let rendered = render(&verb, &args, &options, config);
        let verbosity = options.verbosity.unwrap_or(config.output_verbosity);

        Ok(Self {
            verb,
            args,
            options,
            host,
            rendered,
            verbosity,
            status: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            duration: None,
        })
    }

    /// The rendered shell command line
    #[must_use]
    pub fn to_command(&self) -> &str {
        &self.rendered
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Effective output verbosity
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Append a chunk of output from the running process
    pub fn record_output(&mut self, stream: OutputStream, data: &[u8]) {
        match stream {
            OutputStream::Stdout => self.stdout.extend_from_slice(data),
            OutputStream::Stderr => self.stderr.extend_from_slice(data),
        }
    }

    /// Record how the command finished
    ///
    /// # Errors
    /// Returns `ExecError::AlreadyCompleted` if a status was recorded before
    pub fn complete(&mut self, status: ExitStatus, duration: Duration) -> Result<(), ExecError> {
        if self.status.is_some() {
            return Err(ExecError::AlreadyCompleted(self.rendered.clone()));
        }
        self.status = Some(status);
        self.duration = Some(duration);
        Ok(())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status.is_some()
    }

    /// Raw status, `None` until the command completes
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Numeric exit status
    ///
    /// # Errors
    /// Returns `ExecError::NotCompleted` before completion and
    /// `ExecError::BackgroundStatus` for a detached command
    pub fn exit_status(&self) -> Result<i32, ExecError> {
        match self.status {
            Some(ExitStatus::Code(code)) => Ok(code),
            Some(ExitStatus::Detached) => Err(ExecError::BackgroundStatus(self.rendered.clone())),
            None => Err(ExecError::NotCompleted(self.rendered.clone())),
        }
    }

    pub fn stdout(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Apply the non-zero exit policy
    ///
    /// # Errors
    /// Returns `ExecError::CommandFailed` when the command exited non-zero and
    /// `raise_on_nonzero_exit` is set, `ExecError::NotCompleted` if it never
    /// finished
    pub fn check(&self) -> Result<(), ExecError> {
        match self.status {
            None => Err(ExecError::NotCompleted(self.rendered.clone())),
            Some(ExitStatus::Code(status)) if status != 0 && self.options.raise_on_nonzero_exit => {
                Err(ExecError::CommandFailed {
                    host: self.host.to_string(),
                    command: self.rendered.clone(),
                    status,
                    stderr: self.stderr().into_owned(),
                })
            }
            Some(_) => Ok(()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

fn render(verb: &str, args: &[String], options: &CommandOptions, config: &BackendConfig) -> String {
    // A verb with whitespace is a shell fragment, not something to map
    let head = if verb.chars().any(char::is_whitespace) {
        verb.to_string()
    } else {
        config.resolve_verb(verb)
    };

    let mut cmd = std::iter::once(Cow::Owned(head))
        .chain(args.iter().map(|arg| shell_escape(arg)))
        .collect::<Vec<_>>()
        .join(" ");

    let env = merged_env(config, options);
    if !env.is_empty() {
        let assignments = env
            .iter()
            .map(|(k, v)| format!("{k}={}", shell_escape(v)))
            .collect::<Vec<_>>()
            .join(" ");
        cmd = format!("( export {assignments} ; {cmd} )");
    }

    if let Some(umask) = &config.umask {
        cmd = format!("umask {umask} && {cmd}");
    }

    if let Some(dir) = &options.working_directory {
        cmd = format!("cd {} && {cmd}", shell_escape_path(&dir.to_string_lossy()));
    }

    if let Some(group) = &options.running_group {
        cmd = format!("sg {} -c {}", shell_escape(group), shell_escape(&cmd));
    }

    if let Some(user) = &options.running_user {
        cmd = format!("sudo -u {} -- sh -c {}", shell_escape(user), shell_escape(&cmd));
    }

    if options.run_in_background {
        cmd = format!("( nohup sh -c {} > /dev/null 2>&1 & )", shell_escape(&cmd));
    }

    cmd
}

/// Process defaults first, command entries win; keys upper-cased.
/// Keys within one map never collide after upper-casing (see `validate`).
fn merged_env(config: &BackendConfig, options: &CommandOptions) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = config
        .default_env
        .iter()
        .map(|(k, v)| (k.to_uppercase(), v.clone()))
        .collect();
    if let Some(own) = &options.environment {
        env.extend(own.iter().map(|(k, v)| (k.to_uppercase(), v.clone())));
    }
    env
}
