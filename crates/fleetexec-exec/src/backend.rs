//! Backend trait and the shared capability layer
//!
//! A backend implements one hook, [`Backend::execute_command`]. `execute`,
//! `test`, `capture`, `make` and `rake` are built on top of it here and are
//! the same for every variant.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::Command;
use crate::config::{BackendConfig, Verbosity};
use crate::error::ExecError;
use crate::host::Host;
use crate::options::CommandOptions;
use crate::result::OutputStream;

/// Executor bound to one host for the duration of one unit of work
#[async_trait]
pub trait Backend: Send + Sync {
    /// Host this backend is bound to
    fn host(&self) -> &Arc<Host>;

    /// Process-wide configuration
    fn config(&self) -> &BackendConfig;

    /// Short name for logs and errors
    fn backend_type(&self) -> &'static str;

    /// Whether `execute_command` is implemented at all
    fn supports_execute(&self) -> bool {
        true
    }

    /// Whether `capture` can return real output
    fn supports_capture(&self) -> bool {
        true
    }

    /// Run a built command and record its output and exit status
    ///
    /// # Errors
    /// The default refuses with `ExecError::MethodUnavailable`
    async fn execute_command(&self, _command: &mut Command) -> Result<(), ExecError> {
        Err(ExecError::MethodUnavailable {
            backend: self.backend_type(),
            capability: "execute_command",
        })
    }

    /// Release per-unit resources such as an open session
    async fn finish(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Build a command bound to this backend's host and configuration
    ///
    /// # Errors
    /// Returns construction errors from [`Command::new`]
    fn command(&self, verb: &str, args: &[&str], options: CommandOptions) -> Result<Command, ExecError> {
        Command::new(
            verb,
            args.iter().copied(),
            options,
            Arc::clone(self.host()),
            self.config(),
        )
    }

    /// Execute a built command and apply the non-zero exit policy
    ///
    /// # Errors
    /// Hook errors, or `ExecError::CommandFailed` per [`Command::check`]
    async fn run_command(&self, mut command: Command) -> Result<Command, ExecError> {
        debug!(
            host = %self.host(),
            backend = self.backend_type(),
            command = %command,
            "running command"
        );
        self.execute_command(&mut command).await?;
        command.check()?;
        Ok(command)
    }

    /// Run a command, failing on non-zero exit unless told otherwise
    ///
    /// # Errors
    /// `ExecError::CommandFailed` on non-zero exit with `raise_on_nonzero_exit`,
    /// plus any construction or backend error
    async fn execute(&self, verb: &str, args: &[&str], options: CommandOptions) -> Result<Command, ExecError> {
        let command = self.command(verb, args, options)?;
        self.run_command(command).await
    }

    /// Run a command and report whether it exited 0
    ///
    /// # Errors
    /// Construction and backend errors; a non-zero exit is `Ok(false)`
    async fn test(&self, verb: &str, args: &[&str], options: CommandOptions) -> Result<bool, ExecError> {
        let command = self.command(verb, args, options.raise_on_nonzero_exit(false))?;
        let command = self.run_command(command).await?;
        Ok(command.exit_status()? == 0)
    }

    /// Run a command and return its stdout without trailing whitespace
    ///
    /// # Errors
    /// `ExecError::MethodUnavailable` when the backend cannot capture, and the
    /// same non-zero exit policy as [`Backend::execute`]
    async fn capture(&self, verb: &str, args: &[&str], options: CommandOptions) -> Result<String, ExecError> {
        if !self.supports_execute() {
            return Err(ExecError::MethodUnavailable {
                backend: self.backend_type(),
                capability: "execute_command",
            });
        }
        if !self.supports_capture() {
            return Err(ExecError::MethodUnavailable {
                backend: self.backend_type(),
                capability: "capture",
            });
        }
        if options.run_in_background {
            return Err(ExecError::InvalidOption(
                "capture cannot run in background".to_string(),
            ));
        }
        let command = self.command(verb, args, options)?;
        let command = self.run_command(command).await?;
        Ok(command.stdout().trim_end().to_string())
    }

    /// `execute(make, args)`
    async fn make(&self, args: &[&str]) -> Result<Command, ExecError> {
        self.execute("make", args, CommandOptions::default()).await
    }

    /// `execute(rake, args)`
    async fn rake(&self, args: &[&str]) -> Result<Command, ExecError> {
        self.execute("rake", args, CommandOptions::default()).await
    }
}

/// Shared logic only; every call that reaches the hook is refused
#[derive(Debug, Clone)]
pub struct AbstractBackend {
    host: Arc<Host>,
    config: Arc<BackendConfig>,
}

impl AbstractBackend {
    #[must_use]
    pub fn new(host: Arc<Host>, config: Arc<BackendConfig>) -> Self {
        Self { host, config }
    }
}

#[async_trait]
impl Backend for AbstractBackend {
    fn host(&self) -> &Arc<Host> {
        &self.host
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn backend_type(&self) -> &'static str {
        "abstract"
    }

    fn supports_execute(&self) -> bool {
        false
    }
}

/// Log one chunk of command output at the command's verbosity
pub(crate) fn log_output(command: &Command, stream: OutputStream, data: &[u8]) {
    let text = String::from_utf8_lossy(data);
    let text = text.trim_end();
    if text.is_empty() {
        return;
    }
    let host = command.host();
    match command.verbosity() {
        Verbosity::Quiet => {}
        Verbosity::Info => info!(host = %host, stream = %stream, "{text}"),
        Verbosity::Debug => debug!(host = %host, stream = %stream, "{text}"),
    }
}
