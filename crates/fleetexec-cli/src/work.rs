//! The unit of work behind `exec`, `test` and `capture`

use async_trait::async_trait;
use fleetexec_core::Work;
use fleetexec_exec::{Backend, CommandOptions, ExecError};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Exec,
    Test,
    Capture,
}

/// What one host produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandOutput {
    Executed {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
        duration_ms: u128,
    },
    Tested {
        passed: bool,
    },
    Captured {
        output: String,
    },
}

/// Runs one command line on every host
#[derive(Debug, Clone)]
pub struct CommandWork {
    mode: Mode,
    verb: String,
    args: Vec<String>,
    options: CommandOptions,
}

impl CommandWork {
    pub fn new(mode: Mode, verb: String, args: Vec<String>, options: CommandOptions) -> Self {
        Self {
            mode,
            verb,
            args,
            options,
        }
    }
}

#[async_trait]
impl Work for CommandWork {
    type Output = CommandOutput;

    async fn run(&self, backend: &dyn Backend) -> Result<CommandOutput, ExecError> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        let options = self.options.clone();

        match self.mode {
            Mode::Exec => {
                let command = backend.execute(&self.verb, &args, options).await?;
                Ok(CommandOutput::Executed {
                    command: command.to_command().to_string(),
                    status: command
                        .status()
                        .map_or_else(|| "unknown".to_string(), |s| s.to_string()),
                    stdout: command.stdout().into_owned(),
                    stderr: command.stderr().into_owned(),
                    duration_ms: command.duration().map_or(0, |d| d.as_millis()),
                })
            }
            Mode::Test => Ok(CommandOutput::Tested {
                passed: backend.test(&self.verb, &args, options).await?,
            }),
            Mode::Capture => Ok(CommandOutput::Captured {
                output: backend.capture(&self.verb, &args, options).await?,
            }),
        }
    }
}

/// Build command options from `key=value` pairs
///
/// # Errors
/// Returns `ExecError::InvalidOption` for a pair without `=` and
/// `ExecError::UnknownOption` for an unrecognized key
pub fn parse_options(pairs: &[String]) -> Result<CommandOptions, ExecError> {
    let mut options = CommandOptions::default();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ExecError::InvalidOption(format!("expected KEY=VALUE, got `{pair}`"))
        })?;
        options.set(key.trim(), value)?;
    }
    Ok(options)
}
