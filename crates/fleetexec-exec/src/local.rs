//! Local command execution using `tokio::process`

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::backend::{Backend, log_output};
use crate::command::Command;
use crate::config::BackendConfig;
use crate::error::ExecError;
use crate::host::Host;
use crate::result::{ExitStatus, OutputStream};
use crate::traits::OutputSink;

const READ_CHUNK: usize = 8 * 1024;

/// Spawn `sh -c <command>` and stream its output into `sink`
///
/// Returns the exit code, or -1 when the process was killed by a signal.
///
/// # Errors
/// `ExecError::SpawnError` if the shell cannot start, `ExecError::Timeout`
/// when `limit` elapses (the child is killed), `ExecError::IoError` on wait
/// failure
pub async fn spawn(
    command: &str,
    sink: &mut OutputSink<'_>,
    limit: Option<Duration>,
) -> Result<i32, ExecError> {
    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecError::SpawnError(e.to_string()))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    forward(child.stdout.take(), OutputStream::Stdout, tx.clone());
    forward(child.stderr.take(), OutputStream::Stderr, tx);

    let run = async {
        while let Some((stream, data)) = rx.recv().await {
            sink(stream, &data);
        }
        child.wait().await
    };

    let status = match limit {
        Some(limit) => timeout(limit, run)
            .await
            .map_err(|_| ExecError::Timeout { timeout: limit })?,
        None => run.await,
    }
    .map_err(|e| ExecError::IoError(e.to_string()))?;

    Ok(status.code().unwrap_or(-1))
}

/// Pump one pipe into the channel until EOF
fn forward<R>(reader: Option<R>, stream: OutputStream, tx: mpsc::UnboundedSender<(OutputStream, Vec<u8>)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(mut reader) = reader else {
        return;
    };
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Local command backend
///
/// Runs commands on this machine; the host only labels output.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    host: Arc<Host>,
    config: Arc<BackendConfig>,
}

impl LocalBackend {
    /// Create a new local backend
    #[must_use]
    pub fn new(host: Arc<Host>, config: Arc<BackendConfig>) -> Self {
        Self { host, config }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn host(&self) -> &Arc<Host> {
        &self.host
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self, command), level = "debug", fields(host = %self.host))]
    async fn execute_command(&self, command: &mut Command) -> Result<(), ExecError> {
        let start = Instant::now();
        let line = command.to_command().to_string();
        let background = command.options().run_in_background;

        debug!(command = %line, "executing local command");

        let mut sink = |stream: OutputStream, data: &[u8]| {
            log_output(command, stream, data);
            command.record_output(stream, data);
        };
        let code = spawn(&line, &mut sink, self.config.command_timeout()).await;

        let duration = start.elapsed();
        let code = match code {
            Ok(code) => code,
            Err(e) => {
                error!(command = %line, error = %e, "local command did not complete");
                return Err(e);
            }
        };

        // The detached shell has already returned; the real job's status is unknown
        let status = if background {
            ExitStatus::Detached
        } else {
            ExitStatus::Code(code)
        };

        debug!(
            command = %line,
            status = %status,
            duration = ?duration,
            "command completed"
        );

        if !status.success() && status != ExitStatus::Detached {
            error!(
                command = %line,
                status = %status,
                stderr = %command.stderr(),
                "command failed"
            );
        }

        command.complete(status, duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CommandOptions;

    fn backend() -> LocalBackend {
        LocalBackend::new(
            Arc::new(Host::new("localhost")),
            Arc::new(BackendConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_execute_success() {
        let command = backend()
            .execute("echo", &["hello"], CommandOptions::default())
            .await
            .unwrap();

        assert_eq!(command.exit_status().unwrap(), 0);
        assert_eq!(command.stdout().trim(), "hello");
    }

    #[tokio::test]
    async fn test_execute_failure_raises() {
        let err = backend()
            .execute("sh", &["-c", "echo oops >&2; exit 42"], CommandOptions::default())
            .await
            .unwrap_err();

        match err {
            ExecError::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, 42);
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ls_missing_path() {
        let err = backend()
            .execute("ls", &["-l", "/definitely/not/here"], CommandOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.exit_status(), Some(2));
        if let ExecError::CommandFailed { stderr, command, .. } = err {
            assert!(!stderr.is_empty());
            assert_eq!(command, "/usr/bin/env ls -l /definitely/not/here");
        }
    }

    #[tokio::test]
    async fn test_test_reports_exit_codes() {
        let backend = backend();
        for code in [0, 1, 2, 127, 255] {
            let script = format!("exit {code}");
            let ok = backend
                .test("sh", &["-c", &script], CommandOptions::default())
                .await
                .unwrap();
            assert_eq!(ok, code == 0, "exit {code}");
        }
    }

    #[tokio::test]
    async fn test_capture_trims_trailing_whitespace_only() {
        let output = backend()
            .capture("printf", &["  a  b\\n\\n  "], CommandOptions::default())
            .await
            .unwrap();

        assert_eq!(output, "  a  b");
    }

    #[tokio::test]
    async fn test_run_in_directory_with_env() {
        let options = CommandOptions::default().within("/").env("greeting", "hi there");
        let output = backend()
            .capture("sh", &["-c", "echo \"$GREETING from $(pwd)\""], options)
            .await
            .unwrap();

        assert_eq!(output, "hi there from /");
    }

    #[tokio::test]
    async fn test_home_directory_expands() {
        let Ok(home) = std::env::var("HOME") else {
            return;
        };
        let out = backend()
            .capture("pwd", &[], CommandOptions::default().within("~"))
            .await
            .unwrap();
        assert_eq!(std::path::Path::new(&out), std::path::Path::new(&home));
    }

    #[tokio::test]
    async fn test_background_is_detached() {
        let command = backend()
            .execute("sleep", &["5"], CommandOptions::default().in_background())
            .await
            .unwrap();

        assert_eq!(command.status(), Some(ExitStatus::Detached));
        assert!(command.duration().unwrap() < Duration::from_secs(5));
        assert!(matches!(command.exit_status(), Err(ExecError::BackgroundStatus(_))));
    }

    #[tokio::test]
    async fn test_timeout() {
        let config = BackendConfig {
            command_timeout_secs: Some(1),
            ..BackendConfig::default()
        };
        let backend = LocalBackend::new(Arc::new(Host::new("localhost")), Arc::new(config));

        let err = backend
            .execute("sleep", &["5"], CommandOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_spawn_streams_both_streams() {
        let mut seen = Vec::new();
        let mut sink = |stream: OutputStream, data: &[u8]| seen.push((stream, data.to_vec()));

        let code = spawn("echo out; echo err >&2; exit 3", &mut sink, None)
            .await
            .unwrap();

        assert_eq!(code, 3);
        assert!(seen.iter().any(|(s, d)| *s == OutputStream::Stdout && d == b"out\n"));
        assert!(seen.iter().any(|(s, d)| *s == OutputStream::Stderr && d == b"err\n"));
    }
}
