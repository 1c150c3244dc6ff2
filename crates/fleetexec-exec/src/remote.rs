//! Remote backend over a [`ConnectionProvider`]
//!
//! The session is opened on first use, reused for every command in the same
//! unit of work and closed by [`Backend::finish`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{Backend, log_output};
use crate::command::Command;
use crate::config::BackendConfig;
use crate::error::ExecError;
use crate::host::Host;
use crate::result::{ExitStatus, OutputStream};
use crate::traits::{ConnectionProvider, Session};

/// Backend that runs commands through a remote session
pub struct RemoteBackend {
    host: Arc<Host>,
    config: Arc<BackendConfig>,
    provider: Arc<dyn ConnectionProvider>,
    /// Session (opened on first use)
    session: Mutex<Option<Box<dyn Session>>>,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("host", &self.host)
            .field("provider", &self.provider.provider_type())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RemoteBackend {
    #[must_use]
    pub fn new(
        host: Arc<Host>,
        config: Arc<BackendConfig>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Self {
        Self {
            host,
            config,
            provider,
            session: Mutex::new(None),
        }
    }

    /// Whether a session is currently open
    ///
    /// Only a hint: a session that is busy reports `false`.
    pub fn is_connected(&self) -> bool {
        self.session
            .try_lock()
            .map(|s| s.is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn host(&self) -> &Arc<Host> {
        &self.host
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn backend_type(&self) -> &'static str {
        "remote"
    }

    #[instrument(skip(self, command), fields(host = %self.host))]
    async fn execute_command(&self, command: &mut Command) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if session_lock.is_none() {
            info!(
                host = %self.host,
                provider = self.provider.provider_type(),
                "opening session"
            );
            *session_lock = Some(self.provider.open(&self.host).await?);
        }
        let Some(session) = session_lock.as_mut() else {
            return Err(ExecError::ConnectionError("session not available".to_string()));
        };

        let line = command.to_command().to_string();
        let background = command.options().run_in_background;
        debug!(command = %line, "executing remote command");

        let start = Instant::now();
        let mut sink = |stream: OutputStream, data: &[u8]| {
            log_output(command, stream, data);
            command.record_output(stream, data);
        };
        let run = session.run(&line, &mut sink);
        let code = match self.config.command_timeout() {
            Some(limit) => timeout(limit, run).await.map_err(|_| {
                error!(command = %line, timeout = ?limit, "command timed out");
                ExecError::Timeout { timeout: limit }
            })?,
            None => run.await,
        }?;
        let duration = start.elapsed();

        // The remote shell returned as soon as the job was detached
        let status = if background {
            ExitStatus::Detached
        } else {
            ExitStatus::Code(code)
        };

        debug!(
            command = %line,
            status = %status,
            duration = ?duration,
            "remote command completed"
        );

        command.complete(status, duration)
    }

    async fn finish(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if let Some(mut session) = session_lock.take() {
            if let Err(e) = session.close().await {
                warn!(host = %self.host, error = %e, "failed to close session");
                return Err(e);
            }
            info!(host = %self.host, "session closed");
        }
        Ok(())
    }
}
