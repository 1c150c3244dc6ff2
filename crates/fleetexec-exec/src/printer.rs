//! Dry-run backend that records commands instead of running them

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::backend::Backend;
use crate::command::Command;
use crate::config::BackendConfig;
use crate::error::ExecError;
use crate::host::Host;
use crate::result::ExitStatus;

/// Records every rendered command and reports success
///
/// There is no real output, so `capture` is refused.
#[derive(Debug)]
pub struct PrinterBackend {
    host: Arc<Host>,
    config: Arc<BackendConfig>,
    recorded: Mutex<Vec<String>>,
}

impl PrinterBackend {
    #[must_use]
    pub fn new(host: Arc<Host>, config: Arc<BackendConfig>) -> Self {
        Self {
            host,
            config,
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Commands recorded so far, in execution order
    pub fn recorded(&self) -> Vec<String> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Backend for PrinterBackend {
    fn host(&self) -> &Arc<Host> {
        &self.host
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn backend_type(&self) -> &'static str {
        "printer"
    }

    fn supports_capture(&self) -> bool {
        false
    }

    async fn execute_command(&self, command: &mut Command) -> Result<(), ExecError> {
        info!(host = %self.host, command = %command, "dry run");
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_command().to_string());

        let status = if command.options().run_in_background {
            ExitStatus::Detached
        } else {
            ExitStatus::Code(0)
        };
        command.complete(status, Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CommandOptions;

    fn printer() -> PrinterBackend {
        PrinterBackend::new(
            Arc::new(Host::new("example.com")),
            Arc::new(BackendConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_records_without_executing() {
        let backend = printer();
        backend
            .execute("rm", &["-rf", "/important"], CommandOptions::default())
            .await
            .unwrap();
        backend.make(&["install"]).await.unwrap();

        assert_eq!(
            backend.recorded(),
            vec![
                "/usr/bin/env rm -rf /important".to_string(),
                "/usr/bin/env make install".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_synthesizes_success() {
        let backend = printer();
        assert!(backend.test("false", &[], CommandOptions::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_capture_unavailable() {
        let err = printer()
            .capture("cat", &["/etc/hostname"], CommandOptions::default())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ExecError::MethodUnavailable {
                backend: "printer",
                capability: "capture",
            }
        );
    }
}
