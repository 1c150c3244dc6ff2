//! Backend factory for creating local, SSH and dry-run backends

use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use fleetexec_core::BackendFactory;
use fleetexec_exec::{
    Backend, BackendConfig, ConnectionProvider, ExecError, Host, LocalBackend, PrinterBackend,
    RemoteBackend, SshProvider,
};
use serde::{Deserialize, Serialize};

/// Which backend each host gets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Run on this machine
    Local,
    /// Run over SSH; local addresses still run locally
    #[default]
    Ssh,
    /// Print rendered commands without running them
    DryRun,
}

/// Default implementation of `BackendFactory`
pub struct DefaultBackendFactory {
    kind: BackendKind,
    config: Arc<BackendConfig>,
    provider: Arc<dyn ConnectionProvider>,
}

impl DefaultBackendFactory {
    /// Create a new factory instance
    pub fn new(kind: BackendKind, config: Arc<BackendConfig>, provider: SshProvider) -> Self {
        Self {
            kind,
            config,
            provider: Arc::new(provider),
        }
    }

    fn create_sync(&self, host: Arc<Host>) -> Box<dyn Backend> {
        let config = Arc::clone(&self.config);
        match self.kind {
            BackendKind::DryRun => Box::new(PrinterBackend::new(host, config)),
            BackendKind::Local => Box::new(LocalBackend::new(host, config)),
            // For localhost connections, skip SSH
            BackendKind::Ssh if host.is_local() => Box::new(LocalBackend::new(host, config)),
            BackendKind::Ssh => Box::new(RemoteBackend::new(
                host,
                config,
                Arc::clone(&self.provider),
            )),
        }
    }
}

#[async_trait]
impl BackendFactory for DefaultBackendFactory {
    async fn create(&self, host: Arc<Host>) -> Result<Box<dyn Backend>, ExecError> {
        // Sessions open lazily, so nothing here can fail yet
        Ok(self.create_sync(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetexec_exec::KeySource;

    fn factory(kind: BackendKind) -> DefaultBackendFactory {
        DefaultBackendFactory::new(
            kind,
            Arc::new(BackendConfig::default()),
            SshProvider::new("root", KeySource::Agent),
        )
    }

    #[test]
    fn test_backend_selection() {
        let remote = Arc::new(Host::new("web1.example.com"));
        let local = Arc::new(Host::new("127.0.0.1"));

        let cases = [
            (BackendKind::Ssh, &remote, "remote"),
            (BackendKind::Ssh, &local, "local"),
            (BackendKind::Local, &remote, "local"),
            (BackendKind::DryRun, &remote, "printer"),
            (BackendKind::DryRun, &local, "printer"),
        ];
        for (kind, host, expected) in cases {
            let backend = factory(kind).create_sync(Arc::clone(host));
            assert_eq!(backend.backend_type(), expected, "{kind:?} for {host}");
        }
    }

    #[tokio::test]
    async fn test_dry_run_never_connects() {
        let backend = factory(BackendKind::DryRun)
            .create(Arc::new(Host::new("unreachable.invalid")))
            .await
            .unwrap();

        let command = backend
            .execute("uptime", &[], fleetexec_exec::CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(command.to_command(), "/usr/bin/env uptime");
    }

    #[test]
    fn test_kind_names() {
        #[derive(Deserialize)]
        struct Run {
            backend: BackendKind,
        }

        let run: Run = toml::from_str("backend = \"dry-run\"").unwrap();
        assert_eq!(run.backend, BackendKind::DryRun);
        assert_eq!(
            BackendKind::from_str("dry-run", true).unwrap(),
            BackendKind::DryRun
        );
    }
}
