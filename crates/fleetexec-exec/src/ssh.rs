//! SSH connection provider using russh crate

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::error::ExecError;
use crate::host::Host;
use crate::keys::KeySource;
use crate::result::OutputStream;
use crate::traits::{ConnectionProvider, OutputSink, Session};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        Ok(true)
    }
}

/// Opens authenticated SSH sessions
///
/// Hosts without their own key use the provider's default key source.
#[derive(Debug, Clone)]
pub struct SshProvider {
    /// User for hosts that do not name one
    default_user: String,
    /// Key used when the host has none
    key_source: KeySource,
    /// Limit on connect + authenticate
    connect_timeout: Duration,
}

impl SshProvider {
    /// Create a provider
    pub fn new(default_user: impl Into<String>, key_source: KeySource) -> Self {
        Self {
            default_user: default_user.into(),
            key_source,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Set connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = limit;
        self
    }

    fn key_source_for(&self, host: &Host) -> KeySource {
        match host.ssh_key() {
            Some(path) => KeySource::File(path.to_path_buf()),
            None => self.key_source.clone(),
        }
    }

    /// Connect to the remote host and authenticate
    #[instrument(skip(self), fields(host = %host))]
    async fn connect(&self, host: &Host) -> Result<client::Handle<SshClientHandler>, ExecError> {
        let user = host.user().unwrap_or(&self.default_user);
        let port = host.port_or_default();

        info!(host = %host.address(), port, user = %user, "connecting to SSH");

        let config = Arc::new(client::Config::default());

        let mut session = client::connect(config, (host.address(), port), SshClientHandler)
            .await
            .map_err(|e| ExecError::ConnectionError(e.to_string()))?;

        let source = self.key_source_for(host);
        let Some(key_text) = source
            .read()
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?
        else {
            return Err(ExecError::AuthenticationFailed(
                "SSH agent authentication is not supported; configure a key".to_string(),
            ));
        };

        let key_pair = decode_secret_key(&key_text, None)
            .map_err(|e| ExecError::SshKeyError(format!("{source}: {e}")))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(
                user,
                PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
            )
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed(
                "Public key authentication failed".to_string(),
            ));
        }

        info!(host = %host.address(), "SSH connected and authenticated");
        Ok(session)
    }
}

#[async_trait]
impl ConnectionProvider for SshProvider {
    async fn open(&self, host: &Host) -> Result<Box<dyn Session>, ExecError> {
        let handle = timeout(self.connect_timeout, self.connect(host))
            .await
            .map_err(|_| {
                ExecError::ConnectionError(format!(
                    "connecting to {host} timed out after {:?}",
                    self.connect_timeout
                ))
            })??;

        Ok(Box::new(SshSession {
            label: host.to_string(),
            handle,
        }))
    }

    fn provider_type(&self) -> &'static str {
        "ssh"
    }
}

/// One authenticated SSH connection; each command gets its own channel
pub struct SshSession {
    label: String,
    handle: client::Handle<SshClientHandler>,
}

#[async_trait]
impl Session for SshSession {
    #[instrument(skip(self, command, sink), fields(host = %self.label))]
    async fn run(&mut self, command: &str, sink: &mut OutputSink<'_>) -> Result<i32, ExecError> {
        debug!(command = %command, "executing remote command");

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::ConnectionError(e.to_string()))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| ExecError::ConnectionError(e.to_string()))?;

        let mut status = None;

        // Exit status may arrive before the last data, so drain until close
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => sink(OutputStream::Stdout, &data[..]),
                ChannelMsg::ExtendedData { data, ext } if ext == 1 => {
                    sink(OutputStream::Stderr, &data[..]);
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    status = Some(exit_status.cast_signed());
                }
                _ => {}
            }
        }

        status.ok_or_else(|| {
            ExecError::ConnectionError(format!(
                "channel to {} closed without an exit status",
                self.label
            ))
        })
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;
        info!(host = %self.label, "SSH disconnected");
        Ok(())
    }
}
