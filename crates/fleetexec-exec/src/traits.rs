//! Connection provider traits
//!
//! The remote backend never speaks a wire protocol itself; it asks a
//! [`ConnectionProvider`] for a [`Session`] and streams commands through it.

use async_trait::async_trait;

use crate::error::ExecError;
use crate::host::Host;
use crate::result::OutputStream;

/// Receives output chunks as they arrive
pub type OutputSink<'a> = dyn FnMut(OutputStream, &[u8]) + Send + 'a;

/// Opens sessions to hosts
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Open a session to the host
    ///
    /// # Errors
    /// Transport and authentication failures, surfaced unchanged
    async fn open(&self, host: &Host) -> Result<Box<dyn Session>, ExecError>;

    fn provider_type(&self) -> &'static str;
}

/// One open session, owned by a single backend
#[async_trait]
pub trait Session: Send {
    /// Run a command line, streaming output into `sink`, and return its exit status
    async fn run(&mut self, command: &str, sink: &mut OutputSink<'_>) -> Result<i32, ExecError>;

    /// Close the session
    async fn close(&mut self) -> Result<(), ExecError>;
}
