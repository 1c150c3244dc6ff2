//! fleetexec-exec: Command building and execution backends
//!
//! Renders commands into shell-safe strings and runs them locally, over a
//! remote session, or not at all (dry run), all behind one [`Backend`] trait.

pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod escape;
pub mod host;
pub mod keys;
pub mod local;
pub mod options;
pub mod printer;
pub mod remote;
pub mod result;
pub mod ssh;
pub mod traits;

pub use backend::{AbstractBackend, Backend};
pub use command::Command;
pub use config::{BackendConfig, Verbosity};
pub use error::ExecError;
pub use host::Host;
pub use keys::KeySource;
pub use local::LocalBackend;
pub use options::CommandOptions;
pub use printer::PrinterBackend;
pub use remote::RemoteBackend;
pub use result::{ExitStatus, OutputStream};
pub use ssh::SshProvider;
pub use traits::{ConnectionProvider, OutputSink, Session};
