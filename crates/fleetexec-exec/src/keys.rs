//! Where a private key comes from and how its text is obtained

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Key used when nothing else is configured, relative to the home directory
pub const DEFAULT_KEY: &str = ".ssh/id_ed25519";

/// Origin of a private key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// PEM/OpenSSH key file on disk
    File(PathBuf),
    /// Environment variable holding the base64 of a key file
    EnvVar(String),
    /// Defer to a running agent
    Agent,
}

impl KeySource {
    /// Pick a source in order: `key_env`, `key`, `<home>/.ssh/id_ed25519`
    /// if that file exists, then the agent
    #[must_use]
    pub fn preferred(key_env: Option<&str>, key: Option<&Path>, home: Option<&Path>) -> Self {
        if let Some(var) = key_env {
            return Self::EnvVar(var.to_string());
        }
        if let Some(path) = key {
            return Self::File(path.to_path_buf());
        }
        home.map(|home| home.join(DEFAULT_KEY))
            .filter(|path| path.is_file())
            .map_or(Self::Agent, Self::File)
    }

    /// Key text, or `None` for the agent
    ///
    /// Files readable by group or other are refused.
    ///
    /// # Errors
    /// Returns `KeyError` when the variable is unset or not valid base64,
    /// or when the file is unreadable, exposed or not text
    pub fn read(&self) -> Result<Option<String>, KeyError> {
        let bytes = match self {
            Self::Agent => return Ok(None),
            Self::File(path) => read_private_file(path)?,
            Self::EnvVar(var) => {
                let encoded = std::env::var(var).map_err(|_| KeyError::Unset(var.clone()))?;
                STANDARD
                    .decode(encoded.trim())
                    .map_err(|source| KeyError::Encoding {
                        var: var.clone(),
                        source,
                    })?
            }
        };
        debug!(source = %self, "loaded private key");
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| KeyError::NotText(self.to_string()))
    }
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::EnvVar(var) => write!(f, "${var}"),
            Self::Agent => f.write_str("agent"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key variable ${0} is not set")]
    Unset(String),

    #[error("key variable ${var} is not base64: {source}")]
    Encoding {
        var: String,
        source: base64::DecodeError,
    },

    #[error("key {path} is accessible by others (mode {mode:o}); chmod 600 it")]
    Exposed { path: String, mode: u32 },

    #[error("cannot read key {path}: {source}")]
    Unreadable {
        path: String,
        source: std::io::Error,
    },

    #[error("key {0} is not text")]
    NotText(String),
}

fn read_private_file(path: &Path) -> Result<Vec<u8>, KeyError> {
    use std::os::unix::fs::MetadataExt;

    let unreadable = |source| KeyError::Unreadable {
        path: path.display().to_string(),
        source,
    };
    let mode = std::fs::metadata(path).map_err(unreadable)?.mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(KeyError::Exposed {
            path: path.display().to_string(),
            mode,
        });
    }
    std::fs::read(path).map_err(unreadable)
}
