//! Target host identity and connection attributes

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// One target host
///
/// Identity is `(address, user, port)`; name, key and tags only label the
/// host and do not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Host {
    address: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    ssh_key: Option<PathBuf>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

impl Host {
    /// Create a host for the given address
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: None,
            port: None,
            ssh_key: None,
            name: None,
            tags: Vec::new(),
        }
    }

    /// Set login user
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set SSH key path
    #[must_use]
    pub fn with_ssh_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_key = Some(path.into());
        self
    }

    /// Set display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set tags
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port to connect to, falling back to 22
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn ssh_key(&self) -> Option<&Path> {
        self.ssh_key.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the host carries any of the given tags
    #[must_use]
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }

    /// Whether the address points at this machine
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.address.as_str(), "localhost" | "127.0.0.1" | "::1")
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.user == other.user && self.port == other.port
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.user.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            return f.write_str(name);
        }
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if self.address.contains(':') {
            write!(f, "[{}]", self.address)?;
        } else {
            f.write_str(&self.address)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Parses `[user@]address[:port]`, with `[v6addr]:port` for IPv6
impl FromStr for Host {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (user, rest) = match s.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user), rest),
            Some(_) => return Err(ExecError::InvalidOption(format!("empty user in host `{s}`"))),
            None => (None, s),
        };

        let (address, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (address, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| ExecError::InvalidOption(format!("unterminated `[` in host `{s}`")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(parse_port(port, s)?),
                None if tail.is_empty() => None,
                None => return Err(ExecError::InvalidOption(format!("malformed host `{s}`"))),
            };
            (address, port)
        } else {
            match rest.split_once(':') {
                Some((address, port)) if !port.contains(':') => (address, Some(parse_port(port, s)?)),
                // Bare IPv6 address without a port
                Some(_) => (rest, None),
                None => (rest, None),
            }
        };

        if address.is_empty() {
            return Err(ExecError::InvalidOption(format!("empty address in host `{s}`")));
        }

        let mut host = Host::new(address);
        host.user = user.map(str::to_string);
        host.port = port;
        Ok(host)
    }
}

fn parse_port(port: &str, input: &str) -> Result<u16, ExecError> {
    port.parse()
        .map_err(|_| ExecError::InvalidOption(format!("invalid port `{port}` in host `{input}`")))
}
