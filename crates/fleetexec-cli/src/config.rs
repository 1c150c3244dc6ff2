//! Configuration loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use fleetexec_core::Strategy;
use fleetexec_exec::{BackendConfig, Host, KeySource, SshProvider};
use serde::{Deserialize, Serialize};

use crate::factory::BackendKind;

/// Top-level configuration for the fleetexec binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Defaults shared by every backend
    #[serde(default)]
    pub backend: BackendConfig,
    /// Run defaults, overridable from the command line
    #[serde(default)]
    pub run: RunConfig,
    /// SSH connection settings
    #[serde(default)]
    pub ssh: SshConfig,
    /// Known hosts
    #[serde(default)]
    pub host: Vec<Host>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub backend: BackendKind,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            backend: BackendKind::default(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    /// User for hosts that do not name one
    #[serde(default = "default_user")]
    pub user: String,
    /// Private key path
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// Environment variable holding a base64-encoded private key
    #[serde(default)]
    pub key_env: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            key: None,
            key_env: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl SshConfig {
    /// Where the default key comes from: `key_env`, then `key`, then
    /// `~/.ssh/id_ed25519`, then the agent
    #[must_use]
    pub fn key_source(&self) -> KeySource {
        KeySource::preferred(
            self.key_env.as_deref(),
            self.key.as_deref(),
            dirs::home_dir().as_deref(),
        )
    }

    #[must_use]
    pub fn provider(&self) -> SshProvider {
        SshProvider::new(&self.user, self.key_source())
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or holds invalid values
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text
    ///
    /// # Errors
    /// Returns error on malformed TOML or invalid backend settings
    pub fn parse(content: &str) -> eyre::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.backend.validate()?;
        Ok(config)
    }

    /// First existing config file: `FLEETEXEC_CONFIG`, then the common paths
    #[must_use]
    pub fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FLEETEXEC_CONFIG") {
            return Some(PathBuf::from(path));
        }

        [
            Some(PathBuf::from("fleetexec.toml")),
            Some(PathBuf::from("/etc/fleetexec/fleetexec.toml")),
            dirs::config_dir().map(|p| p.join("fleetexec/fleetexec.toml")),
        ]
        .into_iter()
        .flatten()
        .find(|path| path.exists())
    }

    /// Hosts carrying any of `tags`; every host when `tags` is empty
    pub fn hosts_tagged(&self, tags: &[String]) -> Vec<Host> {
        self.host
            .iter()
            .filter(|h| tags.is_empty() || h.has_any_tag(tags))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetexec_exec::Verbosity;

    const SAMPLE: &str = r#"
[backend]
umask = "022"
output_verbosity = "debug"
command_timeout_secs = 60

[backend.default_env]
rails_env = "production"

[backend.command_map_overrides]
rake = "/usr/local/bin/rake"

[run]
strategy = "groups:2"
backend = "dry-run"

[ssh]
user = "deploy"
key_env = "DEPLOY_KEY"

[[host]]
address = "web1.example.com"
tags = ["web"]

[[host]]
address = "db1.example.com"
user = "postgres"
port = 2222
tags = ["db"]
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(SAMPLE).unwrap();

        assert_eq!(config.backend.umask.as_deref(), Some("022"));
        assert_eq!(config.backend.output_verbosity, Verbosity::Debug);
        assert_eq!(config.backend.command_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.run.strategy, Strategy::Grouped(2));
        assert_eq!(config.run.backend, BackendKind::DryRun);
        assert_eq!(config.run.log_level, "info");
        assert_eq!(config.ssh.user, "deploy");
        assert!(matches!(config.ssh.key_source(), KeySource::EnvVar(ref v) if v == "DEPLOY_KEY"));
        assert_eq!(config.host.len(), 2);
        assert_eq!(config.host[1].port_or_default(), 2222);
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.backend, BackendConfig::default());
        assert_eq!(config.run.strategy, Strategy::Sequential);
        assert_eq!(config.ssh.user, "root");
        assert_eq!(config.ssh.connect_timeout_secs, 30);
        assert!(config.host.is_empty());
    }

    #[test]
    fn test_rejects_unknown_backend_key() {
        assert!(Config::parse("[backend]\nsome_option = 1\n").is_err());
    }

    #[test]
    fn test_rejects_misspelled_keys() {
        assert!(Config::parse("[ssh]\nusr = \"deploy\"\n").is_err());
        assert!(Config::parse("[run]\nstratgy = \"parallel\"\n").is_err());
        assert!(Config::parse("[hosts]\naddress = \"web1\"\n").is_err());
        assert!(Config::parse("[[host]]\naddress = \"web1\"\ntag = [\"web\"]\n").is_err());
    }

    #[test]
    fn test_rejects_invalid_strategy() {
        assert!(Config::parse("[run]\nstrategy = \"limited:0\"\n").is_err());
    }

    #[test]
    fn test_rejects_bad_umask() {
        assert!(Config::parse("[backend]\numask = \"999\"\n").is_err());
    }

    #[test]
    fn test_hosts_tagged() {
        let config = Config::parse(SAMPLE).unwrap();

        let web = config.hosts_tagged(&["web".to_string()]);
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].address(), "web1.example.com");

        assert_eq!(config.hosts_tagged(&[]).len(), 2);
        assert!(config.hosts_tagged(&["cache".to_string()]).is_empty());
    }
}
