//! Broker configuration.
//!
//! Layered lowest to highest: built-in defaults, a TOML file, environment
//! variables, then command-line flags (applied by the binary).
//!
//! ```toml
//! bind_address = "0.0.0.0"
//! client_port = 5555
//! control_port = 6666
//! inbox_capacity = 10
//! overflow_policy = "drop-newest"   # or "block", "disconnect"
//! handshake_timeout_secs = 30       # 0 waits forever
//! max_line_bytes = 1048576          # longest accepted input line
//! ```

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::registry::OverflowPolicy;

/// Default port push clients connect to.
pub const DEFAULT_CLIENT_PORT: u16 = 5555;

/// Default port the operator console listens on.
pub const DEFAULT_CONTROL_PORT: u16 = 6666;

/// Default per-client inbox capacity.
pub const DEFAULT_INBOX_CAPACITY: usize = 10;

/// Default time a client has to send its `HELO` line.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Default longest input line, newline included (1 MB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TAIJI_CONFIG";

/// Environment variable overriding the client port.
pub const CLIENT_PORT_ENV: &str = "TAIJI_CLIENT_PORT";

/// Environment variable overriding the control port.
pub const CONTROL_PORT_ENV: &str = "TAIJI_CONTROL_PORT";

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address both listeners bind to
    pub bind_address: IpAddr,

    /// Port for push clients
    pub client_port: u16,

    /// Port for the operator console
    pub control_port: u16,

    /// Capacity of each client's private inbox
    pub inbox_capacity: usize,

    /// What the registry does when a client inbox is full
    pub overflow_policy: OverflowPolicy,

    /// Seconds a client has to complete its handshake (0 = no limit)
    pub handshake_timeout_secs: u64,

    /// Longest line a client or console may send, newline included
    pub max_line_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            client_port: DEFAULT_CLIENT_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl Config {
    /// Parses a configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads the configuration file, if any, then applies environment overrides.
    ///
    /// The file is `explicit` if given, else `$TAIJI_CONFIG`, else the
    /// per-user default path when it exists. With no file, defaults are used.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| default_config_path().filter(|p| p.exists()));

        let mut config = match path {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `TAIJI_CLIENT_PORT` / `TAIJI_CONTROL_PORT` using `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(CLIENT_PORT_ENV) {
            self.client_port = parse_port(CLIENT_PORT_ENV, &value)?;
        }
        if let Some(value) = lookup(CONTROL_PORT_ENV) {
            self.control_port = parse_port(CONTROL_PORT_ENV, &value)?;
        }
        Ok(())
    }

    /// Checks settings that would otherwise fail at bind or channel creation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "inbox_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_line_bytes must be at least 1".to_string(),
            ));
        }
        if self.client_port != 0 && self.client_port == self.control_port {
            return Err(ConfigError::Invalid(format!(
                "client_port and control_port are both {}",
                self.client_port
            )));
        }
        Ok(())
    }

    /// Handshake deadline, `None` when disabled.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_secs > 0).then(|| Duration::from_secs(self.handshake_timeout_secs))
    }

    /// Address of the push client listener.
    pub fn client_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.client_port)
    }

    /// Address of the operator console listener.
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.control_port)
    }
}

/// Per-user config file location (`~/.config/taiji/taiji.toml` on Linux).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("taiji").join("taiji.toml"))
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {value:?}")]
    Env { key: String, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.client_port, 5555);
        assert_eq!(config.control_port, 6666);
        assert_eq!(config.inbox_capacity, 10);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_line_bytes, 1_048_576);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            client_port = 7000
            overflow_policy = "disconnect"
            handshake_timeout_secs = 0
            max_line_bytes = 512
            "#,
        )
        .unwrap();

        assert_eq!(config.client_port, 7000);
        assert_eq!(config.control_port, DEFAULT_CONTROL_PORT);
        assert_eq!(config.overflow_policy, OverflowPolicy::Disconnect);
        assert_eq!(config.handshake_timeout(), None);
        assert_eq!(config.max_line_bytes, 512);
    }

    #[test]
    fn test_parse_bind_address() {
        let config = Config::from_toml_str("bind_address = \"127.0.0.1\"").unwrap();
        assert_eq!(config.client_addr().to_string(), "127.0.0.1:5555");
        assert_eq!(config.control_addr().to_string(), "127.0.0.1:6666");
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        let err = Config::from_toml_str("client_prot = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        let err = Config::from_toml_str("overflow_policy = \"sometimes\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "control_port = 7777\ninbox_capacity = 64").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.control_port, 7777);
        assert_eq!(config.inbox_capacity, 64);
    }

    #[test]
    fn test_discover_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "inbox_capacity = 3").unwrap();

        let config = Config::discover(Some(file.path())).unwrap();
        assert_eq!(config.inbox_capacity, 3);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            HashMap::from([(CLIENT_PORT_ENV, "5000"), (CONTROL_PORT_ENV, " 6000 ")]);
        let mut config = Config::default();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.client_port, 5000);
        assert_eq!(config.control_port, 6000);
    }

    #[test]
    fn test_env_override_invalid_port() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(|key| (key == CLIENT_PORT_ENV).then(|| "70000".to_string()))
            .unwrap_err();

        assert_eq!(
            err,
            ConfigError::Env {
                key: CLIENT_PORT_ENV.to_string(),
                value: "70000".to_string(),
            }
        );
    }

    #[test]
    fn test_validate() {
        let config = Config {
            inbox_capacity: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            max_line_bytes: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            client_port: 7000,
            control_port: 7000,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        // Ephemeral ports on both listeners are fine.
        let config = Config {
            client_port: 0,
            control_port: 0,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
