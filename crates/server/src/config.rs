//! Server configuration.

use std::path::PathBuf;

use leo_protocol::consts::{DEFAULT_CAPABILITIES, PROTOCOL_VERSION};

/// Default bind address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 5555;

/// Default storage root, relative to the working directory.
pub const DEFAULT_STORAGE_PATH: &str = "./storage";

/// Errors from environment-based configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
}

/// The credential pair every client must present.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Constant-time check of a presented credential pair.
    ///
    /// Both fields are always compared so a failure does not reveal which
    /// one was wrong through timing.
    pub(crate) fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = leo_crypto::constant_time_eq(self.username.as_bytes(), username.as_bytes());
        let pass_ok = leo_crypto::constant_time_eq(self.password.as_bytes(), password.as_bytes());
        user_ok & pass_ok
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage_path: PathBuf,
    pub credentials: Credentials,
    pub protocol_version: u32,
    pub capabilities: Vec<String>,
    /// Optional cap on the declared size of a single upload.
    pub max_upload_size: Option<u64>,
}

impl ServerConfig {
    /// A configuration with defaults for everything but the mandatory parts.
    pub fn new(credentials: Credentials, storage_path: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            storage_path: storage_path.into(),
            credentials,
            protocol_version: PROTOCOL_VERSION,
            capabilities: DEFAULT_CAPABILITIES.iter().map(|s| (*s).to_owned()).collect(),
            max_upload_size: None,
        }
    }

    /// Reads the configuration from `LEO_*` environment variables.
    ///
    /// `LEO_USER` and `LEO_PASS` are required; `LEO_HOST`, `LEO_PORT` and
    /// `LEO_STORAGE` fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = std::env::var("LEO_USER").map_err(|_| ConfigError::MissingVar("LEO_USER"))?;
        let password = std::env::var("LEO_PASS").map_err(|_| ConfigError::MissingVar("LEO_PASS"))?;
        let storage =
            std::env::var("LEO_STORAGE").unwrap_or_else(|_| DEFAULT_STORAGE_PATH.to_owned());

        let mut config = Self::new(Credentials::new(username, password), storage);
        if let Ok(host) = std::env::var("LEO_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("LEO_PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidVar {
                var: "LEO_PORT",
                value: port,
            })?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_match_exact_pair() {
        let creds = Credentials::new("user", "pass");
        assert!(creds.matches("user", "pass"));
        assert!(!creds.matches("user", "wrong"));
        assert!(!creds.matches("wrong", "pass"));
        assert!(!creds.matches("", ""));
    }

    #[test]
    fn credentials_debug_masks_password() {
        let creds = Credentials::new("user", "hunter2");
        let printed = format!("{creds:?}");
        assert!(printed.contains("user"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn config_defaults() {
        let config = ServerConfig::new(Credentials::new("u", "p"), "/tmp/leo");
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.protocol_version, 1);
        assert!(config.capabilities.iter().any(|c| c == "DEL"));
        assert!(config.max_upload_size.is_none());
    }
}
