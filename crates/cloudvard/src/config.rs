//! Daemon configuration loaded from TOML.
//!
//! Every section and field has a default, so an empty file (or no file)
//! yields a server on `127.0.0.1:3000` that serves every project.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [policy]
//! banned_usernames = ["griefer"]
//! banned_addresses = ["203.0.113.7"]
//! project_whitelist = ["123456"]
//!
//! [limits]
//! size_limit = 256
//!
//! [audit]
//! enabled = true
//! path = "/var/lib/cloudvar/audit.json"
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cloudvar_core::{AccessPolicy, PolicyError, DEFAULT_SIZE_LIMIT};

/// Default bind host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port
pub const DEFAULT_PORT: u16 = 3000;

/// Default maximum inbound WebSocket message size (64 KiB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Ban lists and project allow-policy.
///
/// At most one of `project_whitelist` / `project_blacklist` may be
/// non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub banned_usernames: Vec<String>,

    #[serde(default)]
    pub banned_addresses: Vec<IpAddr>,

    #[serde(default)]
    pub project_whitelist: Vec<String>,

    #[serde(default)]
    pub project_blacklist: Vec<String>,
}

/// Size limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum variable value length, in characters.
    #[serde(default = "default_size_limit")]
    pub size_limit: usize,

    /// Maximum inbound WebSocket message size, in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            size_limit: default_size_limit(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

/// Handshake audit log settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,

    /// JSON file backing the audit store (defaults under the state dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Resolved audit file path.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_audit_path)
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_size_limit() -> usize {
    DEFAULT_SIZE_LIMIT
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

/// Default config file location (`~/.config/cloudvar/config.toml`).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("cloudvar")
        .join("config.toml")
}

/// Default audit file location (`~/.local/state/cloudvar/audit.json`).
pub fn default_audit_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("cloudvar")
        .join("audit.json")
}

impl CloudConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or the policy is inconsistent.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Applies command-line / environment overrides on top of the file.
    pub fn apply_overrides(&mut self, host: Option<String>, port: Option<u16>) {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Policy` when both project lists are set and
    /// `ConfigError::InvalidHost` when the host is not an IP address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.access_policy()?;
        self.bind_addr()?;
        Ok(())
    }

    /// Builds the process-wide access policy.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Policy` if whitelist and blacklist are both set.
    pub fn access_policy(&self) -> Result<AccessPolicy, ConfigError> {
        let projects = AccessPolicy::project_policy(
            self.policy.project_whitelist.clone(),
            self.policy.project_blacklist.clone(),
        )?;
        Ok(AccessPolicy::new(
            self.policy.banned_usernames.iter().cloned(),
            self.policy
                .banned_addresses
                .iter()
                .map(|addr| addr.to_canonical()),
            projects,
        ))
    }

    /// Socket address to listen on.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidHost` if `server.host` is not an IP.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("Invalid host '{0}': expected an IP address")]
    InvalidHost(String),
}
