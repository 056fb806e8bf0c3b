//! Configuration management for Ferry
//!
//! TOML-backed configuration with defaults, validation, and load/save
//! helpers. Everything is loaded once at startup; there is no hot reload.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ferry server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener and event loop settings
    pub server: ServerSettings,
    /// Authentication settings
    pub auth: AuthSettings,
    /// File storage settings
    pub storage: StorageSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address
    pub host: String,
    /// Bind port (0 lets the OS pick, useful for tests)
    pub port: u16,
    /// Maximum concurrent connections
    pub max_clients: usize,
    /// Idle connections are evicted after this many seconds without traffic
    pub inactivity_timeout_secs: u64,
    /// Bounded wait between event loop read sweeps, in milliseconds
    pub poll_interval_ms: u64,
    /// Connections whose outbound buffer makes no progress for this many
    /// seconds are dropped
    pub write_stall_timeout_secs: u64,
    /// Interval between periodic status log lines, in seconds
    pub status_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Admin secret, compared in plaintext (see DESIGN.md)
    pub admin_password: String,
    /// Sessions with no accepted command for this many seconds are removed
    pub session_timeout_secs: u64,
    /// Interval between session eviction sweeps, in seconds
    pub session_sweep_interval_secs: u64,
    /// Log failed /auth attempts at WARN
    pub log_failed_auth: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding uploaded files
    pub files_dir: PathBuf,
    /// A transfer with no bytes for this many seconds is aborted
    pub transfer_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Base log level when no override is given
    pub level: String,
    /// Log file path (stdout when None)
    pub file_path: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            max_clients: 50,
            inactivity_timeout_secs: 120,
            poll_interval_ms: 200,
            write_stall_timeout_secs: 10,
            status_interval_secs: 30,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            admin_password: "sekrete123".to_string(),
            session_timeout_secs: 7200,
            session_sweep_interval_secs: 300,
            log_failed_auth: true,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            files_dir: PathBuf::from("./server_files"),
            transfer_timeout_secs: 10,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_clients == 0 {
            return Err(anyhow::anyhow!("Max clients cannot be 0"));
        }

        if self.server.inactivity_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Inactivity timeout cannot be 0"));
        }

        if self.server.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Poll interval cannot be 0"));
        }

        if self.server.write_stall_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Write stall timeout cannot be 0"));
        }

        if self.auth.admin_password.is_empty() {
            return Err(anyhow::anyhow!("Admin password cannot be empty"));
        }

        if self.auth.session_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Session timeout cannot be 0"));
        }

        if self.auth.session_sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("Session sweep interval cannot be 0"));
        }

        if self.storage.transfer_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Transfer timeout cannot be 0"));
        }

        Ok(())
    }

    /// The address string the listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
