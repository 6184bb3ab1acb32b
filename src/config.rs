//! Configuration module for the chat relay.

use serde::Deserialize;
use std::path::Path;

use crate::{RelayError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum size of a single inbound WebSocket message in bytes.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_buffer_size() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_buffer_size: default_max_buffer_size(),
            cors_origins: Vec::new(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "storage.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Chat behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Number of history records delivered on join.
    #[serde(default = "default_join_messages")]
    pub join_messages: u32,
    /// Persist entered/left notifications to history.
    #[serde(default)]
    pub log_system: bool,
    /// Reserved group name for connected users that have not joined a room.
    #[serde(default = "default_lobby_name")]
    pub lobby_name: String,
    /// Capacity of each connection's outbound queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_join_messages() -> u32 {
    10
}

fn default_lobby_name() -> String {
    "sys_lobby".to_string()
}

fn default_outbound_capacity() -> usize {
    256
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            join_messages: default_join_messages(),
            log_system: false,
            lobby_name: default_lobby_name(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Attachment storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Directory for stored attachments.
    #[serde(default = "default_file_folder")]
    pub folder: String,
    /// Maximum number of retained attachments.
    #[serde(default = "default_max_files")]
    pub max_files: u32,
}

fn default_file_folder() -> String {
    "files".to_string()
}

fn default_max_files() -> u32 {
    20
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            folder: default_file_folder(),
            max_files: default_max_files(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Empty disables file logging.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/chatrelay.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Chat configuration.
    #[serde(default)]
    pub chat: ChatConfig,
    /// Attachment storage configuration.
    #[serde(default)]
    pub files: FilesConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(RelayError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CHATRELAY_DATABASE`: database file path
    /// - `CHATRELAY_PORT`: listen port
    /// - `CHATRELAY_MAX_BUFFER_SIZE`: maximum inbound message size in bytes
    /// - `CHATRELAY_JOIN_MESSAGES`: history batch size on join
    /// - `CHATRELAY_LOG_SYSTEM`: persist system notifications (`true`/`false`)
    /// - `CHATRELAY_MAX_FILES`: retained attachment count
    /// - `CHATRELAY_FILE_FOLDER`: attachment directory
    ///
    /// Unset, empty or unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("CHATRELAY_DATABASE") {
            self.database.path = path;
        }
        if let Some(port) = get("CHATRELAY_PORT").and_then(|v| v.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(size) = get("CHATRELAY_MAX_BUFFER_SIZE").and_then(|v| v.trim().parse().ok()) {
            self.server.max_buffer_size = size;
        }
        if let Some(n) = get("CHATRELAY_JOIN_MESSAGES").and_then(|v| v.trim().parse().ok()) {
            self.chat.join_messages = n;
        }
        if let Some(flag) = get("CHATRELAY_LOG_SYSTEM").and_then(|v| parse_bool(&v)) {
            self.chat.log_system = flag;
        }
        if let Some(n) = get("CHATRELAY_MAX_FILES").and_then(|v| v.trim().parse().ok()) {
            self.files.max_files = n;
        }
        if let Some(folder) = get("CHATRELAY_FILE_FOLDER") {
            self.files.folder = folder;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.chat.lobby_name.trim().is_empty() {
            return Err(RelayError::Config("chat.lobby_name must not be empty".to_string()));
        }
        if self.chat.join_messages == 0 {
            return Err(RelayError::Config(
                "chat.join_messages must be at least 1".to_string(),
            ));
        }
        if self.chat.outbound_capacity == 0 {
            return Err(RelayError::Config(
                "chat.outbound_capacity must be at least 1".to_string(),
            ));
        }
        if self.files.max_files == 0 {
            return Err(RelayError::Config(
                "files.max_files must be at least 1".to_string(),
            ));
        }
        if self.server.max_buffer_size == 0 {
            return Err(RelayError::Config(
                "server.max_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
