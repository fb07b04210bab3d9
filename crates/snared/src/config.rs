//! Runtime configuration for `snared`.
//!
//! The [`Config`] struct is the single source of truth for daemon settings.
//! It is resolved in layers: built-in defaults, then an optional TOML file,
//! then environment variables and flags (clap merges those two, flags win).
//!
//! ```toml
//! port = 2222
//! banner = "Ubuntu-4ubuntu0.5"
//! server_version = "OpenSSH_8.2p1"
//! generate_key = false
//! private_key_path = "/etc/snare/ssh_host_rsa_key"
//! idle_timeout_secs = 60
//!
//! [log]
//! file = "/var/log/snare/credentials.log"
//! format = "json"
//!
//! [delay]
//! min_ms = 200
//! jitter_ms = 300
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snare::{HostKeySource, ServerOptions};
use snare_log::{Format, Output};

use crate::cli::Cli;

/// Default credential log destination.
pub const DEFAULT_LOG_FILE: &str = "credentials.log";

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listen port.
    pub port: u16,
    /// Distribution tag.
    pub banner: String,
    /// Advertised software version.
    pub server_version: String,
    /// Host key file, used when generation is off.
    pub private_key_path: Option<PathBuf>,
    /// Generate a fresh host key on every start.
    pub generate_key: bool,
    /// Idle timeout in seconds. Zero disables it.
    pub idle_timeout_secs: u64,
    /// Ceiling on simultaneous connections.
    pub max_connections: Option<usize>,
    /// Credential log settings.
    pub log: LogConfig,
    /// Rejection delay bounds.
    pub delay: DelayConfig,
}

/// Credential log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// File path, or `stdout`.
    pub file: String,
    /// `json`, `pretty` or `text`.
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: DEFAULT_LOG_FILE.to_string(),
            format: Format::default().as_str().to_string(),
        }
    }
}

/// Rejection delay bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DelayConfig {
    pub min_ms: u64,
    pub jitter_ms: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            min_ms: snare::DEFAULT_MIN_DELAY_MS,
            jitter_ms: snare::DEFAULT_JITTER_MS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: snare::DEFAULT_PORT,
            log: LogConfig::default(),
            banner: snare::DEFAULT_BANNER.to_string(),
            server_version: snare::DEFAULT_SERVER_VERSION.to_string(),
            private_key_path: None,
            generate_key: true,
            delay: DelayConfig::default(),
            idle_timeout_secs: snare::DEFAULT_IDLE_TIMEOUT.as_secs(),
            max_connections: None,
        }
    }
}

impl Config {
    /// Create a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a TOML file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns the TOML deserialization error.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Resolves the full layering for a parsed command line.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        Ok(config)
    }

    /// Overrides fields with any value given by flag or environment.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(ref file) = cli.log {
            self.log.file.clone_from(file);
        }
        if let Some(ref format) = cli.log_format {
            self.log.format.clone_from(format);
        }
        if let Some(ref banner) = cli.banner {
            self.banner.clone_from(banner);
        }
        if let Some(ref version) = cli.server_version {
            self.server_version.clone_from(version);
        }
        if let Some(ref key) = cli.key {
            self.private_key_path = Some(key.clone());
        }
        if let Some(generate) = cli.generate_key {
            self.generate_key = generate;
        }
        if let Some(min) = cli.delay_min_ms {
            self.delay.min_ms = min;
        }
        if let Some(jitter) = cli.delay_jitter_ms {
            self.delay.jitter_ms = jitter;
        }
        if let Some(secs) = cli.idle_timeout {
            self.idle_timeout_secs = secs;
        }
        if let Some(max) = cli.max_connections {
            self.max_connections = Some(max);
        }
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        self.log_format()?;

        if self.log.file.trim().is_empty() {
            return Err(ConfigError::EmptyLogFile);
        }

        if self.max_connections == Some(0) {
            return Err(ConfigError::InvalidMaxConnections);
        }

        if let HostKeySource::Path(ref path) = self.key_source()
            && !path.is_file()
        {
            return Err(ConfigError::KeyFileNotFound(path.clone()));
        }

        Ok(())
    }

    /// Parsed credential log format.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidLogFormat`] for unknown names.
    pub fn log_format(&self) -> Result<Format, ConfigError> {
        self.log
            .format
            .parse()
            .map_err(|e: snare_log::ParseFormatError| {
                ConfigError::InvalidLogFormat(e.input().to_string())
            })
    }

    /// Credential log destination.
    #[must_use]
    pub fn log_output(&self) -> Output {
        Output::from_spec(&self.log.file)
    }

    /// Identification line the server will advertise.
    #[must_use]
    pub fn full_server_version(&self) -> String {
        snare::identification_line(&self.server_version, &self.banner)
    }

    /// Effective host key strategy.
    #[must_use]
    pub fn key_source(&self) -> HostKeySource {
        HostKeySource::select(self.generate_key, self.private_key_path.clone())
    }

    /// Idle timeout, `None` when disabled.
    #[must_use]
    pub const fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Server options for this configuration.
    #[must_use]
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            address: format!("0.0.0.0:{}", self.port),
            server_version: self.server_version.clone(),
            banner: self.banner.clone(),
            host_key: self.key_source(),
            min_delay: Duration::from_millis(self.delay.min_ms),
            jitter: Duration::from_millis(self.delay.jitter_ms),
            idle_timeout: self.idle_timeout(),
            max_connections: self.max_connections,
            ..ServerOptions::default()
        }
    }

    /// Export configuration as a diagnostic string.
    #[must_use]
    pub fn to_diagnostic_string(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Port: {}", self.port));
        lines.push(format!("Version: {}", self.full_server_version()));
        lines.push(format!("Host key: {}", self.key_source()));
        lines.push(format!("Credential log: {} ({})", self.log.file, self.log.format));
        lines.push(format!(
            "Rejection delay: {}ms + 0..={}ms",
            self.delay.min_ms, self.delay.jitter_ms
        ));
        match self.idle_timeout() {
            Some(timeout) => lines.push(format!("Idle timeout: {}s", timeout.as_secs())),
            None => lines.push("Idle timeout: off".to_string()),
        }
        match self.max_connections {
            Some(max) => lines.push(format!("Max connections: {max}")),
            None => lines.push("Max connections: unlimited".to_string()),
        }

        lines.join("\n")
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The config file is not valid TOML for [`Config`].
    #[error("invalid config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// Port zero was requested.
    #[error("port must be between 1 and 65535")]
    InvalidPort,

    /// Unknown credential log format.
    #[error("invalid log format: {0:?} (expected json, pretty or text)")]
    InvalidLogFormat(String),

    /// Empty credential log destination.
    #[error("log file must not be empty (use \"stdout\" for the console)")]
    EmptyLogFile,

    /// Zero connection ceiling.
    #[error("max_connections must be at least 1")]
    InvalidMaxConnections,

    /// The key path strategy is in effect but the file is missing.
    #[error("private key file not found: {}", .0.display())]
    KeyFileNotFound(PathBuf),
}
