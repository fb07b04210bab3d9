//! Command-line interface for `snared`.
//!
//! Every flag except `--config`, `--check`, `-v` and `--diag-format` has a
//! matching `SNARE_*` environment variable. Flags win over the environment,
//! and both win over the config file.
//!
//! # Examples
//!
//! ```bash
//! # Listen on the default port, log credentials to ./credentials.log
//! snared
//!
//! # Console output in a human-friendly format
//! snared --log stdout --log-format pretty
//!
//! # Stable identity from an existing key
//! snared --generate-key=false --key /etc/snare/ssh_host_rsa_key
//!
//! # Print the resolved configuration and exit
//! snared --config /etc/snare/snare.toml --check
//! ```

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// snared - SSH decoy that records every password it is offered.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "snared",
    author,
    version,
    about = "SSH decoy that records every password attempt and rejects it",
    long_about = "Accepts SSH connections, presents the identity of a stock OpenSSH \
                  server, logs each username and password a client tries, and \
                  never lets anyone in."
)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short = 'c', env = "SNARE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, short = 'p', env = "SNARE_PORT")]
    pub port: Option<u16>,

    /// Credential log destination (a file path, or `stdout`)
    #[arg(long, short = 'l', env = "SNARE_LOG_FILE")]
    pub log: Option<String>,

    /// Credential log format: json, pretty or text
    #[arg(long, env = "SNARE_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Distribution tag shown after the version and in the banner
    #[arg(long, env = "SNARE_BANNER")]
    pub banner: Option<String>,

    /// Advertised SSH software version
    #[arg(long, env = "SNARE_SERVER_VERSION")]
    pub server_version: Option<String>,

    /// Host private key file (used when key generation is off)
    #[arg(long, short = 'k', env = "SNARE_PRIVATE_KEY_PATH")]
    pub key: Option<PathBuf>,

    /// Generate a fresh host key on startup
    ///
    /// Takes precedence over --key. Pass `--generate-key=false` to use
    /// the key file or the built-in key.
    #[arg(
        long,
        env = "SNARE_GENERATE_KEY",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub generate_key: Option<bool>,

    /// Minimum delay before each rejection, in milliseconds
    #[arg(long, env = "SNARE_DELAY_MIN_MS")]
    pub delay_min_ms: Option<u64>,

    /// Random extra delay before each rejection, in milliseconds
    #[arg(long, env = "SNARE_DELAY_JITTER_MS")]
    pub delay_jitter_ms: Option<u64>,

    /// Seconds of inactivity before a connection is closed (0 disables)
    #[arg(long, env = "SNARE_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Maximum simultaneous connections
    #[arg(long, env = "SNARE_MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,

    /// Validate configuration, print it and exit
    #[arg(long)]
    pub check: bool,

    /// Diagnostic log format (stderr)
    #[arg(long, value_enum, default_value_t = DiagFormat::Pretty)]
    pub diag_format: DiagFormat,

    /// Increase diagnostic verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Diagnostic output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DiagFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl Cli {
    /// Parse CLI arguments from the environment.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the diagnostic level name for the verbosity count.
    #[must_use]
    pub const fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
