#![forbid(unsafe_code)]
// Allow pedantic lints for early-stage API ergonomics.
#![allow(clippy::doc_markdown)]
#![allow(clippy::nursery)]
#![allow(clippy::pedantic)]

//! # Snare
//!
//! An SSH decoy server. It completes the SSH handshake with real clients,
//! presents the identity of a stock OpenSSH install, and then rejects every
//! authentication attempt after recording the submitted credentials.
//!
//! ## Guarantees
//!
//! - Only `password` authentication is advertised, and it never succeeds.
//! - Every password message produces exactly one [`AuthAttempt`] at the
//!   configured [`CredentialSink`], before the rejection is sent.
//! - Each rejection is delayed by a random interval in
//!   `[min_delay, min_delay + jitter]`.
//! - Channel opens are refused and global requests are discarded.
//! - Failures stay inside the connection that caused them.
//!
//! ## Example
//!
//! ```rust,ignore
//! use snare::{HostKeySource, ServerBuilder};
//! use snare_log::{CredentialLog, Format, Output};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), snare::Error> {
//!     let log = CredentialLog::open(Output::from_spec("credentials.log"), Format::Json)?;
//!     let server = ServerBuilder::new()
//!         .port(2222)
//!         .host_key(HostKeySource::Generate)
//!         .sink(log)
//!         .build()?;
//!
//!     println!("fingerprint: {}", server.fingerprint());
//!     server.listen().await
//! }
//! ```

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub mod auth;
mod handler;
pub mod hostkey;

pub use auth::{
    AuthAttempt, CredentialSink, DEFAULT_JITTER_MS, DEFAULT_MAX_AUTH_ATTEMPTS,
    DEFAULT_MIN_DELAY_MS, MemorySink, RejectionDelay, SinkError,
};
pub use handler::{
    DENIAL_REASON, DecoyHandler, DecoyHandlerFactory, Phase, RusshConfig, ServerState, run_stream,
};
pub use hostkey::{HostKey, HostKeySource};

// Re-export the log crate so embedders can build the default sink.
pub use snare_log;

// -----------------------------------------------------------------------------
// Error Types
// -----------------------------------------------------------------------------

/// Errors that can occur in the snare server library.
///
/// # Recovery Strategies
///
/// | Error Variant | Recovery Strategy |
/// |--------------|-------------------|
/// | [`Io`](Error::Io) | Check permissions, port availability |
/// | [`Russh`](Error::Russh) | Per connection only; log and drop |
/// | [`Key`](Error::Key) / [`KeyLoad`](Error::KeyLoad) | Rebuild; the embedded key is broken |
/// | [`KeyGeneration`](Error::KeyGeneration) | Check OS entropy source |
/// | [`KeyRead`](Error::KeyRead) | Fix the key path or its permissions |
/// | [`KeyParse`](Error::KeyParse) | Supply an unencrypted OpenSSH or PEM key |
/// | [`Bind`](Error::Bind) | Pick another port or free the current one |
/// | [`Configuration`](Error::Configuration) | Fix server configuration |
/// | [`Session`](Error::Session) | Per connection only |
/// | [`AddrParse`](Error::AddrParse) | Validate address format |
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during server operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Underlying russh library error.
    ///
    /// Raised inside a single connection (handshake failures, client
    /// disconnects, malformed packets). Never fatal to the server.
    #[error("russh error: {0}")]
    Russh(#[from] russh::Error),

    /// Key management error.
    #[error("key error: {0}")]
    Key(String),

    /// Key error reported by russh-keys.
    #[error("key loading error: {0}")]
    KeyLoad(#[from] russh_keys::Error),

    /// A fresh host key could not be generated.
    #[error("host key generation failed: {0}")]
    KeyGeneration(String),

    /// The host key file could not be read.
    #[error("cannot read host key {}: {source}", path.display())]
    KeyRead {
        /// Configured key path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The host key file was read but is not a usable private key.
    #[error("cannot parse host key {}: {message}", path.display())]
    KeyParse {
        /// Configured key path.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// The listening socket could not be bound.
    #[error("cannot listen on {address}: {source}")]
    Bind {
        /// Requested listen address.
        address: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Server configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Session error.
    #[error("session error: {0}")]
    Session(String),

    /// Address parse error.
    #[error("address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}

/// A specialized [`Result`] type for snare operations.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------
// Server Identity
// -----------------------------------------------------------------------------

/// Default listen port.
pub const DEFAULT_PORT: u16 = 2222;

/// Default advertised server software version.
pub const DEFAULT_SERVER_VERSION: &str = "OpenSSH_8.2p1";

/// Default distribution tag appended to the version and shown in the banner.
pub const DEFAULT_BANNER: &str = "Ubuntu-4ubuntu0.5";

/// Default idle timeout for a connection.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the identification line sent during version exchange.
///
/// ```rust
/// assert_eq!(
///     snare::identification_line("OpenSSH_8.2p1", "Ubuntu-4ubuntu0.5"),
///     "SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.5"
/// );
/// ```
pub fn identification_line(server_version: &str, banner: &str) -> String {
    if banner.is_empty() {
        format!("SSH-2.0-{server_version}")
    } else {
        format!("SSH-2.0-{server_version} {banner}")
    }
}

/// Renders the pre-authentication greeting for a banner tag.
pub fn render_banner(banner: &str) -> String {
    format!("Welcome to Ubuntu {banner} (GNU/Linux 5.4.0-109-generic x86_64)\n\n")
}

// -----------------------------------------------------------------------------
// Server Options
// -----------------------------------------------------------------------------

/// Options for configuring the decoy server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Listen address.
    pub address: String,
    /// Software version token, e.g. `OpenSSH_8.2p1`.
    pub server_version: String,
    /// Distribution tag used in the identification line and the banner.
    pub banner: String,
    /// Host key strategy.
    pub host_key: HostKeySource,
    /// Lower bound of the rejection delay.
    pub min_delay: Duration,
    /// Random range added on top of `min_delay`.
    pub jitter: Duration,
    /// Fixed seed for the delay generator. Random when `None`.
    pub delay_seed: Option<u64>,
    /// Idle timeout for a connection.
    pub idle_timeout: Option<Duration>,
    /// Ceiling on simultaneously open connections. Unlimited when `None`.
    pub max_connections: Option<usize>,
    /// Authentication requests allowed per connection, `none` excluded.
    /// The request after the last allowed one is recorded, then the
    /// connection is closed.
    pub max_auth_attempts: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            server_version: DEFAULT_SERVER_VERSION.to_string(),
            banner: DEFAULT_BANNER.to_string(),
            host_key: HostKeySource::default(),
            min_delay: Duration::from_millis(DEFAULT_MIN_DELAY_MS),
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
            delay_seed: None,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            max_connections: None,
            max_auth_attempts: DEFAULT_MAX_AUTH_ATTEMPTS,
        }
    }
}

impl ServerOptions {
    /// Full identification line for these options.
    pub fn identification(&self) -> String {
        identification_line(&self.server_version, &self.banner)
    }

    fn rejection_delay(&self) -> RejectionDelay {
        match self.delay_seed {
            Some(seed) => RejectionDelay::with_seed(self.min_delay, self.jitter, seed),
            None => RejectionDelay::new(self.min_delay, self.jitter),
        }
    }
}

// -----------------------------------------------------------------------------
// Server
// -----------------------------------------------------------------------------

/// The decoy SSH server.
///
/// Everything that can fail at startup (host key, options) fails in
/// [`ServerBuilder::build`]; only binding is left to [`Server::bind`].
pub struct Server {
    options: ServerOptions,
    config: Arc<RusshConfig>,
    factory: DecoyHandlerFactory,
    fingerprint: String,
    limiter: Option<Arc<Semaphore>>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("options", &self.options)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Returns the server options.
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Returns the listen address.
    pub fn address(&self) -> &str {
        &self.options.address
    }

    /// SHA256 fingerprint of the host key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Identification line sent to clients.
    pub fn identification(&self) -> String {
        self.options.identification()
    }

    /// Binds the configured address and serves forever.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddrParse`] or [`Error::Bind`] before any connection
    /// is accepted.
    pub async fn listen(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Binds the configured address without serving it yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddrParse`] or [`Error::Bind`].
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self.options.address.parse()?;
        TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            address: self.options.address.clone(),
            source,
        })
    }

    /// Serves connections from an already bound listener.
    ///
    /// Each connection runs on its own task; accept errors are logged and
    /// the loop continues.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(
            address = %local_addr,
            version = %self.identification(),
            fingerprint = %self.fingerprint,
            "Server listening"
        );

        loop {
            let (socket, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let permit = match &self.limiter {
                Some(limiter) => match Arc::clone(limiter).try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        warn!(peer_addr = %peer_addr, "Connection limit reached; dropping connection");
                        drop(socket);
                        continue;
                    }
                },
                None => None,
            };

            debug!(peer_addr = %peer_addr, "Accepted connection");
            let config = Arc::clone(&self.config);
            let handler = self.factory.create_handler(peer_addr);

            tokio::spawn(async move {
                let _permit = permit;
                match run_stream(config, socket, handler).await {
                    Ok(session) => log_session_end(peer_addr, session.await),
                    Err(e) => {
                        debug!(peer_addr = %peer_addr, error = %e, "SSH handshake failed");
                    }
                }
            });
        }
    }
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// True when russh tore the connection down because a request carried
/// non-UTF-8 strings. For a userauth request this happens before the handler
/// runs, so the credential never reaches the sink.
fn is_dropped_credential(err: &Error) -> bool {
    matches!(err, Error::Russh(russh::Error::Utf8(_)))
}

fn log_session_end(peer_addr: SocketAddr, result: Result<()>) {
    match result {
        Ok(()) => {
            debug!(peer_addr = %peer_addr, "Connection closed");
        }
        Err(e) if is_dropped_credential(&e) => {
            warn!(
                peer_addr = %peer_addr,
                error = %e,
                "Credential dropped: non-UTF-8 auth request"
            );
        }
        Err(e) => {
            debug!(peer_addr = %peer_addr, error = %e, "Connection ended");
        }
    }
}

fn create_russh_config(options: &ServerOptions, key: russh_keys::key::KeyPair) -> RusshConfig {
    let mut config = RusshConfig::default();

    config.server_id = russh::SshId::Standard(options.identification());
    config.methods = russh::MethodSet::PASSWORD;
    config.keys.push(key);

    // The handler applies its own randomized delay.
    config.auth_rejection_time = Duration::ZERO;
    config.auth_rejection_time_initial = Some(Duration::ZERO);
    config.inactivity_timeout = options.idle_timeout;

    // russh expects &'static str; the banner lives as long as the process.
    let banner: &'static str = Box::leak(render_banner(&options.banner).into_boxed_str());
    config.auth_banner = Some(banner);

    config
}

// -----------------------------------------------------------------------------
// Server Builder
// -----------------------------------------------------------------------------

/// Builder for creating a decoy server.
#[derive(Default)]
pub struct ServerBuilder {
    options: ServerOptions,
    sink: Option<Arc<dyn CredentialSink>>,
}

impl ServerBuilder {
    /// Creates a new server builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options at once.
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the listen address.
    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.options.address = addr.into();
        self
    }

    /// Listens on all interfaces at the given port.
    pub fn port(mut self, port: u16) -> Self {
        self.options.address = format!("0.0.0.0:{port}");
        self
    }

    /// Sets the software version token.
    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.options.server_version = version.into();
        self
    }

    /// Sets the distribution tag.
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.options.banner = banner.into();
        self
    }

    /// Sets the host key strategy.
    pub fn host_key(mut self, source: HostKeySource) -> Self {
        self.options.host_key = source;
        self
    }

    /// Sets the rejection delay bounds.
    pub fn rejection_delay(mut self, min: Duration, jitter: Duration) -> Self {
        self.options.min_delay = min;
        self.options.jitter = jitter;
        self
    }

    /// Fixes the delay generator seed.
    pub fn delay_seed(mut self, seed: u64) -> Self {
        self.options.delay_seed = Some(seed);
        self
    }

    /// Sets the idle timeout. `None` disables it.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.idle_timeout = timeout;
        self
    }

    /// Caps simultaneous connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.options.max_connections = Some(max);
        self
    }

    /// Sets the maximum authentication attempts per connection.
    pub fn max_auth_attempts(mut self, max: u32) -> Self {
        self.options.max_auth_attempts = max;
        self
    }

    /// Sets the credential sink.
    pub fn sink<S: CredentialSink + 'static>(self, sink: S) -> Self {
        self.sink_arc(Arc::new(sink))
    }

    /// Sets an already shared credential sink.
    pub fn sink_arc(mut self, sink: Arc<dyn CredentialSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Resolves the host key and builds the server.
    ///
    /// # Errors
    ///
    /// Returns a host key error, or [`Error::Configuration`] if no sink was
    /// set or a limit is zero.
    pub fn build(self) -> Result<Server> {
        let sink = self
            .sink
            .ok_or_else(|| Error::Configuration("no credential sink configured".to_string()))?;
        if self.options.max_connections == Some(0) {
            return Err(Error::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.options.max_auth_attempts == 0 {
            return Err(Error::Configuration(
                "max_auth_attempts must be at least 1".to_string(),
            ));
        }

        let host_key = HostKey::resolve(&self.options.host_key)?;
        info!(
            source = %host_key.source(),
            fingerprint = %host_key.fingerprint(),
            "Host key ready"
        );
        let (key, fingerprint) = host_key.into_parts();

        let config = Arc::new(create_russh_config(&self.options, key));
        let state = Arc::new(
            ServerState::new(sink, self.options.rejection_delay())
                .with_max_auth_attempts(self.options.max_auth_attempts),
        );
        let limiter = self
            .options
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max)));

        Ok(Server {
            options: self.options,
            config,
            factory: DecoyHandlerFactory::new(state),
            fingerprint,
            limiter,
        })
    }
}
