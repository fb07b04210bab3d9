//! russh Handler implementation for the decoy server.
//!
//! Every connection gets its own [`DecoyHandler`]. It lets russh run the
//! transport and key exchange, records every password it is offered, and
//! answers everything else with a refusal. No callback ever grants
//! authentication or opens a channel.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use russh::MethodSet;
use russh::server::{Auth, Handler as RusshHandler, Msg, Session as RusshSession};
use russh::Channel;
use tracing::{debug, error, info, warn};

use crate::Error;
use crate::auth::{AuthAttempt, CredentialSink, DEFAULT_MAX_AUTH_ATTEMPTS, RejectionDelay};

// Re-export russh server types for use by Server
pub use russh::server::{Config as RusshConfig, run_stream};

/// Reason logged for every password rejection. SSH carries no reason text
/// in `USERAUTH_FAILURE`, so clients only ever see the generic failure.
pub const DENIAL_REASON: &str = "permission denied (password), please try again";

/// Shared state for all connections to a server.
pub struct ServerState {
    /// Destination for captured attempts.
    pub sink: Arc<dyn CredentialSink>,
    /// Delay applied before each password rejection.
    pub delay: RejectionDelay,
    /// Authentication requests allowed per connection; the next one ends it.
    pub max_auth_attempts: u32,
    /// Connection counter for generating IDs.
    pub connection_counter: RwLock<u64>,
}

impl ServerState {
    /// Creates new server state.
    pub fn new(sink: Arc<dyn CredentialSink>, delay: RejectionDelay) -> Self {
        Self {
            sink,
            delay,
            max_auth_attempts: DEFAULT_MAX_AUTH_ATTEMPTS,
            connection_counter: RwLock::new(0),
        }
    }

    /// Sets the per-connection authentication limit.
    #[must_use]
    pub fn with_max_auth_attempts(mut self, max: u32) -> Self {
        self.max_auth_attempts = max;
        self
    }

    /// Returns the next connection ID.
    pub fn next_connection_id(&self) -> u64 {
        let mut counter = self.connection_counter.write();
        *counter += 1;
        *counter
    }
}

/// Where a connection is in its (always failing) lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Version and key exchange in progress.
    Handshaking,
    /// The client has started sending authentication requests.
    Authenticating,
    /// The handler ended the connection (attempt limit reached).
    Closed,
}

/// Handler for a single SSH connection.
pub struct DecoyHandler {
    connection_id: u64,
    remote_addr: SocketAddr,
    server_state: Arc<ServerState>,
    phase: Phase,
    auth_attempts: u32,
    password_attempts: u32,
}

impl DecoyHandler {
    /// Creates a new handler for a connection.
    pub fn new(remote_addr: SocketAddr, server_state: Arc<ServerState>) -> Self {
        let connection_id = server_state.next_connection_id();
        debug!(
            connection_id,
            remote_addr = %remote_addr,
            "New connection handler created"
        );

        Self {
            connection_id,
            remote_addr,
            server_state,
            phase: Phase::Handshaking,
            auth_attempts: 0,
            password_attempts: 0,
        }
    }

    /// Connection ID used in diagnostics.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of password messages seen on this connection.
    pub fn password_attempts(&self) -> u32 {
        self.password_attempts
    }

    /// Number of counted authentication requests (every method but `none`).
    pub fn auth_attempts(&self) -> u32 {
        self.auth_attempts
    }

    fn enter_auth(&mut self) {
        if self.phase == Phase::Handshaking {
            self.phase = Phase::Authenticating;
        }
    }

    /// Counts one authentication request. Returns true once the request is
    /// past the configured limit.
    fn count_attempt(&mut self) -> bool {
        self.enter_auth();
        self.auth_attempts = self.auth_attempts.saturating_add(1);
        self.auth_attempts > self.server_state.max_auth_attempts
    }

    fn too_many_attempts(&mut self) -> Error {
        self.phase = Phase::Closed;
        warn!(
            connection_id = self.connection_id,
            remote_addr = %self.remote_addr,
            attempts = self.auth_attempts,
            "Too many authentication failures; closing connection"
        );
        Error::Session("too many authentication failures".to_string())
    }

    fn reject() -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(MethodSet::PASSWORD),
        }
    }

    fn refuse_channel(&self, kind: &str) -> Result<bool, Error> {
        warn!(
            connection_id = self.connection_id,
            remote_addr = %self.remote_addr,
            kind,
            "Channel open refused"
        );
        Ok(false)
    }
}

impl Drop for DecoyHandler {
    fn drop(&mut self) {
        debug!(
            connection_id = self.connection_id,
            remote_addr = %self.remote_addr,
            password_attempts = self.password_attempts,
            "Connection handler dropped"
        );
    }
}

#[async_trait]
impl RusshHandler for DecoyHandler {
    type Error = Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        self.enter_auth();
        debug!(
            connection_id = self.connection_id,
            user = user,
            "None auth rejected"
        );
        Ok(Self::reject())
    }

    /// Record the attempt, wait, then reject. Always.
    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let over_limit = self.count_attempt();
        self.password_attempts = self.password_attempts.saturating_add(1);

        let attempt = AuthAttempt::capture(self.remote_addr, user, password);
        info!(
            connection_id = self.connection_id,
            remote_addr = %self.remote_addr,
            user = user,
            attempt = self.password_attempts,
            "Password attempt captured"
        );

        if let Err(e) = self.server_state.sink.record(&attempt).await {
            error!(
                connection_id = self.connection_id,
                remote_addr = %self.remote_addr,
                error = %e,
                "Failed to record credentials"
            );
        }

        if over_limit {
            return Err(self.too_many_attempts());
        }

        let waited = self.server_state.delay.wait().await;
        debug!(
            connection_id = self.connection_id,
            user = user,
            delay_ms = waited.as_millis() as u64,
            reason = DENIAL_REASON,
            "Password auth rejected"
        );
        Ok(Self::reject())
    }

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &russh_keys::key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.count_attempt() {
            return Err(self.too_many_attempts());
        }
        debug!(
            connection_id = self.connection_id,
            user = user,
            key_type = public_key.name(),
            "Public key offer rejected"
        );
        Ok(Self::reject())
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &russh_keys::key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.count_attempt() {
            return Err(self.too_many_attempts());
        }
        debug!(
            connection_id = self.connection_id,
            user = user,
            "Public key auth rejected"
        );
        Ok(Self::reject())
    }

    async fn auth_keyboard_interactive(
        &mut self,
        user: &str,
        submethods: &str,
        _response: Option<russh::server::Response<'async_trait>>,
    ) -> Result<Auth, Self::Error> {
        if self.count_attempt() {
            return Err(self.too_many_attempts());
        }
        debug!(
            connection_id = self.connection_id,
            user = user,
            submethods = submethods,
            "Keyboard-interactive auth rejected"
        );
        Ok(Self::reject())
    }

    async fn auth_succeeded(&mut self, _session: &mut RusshSession) -> Result<(), Self::Error> {
        self.phase = Phase::Closed;
        error!(
            connection_id = self.connection_id,
            remote_addr = %self.remote_addr,
            "Authentication unexpectedly succeeded; dropping connection"
        );
        Err(Error::Session("authentication must never succeed".to_string()))
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut RusshSession,
    ) -> Result<bool, Self::Error> {
        self.refuse_channel("session")
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut RusshSession,
    ) -> Result<bool, Self::Error> {
        self.refuse_channel("x11")
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut RusshSession,
    ) -> Result<bool, Self::Error> {
        debug!(
            connection_id = self.connection_id,
            target = %format!("{host_to_connect}:{port_to_connect}"),
            "direct-tcpip target"
        );
        self.refuse_channel("direct-tcpip")
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut RusshSession,
    ) -> Result<bool, Self::Error> {
        self.refuse_channel("forwarded-tcpip")
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut RusshSession,
    ) -> Result<bool, Self::Error> {
        debug!(
            connection_id = self.connection_id,
            address,
            port = *port,
            "Global request tcpip-forward discarded"
        );
        Ok(false)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut RusshSession,
    ) -> Result<bool, Self::Error> {
        debug!(
            connection_id = self.connection_id,
            address,
            port,
            "Global request cancel-tcpip-forward discarded"
        );
        Ok(false)
    }
}

/// Factory for creating DecoyHandler instances.
pub struct DecoyHandlerFactory {
    server_state: Arc<ServerState>,
}

impl DecoyHandlerFactory {
    /// Creates a new handler factory.
    pub fn new(server_state: Arc<ServerState>) -> Self {
        Self { server_state }
    }

    /// Creates a handler for a new connection.
    pub fn create_handler(&self, remote_addr: SocketAddr) -> DecoyHandler {
        DecoyHandler::new(remote_addr, self.server_state.clone())
    }

    /// Shared state handed to every handler.
    pub fn server_state(&self) -> &Arc<ServerState> {
        &self.server_state
    }
}
