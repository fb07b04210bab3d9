use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;
use snare::{HostKeySource, MemorySink, ServerBuilder};
use tokio::net::{TcpListener, TcpStream};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A decoy server on an ephemeral loopback port.
pub struct TestServer {
    addr: SocketAddr,
    fingerprint: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Starts a server with the embedded key and a fast, fixed delay.
    pub async fn start_with_sink(sink: MemorySink) -> Self {
        Self::start(fast_builder().sink(sink)).await
    }

    pub async fn start(builder: ServerBuilder) -> Self {
        init_tracing();
        let server = builder.build().expect("build snare server");
        let fingerprint = server.fingerprint().to_string();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");

        let handle = tokio::spawn(async move {
            if let Err(err) = server.serve(listener).await {
                eprintln!("snare server error: {err}");
            }
        });

        Self {
            addr,
            fingerprint,
            handle,
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// Routes server diagnostics through the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builder preset used by most tests.
pub fn fast_builder() -> ServerBuilder {
    ServerBuilder::new()
        .host_key(HostKeySource::Embedded)
        .rejection_delay(Duration::from_millis(5), Duration::from_millis(5))
        .delay_seed(1)
}

/// What the client observed during the handshake.
#[derive(Debug, Default, Clone)]
pub struct Observed {
    pub banner: Option<String>,
    pub server_fingerprint: Option<String>,
}

#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Observed>>);

impl Recorder {
    pub fn snapshot(&self) -> Observed {
        self.0.lock().expect("recorder lock").clone()
    }
}

#[async_trait]
impl client::Handler for Recorder {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        self.0.lock().expect("recorder lock").server_fingerprint =
            Some(format!("SHA256:{}", server_public_key.fingerprint()));
        Ok(true)
    }

    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        self.0.lock().expect("recorder lock").banner = Some(banner.to_string());
        Ok(())
    }
}

/// A connected russh client plus the address it connected from.
pub struct TestClient {
    pub handle: client::Handle<Recorder>,
    pub local_addr: SocketAddr,
    pub recorder: Recorder,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("tcp connect");
        let local_addr = stream.local_addr().expect("client local addr");
        let recorder = Recorder::default();

        let config = Arc::new(client::Config::default());
        let handle = tokio::time::timeout(
            DEFAULT_TIMEOUT,
            client::connect_stream(config, stream, recorder.clone()),
        )
        .await
        .expect("handshake timed out")
        .expect("ssh handshake");

        Self {
            handle,
            local_addr,
            recorder,
        }
    }

    /// Tries a password and returns whether the server accepted it.
    pub async fn try_password(&mut self, user: &str, password: &str) -> bool {
        self.password_attempt(user, password)
            .await
            .expect("password auth")
    }

    /// Tries a password, surfacing a closed connection as an error.
    pub async fn password_attempt(
        &mut self,
        user: &str,
        password: &str,
    ) -> Result<bool, russh::Error> {
        tokio::time::timeout(
            DEFAULT_TIMEOUT,
            self.handle.authenticate_password(user, password),
        )
        .await
        .expect("password auth timed out")
    }

    pub async fn close(self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
    }
}
