//! Credential capture.
//!
//! Every password the decoy receives is turned into an [`AuthAttempt`] and
//! handed to a [`CredentialSink`] before the client hears the rejection.
//!
//! # Example
//!
//! ```rust,ignore
//! use snare::auth::{CredentialSink, MemorySink};
//!
//! let sink = MemorySink::new();
//! let server = snare::ServerBuilder::new().sink(sink.clone()).build()?;
//! ```

mod delay;

pub use delay::{DEFAULT_JITTER_MS, DEFAULT_MIN_DELAY_MS, RejectionDelay};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use snare_log::{CredentialLog, Record};
use thiserror::Error;

/// Default authentication requests allowed per connection (OpenSSH's MaxAuthTries).
pub const DEFAULT_MAX_AUTH_ATTEMPTS: u32 = 6;

/// One captured password attempt.
///
/// Username and password are kept exactly as the client sent them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAttempt {
    /// Server-side capture time.
    pub timestamp: DateTime<Utc>,
    /// Client address as `host:port`.
    pub remote_addr: String,
    /// Submitted username.
    pub username: String,
    /// Submitted password.
    pub password: String,
}

impl AuthAttempt {
    /// Captures an attempt stamped with the current time.
    pub fn capture(
        remote_addr: SocketAddr,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            remote_addr: remote_addr.to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Borrows the attempt as a credential log record.
    pub fn as_record(&self) -> Record<'_> {
        Record {
            time: self.timestamp,
            remote_addr: &self.remote_addr,
            username: &self.username,
            password: &self.password,
        }
    }
}

/// Errors reported by a [`CredentialSink`].
///
/// Sink failures are advisory: the connection logs them and carries on.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Writing the record failed.
    #[error("credential write failed: {0}")]
    Io(#[from] io::Error),

    /// The background write task did not complete.
    #[error("credential write task failed: {0}")]
    Task(String),

    /// The sink no longer accepts records.
    #[error("credential sink closed")]
    Closed,
}

/// Destination for captured attempts.
///
/// Implementations serialize concurrent calls themselves; the server calls
/// `record` from many connection tasks at once.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    /// Records one attempt. Returns once the record is durable (or failed).
    async fn record(&self, attempt: &AuthAttempt) -> Result<(), SinkError>;
}

#[async_trait]
impl<S: CredentialSink + ?Sized> CredentialSink for Arc<S> {
    async fn record(&self, attempt: &AuthAttempt) -> Result<(), SinkError> {
        (**self).record(attempt).await
    }
}

/// Writes through a [`CredentialLog`] on the blocking thread pool.
#[async_trait]
impl CredentialSink for CredentialLog {
    async fn record(&self, attempt: &AuthAttempt) -> Result<(), SinkError> {
        let log = self.clone();
        let attempt = attempt.clone();
        tokio::task::spawn_blocking(move || log.record(&attempt.as_record()))
            .await
            .map_err(|e| SinkError::Task(e.to_string()))??;
        Ok(())
    }
}

/// In-memory sink. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    attempts: Arc<Mutex<Vec<AuthAttempt>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded attempts, in arrival order.
    pub fn attempts(&self) -> Vec<AuthAttempt> {
        self.attempts.lock().clone()
    }

    /// Number of recorded attempts.
    pub fn len(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.attempts.lock().is_empty()
    }
}

#[async_trait]
impl CredentialSink for MemorySink {
    async fn record(&self, attempt: &AuthAttempt) -> Result<(), SinkError> {
        self.attempts.lock().push(attempt.clone());
        Ok(())
    }
}
