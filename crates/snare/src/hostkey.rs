//! Host key resolution.
//!
//! The server presents exactly one signing key for its whole lifetime. The
//! key comes from one of three sources, picked once at startup by
//! [`HostKeySource::select`]:
//!
//! 1. [`HostKeySource::Generate`]: a fresh RSA key from OS entropy.
//! 2. [`HostKeySource::Path`]: an operator supplied private key file.
//! 3. [`HostKeySource::Embedded`]: the key compiled into this crate.
//!
//! Every failure here happens before the listener is bound.

use std::fmt;
use std::path::{Path, PathBuf};

use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use russh_keys::key::KeyPair;
use tracing::{debug, info};

use crate::{Error, Result};

/// Modulus size for generated RSA host keys.
pub const RSA_KEY_BITS: usize = 2048;

const EMBEDDED_HOST_KEY: &str = include_str!("../keys/default_host_key");

/// Where the host key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostKeySource {
    /// Generate a new RSA key on every start.
    #[default]
    Generate,
    /// Load a private key file (OpenSSH, PKCS#1 or PKCS#8 PEM).
    Path(PathBuf),
    /// Use the key compiled into the binary.
    Embedded,
}

impl HostKeySource {
    /// Picks the source by precedence: regenerate flag, then key path, then
    /// the embedded key. An empty path counts as no path.
    pub fn select(generate: bool, path: Option<PathBuf>) -> Self {
        if generate {
            return HostKeySource::Generate;
        }
        match path.filter(|p| !p.as_os_str().is_empty()) {
            Some(path) => HostKeySource::Path(path),
            None => HostKeySource::Embedded,
        }
    }

    /// Short strategy name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            HostKeySource::Generate => "generate",
            HostKeySource::Path(_) => "path",
            HostKeySource::Embedded => "embedded",
        }
    }
}

impl fmt::Display for HostKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeySource::Path(path) => write!(f, "path ({})", path.display()),
            other => f.write_str(other.name()),
        }
    }
}

/// A resolved signing key and its public fingerprint.
pub struct HostKey {
    pair: KeyPair,
    fingerprint: String,
    source: HostKeySource,
}

impl fmt::Debug for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKey")
            .field("fingerprint", &self.fingerprint)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl HostKey {
    /// Resolves a key from the given source.
    ///
    /// # Errors
    ///
    /// - [`Error::KeyGeneration`] if a new key cannot be produced.
    /// - [`Error::KeyRead`] if the key file cannot be read.
    /// - [`Error::KeyParse`] if the key file is not a usable private key.
    /// - [`Error::Key`] if the embedded key is unusable.
    pub fn resolve(source: &HostKeySource) -> Result<Self> {
        match source {
            HostKeySource::Generate => Self::generate(),
            HostKeySource::Path(path) => Self::load(path),
            HostKeySource::Embedded => Self::embedded(),
        }
    }

    /// Generates a fresh RSA host key.
    pub fn generate() -> Result<Self> {
        info!(bits = RSA_KEY_BITS, "Generating RSA host key");
        let mut rng = rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        let pem = private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        let pair = russh_keys::decode_secret_key(&pem, None)
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        Self::from_pair(pair, HostKeySource::Generate)
    }

    /// Loads a private key file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading host key");

        let bytes = std::fs::read(path).map_err(|source| Error::KeyRead {
            path: path.to_path_buf(),
            source,
        })?;
        let text = std::str::from_utf8(&bytes).map_err(|e| Error::KeyParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let pair = russh_keys::decode_secret_key(text, None).map_err(|e| Error::KeyParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Self::from_pair(pair, HostKeySource::Path(path.to_path_buf()))
    }

    /// Parses the compiled-in host key.
    pub fn embedded() -> Result<Self> {
        let pair = russh_keys::decode_secret_key(EMBEDDED_HOST_KEY, None)
            .map_err(|e| Error::Key(format!("embedded host key is invalid: {e}")))?;
        Self::from_pair(pair, HostKeySource::Embedded)
    }

    fn from_pair(pair: KeyPair, source: HostKeySource) -> Result<Self> {
        let public = pair.clone_public_key()?;
        let fingerprint = format!("SHA256:{}", public.fingerprint());
        Ok(Self {
            pair,
            fingerprint,
            source,
        })
    }

    /// SHA256 fingerprint in OpenSSH notation (`SHA256:<base64>`).
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The source this key was resolved from.
    pub fn source(&self) -> &HostKeySource {
        &self.source
    }

    /// Borrows the signing key.
    pub fn key_pair(&self) -> &KeyPair {
        &self.pair
    }

    /// Splits into the signing key and its fingerprint.
    pub fn into_parts(self) -> (KeyPair, String) {
        (self.pair, self.fingerprint)
    }
}
