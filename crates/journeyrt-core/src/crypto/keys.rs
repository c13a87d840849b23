//! Trust store mapping manifest key identifiers to verifying keys.

use std::collections::HashMap;
use std::sync::RwLock;

use p256::ecdsa::VerifyingKey;
use thiserror::Error;

use super::es256::{self, Es256Error};

/// Errors from trust store operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// No key is registered under the requested identifier.
    #[error("key not found: {kid}")]
    KeyNotFound {
        /// The key identifier that failed to resolve.
        kid: String,
    },

    /// Key material could not be parsed.
    #[error(transparent)]
    MalformedKey(#[from] Es256Error),
}

/// In-process store of manifest verification keys.
///
/// Keys are provisioned at integration time (baked into the partner build
/// or registered at startup). Reads are concurrent, registration is
/// exclusive.
#[derive(Default)]
pub struct TrustStore {
    keys: RwLock<HashMap<String, VerifyingKey>>,
}

impl TrustStore {
    /// Creates an empty trust store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a verifying key under a key identifier.
    pub fn register(&self, kid: impl Into<String>, key: VerifyingKey) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(kid.into(), key);
        }
    }

    /// Registers a key from its uncompressed SEC1 encoding.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::MalformedKey`] if the bytes are not a
    /// valid P-256 point.
    pub fn register_sec1(&self, kid: impl Into<String>, bytes: &[u8]) -> Result<(), KeyStoreError> {
        let key = es256::parse_public_key_sec1(bytes)?;
        self.register(kid, key);
        Ok(())
    }

    /// Resolves a key identifier to its verifying key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::KeyNotFound`] if the identifier is
    /// unknown.
    pub fn resolve(&self, kid: &str) -> Result<VerifyingKey, KeyStoreError> {
        let keys = self.keys.read().map_err(|_| KeyStoreError::KeyNotFound {
            kid: kid.to_string(),
        })?;
        keys.get(kid).copied().ok_or_else(|| KeyStoreError::KeyNotFound {
            kid: kid.to_string(),
        })
    }

    /// Extension point for remote trust-material refresh.
    ///
    /// No refresh protocol is specified; the stub exists so callers can
    /// take the dependency today and pick up the protocol when one ships.
    pub fn refresh(&self) {
        tracing::debug!("trust store refresh requested; no refresh protocol configured");
    }
}
