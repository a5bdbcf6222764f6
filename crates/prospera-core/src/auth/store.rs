//! Durable storage for the credential triple.
//!
//! The store owns the only persisted copy of the access token, refresh
//! token, and expiry instant. All three are written and cleared together:
//! writes go to a temp file that is renamed into place, so a reader never
//! observes an access token without its expiry.
//!
//! The payload is sealed with ChaCha20-Poly1305 before it touches disk; the
//! 32-byte key is provisioned by [`crate::auth::keychain`] in production and
//! passed in directly by tests.

use std::path::PathBuf;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Sealing key size in bytes (ChaCha20-Poly1305).
pub const STORE_KEY_SIZE: usize = 32;

/// Nonce size in bytes, prepended to the sealed payload.
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access credential storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode credential payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to seal credential payload")]
    Seal,
}

/// The credential triple issued by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the expiry instant has been reached.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Remaining lifetime, clamped to zero once expired.
    pub fn remaining(&self) -> std::time::Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// On-disk payload. Expiry is kept as string-encoded epoch milliseconds so
/// an unparseable value degrades to "absent" instead of a crash.
#[derive(Serialize, Deserialize)]
struct StoredCredential {
    access_token: String,
    refresh_token: String,
    expires_at: String,
}

pub struct TokenStore {
    path: PathBuf,
    cipher: ChaCha20Poly1305,
}

impl TokenStore {
    pub fn new(path: PathBuf, key: &[u8; STORE_KEY_SIZE]) -> Self {
        Self {
            path,
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Generate a fresh sealing key.
    pub fn generate_key() -> [u8; STORE_KEY_SIZE] {
        let mut key = [0u8; STORE_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Persist the full triple. The write is atomic with respect to
    /// `read`: either the previous triple or the new one is observed.
    pub fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let stored = StoredCredential {
            access_token: credential.access_token.clone(),
            refresh_token: credential.refresh_token.clone(),
            expires_at: credential.expires_at.timestamp_millis().to_string(),
        };
        let payload = serde_json::to_vec(&stored)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), payload.as_slice())
            .map_err(|_| StoreError::Seal)?;

        let mut contents = Vec::with_capacity(NONCE_SIZE + sealed.len());
        contents.extend_from_slice(&nonce_bytes);
        contents.extend_from_slice(&sealed);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &contents)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Read the stored triple. Anything that cannot be opened, unsealed, or
    /// parsed reads as absent; the session layer treats that as anonymous.
    pub fn read(&self) -> Option<Credential> {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(error = %err, "failed to read credential file");
                return None;
            }
        };

        if contents.len() <= NONCE_SIZE {
            warn!("credential file is truncated");
            return None;
        }
        let (nonce_bytes, sealed) = contents.split_at(NONCE_SIZE);
        let payload = match self.cipher.decrypt(Nonce::from_slice(nonce_bytes), sealed) {
            Ok(payload) => payload,
            Err(_) => {
                warn!("credential file failed to unseal");
                return None;
            }
        };

        let stored: StoredCredential = match serde_json::from_slice(&payload) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "credential payload is malformed");
                return None;
            }
        };

        let millis: i64 = match stored.expires_at.parse() {
            Ok(millis) => millis,
            Err(_) => {
                warn!("credential expiry is not a number");
                return None;
            }
        };
        let expires_at = DateTime::from_timestamp_millis(millis)?;

        Some(Credential {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            expires_at,
        })
    }

    /// Remove the stored triple. Removing an already-absent triple is not
    /// an error.
    pub fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
