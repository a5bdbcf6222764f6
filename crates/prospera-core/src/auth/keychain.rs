//! OS keychain integration.
//!
//! Two things live in the keychain: the sealing key for the on-disk
//! credential store, and optionally a remembered password per username so
//! the CLI can re-login without prompting.

use base64::Engine;
use keyring::Entry;
use thiserror::Error;
use tracing::warn;

use super::store::{TokenStore, STORE_KEY_SIZE};

const SERVICE_NAME: &str = "prospera";

/// Keychain entry holding the credential-store sealing key.
const STORE_KEY_ENTRY: &str = "credential-store-key";

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),
}

pub struct Keychain;

impl Keychain {
    /// Fetch the credential-store sealing key, creating and persisting one
    /// on first use. A malformed stored key is replaced with a fresh one,
    /// which makes any previously sealed credential unreadable (absent).
    pub fn load_or_create_store_key() -> Result<[u8; STORE_KEY_SIZE], KeychainError> {
        let entry = Entry::new(SERVICE_NAME, STORE_KEY_ENTRY)?;

        match entry.get_password() {
            Ok(encoded) => {
                if let Some(key) = decode_key(&encoded) {
                    return Ok(key);
                }
                warn!("stored sealing key is malformed, replacing it");
            }
            Err(keyring::Error::NoEntry) => {}
            Err(err) => return Err(err.into()),
        }

        let key = TokenStore::generate_key();
        entry.set_password(&base64::engine::general_purpose::STANDARD.encode(key))?;
        Ok(key)
    }

    /// Remember a password for a username.
    pub fn store_password(username: &str, password: &str) -> Result<(), KeychainError> {
        Entry::new(SERVICE_NAME, username)?.set_password(password)?;
        Ok(())
    }

    /// Retrieve a remembered password for a username.
    pub fn get_password(username: &str) -> Result<String, KeychainError> {
        Ok(Entry::new(SERVICE_NAME, username)?.get_password()?)
    }

    /// Forget the remembered password for a username.
    pub fn delete_password(username: &str) -> Result<(), KeychainError> {
        match Entry::new(SERVICE_NAME, username)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether a remembered password exists for a username.
    pub fn has_password(username: &str) -> bool {
        Entry::new(SERVICE_NAME, username)
            .and_then(|entry| entry.get_password())
            .is_ok()
    }
}

fn decode_key(encoded: &str) -> Option<[u8; STORE_KEY_SIZE]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    bytes.try_into().ok()
}
