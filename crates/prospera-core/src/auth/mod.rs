//! Authentication module: the client-side session engine.
//!
//! This module provides:
//! - `TokenStore`: sealed on-disk storage for the credential triple
//! - `codec`: local access-token claim decoding
//! - `AuthManager`: login, logout, expiry tracking, de-duplicated refresh
//! - `SessionState`/`AuthEvent`: observable session truth and lifecycle
//!   notifications
//! - `Keychain`: sealing-key provisioning and remembered passwords

pub mod codec;
pub mod error;
pub mod keychain;
pub mod manager;
pub mod state;
pub mod store;

pub use codec::{Claims, DecodeError};
pub use error::AuthError;
pub use keychain::{Keychain, KeychainError};
pub use manager::AuthManager;
pub use state::{AuthEvent, SessionState};
pub use store::{Credential, StoreError, TokenStore};
