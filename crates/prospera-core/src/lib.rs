//! Core library for the Prospera client.
//!
//! Everything the surrounding UI needs lives behind a handful of types:
//! [`AuthManager`] owns the credential lifecycle and publishes
//! [`SessionState`]; [`ApiClient`] talks to the backend and handles request
//! authorization transparently; [`RoleGuard`] decides route entry.

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;
pub mod models;

pub use api::{ApiClient, ApiError, ApiRequest};
pub use auth::{
    AuthError, AuthEvent, AuthManager, Credential, Keychain, SessionState, TokenStore,
};
pub use config::Config;
pub use guard::{RoleGuard, RouteDecision};
pub use models::{RegisterRequest, RegisterRole, UserProfile};
