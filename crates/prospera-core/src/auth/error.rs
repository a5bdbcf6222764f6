//! Authentication failure taxonomy.
//!
//! Raw transport errors never cross the manager's boundary; every failure a
//! caller can see is one of these kinds. The enum is `Clone` so the outcome
//! of a shared in-flight refresh can be fanned out to every waiter.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The token endpoint rejected the username/password pair (HTTP 400/401).
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The token endpoint could not be reached or misbehaved. Distinct from
    /// `InvalidCredentials` so callers can give different guidance.
    #[error("authentication endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    /// A refresh exchange was rejected or superseded; the session is over.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The local credential store could not be written.
    #[error("credential storage failed: {0}")]
    Storage(String),
}
