//! Wire types exchanged with the backend user service.

use serde::{Deserialize, Serialize};

/// Profile payload from `GET /api/users/me`. Every field is optional; the
/// session stays valid on token data alone when fields are missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub cin: Option<String>,
    pub role: Option<String>,
    pub username: Option<String>,
}

/// Account kind selectable at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegisterRole {
    Client,
    Freelancer,
}

/// Payload for `POST /api/users/register`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub cin: String,
    pub role: RegisterRole,
}
