//! Access token payload decoding.
//!
//! Tokens are decoded locally, without contacting the issuer: only the
//! middle of the three dot-separated base64url segments is parsed, and the
//! signature is never verified here. The backend verifies signatures; this
//! client only needs the embedded claims to project session state.
//!
//! Malformed tokens are an expected input (storage tampering, truncation),
//! so every failure surfaces as a typed [`DecodeError`], never a panic.

use std::collections::HashMap;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Technical roles the issuer attaches to every account. These never
/// represent an application permission and are dropped from role sets.
const TECHNICAL_ROLES: [&str; 2] = ["offline_access", "uma_authorization"];

/// Prefix of the issuer's synthetic realm-default composite role.
const DEFAULT_ROLE_PREFIX: &str = "default-roles-";

/// Scheme prefix stripped from role names before display formatting.
const ROLE_LABEL_PREFIX: &str = "role_";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected 3 token segments, found {0}")]
    SegmentCount(usize),

    #[error("token payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("token payload is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),
}

/// Claims embedded in an access token payload.
///
/// Every field is optional: a token missing a claim decodes to an absent
/// value rather than failing. Role claims keep their raw JSON shape so a
/// list containing non-string entries degrades to the string subset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub preferred_username: Option<String>,
    pub given_name: Option<String>,
    pub email: Option<String>,
    pub exp: Option<i64>,
    #[serde(default)]
    realm_access: RoleList,
    #[serde(default)]
    resource_access: HashMap<String, RoleList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RoleList {
    #[serde(default)]
    roles: Vec<Value>,
}

impl RoleList {
    fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().filter_map(Value::as_str)
    }
}

impl Claims {
    /// Whether the token has expired. A missing or unreadable `exp` claim
    /// counts as expired.
    pub fn is_expired(&self) -> bool {
        match self.exp {
            Some(exp) => Utc::now().timestamp() >= exp,
            None => true,
        }
    }

    /// Expiry instant from the `exp` claim, if present and representable.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// Preferred login name, falling back to the email claim.
    pub fn username(&self) -> Option<&str> {
        self.preferred_username
            .as_deref()
            .or(self.email.as_deref())
    }

    /// Union of realm-wide roles and this client's resource roles, with
    /// technical roles removed. Client roles come first, realm roles after,
    /// duplicates dropped.
    pub fn roles(&self, client_id: &str) -> Vec<String> {
        let client_roles = self
            .resource_access
            .get(client_id)
            .map(RoleList::names)
            .into_iter()
            .flatten();

        let mut roles: Vec<String> = Vec::new();
        for role in client_roles.chain(self.realm_access.names()) {
            if is_technical_role(role) {
                continue;
            }
            if !roles.iter().any(|r| r == role) {
                roles.push(role.to_string());
            }
        }
        roles
    }

    /// First application role, formatted for display.
    pub fn display_role(&self, client_id: &str) -> Option<String> {
        self.roles(client_id)
            .first()
            .map(|role| format_role_label(role))
    }
}

/// Decode the claims segment of an access token.
pub fn decode(access_token: &str) -> Result<Claims, DecodeError> {
    let segments: Vec<&str> = access_token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::SegmentCount(segments.len()));
    }

    // Issuers differ on padding; strip it and decode with the no-pad engine.
    let payload = segments[1].trim_end_matches('=');
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload)?;

    Ok(serde_json::from_slice(&bytes)?)
}

/// Whether a role is issuer plumbing rather than an application permission.
pub fn is_technical_role(role: &str) -> bool {
    let normalized = role.to_lowercase();
    normalized.starts_with(DEFAULT_ROLE_PREFIX)
        || TECHNICAL_ROLES.contains(&normalized.as_str())
}

/// Normalize a role name for display: strip a leading `ROLE_` prefix, turn
/// separator runs into single spaces, and capitalize each word.
pub fn format_role_label(role: &str) -> String {
    let trimmed = if role.len() >= ROLE_LABEL_PREFIX.len()
        && role[..ROLE_LABEL_PREFIX.len()].eq_ignore_ascii_case(ROLE_LABEL_PREFIX)
    {
        &role[ROLE_LABEL_PREFIX.len()..]
    } else {
        role
    };

    trimmed
        .split(['_', '-', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build an unsigned token with the given JSON payload. Test fixture shared
/// by every suite that needs a decodable access token.
#[cfg(test)]
pub(crate) fn make_token(payload: &serde_json::Value) -> String {
    let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = engine.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}
