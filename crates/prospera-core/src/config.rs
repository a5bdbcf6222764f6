//! Application configuration management.
//!
//! This module handles loading and saving the client configuration, which
//! covers the token endpoint coordinates (Keycloak base URL, realm, client
//! id), the backend base URL, and the last used username.
//!
//! Configuration is stored at `~/.config/prospera/config.json`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application name used for config/data directory paths
const APP_NAME: &str = "prospera";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Sealed credential file name in the data directory
const CREDENTIAL_FILE: &str = "credentials.enc";

/// Default minimum remaining validity before a refresh is considered
/// worthwhile. Matches the slack the identity provider's own adapter uses.
const DEFAULT_MIN_TOKEN_VALIDITY_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a config/data directory on this platform")]
    NoHomeDirectory,

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the Keycloak server issuing tokens.
    pub keycloak_base_url: String,
    /// Realm the client belongs to.
    pub realm: String,
    /// Client id sent with every token-endpoint exchange; also the key under
    /// which per-client roles appear in the access token.
    pub client_id: String,
    /// Base URL of the backend API this client talks to.
    pub backend_base_url: String,
    /// Remaining token lifetime (seconds) below which `refresh` goes to the
    /// network instead of reusing the current token.
    pub min_token_validity_secs: u64,
    /// Route the role guard redirects to when access is denied.
    pub fallback_route: String,
    /// Last username that logged in successfully, for prefilled prompts.
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keycloak_base_url: "http://localhost:8080".to_string(),
            realm: "prospera".to_string(),
            client_id: "prospera-client".to_string(),
            backend_base_url: "http://localhost:8081".to_string(),
            min_token_validity_secs: DEFAULT_MIN_TOKEN_VALIDITY_SECS,
            fallback_route: "/dashboard".to_string(),
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// OpenID Connect token endpoint derived from the Keycloak coordinates.
    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.keycloak_base_url.trim_end_matches('/'),
            self.realm
        )
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoHomeDirectory)?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Path of the sealed credential file.
    pub fn credential_path() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoHomeDirectory)?;
        Ok(data_dir.join(APP_NAME).join(CREDENTIAL_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_endpoint_is_derived_from_realm() {
        let config = Config::default();
        assert_eq!(
            config.token_endpoint(),
            "http://localhost:8080/realms/prospera/protocol/openid-connect/token"
        );
    }

    #[test]
    fn token_endpoint_tolerates_trailing_slash() {
        let config = Config {
            keycloak_base_url: "https://id.example.com/".to_string(),
            realm: "main".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.token_endpoint(),
            "https://id.example.com/realms/main/protocol/openid-connect/token"
        );
    }
}
