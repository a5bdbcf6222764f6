//! Route-entry role guard.
//!
//! Evaluated before navigating into a protected route. The guard fails
//! closed: any failure on the way to a role decision (no token, network,
//! decode) denies with a redirect to the fallback route, never permits.

use tracing::debug;

use crate::auth::AuthManager;

/// Outcome of a guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Permit,
    Redirect(String),
}

pub struct RoleGuard {
    auth: AuthManager,
    fallback_route: String,
}

impl RoleGuard {
    pub fn new(auth: AuthManager, fallback_route: impl Into<String>) -> Self {
        Self {
            auth,
            fallback_route: fallback_route.into(),
        }
    }

    /// Decide whether navigation into a route may proceed.
    ///
    /// An empty requirement list means the route is unrestricted. Otherwise
    /// the session is synchronized first and navigation is permitted only
    /// if every required role is present.
    pub async fn check(&self, required_roles: &[String]) -> RouteDecision {
        if required_roles.is_empty() {
            return RouteDecision::Permit;
        }

        if self.auth.valid_access_token().await.is_none() {
            debug!("no valid token while entering a protected route");
            return self.deny();
        }
        self.auth.sync_auth_state().await;

        let state = self.auth.session_state();
        match required_roles.iter().find(|role| !state.has_role(role)) {
            None => RouteDecision::Permit,
            Some(role) => {
                debug!(%role, "required role missing, denying navigation");
                self.deny()
            }
        }
    }

    fn deny(&self) -> RouteDecision {
        RouteDecision::Redirect(self.fallback_route.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::auth::codec::make_token;
    use crate::auth::store::{Credential, TokenStore, STORE_KEY_SIZE};
    use crate::config::Config;

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_auth() -> AuthManager {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "prospera-guard-test-{}-{}.enc",
            std::process::id(),
            n
        ));
        let _ = std::fs::remove_file(&path);
        let store = TokenStore::new(path, &[6u8; STORE_KEY_SIZE]);
        // Nothing listens on this endpoint; the guard must not need it for
        // a fresh token.
        let config = Config {
            keycloak_base_url: "http://127.0.0.1:9".to_string(),
            backend_base_url: "http://127.0.0.1:9".to_string(),
            ..Config::default()
        };
        AuthManager::new(config, store, reqwest::Client::new())
    }

    fn seed_roles(auth: &AuthManager, roles: &[&str]) {
        let token = make_token(&serde_json::json!({
            "preferred_username": "yahya",
            "exp": Utc::now().timestamp() + 300,
            "realm_access": { "roles": roles },
        }));
        auth.store()
            .save(&Credential {
                access_token: token,
                refresh_token: "refresh-1".to_string(),
                expires_at: Utc::now() + chrono::Duration::seconds(300),
            })
            .unwrap();
    }

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn unrestricted_routes_permit_without_a_session() {
        let guard = RoleGuard::new(test_auth(), "/dashboard");
        assert_eq!(guard.check(&[]).await, RouteDecision::Permit);
    }

    #[tokio::test]
    async fn anonymous_caller_is_redirected() {
        let guard = RoleGuard::new(test_auth(), "/dashboard");
        assert_eq!(
            guard.check(&roles(&["CLIENT"])).await,
            RouteDecision::Redirect("/dashboard".to_string())
        );
    }

    #[tokio::test]
    async fn caller_with_every_required_role_is_permitted() {
        let auth = test_auth();
        seed_roles(&auth, &["CLIENT", "FREELANCER"]);
        let guard = RoleGuard::new(auth, "/dashboard");
        assert_eq!(
            guard.check(&roles(&["CLIENT", "FREELANCER"])).await,
            RouteDecision::Permit
        );
    }

    #[tokio::test]
    async fn missing_role_redirects_to_the_fallback() {
        let auth = test_auth();
        seed_roles(&auth, &["CLIENT"]);
        let guard = RoleGuard::new(auth, "/dashboard");
        assert_eq!(
            guard.check(&roles(&["ADMIN"])).await,
            RouteDecision::Redirect("/dashboard".to_string())
        );
    }

    #[tokio::test]
    async fn technical_roles_do_not_satisfy_requirements() {
        let auth = test_auth();
        seed_roles(&auth, &["offline_access", "CLIENT"]);
        let guard = RoleGuard::new(auth, "/dashboard");
        assert_eq!(
            guard.check(&roles(&["offline_access"])).await,
            RouteDecision::Redirect("/dashboard".to_string())
        );
    }
}
