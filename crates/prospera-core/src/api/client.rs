//! API client for the Prospera backend.
//!
//! Every outbound request flows through [`ApiClient::send`], which decides
//! whether the request targets our backend, attaches the bearer token when
//! one is valid, and retries exactly once after a forced refresh when the
//! backend answers 401. Requests outside the backend's scope, and the
//! exempt registration endpoint, pass through untouched.

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::AuthManager;
use crate::models::RegisterRequest;

use super::error::ApiError;
use super::request::{is_api_request, is_auth_exempt, ApiRequest};

/// Registration endpoint path. Matches the API prefix but never receives
/// authorization handling.
const REGISTER_PATH: &str = "/api/users/register";

/// API client for the backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection
/// pooling, and the auth manager is an Arc handle itself.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    auth: AuthManager,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, http: Client, auth: AuthManager) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            auth,
        }
    }

    /// Send a request with transparent authorization handling.
    ///
    /// In-scope requests get a bearer header when a valid token exists and
    /// are forwarded unmodified when none does (some endpoints are publicly
    /// readable). A 401 on an in-scope, not-yet-retried request forces an
    /// unconditional refresh and retries once; a failed refresh logs the
    /// caller out and propagates the authorization error.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let in_scope =
            is_api_request(&request.url, &self.base_url) && !is_auth_exempt(&request.url);

        let token = if in_scope {
            self.auth.valid_access_token().await
        } else {
            None
        };
        let response = self.execute(&request, token.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED && in_scope && !request.retried {
            debug!(url = %request.url, "request was rejected, forcing a token refresh");
            return match self.auth.force_refresh().await {
                Some(fresh_token) => {
                    let retry = request.into_retry();
                    let retry_response = self.execute(&retry, Some(&fresh_token)).await?;
                    Self::check(retry_response).await
                }
                None => {
                    warn!(url = %request.url, "token refresh after 401 failed, logging out");
                    self.auth.logout().await;
                    Err(ApiError::Unauthorized)
                }
            };
        }

        Self::check(response).await
    }

    /// GET an in-scope endpoint and parse the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::get(url)).await?;
        Ok(response.json().await?)
    }

    /// POST a JSON payload and parse the JSON response.
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|err| ApiError::InvalidRequest(err.to_string()))?;
        let response = self.send(ApiRequest::post(url, body)).await?;
        Ok(response.json().await?)
    }

    /// Create an account through the exempt registration endpoint.
    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        let body = serde_json::to_value(request)
            .map_err(|err| ApiError::InvalidRequest(err.to_string()))?;
        self.send(ApiRequest::post(REGISTER_PATH, body)).await?;
        Ok(())
    }

    async fn execute(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.resolve(&request.url));
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    /// Absolute URLs pass through; relative paths resolve against the
    /// backend base URL.
    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if url.starts_with('/') {
            format!("{base}{url}")
        } else {
            format!("{base}/{url}")
        }
    }

    async fn check(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}
