//! Outbound request descriptors and authorization scope rules.
//!
//! A request is described explicitly (method, URL, body, retried flag)
//! instead of mutating a client builder in place, so the 401-retry path can
//! clone it with the flag set and nothing else changed.

use reqwest::{Method, Url};
use serde_json::Value;

/// Path prefix identifying this system's own backend on relative URLs.
const API_PREFIX: &str = "/api";

/// Endpoints reachable without a session. They match the API prefix but are
/// exempt from authorization handling: no bearer header, no 401 retry.
const AUTH_EXEMPT_PATHS: [&str; 1] = ["/api/users/register"];

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Relative path (`/api/...`) or absolute URL.
    pub url: String,
    pub body: Option<Value>,
    /// Set on the single retry after a forced refresh, so a second 401 is
    /// not retried again.
    pub retried: bool,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
            retried: false,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
            retried: false,
        }
    }

    /// The same request, marked as already retried.
    pub(crate) fn into_retry(mut self) -> Self {
        self.retried = true;
        self
    }
}

/// Whether a URL targets this system's own backend: a relative path under
/// the API prefix, or an absolute URL sharing the backend's origin.
pub fn is_api_request(url: &str, backend_base_url: &str) -> bool {
    if is_absolute(url) {
        match (Url::parse(url), Url::parse(backend_base_url)) {
            (Ok(request), Ok(backend)) => request.origin() == backend.origin(),
            _ => false,
        }
    } else {
        url.starts_with(API_PREFIX) || url.starts_with("api/")
    }
}

/// Whether a URL is one of the unauthenticated endpoints.
pub fn is_auth_exempt(url: &str) -> bool {
    let path = request_path(url);
    AUTH_EXEMPT_PATHS.iter().any(|exempt| path == *exempt)
}

fn is_absolute(url: &str) -> bool {
    let head = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    head.starts_with("http://") || head.starts_with("https://")
}

/// Path component of a URL, query and fragment stripped, leading slash
/// normalized.
fn request_path(url: &str) -> String {
    if is_absolute(url) {
        return Url::parse(url)
            .map(|parsed| parsed.path().to_string())
            .unwrap_or_default();
    }

    let path = url.split(['?', '#']).next().unwrap_or(url);
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
