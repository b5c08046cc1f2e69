//! HTTP transport abstraction used by every identity-provider call
//!
//! Discovery, the device authorization engine, the session client and the
//! key-set verifier never talk to `reqwest` directly. They build an
//! [`HttpRequest`] and hand it to an [`HttpTransport`], so tests can swap in
//! the scripted [`crate::auth::fake::ScriptedTransport`].
//!
//! # Status handling
//!
//! [`HttpTransport::execute`] only fails for transport-level problems
//! (connection refused, timeout, unreadable body). Non-2xx statuses are
//! returned to the caller as a normal [`HttpResponse`]: the token endpoint
//! answers `authorization_pending` with HTTP 400 and the engine has to read
//! that body to keep polling.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{OidcError, Result};

/// HTTP method of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST` with an `application/x-www-form-urlencoded` body
    Post,
}

/// An outbound HTTP request.
///
/// # Examples
///
/// ```
/// use oidc_device::auth::transport::{HttpRequest, Method};
///
/// let req = HttpRequest::post_form(
///     "https://idp.example/token",
///     [("client_id", "demo-cli"), ("grant_type", "refresh_token")],
/// );
/// assert_eq!(req.method, Method::Post);
/// assert_eq!(req.form_value("client_id"), Some("demo-cli"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: String,
    /// Form fields, sent form-encoded for `POST`.
    pub form: Vec<(String, String)>,
    /// Bearer token attached as `Authorization: Bearer <token>`.
    pub bearer: Option<String>,
}

impl HttpRequest {
    /// Builds a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            form: Vec::new(),
            bearer: None,
        }
    }

    /// Builds a form-encoded `POST` request.
    pub fn post_form<K, V, I>(url: impl Into<String>, form: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            method: Method::Post,
            url: url.into(),
            form: form
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            bearer: None,
        }
    }

    /// Attaches a bearer token to the request.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Returns the first form value stored under `key`.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A response from the remote peer, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Builds a response from a status and a body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Parse`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(OidcError::from)
    }

    /// Body as lossy UTF-8, for error messages.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Abstraction over the HTTP client used to reach the identity provider and
/// the protected resource.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Executes a single request.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Network`] when the request could not be sent or
    /// the body could not be read. Non-2xx statuses are not errors.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpTransport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Network`] if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("oidc-device/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OidcError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).form(&request.form),
        };
        builder = builder.header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| OidcError::Network(format!("request to {} failed: {e}", request.url)))?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| {
            OidcError::Network(format!("failed to read response from {}: {e}", request.url))
        })?;

        tracing::trace!(url = %request.url, status, "HTTP exchange completed");
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_request_has_no_form() {
        let req = HttpRequest::get("https://idp.example/.well-known/openid-configuration");
        assert_eq!(req.method, Method::Get);
        assert!(req.form.is_empty());
        assert!(req.bearer.is_none());
    }

    #[test]
    fn test_post_form_preserves_field_order() {
        let req = HttpRequest::post_form("https://idp.example/device", [("a", "1"), ("b", "2")]);
        assert_eq!(
            req.form,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_with_bearer_sets_token() {
        let req = HttpRequest::get("https://api.example/headers").with_bearer("AT1");
        assert_eq!(req.bearer.as_deref(), Some("AT1"));
    }

    #[test]
    fn test_form_value_missing_key() {
        let req = HttpRequest::post_form("https://idp.example/token", [("a", "1")]);
        assert_eq!(req.form_value("b"), None);
    }

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(400, "").is_success());
        assert!(!HttpResponse::new(302, "").is_success());
    }

    #[test]
    fn test_response_json_parse_failure_is_parse_error() {
        let resp = HttpResponse::new(200, "<html>");
        let result = resp.json::<serde_json::Value>();
        assert!(matches!(result, Err(OidcError::Parse(_))));
    }

    #[tokio::test]
    async fn test_reqwest_transport_connection_refused_is_network_error() {
        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        // Port 9 (discard) on localhost is almost never listening.
        let result = transport
            .execute(HttpRequest::get("http://127.0.0.1:9/unreachable"))
            .await;
        assert!(matches!(result, Err(OidcError::Network(_))));
    }
}
