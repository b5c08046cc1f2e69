//! OpenID Connect discovery
//!
//! Fetches `<issuer>/.well-known/openid-configuration` and parses it into a
//! typed [`ProviderMetadata`]. The metadata is immutable once fetched;
//! callers decide whether to refetch it per operation or keep it for the
//! lifetime of the process.
//!
//! # References
//!
//! - OpenID Connect Discovery 1.0 <https://openid.net/specs/openid-connect-discovery-1_0.html>
//! - RFC 8628 section 4 (`device_authorization_endpoint`)

use serde::{Deserialize, Serialize};

use crate::auth::transport::{HttpRequest, HttpTransport};
use crate::error::{OidcError, Result};

/// Path appended to the issuer to locate the discovery document.
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Endpoint set advertised by an OpenID Connect provider.
///
/// # Examples
///
/// ```
/// use oidc_device::auth::discovery::ProviderMetadata;
///
/// let json = r#"{
///     "authorization_endpoint": "https://idp.example/realm/auth",
///     "token_endpoint": "https://idp.example/realm/token",
///     "jwks_uri": "https://idp.example/realm/certs",
///     "device_authorization_endpoint": "https://idp.example/realm/auth/device",
///     "end_session_endpoint": "https://idp.example/realm/logout"
/// }"#;
///
/// let meta = ProviderMetadata::from_json(json.as_bytes()).unwrap();
/// assert_eq!(meta.token_endpoint, "https://idp.example/realm/token");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier, when the provider advertises one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Authorization endpoint (RFC 6749 section 3.1).
    pub authorization_endpoint: String,

    /// Token endpoint (RFC 6749 section 3.2).
    pub token_endpoint: String,

    /// URL of the provider's JSON Web Key Set.
    pub jwks_uri: String,

    /// Device authorization endpoint (RFC 8628 section 3.1).
    pub device_authorization_endpoint: String,

    /// RP-initiated logout endpoint. Some providers do not offer one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
}

impl ProviderMetadata {
    /// Parses and validates a discovery document.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Parse`] if the body is not JSON, or if any
    /// required endpoint is missing or empty.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let mut meta: ProviderMetadata = serde_json::from_slice(body)
            .map_err(|e| OidcError::Parse(format!("invalid discovery document: {e}")))?;

        let required = [
            ("authorization_endpoint", &meta.authorization_endpoint),
            ("token_endpoint", &meta.token_endpoint),
            ("jwks_uri", &meta.jwks_uri),
            (
                "device_authorization_endpoint",
                &meta.device_authorization_endpoint,
            ),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(OidcError::Parse(format!(
                    "discovery document has an empty {name}"
                )));
            }
        }

        if meta
            .end_session_endpoint
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            meta.end_session_endpoint = None;
        }

        Ok(meta)
    }
}

/// Builds the discovery URL for an issuer, tolerating a trailing slash.
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), WELL_KNOWN_PATH)
}

/// Fetches and parses the provider's discovery document.
///
/// # Errors
///
/// Returns [`OidcError::Network`] on transport failure or a non-2xx status,
/// and [`OidcError::Parse`] on a malformed or incomplete document.
pub async fn discover(transport: &dyn HttpTransport, issuer: &str) -> Result<ProviderMetadata> {
    let url = discovery_url(issuer);
    tracing::debug!(url = %url, "Fetching OpenID provider metadata");

    let resp = transport.execute(HttpRequest::get(&url)).await?;
    if !resp.is_success() {
        return Err(OidcError::Network(format!(
            "discovery endpoint {url} returned HTTP {}",
            resp.status
        )));
    }

    ProviderMetadata::from_json(&resp.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::fake::ScriptedTransport;

    fn full_document() -> serde_json::Value {
        serde_json::json!({
            "issuer": "https://idp.example/realm",
            "authorization_endpoint": "https://idp.example/realm/auth",
            "token_endpoint": "https://idp.example/realm/token",
            "jwks_uri": "https://idp.example/realm/certs",
            "device_authorization_endpoint": "https://idp.example/realm/auth/device",
            "end_session_endpoint": "https://idp.example/realm/logout",
            "grant_types_supported": ["urn:ietf:params:oauth:grant-type:device_code"]
        })
    }

    #[test]
    fn test_discovery_url_appends_well_known() {
        assert_eq!(
            discovery_url("https://idp.example/realm"),
            "https://idp.example/realm/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_discovery_url_strips_trailing_slash() {
        assert_eq!(
            discovery_url("https://idp.example/realm/"),
            "https://idp.example/realm/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_from_json_parses_all_endpoints() {
        let meta = ProviderMetadata::from_json(full_document().to_string().as_bytes()).unwrap();
        assert_eq!(meta.issuer.as_deref(), Some("https://idp.example/realm"));
        assert_eq!(meta.jwks_uri, "https://idp.example/realm/certs");
        assert_eq!(
            meta.device_authorization_endpoint,
            "https://idp.example/realm/auth/device"
        );
        assert_eq!(
            meta.end_session_endpoint.as_deref(),
            Some("https://idp.example/realm/logout")
        );
    }

    #[test]
    fn test_from_json_missing_required_field_is_parse_failure() {
        let mut doc = full_document();
        doc.as_object_mut().unwrap().remove("token_endpoint");
        let result = ProviderMetadata::from_json(doc.to_string().as_bytes());
        assert!(matches!(result, Err(OidcError::Parse(_))));
    }

    #[test]
    fn test_from_json_empty_required_field_is_parse_failure() {
        let mut doc = full_document();
        doc["device_authorization_endpoint"] = serde_json::json!("");
        let result = ProviderMetadata::from_json(doc.to_string().as_bytes());
        assert!(matches!(result, Err(OidcError::Parse(m)) if m.contains("device_authorization_endpoint")));
    }

    #[test]
    fn test_from_json_end_session_is_optional() {
        let mut doc = full_document();
        doc.as_object_mut().unwrap().remove("end_session_endpoint");
        let meta = ProviderMetadata::from_json(doc.to_string().as_bytes()).unwrap();
        assert!(meta.end_session_endpoint.is_none());
    }

    #[test]
    fn test_from_json_empty_end_session_becomes_none() {
        let mut doc = full_document();
        doc["end_session_endpoint"] = serde_json::json!("");
        let meta = ProviderMetadata::from_json(doc.to_string().as_bytes()).unwrap();
        assert!(meta.end_session_endpoint.is_none());
    }

    #[tokio::test]
    async fn test_discover_non_success_status_is_network_failure() {
        let t = ScriptedTransport::new();
        t.push_json(
            discovery_url("https://idp.example/realm"),
            404,
            serde_json::json!({}),
        );
        let result = discover(&t, "https://idp.example/realm").await;
        assert!(matches!(result, Err(OidcError::Network(_))));
    }

    #[tokio::test]
    async fn test_discover_html_body_is_parse_failure() {
        let t = ScriptedTransport::new();
        t.push(
            discovery_url("https://idp.example/realm"),
            crate::auth::transport::HttpResponse::new(200, "<html></html>"),
        );
        let result = discover(&t, "https://idp.example/realm").await;
        assert!(matches!(result, Err(OidcError::Parse(_))));
    }
}
