/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes one module per subcommand:

- `login`   -- Device authorization grant, ID token check, token save
- `logout`  -- End the provider session and delete the token
- `headers` -- Call the protected resource with the stored token
- `status`  -- Show the stored session
- `serve`   -- Run the resource server

Handlers that print take an explicit writer so tests can capture output.
*/

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::auth::transport::{HttpTransport, ReqwestTransport};
use crate::config::Config;

/// Builds the HTTP transport shared by all commands.
pub fn build_transport(config: &Config) -> Result<Arc<dyn HttpTransport>> {
    let transport = ReqwestTransport::new(config.http_timeout())?;
    Ok(Arc::new(transport))
}

/// Returns a token that is cancelled on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Ctrl-C received");
            child.cancel();
        }
    });
    token
}

/// Login command
///
/// Runs discovery, requests a device code, prints the verification
/// instructions and polls until the provider resolves the grant. The ID
/// token, when present, is verified against the provider's key set before
/// the record is saved.
pub mod login {
    use super::*;
    use crate::auth::device_flow::{DeviceFlow, DeviceFlowConfig};
    use crate::auth::discovery::discover;
    use crate::auth::token_store::TokenStore;
    use crate::auth::verifier::{extract_subject, KeySetVerifier, ValidationPolicy};

    /// Signs in and returns the signed-in user name (possibly empty).
    ///
    /// # Arguments
    ///
    /// * `config` - Loaded configuration
    /// * `transport` - HTTP transport to the provider
    /// * `store` - Where the resulting token record is saved
    /// * `cancel` - Aborts polling when cancelled
    /// * `out` - Receives the user-facing instructions
    pub async fn run<W: Write>(
        config: &Config,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
        cancel: &CancellationToken,
        out: &mut W,
    ) -> Result<String> {
        let metadata = discover(transport.as_ref(), &config.provider.issuer).await?;
        let flow = DeviceFlow::new(
            DeviceFlowConfig::new(
                config.provider.client_id.as_str(),
                config.provider.scopes.iter().map(String::as_str),
            ),
            metadata.clone(),
            transport.clone(),
        );

        let code = flow.request_code().await?;
        writeln!(
            out,
            "To sign in, open {} in the browser and enter the code: {}",
            code.verification_uri, code.user_code
        )?;
        if let Some(complete) = code
            .verification_uri_complete
            .as_deref()
            .filter(|uri| !uri.is_empty())
        {
            writeln!(out, "Or open {} to skip typing the code", complete)?;
        }
        out.flush()?;

        let record = flow.exchange(&code, cancel).await?;

        let user = if record.has_id_token() {
            let verifier = KeySetVerifier::resolve(transport.clone(), metadata.jwks_uri.clone())
                .await?
                .with_policy(ValidationPolicy {
                    issuer: metadata.issuer.clone(),
                    audience: Some(config.provider.client_id.clone()),
                    ..ValidationPolicy::default()
                });
            let id_token = record.id_token.as_deref().unwrap_or_default();
            if !verifier.verify(id_token).await? {
                anyhow::bail!("ID token failed verification against the provider key set");
            }
            extract_subject(&record)?
        } else {
            tracing::warn!("Provider issued no ID token; request the openid scope to get one");
            String::new()
        };

        store.save(&record).context("Failed to save token")?;
        writeln!(out, "Signed in: {}", user)?;
        Ok(user)
    }
}

/// Logout command
pub mod logout {
    use super::*;
    use crate::auth::session::{LogoutOutcome, SessionTerminator};
    use crate::auth::token_store::TokenStore;

    /// Ends the session and prints the outcome.
    pub async fn run<W: Write>(
        config: &Config,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
        out: &mut W,
    ) -> Result<LogoutOutcome> {
        let terminator = SessionTerminator::new(
            config.provider.issuer.as_str(),
            config.provider.client_id.as_str(),
            transport,
            store,
        );
        let outcome = terminator.logout().await?;
        match outcome {
            LogoutOutcome::SignedOut => writeln!(out, "logged out")?,
            LogoutOutcome::NotSignedIn => writeln!(out, "not logged in")?,
        }
        Ok(outcome)
    }
}

/// Headers command
///
/// Calls `<resource_url>/headers` with the stored (refreshed if needed)
/// access token and prints the response body.
pub mod headers {
    use super::*;
    use crate::auth::session::SessionClient;
    use crate::auth::token_store::TokenStore;

    /// URL of the headers route below `resource_url`.
    pub fn headers_url(resource_url: &str) -> String {
        format!("{}/headers", resource_url.trim_end_matches('/'))
    }

    /// Fetches the headers route and writes its body to `out`.
    pub async fn run<W: Write>(
        config: &Config,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
        out: &mut W,
    ) -> Result<()> {
        let session = SessionClient::new(config.session_config(), transport, store);
        let client = session.authenticated_client().await?;

        let url = headers_url(&config.client.resource_url);
        let resp = client.get(&url).await?;
        if !resp.is_success() {
            anyhow::bail!("{} returned HTTP {}", url, resp.status);
        }

        writeln!(out, "{}", resp.text())?;
        Ok(())
    }
}

/// Status command
pub mod status {
    use super::*;
    use crate::auth::token_store::TokenStore;
    use crate::auth::verifier::extract_subject;
    use crate::error::OidcError;

    /// Prints the stored session, or `not logged in`.
    pub fn run<W: Write>(store: &dyn TokenStore, out: &mut W) -> Result<()> {
        let Some(record) = store.load()? else {
            writeln!(out, "not logged in")?;
            return Ok(());
        };

        let user = match extract_subject(&record) {
            Ok(user) => user,
            Err(OidcError::MissingIdToken) => "(no ID token)".to_string(),
            Err(e) => return Err(e.into()),
        };
        writeln!(out, "Signed in: {}", user)?;

        match record.expiry {
            Some(expiry) => {
                let state = if record.is_expired_within(chrono::Duration::zero()) {
                    " (expired)"
                } else {
                    ""
                };
                writeln!(out, "Token expires: {}{}", expiry.to_rfc3339(), state)?;
            }
            None => writeln!(out, "Token expires: never")?,
        }
        writeln!(
            out,
            "Refresh token: {}",
            if record.refresh_token.is_some() { "present" } else { "absent" }
        )?;
        Ok(())
    }
}

/// Serve command
pub mod serve {
    use super::*;
    use crate::auth::verifier::KeySetVerifier;

    /// Resolves the provider key set and runs the resource server until Ctrl-C.
    pub async fn run(config: &Config, transport: Arc<dyn HttpTransport>) -> Result<()> {
        let addr = config.server.listen_socket_addr()?;
        crate::metrics::init_metrics_exporter(config.server.metrics_socket_addr()?);

        let verifier = KeySetVerifier::for_issuer(transport, &config.provider.issuer)
            .await
            .context("Failed to resolve the provider key set")?
            .with_policy(config.validation_policy())
            .with_cache_ttl(config.server.jwks_cache_ttl());

        crate::server::serve(addr, Arc::new(verifier)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token_store::{MemoryTokenStore, TokenRecord};

    #[test]
    fn test_headers_url_strips_trailing_slash() {
        assert_eq!(
            headers::headers_url("http://localhost:9090/"),
            "http://localhost:9090/headers"
        );
    }

    #[test]
    fn test_status_not_logged_in() {
        let store = MemoryTokenStore::new();
        let mut out = Vec::new();
        status::run(&store, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "not logged in\n");
    }

    #[test]
    fn test_status_without_id_token() {
        let store = MemoryTokenStore::with_record(TokenRecord::new("AT1"));
        let mut out = Vec::new();
        status::run(&store, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Signed in: (no ID token)"));
        assert!(text.contains("Token expires: never"));
        assert!(text.contains("Refresh token: absent"));
    }
}
