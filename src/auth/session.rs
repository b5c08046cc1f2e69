//! Session client and session terminator
//!
//! [`SessionClient`] turns the stored [`TokenRecord`] into an
//! [`AuthenticatedClient`], refreshing the access token through the
//! refresh-token grant when it is expired or about to expire. The rotated
//! record is saved before the client is handed back.
//!
//! Refresh and save form one critical section per client: a `SessionClient`
//! and its clones share a `tokio::sync::Mutex` held from load to save, so
//! two concurrent callers never submit the same refresh token. Separately
//! constructed clients over the same store do not share the lock; build one
//! client and clone it.
//!
//! [`SessionTerminator`] ends the provider session and deletes the local
//! record.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use crate::auth::device_flow::{
    classify_token_response, DeviceFlow, DeviceFlowConfig, TokenReply,
};
use crate::auth::discovery::discover;
use crate::auth::token_store::{TokenRecord, TokenStore};
use crate::auth::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::{OidcError, Result};
use crate::metrics::record_refresh;

/// Default margin before expiry at which the access token is refreshed.
pub const DEFAULT_EXPIRY_SKEW_SECS: i64 = 10;

/// Identity of the client whose session is managed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Issuer base URL.
    pub issuer: String,
    /// OAuth client id.
    pub client_id: String,
    /// Tokens expiring within this margin are refreshed first.
    pub expiry_skew: Duration,
}

impl SessionConfig {
    /// Creates a config with the default expiry skew.
    pub fn new(issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            expiry_skew: Duration::seconds(DEFAULT_EXPIRY_SKEW_SECS),
        }
    }
}

/// Transport bound to a current access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    transport: Arc<dyn HttpTransport>,
    access_token: String,
}

impl AuthenticatedClient {
    /// Access token attached to every request.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Sends `GET url` with `Authorization: Bearer <access token>`.
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.transport
            .execute(HttpRequest::get(url).with_bearer(self.access_token.as_str()))
            .await
    }
}

/// Hands out authenticated clients, refreshing the stored record on demand.
#[derive(Debug, Clone)]
pub struct SessionClient {
    config: SessionConfig,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    refresh_lock: Arc<Mutex<()>>,
}

impl SessionClient {
    /// Creates a session client over `store`.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns a client bound to a valid access token.
    ///
    /// # Errors
    ///
    /// - [`OidcError::NotLoggedIn`] when no record (or an empty access
    ///   token) is stored
    /// - [`OidcError::TokenRequest`] when the refresh grant is rejected, or
    ///   the token expired and no refresh token is stored
    /// - [`OidcError::Network`] / [`OidcError::Parse`] from discovery or the
    ///   token endpoint
    pub async fn authenticated_client(&self) -> Result<AuthenticatedClient> {
        let _guard = self.refresh_lock.lock().await;

        let record = self
            .store
            .load()?
            .filter(|r| !r.access_token.is_empty())
            .ok_or(OidcError::NotLoggedIn)?;

        let record = if record.is_expired_within(self.config.expiry_skew) {
            let refreshed = self.refresh(&record).await;
            record_refresh(refreshed.is_ok());
            let refreshed = refreshed?;
            self.store.save(&refreshed)?;
            tracing::info!("Access token refreshed");
            refreshed
        } else {
            record
        };

        Ok(AuthenticatedClient {
            transport: self.transport.clone(),
            access_token: record.access_token,
        })
    }

    async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord> {
        let Some(refresh_token) = record.refresh_token.as_deref() else {
            return Err(OidcError::token_request(
                "token_expired",
                Some("access token expired and no refresh token is stored".to_string()),
            ));
        };

        let metadata = discover(self.transport.as_ref(), &self.config.issuer).await?;
        tracing::debug!(endpoint = %metadata.token_endpoint, "Refreshing access token");

        let resp = self
            .transport
            .execute(HttpRequest::post_form(
                metadata.token_endpoint.as_str(),
                [
                    ("client_id", self.config.client_id.as_str()),
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ],
            ))
            .await?;

        match classify_token_response(&resp)? {
            TokenReply::Issued(body) => {
                let mut rotated = body.into_record(Utc::now())?;
                if rotated.refresh_token.is_none() {
                    rotated.refresh_token = record.refresh_token.clone();
                } else if rotated.refresh_token != record.refresh_token {
                    tracing::debug!("Provider rotated the refresh token");
                }
                if rotated.id_token.is_none() {
                    rotated.id_token = record.id_token.clone();
                }
                Ok(rotated)
            }
            TokenReply::Rejected { error, description } => {
                tracing::warn!(error = %error, "Refresh token rejected");
                Err(OidcError::token_request(error, description))
            }
        }
    }
}

/// Result of [`SessionTerminator::logout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// A record existed; the provider session was ended and the record deleted.
    SignedOut,
    /// Nothing was stored.
    NotSignedIn,
}

/// Ends the provider session and deletes the local record.
#[derive(Debug, Clone)]
pub struct SessionTerminator {
    issuer: String,
    client_id: String,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
}

impl SessionTerminator {
    /// Creates a terminator for `client_id` at `issuer`.
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            transport,
            store,
        }
    }

    /// Logs out.
    ///
    /// A provider that rejects the refresh token (it is already revoked or
    /// expired) has no session left to end, so the local record is deleted
    /// anyway. A network failure keeps the record so the logout can be
    /// retried.
    pub async fn logout(&self) -> Result<LogoutOutcome> {
        let Some(record) = self.store.load()? else {
            return Ok(LogoutOutcome::NotSignedIn);
        };

        if record.refresh_token.is_some() {
            let metadata = discover(self.transport.as_ref(), &self.issuer).await?;
            let flow = DeviceFlow::new(
                DeviceFlowConfig::new(self.client_id.as_str(), Vec::<String>::new()),
                metadata,
                self.transport.clone(),
            );
            match flow.end_session(&record).await {
                Ok(()) => {}
                Err(OidcError::TokenRequest { error, .. }) => {
                    tracing::warn!(error = %error, "Provider rejected the refresh token; removing local session");
                }
                Err(e) => return Err(e),
            }
        }

        self.store.delete()?;
        tracing::info!("Local session removed");
        Ok(LogoutOutcome::SignedOut)
    }
}
