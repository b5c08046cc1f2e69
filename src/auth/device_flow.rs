//! OAuth 2.0 Device Authorization Grant (RFC 8628)
//!
//! [`DeviceFlow`] drives one login attempt through the states of
//! [`FlowState`]:
//!
//! ```text
//! Init -> CodeRequested -> Polling -> { Succeeded | Denied | ExpiredCode
//!                                     | PollTimeout | Cancelled | Failed }
//! ```
//!
//! 1. [`DeviceFlow::request_code`] obtains a [`DeviceAuthorizationCode`]; the
//!    caller shows `user_code` and the verification URI to the user.
//! 2. [`DeviceFlow::exchange`] polls the token endpoint until the provider
//!    issues tokens, denies the request, the device code expires, the
//!    deadline passes or the caller cancels.
//!
//! Polling is an explicit loop over a [`PollSchedule`]: the deadline and the
//! interval are plain values, `slow_down` doubles the interval and nothing
//! ever lowers it again. Every wait races the cancellation token, the
//! deadline and the next tick, in that order of priority.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::auth::discovery::ProviderMetadata;
use crate::auth::token_store::TokenRecord;
use crate::auth::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::{OidcError, Result};
use crate::metrics::{record_poll, PollOutcome};

/// `grant_type` for device code token requests.
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Deadline used when the provider omits `expires_in`.
pub const DEFAULT_CODE_LIFETIME: Duration = Duration::from_secs(60);

/// Poll interval used when the provider omits `interval`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

// Upper bound for absurd `expires_in` values that would overflow an Instant.
const MAX_CODE_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Client identity used for the grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFlowConfig {
    /// OAuth client id.
    pub client_id: String,
    /// Requested scopes, sent space-joined.
    pub scopes: Vec<String>,
}

impl DeviceFlowConfig {
    /// Creates a config for `client_id` requesting `scopes`.
    pub fn new<S: Into<String>>(
        client_id: impl Into<String>,
        scopes: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }
}

/// Response of the device authorization endpoint.
///
/// Consumed entirely by [`DeviceFlow::exchange`]; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceAuthorizationCode {
    /// Opaque code the client polls with. Never shown or logged.
    pub device_code: String,
    /// Code the user types into the verification page.
    pub user_code: String,
    /// Verification page. Some providers call it `verification_url`.
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    /// Verification page with the user code pre-filled.
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Seconds until the device code is void.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Minimum seconds between polls.
    #[serde(default)]
    pub interval: Option<u64>,
}

impl DeviceAuthorizationCode {
    /// Parses and validates a device authorization response body.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Parse`] if the body is not JSON or a required
    /// field is missing or empty.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let code: DeviceAuthorizationCode = serde_json::from_slice(body).map_err(|e| {
            OidcError::Parse(format!("invalid device authorization response: {e}"))
        })?;

        for (name, value) in [
            ("device_code", &code.device_code),
            ("user_code", &code.user_code),
            ("verification_uri", &code.verification_uri),
        ] {
            if value.is_empty() {
                return Err(OidcError::Parse(format!(
                    "device authorization response has an empty {name}"
                )));
            }
        }
        Ok(code)
    }

    /// URI to show the user, preferring the pre-filled variant.
    pub fn display_uri(&self) -> &str {
        match self.verification_uri_complete.as_deref() {
            Some(uri) if !uri.is_empty() => uri,
            _ => &self.verification_uri,
        }
    }

    /// Lifetime of the device code; zero counts as omitted.
    pub fn lifetime(&self) -> Duration {
        match self.expires_in {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_CODE_LIFETIME,
        }
    }

    /// Initial poll interval; zero counts as omitted.
    pub fn poll_interval(&self) -> Duration {
        match self.interval {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_POLL_INTERVAL,
        }
    }
}

/// State of a [`DeviceFlow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No request sent yet.
    Init,
    /// Device code issued, not yet polling.
    CodeRequested,
    /// Poll loop running.
    Polling,
    /// Tokens issued.
    Succeeded,
    /// User denied the request (`access_denied`).
    Denied,
    /// Provider reported the device code as expired (`expired_token`).
    ExpiredCode,
    /// Deadline elapsed without resolution.
    PollTimeout,
    /// Caller cancelled the exchange.
    Cancelled,
    /// Transport, parse or other provider error.
    Failed,
}

impl FlowState {
    /// Returns `true` for states the flow can never leave.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Init | Self::CodeRequested | Self::Polling)
    }
}

/// Deadline and interval of one exchange.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use oidc_device::auth::device_flow::PollSchedule;
///
/// let mut schedule = PollSchedule::new(tokio::time::Instant::now(), Duration::from_secs(600), Duration::from_secs(5));
/// schedule.slow_down();
/// assert_eq!(schedule.interval(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    deadline: Instant,
    interval: Duration,
}

impl PollSchedule {
    /// Creates a schedule ending `lifetime` after `start`.
    pub fn new(start: Instant, lifetime: Duration, interval: Duration) -> Self {
        let deadline = start
            .checked_add(lifetime)
            .unwrap_or_else(|| start + MAX_CODE_LIFETIME);
        Self { deadline, interval }
    }

    /// Builds the schedule for `code`, starting at `start`.
    pub fn for_code(code: &DeviceAuthorizationCode, start: Instant) -> Self {
        Self::new(start, code.lifetime(), code.poll_interval())
    }

    /// Doubles the interval for all later polls.
    pub fn slow_down(&mut self) {
        self.interval = self.interval.saturating_mul(2);
    }

    /// Instant after which no poll is issued.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Current minimum gap between polls.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

// ---------------------------------------------------------------------------
// Token endpoint responses (shared with the refresh grant)
// ---------------------------------------------------------------------------

/// Body of a token endpoint response, success or error.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenEndpointResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenEndpointResponse {
    /// Builds a record, with expiry computed against `issued_at`.
    pub(crate) fn into_record(self, issued_at: DateTime<Utc>) -> Result<TokenRecord> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OidcError::Parse("token response has no access_token".to_string()))?;

        let expiry = match self.expires_in.filter(|secs| *secs > 0) {
            Some(secs) => Some(
                chrono::Duration::try_seconds(secs)
                    .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        OidcError::Parse(format!("token response expires_in {secs} is out of range"))
                    })?,
            ),
            None => None,
        };

        Ok(TokenRecord {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            id_token: self.id_token.filter(|t| !t.is_empty()),
            expiry,
        })
    }
}

/// Classified token endpoint reply.
#[derive(Debug)]
pub(crate) enum TokenReply {
    Issued(TokenEndpointResponse),
    Rejected {
        error: String,
        description: Option<String>,
    },
}

/// Reads a token endpoint response regardless of its status.
///
/// An OAuth `error` field wins over the status; a non-2xx without one is a
/// [`OidcError::Network`], a 2xx that is not JSON is a [`OidcError::Parse`].
pub(crate) fn classify_token_response(resp: &HttpResponse) -> Result<TokenReply> {
    match resp.json::<TokenEndpointResponse>() {
        Ok(body) if body.error.as_deref().is_some_and(|e| !e.is_empty()) => {
            Ok(TokenReply::Rejected {
                error: body.error.unwrap_or_default(),
                description: body.error_description,
            })
        }
        Ok(body) if resp.is_success() => Ok(TokenReply::Issued(body)),
        Err(OidcError::Parse(e)) if resp.is_success() => Err(OidcError::Parse(format!(
            "invalid token endpoint response: {e}"
        ))),
        _ => Err(OidcError::Network(format!(
            "token endpoint returned HTTP {}",
            resp.status
        ))),
    }
}

/// Maps a non-2xx response from a non-token endpoint to an error.
fn rejection(resp: &HttpResponse, endpoint: &str) -> OidcError {
    match classify_token_response(resp) {
        Ok(TokenReply::Rejected { error, description }) => OidcError::token_request(error, description),
        _ => OidcError::Network(format!("{endpoint} returned HTTP {}", resp.status)),
    }
}

// ---------------------------------------------------------------------------
// DeviceFlow
// ---------------------------------------------------------------------------

/// One device authorization attempt against a discovered provider.
#[derive(Debug)]
pub struct DeviceFlow {
    config: DeviceFlowConfig,
    metadata: ProviderMetadata,
    transport: Arc<dyn HttpTransport>,
    state: Mutex<FlowState>,
}

impl DeviceFlow {
    /// Creates a flow in [`FlowState::Init`].
    pub fn new(
        config: DeviceFlowConfig,
        metadata: ProviderMetadata,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            metadata,
            transport,
            state: Mutex::new(FlowState::Init),
        }
    }

    /// Current state.
    pub fn state(&self) -> FlowState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Provider metadata this flow was built with.
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    fn set_state(&self, next: FlowState) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracing::debug!(from = ?*guard, to = ?next, "Device flow state transition");
        *guard = next;
    }

    /// Requests a device code.
    ///
    /// # Errors
    ///
    /// - [`OidcError::Network`] on transport failure or a non-2xx status
    /// - [`OidcError::TokenRequest`] when the provider answers with an OAuth
    ///   error body (`invalid_client`, `invalid_scope`, ...)
    /// - [`OidcError::Parse`] when the body is not a valid code response
    pub async fn request_code(&self) -> Result<DeviceAuthorizationCode> {
        let endpoint = &self.metadata.device_authorization_endpoint;
        let request = HttpRequest::post_form(
            endpoint.as_str(),
            [
                ("client_id", self.config.client_id.clone()),
                ("scope", self.config.scopes.join(" ")),
            ],
        );

        let result = async {
            let resp = self.transport.execute(request).await?;
            if !resp.is_success() {
                return Err(rejection(&resp, "device authorization endpoint"));
            }
            DeviceAuthorizationCode::from_json(&resp.body)
        }
        .await;

        match result {
            Ok(code) => {
                tracing::debug!(
                    expires_in = ?code.expires_in,
                    interval = ?code.interval,
                    "Device code issued"
                );
                self.set_state(FlowState::CodeRequested);
                Ok(code)
            }
            Err(e) => {
                self.set_state(FlowState::Failed);
                Err(e)
            }
        }
    }

    /// Polls the token endpoint until the exchange resolves.
    ///
    /// The first poll happens one interval after the call. Once this returns
    /// no further request is issued.
    ///
    /// # Errors
    ///
    /// - [`OidcError::TokenRequest`] for `access_denied`, `expired_token`
    ///   and any other provider error
    /// - [`OidcError::PollTimeout`] when the deadline passes first
    /// - [`OidcError::Cancelled`] when `cancel` fires first
    /// - [`OidcError::Network`] / [`OidcError::Parse`] for a failed poll
    pub async fn exchange(
        &self,
        code: &DeviceAuthorizationCode,
        cancel: &CancellationToken,
    ) -> Result<TokenRecord> {
        self.set_state(FlowState::Polling);
        let result = self.poll_until_resolved(code, cancel).await;

        let end = match &result {
            Ok(_) => FlowState::Succeeded,
            Err(OidcError::PollTimeout) => FlowState::PollTimeout,
            Err(OidcError::Cancelled) => FlowState::Cancelled,
            Err(OidcError::TokenRequest { error, .. }) if error == "access_denied" => {
                FlowState::Denied
            }
            Err(OidcError::TokenRequest { error, .. }) if error == "expired_token" => {
                FlowState::ExpiredCode
            }
            Err(_) => FlowState::Failed,
        };
        self.set_state(end);
        result
    }

    async fn poll_until_resolved(
        &self,
        code: &DeviceAuthorizationCode,
        cancel: &CancellationToken,
    ) -> Result<TokenRecord> {
        let mut last_poll = Instant::now();
        let mut schedule = PollSchedule::for_code(code, last_poll);
        tracing::info!(
            interval_secs = schedule.interval().as_secs(),
            lifetime_secs = code.lifetime().as_secs(),
            "Waiting for device authorization"
        );

        loop {
            let next_poll = last_poll
                .checked_add(schedule.interval())
                .unwrap_or_else(|| schedule.deadline());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Device authorization cancelled");
                    return Err(OidcError::Cancelled);
                }
                _ = sleep_until(schedule.deadline()) => {
                    tracing::warn!("Device authorization timed out");
                    return Err(OidcError::PollTimeout);
                }
                _ = sleep_until(next_poll) => {}
            }

            last_poll = Instant::now();
            let request = HttpRequest::post_form(
                self.metadata.token_endpoint.as_str(),
                [
                    ("client_id", self.config.client_id.as_str()),
                    ("grant_type", DEVICE_CODE_GRANT_TYPE),
                    ("device_code", code.device_code.as_str()),
                ],
            );

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Device authorization cancelled");
                    return Err(OidcError::Cancelled);
                }
                r = self.transport.execute(request) => r,
            };

            let reply = response.and_then(|resp| classify_token_response(&resp));
            match reply {
                Ok(TokenReply::Issued(body)) => {
                    let record = body.into_record(Utc::now()).map_err(|e| {
                        record_poll(PollOutcome::Error);
                        e
                    })?;
                    record_poll(PollOutcome::Success);
                    tracing::info!(
                        has_refresh_token = record.refresh_token.is_some(),
                        has_id_token = record.has_id_token(),
                        "Device authorization completed"
                    );
                    return Ok(record);
                }
                Ok(TokenReply::Rejected { error, description }) => match error.as_str() {
                    "authorization_pending" => {
                        record_poll(PollOutcome::Pending);
                        tracing::trace!("authorization_pending");
                    }
                    "slow_down" => {
                        schedule.slow_down();
                        record_poll(PollOutcome::SlowDown);
                        tracing::debug!(
                            interval_secs = schedule.interval().as_secs(),
                            "slow_down received; increasing poll interval"
                        );
                    }
                    "access_denied" => {
                        record_poll(PollOutcome::Denied);
                        tracing::warn!("Device authorization denied");
                        return Err(OidcError::token_request(error, description));
                    }
                    "expired_token" => {
                        record_poll(PollOutcome::Expired);
                        tracing::warn!("Device code expired");
                        return Err(OidcError::token_request(error, description));
                    }
                    _ => {
                        record_poll(PollOutcome::Error);
                        tracing::warn!(error = %error, "Token endpoint rejected device code");
                        return Err(OidcError::token_request(error, description));
                    }
                },
                Err(e) => {
                    record_poll(PollOutcome::Error);
                    return Err(e);
                }
            }
        }
    }

    /// Revokes the provider session bound to `record`'s refresh token.
    ///
    /// A record without a refresh token has nothing to revoke. A provider
    /// that advertises no end-session endpoint only gets a local logout.
    ///
    /// # Errors
    ///
    /// [`OidcError::Network`] on transport failure or a non-2xx status, or
    /// [`OidcError::TokenRequest`] when the provider rejects the token.
    pub async fn end_session(&self, record: &TokenRecord) -> Result<()> {
        let Some(refresh_token) = record.refresh_token.as_deref() else {
            tracing::debug!("No refresh token; nothing to end at the provider");
            return Ok(());
        };
        let Some(endpoint) = self.metadata.end_session_endpoint.as_deref() else {
            tracing::warn!("Provider advertises no end_session_endpoint; logging out locally only");
            return Ok(());
        };

        let resp = self
            .transport
            .execute(HttpRequest::post_form(
                endpoint,
                [
                    ("client_id", self.config.client_id.as_str()),
                    ("refresh_token", refresh_token),
                ],
            ))
            .await?;
        if !resp.is_success() {
            return Err(rejection(&resp, "end-session endpoint"));
        }

        tracing::debug!("Provider session ended");
        Ok(())
    }
}
