//! Error types for oidc-device
//!
//! This module defines the failure taxonomy shared by discovery, the device
//! authorization engine, the token stores, the session client and the key-set
//! verifier, using `thiserror` for ergonomic error handling.
//!
//! A token that simply fails verification is *not* an error: the verifier
//! reports it as `false`. Only operational failures surface here.

use thiserror::Error;

/// Main error type for oidc-device operations
#[derive(Error, Debug)]
pub enum OidcError {
    /// Transport-level failure: connection, timeout, body read, or a non-2xx
    /// status with no OAuth error body
    #[error("Network failure: {0}")]
    Network(String),

    /// Response body was not valid JSON or lacked a required field
    #[error("Parse failure: {0}")]
    Parse(String),

    /// The provider explicitly rejected the grant (`access_denied`,
    /// `expired_token`, `invalid_grant`, ...)
    #[error("Token request failed: {error}{}", describe(.description))]
    TokenRequest {
        /// OAuth `error` code returned by the provider
        error: String,
        /// Optional `error_description` returned by the provider
        description: Option<String>,
    },

    /// The device code lifetime elapsed before the user completed authorization
    #[error("Timed out waiting for device authorization")]
    PollTimeout,

    /// Polling was interrupted by a cancellation signal
    #[error("Device authorization was cancelled")]
    Cancelled,

    /// No usable local credential exists
    #[error("Not logged in")]
    NotLoggedIn,

    /// The operation required an ID token that the record does not carry
    #[error("Token record does not carry an ID token")]
    MissingIdToken,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token store errors other than plain I/O
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl OidcError {
    /// Builds a [`OidcError::TokenRequest`] from a provider error response.
    pub fn token_request(error: impl Into<String>, description: Option<String>) -> Self {
        Self::TokenRequest {
            error: error.into(),
            description,
        }
    }

    /// Stable short label for the error kind, printed in CLI failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Parse(_) => "parse",
            Self::TokenRequest { .. } => "token_request",
            Self::PollTimeout => "poll_timeout",
            Self::Cancelled => "cancelled",
            Self::NotLoggedIn => "not_logged_in",
            Self::MissingIdToken => "missing_id_token",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Io(_) => "io",
            Self::Keyring(_) => "keyring",
        }
    }
}

impl From<serde_json::Error> for OidcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

fn describe(description: &Option<String>) -> String {
    match description {
        Some(d) if !d.is_empty() => format!(" ({d})"),
        _ => String::new(),
    }
}

/// Result type alias for oidc-device operations
pub type Result<T> = std::result::Result<T, OidcError>;
