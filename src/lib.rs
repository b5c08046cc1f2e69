//! oidc-device - OpenID Connect device authorization client library
//!
//! This library lets a command-line client sign a user in through the OAuth
//! 2.0 Device Authorization Grant (RFC 8628), keep the resulting tokens
//! fresh, and call a protected resource with them. It also provides the
//! resource server side: bearer tokens are verified against the identity
//! provider's published JSON Web Key Set.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: discovery, device flow, token storage, session refresh and JWT
//!   verification
//! - `server`: axum resource server guarded by bearer verification
//! - `metrics`: counters for polls, refreshes and verifications
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//! - `commands`: handlers behind each CLI subcommand
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use oidc_device::auth::session::{SessionClient, SessionConfig};
//! use oidc_device::auth::token_store::FileTokenStore;
//! use oidc_device::auth::transport::ReqwestTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(ReqwestTransport::new(std::time::Duration::from_secs(30))?);
//!     let store = Arc::new(FileTokenStore::new(FileTokenStore::default_path()?));
//!     let session = SessionClient::new(
//!         SessionConfig::new("http://localhost:8080/realms/demo", "demo-cli"),
//!         transport,
//!         store,
//!     );
//!
//!     let client = session.authenticated_client().await?;
//!     let resp = client.get("http://localhost:9090/headers").await?;
//!     println!("{}", resp.text());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;

// Re-export commonly used types
pub use auth::session::{AuthenticatedClient, LogoutOutcome, SessionClient, SessionTerminator};
pub use auth::token_store::{TokenRecord, TokenStore};
pub use auth::verifier::{extract_subject, KeySetVerifier};
pub use config::Config;
pub use error::{OidcError, Result};
