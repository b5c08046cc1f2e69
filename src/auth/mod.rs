//! OpenID Connect device authorization and token verification
//!
//! Everything that talks to the identity provider lives here. Components only
//! reach the network through [`transport::HttpTransport`], so each one can be
//! exercised against the scripted [`fake::ScriptedTransport`].
//!
//! # Module Layout
//!
//! - [`transport`]   -- HTTP request/response types and the transport trait
//! - [`fake`]        -- Scripted in-memory transport for tests
//! - [`discovery`]   -- OpenID Connect discovery document
//! - [`device_flow`] -- RFC 8628 code request, poll loop and end-session
//! - [`token_store`] -- Persisted token record (file, keyring, memory)
//! - [`session`]     -- Refresh-on-demand session client and logout
//! - [`verifier`]    -- JWKS signing key set and JWT verification

pub mod device_flow;
pub mod discovery;
pub mod fake;
pub mod session;
pub mod token_store;
pub mod transport;
pub mod verifier;
