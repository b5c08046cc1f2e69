//! In-process scripted transport for unit and integration tests
//!
//! [`ScriptedTransport`] implements [`HttpTransport`] without any network
//! I/O. Tests queue responses per URL and afterwards inspect every request
//! the code under test issued, together with the (Tokio) instant at which it
//! was issued. Because no real sockets are involved it works under
//! `#[tokio::test(start_paused = true)]`, which makes the poll-interval
//! properties of the device flow checkable in virtual time.
//!
//! # Example
//!
//! ```
//! use oidc_device::auth::fake::ScriptedTransport;
//! use oidc_device::auth::transport::{HttpRequest, HttpTransport};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let transport = ScriptedTransport::new();
//! transport.push_json("https://idp.example/token", 400, serde_json::json!({"error": "authorization_pending"}));
//!
//! let resp = transport
//!     .execute(HttpRequest::post_form("https://idp.example/token", [("device_code", "abc")]))
//!     .await
//!     .unwrap();
//! assert_eq!(resp.status, 400);
//! assert_eq!(transport.requests_to("https://idp.example/token").len(), 1);
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::time::Instant;

use crate::auth::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::{OidcError, Result};

/// A scripted reply.
#[derive(Debug, Clone)]
enum Reply {
    Response(HttpResponse),
    NetworkFailure(String),
}

/// A request observed by the transport.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// The request as issued.
    pub request: HttpRequest,
    /// Tokio instant at which `execute` was called.
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<String, VecDeque<Reply>>,
    fallback: HashMap<String, Reply>,
    recorded: Vec<RecordedRequest>,
}

/// Scripted, in-memory [`HttpTransport`].
///
/// For every URL, queued replies are served first in FIFO order; once the
/// queue is empty the URL's fallback reply (if any) is served repeatedly.
/// A URL with neither fails with [`OidcError::Network`].
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    /// Creates a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a raw response for `url`.
    pub fn push(&self, url: impl Into<String>, response: HttpResponse) {
        self.with_script(|s| {
            s.queued
                .entry(url.into())
                .or_default()
                .push_back(Reply::Response(response))
        });
    }

    /// Queues a JSON response for `url`.
    pub fn push_json(&self, url: impl Into<String>, status: u16, body: serde_json::Value) {
        self.push(url, HttpResponse::new(status, body.to_string()));
    }

    /// Queues a transport-level failure for `url`.
    pub fn push_network_failure(&self, url: impl Into<String>, message: impl Into<String>) {
        self.with_script(|s| {
            s.queued
                .entry(url.into())
                .or_default()
                .push_back(Reply::NetworkFailure(message.into()))
        });
    }

    /// Sets the reply served for `url` once its queue is exhausted.
    pub fn set_fallback_json(&self, url: impl Into<String>, status: u16, body: serde_json::Value) {
        self.with_script(|s| {
            s.fallback.insert(
                url.into(),
                Reply::Response(HttpResponse::new(status, body.to_string())),
            )
        });
    }

    /// Every request issued so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.with_script(|s| s.recorded.clone())
    }

    /// Requests issued to `url`, in order.
    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.with_script(|s| {
            s.recorded
                .iter()
                .filter(|r| r.request.url == url)
                .cloned()
                .collect()
        })
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        // A poisoned lock only means another test thread panicked mid-update;
        // the script itself is still usable.
        let mut guard = match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait::async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let reply = self.with_script(|s| {
            s.recorded.push(RecordedRequest {
                request: request.clone(),
                at: Instant::now(),
            });
            s.queued
                .get_mut(&request.url)
                .and_then(VecDeque::pop_front)
                .or_else(|| s.fallback.get(&request.url).cloned())
        });

        match reply {
            Some(Reply::Response(resp)) => Ok(resp),
            Some(Reply::NetworkFailure(msg)) => Err(OidcError::Network(msg)),
            None => Err(OidcError::Network(format!(
                "no scripted response for {}",
                request.url
            ))),
        }
    }
}
