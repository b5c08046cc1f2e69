//! Resource server protected by bearer-token verification
//!
//! Routes:
//!
//! - `GET /healthz` -- unauthenticated liveness probe
//! - `GET /headers` -- echoes the request headers as pretty-printed JSON;
//!   requires `Authorization: Bearer <token>` verified by a
//!   [`KeySetVerifier`]
//!
//! Every authentication failure is a bare `401` with an empty body, whether
//! the header was missing or malformed, the token was invalid, or the key set
//! could not be refreshed.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::auth::verifier::KeySetVerifier;
use crate::error::Result;

/// Builds the resource server router.
pub fn router(verifier: Arc<KeySetVerifier>) -> Router {
    let protected = Router::new()
        .route("/headers", get(echo_headers))
        .route_layer(middleware::from_fn_with_state(verifier, require_bearer));

    Router::new().route("/healthz", get(healthz)).merge(protected)
}

/// Serves [`router`] on `addr` until Ctrl-C.
pub async fn serve(addr: SocketAddr, verifier: Arc<KeySetVerifier>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Resource server listening");

    axum::serve(listener, router(verifier))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Resource server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively; anything other than exactly a
/// scheme and a token is rejected.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split_whitespace();
    let (scheme, token) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

async fn require_bearer(
    State(verifier): State<Arc<KeySetVerifier>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()).map(str::to_owned) else {
        tracing::debug!("Rejecting request without a bearer token");
        return unauthorized();
    };

    match verifier.verify(&token).await {
        Ok(true) => next.run(request).await,
        Ok(false) => unauthorized(),
        Err(e) => {
            tracing::warn!("Could not verify bearer token: {}", e);
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, "Bearer")]).into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn echo_headers(headers: HeaderMap) -> Response {
    let mut echoed: BTreeMap<String, String> = BTreeMap::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        echoed.insert(name.as_str().to_string(), joined);
    }

    match serde_json::to_string_pretty(&echoed) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to encode headers: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
