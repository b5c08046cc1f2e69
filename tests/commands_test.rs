//! Command handler integration tests using wiremock
//!
//! Runs the handlers in `src/commands/mod.rs` against a mocked provider and
//! resource server, capturing what they print:
//!
//! - `login` prints the verification instructions, verifies the ID token
//!   and saves the record
//! - `headers` prints the resource response
//! - `logout` and `status` report the session state

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oidc_device::auth::token_store::{FileTokenStore, TokenStore};
use oidc_device::auth::transport::{HttpTransport, ReqwestTransport};
use oidc_device::commands;
use oidc_device::{Config, LogoutOutcome, TokenRecord};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn transport() -> Arc<dyn HttpTransport> {
    Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap())
}

fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.provider.issuer = server.uri();
    config.provider.client_id = "demo-cli".to_string();
    config.client.resource_url = server.uri();
    config
}

fn id_token(server: &MockServer, audience: &str) -> String {
    common::sign_hs256(
        common::HMAC_KID,
        &json!({
            "sub": "f3b1c0de",
            "preferred_username": "alice",
            "iss": server.uri(),
            "aud": audience,
            "exp": common::now() + 300
        }),
    )
}

/// Mounts discovery, the key set, a device endpoint with a one-second
/// interval, and a token endpoint that succeeds on the first poll.
async fn mount_provider(server: &MockServer, id_token: Option<String>) {
    common::mount_discovery(server).await;

    Mock::given(method("GET"))
        .and(path("/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::hmac_jwks()))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/device"))
        .and(body_string_contains("client_id=demo-cli"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "DC1",
            "user_code": "WDJB-MJHT",
            "verification_uri": format!("{}/device", server.uri()),
            "verification_uri_complete": format!("{}/device?user_code=WDJB-MJHT", server.uri()),
            "expires_in": 30,
            "interval": 1
        })))
        .expect(1)
        .mount(server)
        .await;

    let mut tokens = json!({
        "access_token": "AT1",
        "refresh_token": "RT1",
        "token_type": "Bearer",
        "expires_in": 300
    });
    if let Some(id_token) = id_token {
        tokens["id_token"] = json!(id_token);
    }
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("device_code=DC1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens))
        .mount(server)
        .await;
}

fn signed_in_store(dir: &TempDir, expires_in: i64) -> Arc<FileTokenStore> {
    let store = FileTokenStore::new(dir.path().join("token.json"));
    store
        .save(&TokenRecord {
            access_token: "AT1".to_string(),
            refresh_token: Some("RT1".to_string()),
            id_token: Some(common::unverified_jwt(&json!({"preferred_username": "alice"}))),
            expiry: Some(Utc::now() + chrono::Duration::seconds(expires_in)),
        })
        .unwrap();
    Arc::new(store)
}

// ---------------------------------------------------------------------------
// login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_login_saves_verified_record() {
    let server = MockServer::start().await;
    mount_provider(&server, Some(id_token(&server, "demo-cli"))).await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));
    let mut out = Vec::new();

    let user = commands::login::run(
        &config_for(&server),
        transport(),
        store.clone(),
        &CancellationToken::new(),
        &mut out,
    )
    .await
    .unwrap();
    assert_eq!(user, "alice");

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains(&format!(
        "open {}/device in the browser and enter the code: WDJB-MJHT",
        server.uri()
    )));
    assert!(text.contains("user_code=WDJB-MJHT"));
    assert!(text.ends_with("Signed in: alice\n"));

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.access_token, "AT1");
    assert_eq!(saved.refresh_token.as_deref(), Some("RT1"));
    assert!(saved.has_id_token());
}

/// An ID token issued for another client must not be accepted.
#[tokio::test]
async fn test_login_rejects_id_token_for_other_audience() {
    let server = MockServer::start().await;
    mount_provider(&server, Some(id_token(&server, "someone-else"))).await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));

    let result = commands::login::run(
        &config_for(&server),
        transport(),
        store.clone(),
        &CancellationToken::new(),
        &mut Vec::new(),
    )
    .await;
    assert!(result.is_err());
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_login_without_id_token_signs_in_anonymously() {
    let server = MockServer::start().await;
    mount_provider(&server, None).await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));
    let mut out = Vec::new();

    let user = commands::login::run(
        &config_for(&server),
        transport(),
        store.clone(),
        &CancellationToken::new(),
        &mut out,
    )
    .await
    .unwrap();
    assert_eq!(user, "");
    assert!(store.load().unwrap().is_some());
}

#[tokio::test]
async fn test_login_cancelled_saves_nothing() {
    let server = MockServer::start().await;
    mount_provider(&server, None).await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = commands::login::run(
        &config_for(&server),
        transport(),
        store.clone(),
        &cancel,
        &mut Vec::new(),
    )
    .await;
    assert!(result.is_err());
    assert!(store.load().unwrap().is_none());
}

// ---------------------------------------------------------------------------
// headers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_headers_prints_resource_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/headers"))
        .and(header("authorization", "Bearer AT1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"authorization": "Bearer AT1"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut out = Vec::new();
    commands::headers::run(
        &config_for(&server),
        transport(),
        signed_in_store(&dir, 300),
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "{\"authorization\": \"Bearer AT1\"}\n"
    );
}

#[tokio::test]
async fn test_headers_unauthorized_response_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/headers"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let err = commands::headers::run(
        &config_for(&server),
        transport(),
        signed_in_store(&dir, 300),
        &mut Vec::new(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_headers_not_logged_in_fails() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));

    let err = commands::headers::run(&config_for(&server), transport(), store, &mut Vec::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Not logged in"));
}

// ---------------------------------------------------------------------------
// logout / status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_logout_reports_outcome() {
    let server = MockServer::start().await;
    common::mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/logout"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = signed_in_store(&dir, 300);

    let mut out = Vec::new();
    let outcome = commands::logout::run(&config_for(&server), transport(), store.clone(), &mut out)
        .await
        .unwrap();
    assert_eq!(outcome, LogoutOutcome::SignedOut);
    assert_eq!(String::from_utf8(out).unwrap(), "logged out\n");

    let mut out = Vec::new();
    let outcome = commands::logout::run(&config_for(&server), transport(), store, &mut out)
        .await
        .unwrap();
    assert_eq!(outcome, LogoutOutcome::NotSignedIn);
    assert_eq!(String::from_utf8(out).unwrap(), "not logged in\n");
}

#[test]
fn test_status_reports_signed_in_user() {
    let dir = TempDir::new().unwrap();
    let store = signed_in_store(&dir, -5);

    let mut out = Vec::new();
    commands::status::run(&*store, &mut out).unwrap();

    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("Signed in: alice\n"));
    assert!(text.contains("(expired)"));
    assert!(text.contains("Refresh token: present"));
}
