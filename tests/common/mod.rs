//! Shared helpers for integration tests

use std::fs;
use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// HMAC secret whose base64 form has no `+`, `/` or padding, so the standard
/// and url-safe alphabets decode it identically.
#[allow(dead_code)]
pub const HMAC_SECRET: &[u8] = b"integration-test-hmac-secret-abcd";

#[allow(dead_code)]
pub const HMAC_KID: &str = "hmac-1";

#[allow(dead_code)]
pub const RSA_KID: &str = "rsa-1";

const RSA_PRIVATE_PEM: &str = include_str!("../fixtures/rsa_private.pem");
const RSA_JWKS: &str = include_str!("../fixtures/jwks.json");

#[allow(dead_code)]
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// JWKS document holding the test HMAC key.
#[allow(dead_code)]
pub fn hmac_jwks() -> serde_json::Value {
    serde_json::json!({
        "keys": [{
            "kty": "oct",
            "kid": HMAC_KID,
            "use": "sig",
            "k": URL_SAFE_NO_PAD.encode(HMAC_SECRET)
        }]
    })
}

/// JWKS document holding the public half of `tests/fixtures/rsa_private.pem`.
#[allow(dead_code)]
pub fn rsa_jwks() -> serde_json::Value {
    serde_json::from_str(RSA_JWKS).expect("fixture jwks.json is valid JSON")
}

#[allow(dead_code)]
pub fn sign_hs256(kid: &str, claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &EncodingKey::from_secret(HMAC_SECRET)).expect("HS256 signing")
}

#[allow(dead_code)]
pub fn sign_rs256(kid: &str, claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(RSA_PRIVATE_PEM.as_bytes()).expect("fixture RSA key");
    encode(&header, claims, &key).expect("RS256 signing")
}

/// Unsigned-looking JWT whose payload carries `claims`; for claim-reading
/// tests that never verify the signature.
#[allow(dead_code)]
pub fn unverified_jwt(claims: &serde_json::Value) -> String {
    format!(
        "{}.{}.c2lnbmF0dXJl",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// Discovery document whose endpoints all live below `base`.
#[allow(dead_code)]
pub fn discovery_body(base: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": base,
        "authorization_endpoint": format!("{}/auth", base),
        "token_endpoint": format!("{}/token", base),
        "jwks_uri": format!("{}/certs", base),
        "device_authorization_endpoint": format!("{}/auth/device", base),
        "end_session_endpoint": format!("{}/logout", base)
    })
}

/// Mounts the discovery document on `server`.
#[allow(dead_code)]
pub async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_body(&server.uri())))
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
