//! JWKS-based JWT verification
//!
//! [`SigningKeySet`] is the provider's published key set decoded into an
//! explicit map from key id to key material; looking a key up yields a typed
//! [`KeyLookup`], and a token whose `kid` is not in the map is invalid. There
//! is no fallback key.
//!
//! [`KeySetVerifier`] owns a cached key set fetched from the provider's
//! `jwks_uri` and refetches it once the cache TTL has elapsed. An invalid
//! token is `Ok(false)`; only a failed key-set fetch is an `Err`.
//!
//! [`extract_subject`] reads `preferred_username` out of a record's ID token
//! without checking its signature. Call it only on a token that has already
//! been verified.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, PublicKeyUse};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::auth::discovery::discover;
use crate::auth::token_store::TokenRecord;
use crate::auth::transport::{HttpRequest, HttpTransport};
use crate::error::{OidcError, Result};
use crate::metrics::record_verification;

/// Default lifetime of a fetched key set.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default clock skew tolerated on `exp` and `nbf`.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

/// Claim constraints applied on top of the signature check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Required `iss`, if any. When set, tokens without `iss` are rejected.
    pub issuer: Option<String>,
    /// Required `aud`, if any. When set, tokens without `aud` are rejected;
    /// when unset the claim is ignored.
    pub audience: Option<String>,
    /// Tolerated clock skew.
    pub leeway: Duration,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            leeway: DEFAULT_LEEWAY,
        }
    }
}

/// Claims of a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    /// Subject.
    #[serde(default)]
    pub sub: Option<String>,
    /// Human-readable user name.
    #[serde(default)]
    pub preferred_username: Option<String>,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

// ---------------------------------------------------------------------------
// SigningKeySet
// ---------------------------------------------------------------------------

/// One public key from the provider's key set.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithms: Vec<Algorithm>,
    key: DecodingKey,
}

impl SigningKey {
    /// Key identifier.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithms this key may verify, derived from its key type.
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    fn from_jwk(jwk: &Jwk) -> Option<Self> {
        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            return None;
        }
        let kid = jwk.common.key_id.clone().filter(|k| !k.is_empty())?;
        let algorithms = match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => vec![
                Algorithm::RS256,
                Algorithm::RS384,
                Algorithm::RS512,
                Algorithm::PS256,
                Algorithm::PS384,
                Algorithm::PS512,
            ],
            AlgorithmParameters::EllipticCurve(params) => match params.curve {
                EllipticCurve::P256 => vec![Algorithm::ES256],
                EllipticCurve::P384 => vec![Algorithm::ES384],
                _ => return None,
            },
            AlgorithmParameters::OctetKey(_) => {
                vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512]
            }
            AlgorithmParameters::OctetKeyPair(_) => vec![Algorithm::EdDSA],
        };
        let key = DecodingKey::from_jwk(jwk).ok()?;
        Some(Self {
            kid,
            algorithms,
            key,
        })
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

/// Outcome of looking a key id up in a [`SigningKeySet`].
#[derive(Debug, Clone, Copy)]
pub enum KeyLookup<'a> {
    /// The set holds a key with this id.
    Found(&'a SigningKey),
    /// No key with this id.
    NotFound,
}

#[derive(Deserialize)]
struct RawKeySet {
    keys: Vec<serde_json::Value>,
}

/// Signing keys indexed by key id.
#[derive(Debug, Clone, Default)]
pub struct SigningKeySet {
    keys: HashMap<String, SigningKey>,
}

impl SigningKeySet {
    /// Decodes a JWKS document.
    ///
    /// Each key is decoded on its own. Encryption keys, keys without a
    /// `kid` and keys of an unsupported type are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Parse`] if the document is not a JSON object
    /// with a `keys` array.
    pub fn from_jwks_json(body: &[u8]) -> Result<Self> {
        let raw: RawKeySet = serde_json::from_slice(body)
            .map_err(|e| OidcError::Parse(format!("invalid JWKS document: {e}")))?;

        let mut keys = HashMap::new();
        for value in raw.keys {
            let parsed = serde_json::from_value::<Jwk>(value)
                .ok()
                .and_then(|jwk| SigningKey::from_jwk(&jwk));
            match parsed {
                Some(key) => {
                    keys.insert(key.kid.clone(), key);
                }
                None => tracing::debug!("Skipping unusable JWKS entry"),
            }
        }

        tracing::debug!(keys = keys.len(), "Decoded signing key set");
        Ok(Self { keys })
    }

    /// Builds a set from already decoded keys.
    pub fn from_keys(keys: impl IntoIterator<Item = SigningKey>) -> Self {
        Self {
            keys: keys.into_iter().map(|k| (k.kid.clone(), k)).collect(),
        }
    }

    /// Builds a one-key set holding an HMAC secret.
    pub fn from_hmac_secret(kid: impl Into<String>, secret: &[u8]) -> Self {
        Self::from_keys([SigningKey {
            kid: kid.into(),
            algorithms: vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512],
            key: DecodingKey::from_secret(secret),
        }])
    }

    /// Looks a key up by id.
    pub fn lookup(&self, kid: &str) -> KeyLookup<'_> {
        match self.keys.get(kid) {
            Some(key) => KeyLookup::Found(key),
            None => KeyLookup::NotFound,
        }
    }

    /// Number of usable keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` when the set holds no usable key.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verifies `raw` against this set.
    ///
    /// Returns the token's claims when the signature matches the key named
    /// by its `kid`, `exp` is present and not past, `nbf` (if present) has
    /// been reached, and the policy's issuer and audience match. Returns
    /// `None` otherwise.
    pub fn verify(&self, raw: &str, policy: &ValidationPolicy) -> Option<VerifiedClaims> {
        let header = decode_header(raw)
            .map_err(|e| tracing::debug!("Rejecting token with unreadable header: {}", e))
            .ok()?;
        let Some(kid) = header.kid.as_deref() else {
            tracing::debug!("Rejecting token without kid");
            return None;
        };
        let key = match self.lookup(kid) {
            KeyLookup::Found(key) => key,
            KeyLookup::NotFound => {
                tracing::debug!(kid, "Rejecting token signed with unknown key");
                return None;
            }
        };
        if !key.algorithms.contains(&header.alg) {
            tracing::debug!(kid, alg = ?header.alg, "Rejecting token: algorithm does not match key type");
            return None;
        }

        let mut validation = Validation::new(header.alg);
        validation.leeway = policy.leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        let mut required = vec!["exp"];
        if policy.issuer.is_some() {
            required.push("iss");
        }
        if policy.audience.is_some() {
            required.push("aud");
        }
        validation.set_required_spec_claims(&required);
        if let Some(issuer) = &policy.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &policy.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        decode::<VerifiedClaims>(raw, &key.key, &validation)
            .map(|data| data.claims)
            .map_err(|e| tracing::debug!(kid, "Token failed validation: {}", e))
            .ok()
    }
}

// ---------------------------------------------------------------------------
// KeySetVerifier
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct KeySource {
    transport: Arc<dyn HttpTransport>,
    jwks_uri: String,
}

impl KeySource {
    async fn fetch(&self) -> Result<SigningKeySet> {
        tracing::debug!(url = %self.jwks_uri, "Fetching signing key set");
        let resp = self
            .transport
            .execute(HttpRequest::get(&self.jwks_uri))
            .await?;
        if !resp.is_success() {
            return Err(OidcError::Network(format!(
                "key set endpoint {} returned HTTP {}",
                self.jwks_uri, resp.status
            )));
        }
        SigningKeySet::from_jwks_json(&resp.body)
    }
}

#[derive(Debug)]
struct CachedKeys {
    keys: Arc<SigningKeySet>,
    fetched_at: Instant,
}

/// Verifier holding a cached, periodically refetched key set.
#[derive(Debug)]
pub struct KeySetVerifier {
    source: Option<KeySource>,
    policy: ValidationPolicy,
    cache_ttl: Option<Duration>,
    cache: RwLock<CachedKeys>,
}

impl KeySetVerifier {
    /// Fetches the key set at `jwks_uri`.
    ///
    /// # Errors
    ///
    /// [`OidcError::Network`] if the fetch fails or returns a non-2xx
    /// status, [`OidcError::Parse`] if the document is malformed.
    pub async fn resolve(
        transport: Arc<dyn HttpTransport>,
        jwks_uri: impl Into<String>,
    ) -> Result<Self> {
        let source = KeySource {
            transport,
            jwks_uri: jwks_uri.into(),
        };
        let keys = source.fetch().await?;
        Ok(Self {
            source: Some(source),
            policy: ValidationPolicy::default(),
            cache_ttl: Some(DEFAULT_CACHE_TTL),
            cache: RwLock::new(CachedKeys {
                keys: Arc::new(keys),
                fetched_at: Instant::now(),
            }),
        })
    }

    /// Discovers the issuer's `jwks_uri`, then resolves it.
    pub async fn for_issuer(transport: Arc<dyn HttpTransport>, issuer: &str) -> Result<Self> {
        let metadata = discover(transport.as_ref(), issuer).await?;
        Self::resolve(transport, metadata.jwks_uri).await
    }

    /// Verifier over a fixed key set that is never refetched.
    pub fn from_key_set(keys: SigningKeySet) -> Self {
        Self {
            source: None,
            policy: ValidationPolicy::default(),
            cache_ttl: None,
            cache: RwLock::new(CachedKeys {
                keys: Arc::new(keys),
                fetched_at: Instant::now(),
            }),
        }
    }

    /// Replaces the claim policy.
    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets how long a fetched key set is used. Zero disables refetching.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    /// Claim policy in effect.
    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Refetches the key set now.
    ///
    /// A failed fetch leaves the cached set untouched.
    pub async fn refresh(&self) -> Result<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        let keys = source.fetch().await?;
        let mut cache = self.cache.write().await;
        cache.keys = Arc::new(keys);
        cache.fetched_at = Instant::now();
        Ok(())
    }

    /// Current key set, refetched first if stale.
    pub async fn key_set(&self) -> Result<Arc<SigningKeySet>> {
        {
            let cache = self.cache.read().await;
            let fresh = match self.cache_ttl {
                Some(ttl) => cache.fetched_at.elapsed() < ttl,
                None => true,
            };
            if fresh || self.source.is_none() {
                return Ok(cache.keys.clone());
            }
        }
        self.refresh().await?;
        Ok(self.cache.read().await.keys.clone())
    }

    /// Verifies `raw` and returns its claims when valid.
    ///
    /// # Errors
    ///
    /// Only when a stale key set cannot be refetched.
    pub async fn verify_claims(&self, raw: &str) -> Result<Option<VerifiedClaims>> {
        let keys = match self.key_set().await {
            Ok(keys) => keys,
            Err(e) => {
                record_verification(None);
                tracing::warn!("Key set refresh failed: {}", e);
                return Err(e);
            }
        };
        let claims = keys.verify(raw, &self.policy);
        record_verification(Some(claims.is_some()));
        Ok(claims)
    }

    /// Verifies `raw`.
    ///
    /// # Errors
    ///
    /// Only when a stale key set cannot be refetched; an invalid token is
    /// `Ok(false)`.
    pub async fn verify(&self, raw: &str) -> Result<bool> {
        Ok(self.verify_claims(raw).await?.is_some())
    }
}

// ---------------------------------------------------------------------------
// Claim reading
// ---------------------------------------------------------------------------

/// Decodes the payload segment of a compact JWT without verifying it.
///
/// # Errors
///
/// [`OidcError::Parse`] if `raw` does not have three segments or the payload
/// is not base64url-encoded JSON.
pub fn decode_payload(raw: &str) -> Result<serde_json::Value> {
    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() != 3 {
        return Err(OidcError::Parse(format!(
            "JWT has {} segments, expected 3",
            segments.len()
        )));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| OidcError::Parse(format!("JWT payload is not base64url: {e}")))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| OidcError::Parse(format!("JWT payload is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(OidcError::Parse("JWT payload is not a JSON object".to_string()));
    }
    Ok(value)
}

/// Returns the `preferred_username` claim of `record`'s ID token, or `""`
/// when the claim is absent.
///
/// # Errors
///
/// [`OidcError::MissingIdToken`] when the record has no ID token and
/// [`OidcError::Parse`] when the ID token is malformed.
pub fn extract_subject(record: &TokenRecord) -> Result<String> {
    let id_token = record
        .id_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(OidcError::MissingIdToken)?;
    let claims = decode_payload(id_token)?;
    Ok(claims
        .get("preferred_username")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string())
}
