//! Configuration management for oidc-device
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! Precedence, lowest first: built-in defaults, YAML file, `OIDC_DEVICE_*`
//! environment variables, command-line flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::session::SessionConfig;
use crate::auth::token_store::{FileTokenStore, KeyringTokenStore, TokenStore};
use crate::auth::verifier::ValidationPolicy;
use crate::cli::{Cli, Commands};
use crate::error::{OidcError, Result};

/// Main configuration structure for oidc-device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Identity provider and client identity
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Settings used by the client commands
    #[serde(default)]
    pub client: ClientConfig,
    /// Settings used by the resource server
    #[serde(default)]
    pub server: ServerConfig,
}

/// Identity provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Issuer base URL; discovery is fetched from below it
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// OAuth client id registered at the provider
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Scopes requested at login
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_issuer() -> String {
    "http://localhost:8080/realms/demo".to_string()
}

fn default_client_id() -> String {
    "demo-cli".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string()]
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            client_id: default_client_id(),
            scopes: default_scopes(),
        }
    }
}

/// Where the token record is kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    /// JSON file (see [`ClientConfig::token_path`])
    #[default]
    File,
    /// OS keyring
    Keyring,
}

impl FromStr for TokenStoreKind {
    type Err = OidcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            other => Err(OidcError::Config(format!(
                "Invalid token store: {other}. Must be one of: file, keyring"
            ))),
        }
    }
}

/// Client-side configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the protected resource
    #[serde(default = "default_resource_url")]
    pub resource_url: String,

    /// Token store backend
    #[serde(default)]
    pub token_store: TokenStoreKind,

    /// Token file; defaults to the platform config directory
    #[serde(default)]
    pub token_path: Option<PathBuf>,

    /// Timeout for every HTTP request
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
}

fn default_resource_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resource_url: default_resource_url(),
            token_store: TokenStoreKind::default(),
            token_path: None,
            http_timeout_seconds: default_http_timeout_seconds(),
        }
    }
}

/// Resource server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// How long a fetched key set is used; 0 never refetches
    #[serde(default = "default_jwks_cache_ttl_seconds")]
    pub jwks_cache_ttl_seconds: u64,

    /// Required `aud` claim
    #[serde(default)]
    pub audience: Option<String>,

    /// Tolerated clock skew on `exp`/`nbf`
    #[serde(default = "default_leeway_seconds")]
    pub leeway_seconds: u64,

    /// Prometheus exporter address (requires the `prometheus` feature)
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_jwks_cache_ttl_seconds() -> u64 {
    300
}

fn default_leeway_seconds() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            jwks_cache_ttl_seconds: default_jwks_cache_ttl_seconds(),
            audience: None,
            leeway_seconds: default_leeway_seconds(),
            metrics_addr: None,
        }
    }
}

impl ServerConfig {
    /// Parsed listen address.
    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            OidcError::Config(format!("Invalid listen_addr {}: {e}", self.listen_addr))
        })
    }

    /// Parsed metrics address, if configured.
    pub fn metrics_socket_addr(&self) -> Result<Option<SocketAddr>> {
        self.metrics_addr
            .as_deref()
            .map(|addr| {
                addr.parse()
                    .map_err(|e| OidcError::Config(format!("Invalid metrics_addr {addr}: {e}")))
            })
            .transpose()
    }

    /// Key-set cache lifetime.
    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_seconds)
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str, cli: &Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| OidcError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| OidcError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(issuer) = std::env::var("OIDC_DEVICE_ISSUER") {
            tracing::debug!(issuer = %issuer, "Env override: OIDC_DEVICE_ISSUER");
            self.provider.issuer = issuer;
        }

        if let Ok(client_id) = std::env::var("OIDC_DEVICE_CLIENT_ID") {
            self.provider.client_id = client_id;
        }

        if let Ok(scopes) = std::env::var("OIDC_DEVICE_SCOPES") {
            let scopes: Vec<String> = scopes
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if scopes.is_empty() {
                tracing::warn!("Ignoring empty OIDC_DEVICE_SCOPES");
            } else {
                tracing::debug!(?scopes, "Env override: OIDC_DEVICE_SCOPES");
                self.provider.scopes = scopes;
            }
        }

        if let Ok(resource_url) = std::env::var("OIDC_DEVICE_RESOURCE_URL") {
            self.client.resource_url = resource_url;
        }

        if let Ok(token_path) = std::env::var("OIDC_DEVICE_TOKEN_PATH") {
            self.client.token_path = Some(PathBuf::from(token_path));
        }

        if let Ok(store) = std::env::var("OIDC_DEVICE_TOKEN_STORE") {
            match store.parse() {
                Ok(kind) => self.client.token_store = kind,
                Err(_) => tracing::warn!("Invalid OIDC_DEVICE_TOKEN_STORE: {}", store),
            }
        }

        if let Ok(listen_addr) = std::env::var("OIDC_DEVICE_LISTEN_ADDR") {
            self.server.listen_addr = listen_addr;
        }

        if let Ok(audience) = std::env::var("OIDC_DEVICE_AUDIENCE") {
            self.server.audience = Some(audience).filter(|a| !a.is_empty());
        }
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(issuer) = &cli.issuer {
            self.provider.issuer = issuer.clone();
        }
        if let Some(client_id) = &cli.client_id {
            self.provider.client_id = client_id.clone();
        }

        match &cli.command {
            Commands::Headers {
                resource: Some(resource),
            } => self.client.resource_url = resource.clone(),
            Commands::Serve {
                listen: Some(listen),
            } => self.server.listen_addr = listen.clone(),
            _ => {}
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        validate_http_url("provider.issuer", &self.provider.issuer)?;
        validate_http_url("client.resource_url", &self.client.resource_url)?;

        if self.provider.client_id.trim().is_empty() {
            return Err(OidcError::Config(
                "provider.client_id cannot be empty".to_string(),
            ));
        }

        if self.provider.scopes.is_empty() {
            return Err(OidcError::Config(
                "provider.scopes must contain at least one scope".to_string(),
            ));
        }

        if self.client.http_timeout_seconds == 0 {
            return Err(OidcError::Config(
                "client.http_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        self.server.listen_socket_addr()?;
        self.server.metrics_socket_addr()?;

        Ok(())
    }

    /// Timeout applied to every outbound HTTP request.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.client.http_timeout_seconds)
    }

    /// Effective token file path.
    pub fn token_path(&self) -> Result<PathBuf> {
        match &self.client.token_path {
            Some(path) => Ok(path.clone()),
            None => FileTokenStore::default_path(),
        }
    }

    /// Builds the configured token store.
    pub fn token_store(&self) -> Result<Arc<dyn TokenStore>> {
        Ok(match self.client.token_store {
            TokenStoreKind::File => Arc::new(FileTokenStore::new(self.token_path()?)),
            TokenStoreKind::Keyring => {
                Arc::new(KeyringTokenStore::new(self.provider.client_id.clone()))
            }
        })
    }

    /// Session settings for the client commands.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.provider.issuer.clone(), self.provider.client_id.clone())
    }

    /// Claim policy for the resource server.
    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            issuer: None,
            audience: self.server.audience.clone(),
            leeway: Duration::from_secs(self.server.leeway_seconds),
        }
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value)
        .map_err(|e| OidcError::Config(format!("{field} is not a valid URL ({value}): {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(OidcError::Config(format!(
            "{field} must use http or https, got {}",
            url.scheme()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.provider.issuer, "http://localhost:8080/realms/demo");
        assert_eq!(config.provider.client_id, "demo-cli");
        assert_eq!(config.provider.scopes, vec!["openid".to_string()]);
        assert_eq!(config.client.resource_url, "http://localhost:9090");
        assert_eq!(config.client.token_store, TokenStoreKind::File);
        assert_eq!(config.server.listen_addr, "0.0.0.0:9090");
        assert_eq!(config.server.jwks_cache_ttl_seconds, 300);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_issuer() {
        let mut config = Config::default();
        config.provider.issuer = "not a url".to_string();
        assert!(matches!(config.validate(), Err(OidcError::Config(_))));
    }

    #[test]
    fn test_config_validation_non_http_scheme() {
        let mut config = Config::default();
        config.client.resource_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_client_id() {
        let mut config = Config::default();
        config.provider.client_id = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_scopes() {
        let mut config = Config::default();
        config.provider.scopes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_listen_addr() {
        let mut config = Config::default();
        config.server.listen_addr = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
provider:
  issuer: https://idp.example/realm
client:
  token_store: keyring
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.provider.issuer, "https://idp.example/realm");
        assert_eq!(config.provider.client_id, "demo-cli");
        assert_eq!(config.client.token_store, TokenStoreKind::Keyring);
        assert_eq!(config.server.leeway_seconds, 60);
    }

    #[test]
    fn test_token_store_kind_from_str() {
        assert_eq!("FILE".parse::<TokenStoreKind>().unwrap(), TokenStoreKind::File);
        assert!("vault".parse::<TokenStoreKind>().is_err());
    }

    #[test]
    fn test_cli_overrides_apply() {
        let cli = Cli {
            issuer: Some("https://idp.example/realm".to_string()),
            client_id: Some("other".to_string()),
            command: Commands::Headers {
                resource: Some("http://api.example".to_string()),
            },
            ..Cli::default()
        };
        let mut config = Config::default();
        config.apply_cli_overrides(&cli);
        assert_eq!(config.provider.issuer, "https://idp.example/realm");
        assert_eq!(config.provider.client_id, "other");
        assert_eq!(config.client.resource_url, "http://api.example");
    }

    #[test]
    #[serial]
    fn test_env_vars_override_file_values() {
        std::env::set_var("OIDC_DEVICE_ISSUER", "https://env.example/realm");
        std::env::set_var("OIDC_DEVICE_SCOPES", "openid, profile ,,");
        std::env::set_var("OIDC_DEVICE_TOKEN_STORE", "vault");

        let mut config = Config::default();
        config.apply_env_vars();

        std::env::remove_var("OIDC_DEVICE_ISSUER");
        std::env::remove_var("OIDC_DEVICE_SCOPES");
        std::env::remove_var("OIDC_DEVICE_TOKEN_STORE");

        assert_eq!(config.provider.issuer, "https://env.example/realm");
        assert_eq!(config.provider.scopes, vec!["openid", "profile"]);
        // Unknown store names are ignored.
        assert_eq!(config.client.token_store, TokenStoreKind::File);
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/oidc-device.yaml", &Cli::default()).unwrap();
        assert_eq!(config.provider.client_id, "demo-cli");
    }

    #[test]
    fn test_explicit_token_path_wins() {
        let mut config = Config::default();
        config.client.token_path = Some(PathBuf::from("/tmp/oidc-token.json"));
        assert_eq!(config.token_path().unwrap(), PathBuf::from("/tmp/oidc-token.json"));
    }

    #[test]
    fn test_validation_policy_from_server_config() {
        let mut config = Config::default();
        config.server.audience = Some("demo-api".to_string());
        config.server.leeway_seconds = 5;
        let policy = config.validation_policy();
        assert_eq!(policy.audience.as_deref(), Some("demo-api"));
        assert_eq!(policy.leeway, Duration::from_secs(5));
    }
}
