//! Persisted credential state
//!
//! A [`TokenRecord`] is the only credential state the client keeps: exactly
//! one per installation. It is created when the device flow completes,
//! overwritten on every refresh and deleted on logout.
//!
//! Storage is abstracted behind [`TokenStore`] so the session client and
//! the login command receive an explicit store object:
//!
//! - [`FileTokenStore`] -- JSON file, replaced atomically on save
//! - [`KeyringTokenStore`] -- OS native credential store
//! - [`MemoryTokenStore`] -- in-process, for tests and embedding
//!
//! "Not logged in" is a state, not a failure: `load` returns `Ok(None)`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{OidcError, Result};

// ---------------------------------------------------------------------------
// TokenRecord
// ---------------------------------------------------------------------------

/// Credentials obtained from the provider.
///
/// On disk the record is a JSON object with `access_token`,
/// `refresh_token`, `id_token` and `expiry` (Unix seconds).
///
/// # Examples
///
/// ```
/// use oidc_device::auth::token_store::TokenRecord;
///
/// let record = TokenRecord::new("AT1");
/// assert!(!record.has_id_token());
/// // A record without expiry never expires.
/// assert!(!record.is_expired_within(chrono::Duration::seconds(10)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer access token.
    pub access_token: String,

    /// Refresh token; absent when the provider does not support refresh.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub refresh_token: Option<String>,

    /// Compact-serialized ID token carrying identity claims.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub id_token: Option<String>,

    /// Absolute expiry of the access token, computed from the server's
    /// `expires_in` at issuance time.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expiry: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Creates a record holding only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            id_token: None,
            expiry: None,
        }
    }

    /// Returns `true` when an ID token is present and non-empty.
    pub fn has_id_token(&self) -> bool {
        self.id_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Returns `true` when the access token expires within `skew` from now.
    ///
    /// Records without expiry are treated as non-expiring.
    pub fn is_expired_within(&self, skew: Duration) -> bool {
        match self.expiry {
            None => false,
            Some(expiry) => Utc::now() + skew >= expiry,
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Load/save/delete lifecycle of the single persisted [`TokenRecord`].
///
/// Implementations assume a single client process; cross-process locking is
/// out of scope. In-process serialization of refresh+save is done by
/// [`crate::auth::session::SessionClient`].
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Returns the current record, or `None` when nothing is stored.
    fn load(&self) -> Result<Option<TokenRecord>>;

    /// Stores `record`, replacing any previous one.
    fn save(&self, record: &TokenRecord) -> Result<()>;

    /// Removes the record. Removing an absent record is not an error.
    fn delete(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// FileTokenStore
// ---------------------------------------------------------------------------

/// File name used under the platform configuration directory.
pub const TOKEN_FILE_NAME: &str = "token.json";

/// JSON file store.
///
/// Saves are written to a temporary file in the same directory, flushed to
/// disk, and renamed over the target, so a crash mid-write leaves either the
/// old or the new record. On Unix the file is only readable by its owner.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `<platform config dir>/oidc-device/token.json`.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Config`] when no home directory can be determined.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "oidc-device").ok_or_else(|| {
            OidcError::Config("could not determine a configuration directory".to_string())
        })?;
        Ok(dirs.config_dir().join(TOKEN_FILE_NAME))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<TokenRecord>> {
        let contents = match std::fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: TokenRecord = serde_json::from_slice(&contents).map_err(|e| {
            OidcError::Storage(format!(
                "token file {} is corrupt: {e}",
                self.path.display()
            ))
        })?;
        Ok(Some(record))
    }

    fn save(&self, record: &TokenRecord) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| OidcError::Storage(format!("failed to serialize token record: {e}")))?;

        // NamedTempFile is created with mode 0600 on Unix.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| OidcError::Io(e.error))?;

        tracing::debug!(path = %self.path.display(), "Saved token record");
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Deleted token record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// KeyringTokenStore
// ---------------------------------------------------------------------------

/// Keyring service name under which records are stored.
pub const KEYRING_SERVICE: &str = "oidc-device";

/// OS keyring store (Keychain, Secret Service, Windows Credential Manager).
///
/// The record is serialized to JSON and stored under the service
/// [`KEYRING_SERVICE`] with the OAuth client id as the account name.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    account: String,
}

impl KeyringTokenStore {
    /// Creates a store keyed by the given client id.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            account: client_id.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        Ok(keyring::Entry::new(KEYRING_SERVICE, &self.account)?)
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<TokenRecord>> {
        match self.entry()?.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json).map_err(|e| {
                OidcError::Storage(format!("keyring token record is corrupt: {e}"))
            })?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &TokenRecord) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| OidcError::Storage(format!("failed to serialize token record: {e}")))?;
        self.entry()?.set_password(&json)?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryTokenStore
// ---------------------------------------------------------------------------

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    record: Mutex<Option<TokenRecord>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `record`.
    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<TokenRecord>>> {
        self.record
            .lock()
            .map_err(|_| OidcError::Storage("memory token store lock poisoned".to_string()))
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<TokenRecord>> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, record: &TokenRecord) -> Result<()> {
        *self.slot()? = Some(record.clone());
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        *self.slot()? = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
