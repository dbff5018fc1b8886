//! Bearer token acquisition
//!
//! The OAuth flow itself lives outside this crate. The poller only consumes a
//! [`TokenProvider`] that can hand out a currently valid credential or, failing
//! that, whatever credential was last persisted.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::error::PollError;
use crate::types::json_type_name;

/// Key holding the bearer secret inside a credential object
pub const ACCESS_TOKEN_FIELD: &str = "access_token";

/// Source of OAuth credentials
///
/// Credentials are opaque JSON objects; the poller only requires an
/// `access_token` string inside them.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Ask for a currently valid credential, refreshing if needed
    async fn get_valid_token(&self) -> Result<Option<Value>, PollError>;

    /// Read the credential last written to persisted configuration
    fn read_cached_token(&self) -> Option<Value>;
}

/// Resolve the bearer secret to send with a request.
///
/// Refresh first, fall back to the cached credential, then validate. Never
/// returns a missing or malformed credential.
pub async fn resolve_bearer_token(provider: &dyn TokenProvider) -> Result<String, PollError> {
    let refreshed = match provider.get_valid_token().await {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "Error ensuring token is valid");
            None
        }
    };

    let token = match refreshed {
        Some(token) => token,
        None => {
            debug!("Token refresh returned nothing, reading cached token");
            provider
                .read_cached_token()
                .ok_or_else(|| PollError::Auth("no token available from refresh or cache".to_string()))?
        }
    };

    let credential = token.as_object().ok_or_else(|| {
        PollError::Auth(format!(
            "token is not a structured credential: {}",
            json_type_name(&token)
        ))
    })?;

    match credential.get(ACCESS_TOKEN_FIELD) {
        Some(Value::String(secret)) if !secret.is_empty() => Ok(secret.clone()),
        Some(_) => Err(PollError::Auth(format!("{ACCESS_TOKEN_FIELD} is not a non-empty string"))),
        None => {
            let keys: Vec<&str> = credential.keys().map(String::as_str).collect();
            warn!(?keys, "Credential missing {ACCESS_TOKEN_FIELD}");
            Err(PollError::Auth(format!("token missing {ACCESS_TOKEN_FIELD}")))
        }
    }
}

/// Provider backed by a fixed access token, e.g. a personal access token
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    access_token: String,
}

impl StaticTokenProvider {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    fn credential(&self) -> Value {
        serde_json::json!({ "access_token": self.access_token, "token_type": "Bearer" })
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_valid_token(&self) -> Result<Option<Value>, PollError> {
        Ok(Some(self.credential()))
    }

    fn read_cached_token(&self) -> Option<Value> {
        Some(self.credential())
    }
}

/// Provider reading a persisted config entry of the form `{"token": {...}}`.
///
/// The stored credential counts as valid while its `expires_at` (unix seconds)
/// is in the future; otherwise only the cache path returns it.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_entry(&self) -> Result<Value, PollError> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn stored_token(&self) -> Option<Value> {
        match self.load_entry() {
            Ok(mut entry) => entry.get_mut("token").map(Value::take),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read token file");
                None
            }
        }
    }
}

#[async_trait]
impl TokenProvider for FileTokenStore {
    async fn get_valid_token(&self) -> Result<Option<Value>, PollError> {
        let entry = self.load_entry()?;
        let Some(token) = entry.get("token") else {
            return Ok(None);
        };
        let expires_at = token.get("expires_at").and_then(Value::as_f64);
        match expires_at {
            Some(expiry) if expiry > Utc::now().timestamp() as f64 => Ok(Some(token.clone())),
            _ => {
                debug!("Stored token has no future expiry; refresh is handled elsewhere");
                Ok(None)
            }
        }
    }

    fn read_cached_token(&self) -> Option<Value> {
        self.stored_token()
    }
}
