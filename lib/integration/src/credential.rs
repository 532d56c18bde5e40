//! Credential vault.
//!
//! Credentials hold an opaque map of secrets. Integration nodes reference a
//! credential by id and the engine looks it up here at dispatch time. The
//! engine never mutates a credential.

use crate::error::CredentialError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowloom_core::CredentialId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Secret keys that may carry a bearer-style token, checked in order.
const TOKEN_KEYS: &[&str] = &["token", "accessToken", "access_token", "apiKey", "api_key"];

/// The type of credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// API key or bearer token.
    ApiKey,
    /// SSH identity (username, identity file, port).
    Ssh,
    /// Database connection secrets.
    Database,
    /// OAuth 2.0 tokens.
    Oauth2,
}

/// Validation status of a credential, as last reported by the user or a test call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Valid,
    Invalid,
    #[default]
    Untested,
}

/// A stored credential.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Unique identifier.
    pub id: CredentialId,
    /// Credential name/label.
    pub name: String,
    /// Credential type.
    pub credential_type: CredentialType,
    /// Opaque secret values.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// Validation status.
    #[serde(default)]
    pub status: CredentialStatus,
    /// When the credential was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Creates a new, untested credential with no secrets.
    #[must_use]
    pub fn new(name: impl Into<String>, credential_type: CredentialType) -> Self {
        Self {
            id: CredentialId::new(),
            name: name.into(),
            credential_type,
            secrets: BTreeMap::new(),
            status: CredentialStatus::Untested,
            updated_at: Utc::now(),
        }
    }

    /// Adds a secret value.
    #[must_use]
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }

    /// Returns a secret by key.
    #[must_use]
    pub fn secret(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(String::as_str)
    }

    /// Returns a secret by key, or an error naming the missing key.
    pub fn require_secret(&self, key: &str) -> Result<&str, CredentialError> {
        self.secret(key).ok_or_else(|| CredentialError::MissingSecret {
            id: self.id,
            key: key.to_string(),
        })
    }

    /// Returns the token to send as `Authorization: Bearer <token>`.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        TOKEN_KEYS.iter().find_map(|key| self.secret(key))
    }

    /// Marks the credential as updated.
    pub fn mark_updated(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("credential_type", &self.credential_type)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .field("status", &self.status)
            .finish()
    }
}

/// Trait for credential lookup.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Retrieves a credential, secrets included.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no credential has this id, and `Invalid` if the
    /// credential has been marked invalid.
    async fn get(&self, id: CredentialId) -> Result<Credential, CredentialError>;

    /// Stores or replaces a credential.
    async fn put(&self, credential: Credential);

    /// Removes a credential, returning it if it existed.
    async fn remove(&self, id: CredentialId) -> Option<Credential>;

    /// Lists all credentials.
    async fn list(&self) -> Vec<Credential>;
}

/// Vault that keeps credentials in process memory.
#[derive(Clone, Default)]
pub struct InMemoryVault {
    credentials: Arc<RwLock<HashMap<CredentialId, Credential>>>,
}

impl InMemoryVault {
    /// Creates an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialVault for InMemoryVault {
    async fn get(&self, id: CredentialId) -> Result<Credential, CredentialError> {
        let credentials = self.credentials.read().await;
        let credential = credentials
            .get(&id)
            .cloned()
            .ok_or(CredentialError::NotFound { id })?;
        if credential.status == CredentialStatus::Invalid {
            return Err(CredentialError::Invalid { id });
        }
        Ok(credential)
    }

    async fn put(&self, credential: Credential) {
        self.credentials.write().await.insert(credential.id, credential);
    }

    async fn remove(&self, id: CredentialId) -> Option<Credential> {
        self.credentials.write().await.remove(&id)
    }

    async fn list(&self) -> Vec<Credential> {
        let mut all: Vec<_> = self.credentials.read().await.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_prefers_token_key() {
        let cred = Credential::new("API", CredentialType::ApiKey)
            .with_secret("apiKey", "key-123")
            .with_secret("token", "tok-456");
        assert_eq!(cred.bearer_token(), Some("tok-456"));

        let cred = Credential::new("API", CredentialType::ApiKey).with_secret("apiKey", "key-123");
        assert_eq!(cred.bearer_token(), Some("key-123"));
    }

    #[test]
    fn debug_output_hides_secret_values() {
        let cred = Credential::new("DB", CredentialType::Database).with_secret("password", "hunter2");
        let debug = format!("{cred:?}");
        assert!(debug.contains("password"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn require_secret_names_missing_key() {
        let cred = Credential::new("SSH", CredentialType::Ssh);
        let err = cred.require_secret("username").unwrap_err();
        assert!(err.to_string().contains("username"));
    }

    #[tokio::test]
    async fn vault_lookup_by_id() {
        let vault = InMemoryVault::new();
        let cred = Credential::new("API", CredentialType::ApiKey).with_secret("token", "t");
        let id = cred.id;
        vault.put(cred).await;

        let found = vault.get(id).await.unwrap();
        assert_eq!(found.name, "API");
        assert!(vault.get(CredentialId::new()).await.is_err());
    }

    #[tokio::test]
    async fn vault_rejects_invalid_credentials() {
        let vault = InMemoryVault::new();
        let mut cred = Credential::new("API", CredentialType::ApiKey);
        cred.status = CredentialStatus::Invalid;
        let id = cred.id;
        vault.put(cred).await;

        assert_eq!(
            vault.get(id).await.unwrap_err(),
            CredentialError::Invalid { id }
        );
    }

    #[test]
    fn credential_serde_roundtrip() {
        let cred = Credential::new("OAuth", CredentialType::Oauth2).with_secret("access_token", "abc");
        let json = serde_json::to_string(&cred).expect("serialize");
        let parsed: Credential = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.id, cred.id);
        assert_eq!(parsed.bearer_token(), Some("abc"));
    }
}
