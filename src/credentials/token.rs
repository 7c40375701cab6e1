//! OAuth access tokens and the on-disk cache for user tokens.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::credentials::CredentialError;

/// Tokens are treated as expired this long before their real expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// An access token plus the data needed to renew it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) after which the access token is invalid.
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Token {
    pub fn from_response(response: TokenResponse, previous_refresh: Option<String>) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: response.expires_in.map(|secs| now_secs().saturating_add(secs)),
            scope: response.scope,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => now_secs().saturating_add(EXPIRY_MARGIN.as_secs()) >= expires_at,
            None => false,
        }
    }
}

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// One JSON file per user name.
#[derive(Debug, Clone)]
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, user_name: &str) -> PathBuf {
        let safe: String = user_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    pub async fn load(&self, user_name: &str) -> Result<Option<Token>, CredentialError> {
        let path = self.path_for(user_name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CredentialError::Format(path.clone(), e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CredentialError::Io(path, e)),
        }
    }

    pub async fn store(&self, user_name: &str, token: &Token) -> Result<(), CredentialError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CredentialError::Io(self.dir.clone(), e))?;
        let path = self.path_for(user_name);
        let bytes = serde_json::to_vec_pretty(token).map_err(|e| CredentialError::Format(path.clone(), e.to_string()))?;
        write_private(&path, &bytes).await
    }
}

#[cfg(unix)]
async fn write_private(path: &Path, bytes: &[u8]) -> Result<(), CredentialError> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await
        .map_err(|e| CredentialError::Io(path.to_path_buf(), e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| CredentialError::Io(path.to_path_buf(), e))
}

#[cfg(not(unix))]
async fn write_private(path: &Path, bytes: &[u8]) -> Result<(), CredentialError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| CredentialError::Io(path.to_path_buf(), e))
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_has_margin() {
        let mut token = Token {
            access_token: "a".into(),
            refresh_token: None,
            expires_at: Some(now_secs() + 30),
            scope: None,
        };
        assert!(token.is_expired());
        token.expires_at = Some(now_secs() + 3600);
        assert!(!token.is_expired());
        token.expires_at = None;
        assert!(!token.is_expired());
    }

    #[test]
    fn refresh_token_survives_refresh() {
        let response = TokenResponse {
            access_token: "new".into(),
            refresh_token: None,
            expires_in: Some(3600),
            scope: None,
        };
        let token = Token::from_response(response, Some("keep".into()));
        assert_eq!(token.refresh_token.as_deref(), Some("keep"));
    }

    #[test]
    fn cache_file_names_are_sanitized() {
        let cache = TokenCache::new("/tmp/cache");
        assert_eq!(cache.path_for("me@example.com"), PathBuf::from("/tmp/cache/me@example.com.json"));
        assert_eq!(cache.path_for("../evil"), PathBuf::from("/tmp/cache/.._evil.json"));
    }

    #[tokio::test]
    async fn cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path());
        assert!(cache.load("me").await.unwrap().is_none());

        let token = Token {
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            expires_at: Some(1),
            scope: None,
        };
        cache.store("me", &token).await.unwrap();
        let loaded = cache.load("me").await.unwrap().unwrap();
        assert_eq!(loaded.refresh_token.as_deref(), Some("r"));
        assert!(loaded.is_expired());
    }
}
