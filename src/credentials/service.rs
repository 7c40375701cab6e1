//! Service account credentials (JWT bearer grant).

use std::path::Path;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::credentials::token::{now_secs, Token};
use crate::credentials::{request_token, CredentialError, TokenSource, DRIVE_SCOPES};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;

#[derive(Deserialize)]
struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

/// A service account that mints its own access tokens.
pub struct ServiceAccountCredential {
    client_email: String,
    token_uri: String,
    key_id: Option<String>,
    key: EncodingKey,
    http: reqwest::Client,
    token: Mutex<Option<Token>>,
}

impl std::fmt::Debug for ServiceAccountCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountCredential")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountCredential {
    /// Read and parse a service account key file.
    ///
    /// No network traffic happens here; the first token is minted on first use.
    pub fn load(path: &Path, http: reqwest::Client) -> Result<Self, CredentialError> {
        let content = std::fs::read(path).map_err(|e| CredentialError::Io(path.to_path_buf(), e))?;
        Self::parse(path, &content, http)
    }

    pub fn parse(path: &Path, content: &[u8], http: reqwest::Client) -> Result<Self, CredentialError> {
        let key: ServiceAccountKey =
            serde_json::from_slice(content).map_err(|e| CredentialError::Format(path.to_path_buf(), e.to_string()))?;

        if let Some(kind) = key.kind.as_deref() {
            if kind != "service_account" {
                return Err(CredentialError::Format(
                    path.to_path_buf(),
                    format!("expected type 'service_account', found '{}'", kind),
                ));
            }
        }

        let encoding_key =
            EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| CredentialError::Key(e.to_string()))?;

        Ok(Self {
            client_email: key.client_email,
            token_uri: key.token_uri,
            key_id: key.private_key_id,
            key: encoding_key,
            http,
            token: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Signed JWT assertion valid from `issued_at`.
    fn assertion(&self, issued_at: u64) -> Result<String, CredentialError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();
        let claims = Claims {
            iss: &self.client_email,
            scope: DRIVE_SCOPES.join(" "),
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &self.key).map_err(|e| CredentialError::Key(e.to_string()))
    }

    async fn mint(&self) -> Result<Token, CredentialError> {
        let assertion = self.assertion(now_secs())?;
        let response = request_token(
            &self.http,
            &self.token_uri,
            &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
        )
        .await?;
        tracing::debug!(principal = %self.client_email, "Service account token minted");
        Ok(Token::from_response(response, None))
    }
}

#[async_trait]
impl TokenSource for ServiceAccountCredential {
    async fn access_token(&self) -> Result<String, CredentialError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.access_token.clone());
            }
        }
        let token = self.mint().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    fn principal(&self) -> String {
        self.client_email.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_file(private_key: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": "service_account",
            "project_id": "demo",
            "private_key_id": "kid-1",
            "private_key": private_key,
            "client_email": "svc@demo.iam.gserviceaccount.com",
            "token_uri": "https://oauth2.googleapis.com/token"
        }))
        .unwrap()
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ServiceAccountCredential::parse(Path::new("svc.json"), b"not json", reqwest::Client::new()).unwrap_err();
        assert!(matches!(err, CredentialError::Format(..)));
    }

    #[test]
    fn rejects_non_rsa_key() {
        let err = ServiceAccountCredential::parse(Path::new("svc.json"), &key_file("garbage"), reqwest::Client::new())
            .unwrap_err();
        assert!(matches!(err, CredentialError::Key(_)));
    }

    #[test]
    fn rejects_wrong_credential_type() {
        let content = br#"{"type": "authorized_user", "client_email": "a", "private_key": "b"}"#;
        let err = ServiceAccountCredential::parse(Path::new("svc.json"), content, reqwest::Client::new()).unwrap_err();
        assert!(matches!(err, CredentialError::Format(_, msg) if msg.contains("authorized_user")));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ServiceAccountCredential::load(Path::new("/nonexistent/svc.json"), reqwest::Client::new()).unwrap_err();
        assert!(matches!(err, CredentialError::Io(..)));
    }
}
