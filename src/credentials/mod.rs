//! Google credential acquisition.
//!
//! # Data Flow
//! ```text
//! google-drive user:    client secrets file → cached token or OAuth consent (loopback redirect)
//!                       → optional forced refresh → UserCredential
//! google-drive service: service account key → ServiceAccountCredential (tokens minted on demand)
//!
//! Both → Arc<dyn TokenSource> → Drive client (bearer token per request)
//! ```
//!
//! # Design Decisions
//! - The consent flow is the only step that waits on the operator; it has no timeout of its own
//! - Expired tokens are renewed on the next request, not by a background task
//! - Secrets never appear in Debug output or logs

pub mod service;
pub mod token;
pub mod user;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use service::ServiceAccountCredential;
pub use token::{Token, TokenCache};
pub use user::{ClientSecrets, UserCredential};

/// Scopes requested for Drive access.
pub const DRIVE_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/drive.file",
];

/// Errors raised while loading or using Google credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("cannot read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("malformed credential file {0}: {1}")]
    Format(PathBuf, String),

    #[error("invalid private key in service account file: {0}")]
    Key(String),

    #[error("authorization was denied: {0}")]
    Denied(String),

    #[error("authorization redirect was malformed: {0}")]
    Redirect(String),

    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("no refresh token available for {0}")]
    NoRefreshToken(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Something that can hand out a valid bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync + std::fmt::Debug {
    /// A currently valid access token, renewed if needed.
    async fn access_token(&self) -> Result<String, CredentialError>;

    /// Principal the token belongs to, for logs.
    fn principal(&self) -> String;
}

/// Post a form to a token endpoint and decode the response.
pub(crate) async fn request_token(
    http: &reqwest::Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<token::TokenResponse, CredentialError> {
    let response = http.post(token_uri).form(form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CredentialError::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}
