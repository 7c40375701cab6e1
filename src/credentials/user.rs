//! OAuth user credentials for installed applications.
//!
//! # Responsibilities
//! - Load client secrets (`installed` or `web` section)
//! - Reuse a cached token for the user name when one exists
//! - Otherwise run the consent flow with a loopback redirect listener
//! - Refresh expired tokens and persist them

use std::path::Path;

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex, Notify};
use url::Url;

use crate::credentials::token::{Token, TokenCache};
use crate::credentials::{request_token, CredentialError, TokenSource, DRIVE_SCOPES};

/// The client part of a downloaded `client_secret_*.json`.
#[derive(Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ClientSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecrets")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn parse(path: &Path, content: &[u8]) -> Result<Self, CredentialError> {
        let file: ClientSecretsFile =
            serde_json::from_slice(content).map_err(|e| CredentialError::Format(path.to_path_buf(), e.to_string()))?;
        file.installed.or(file.web).ok_or_else(|| {
            CredentialError::Format(path.to_path_buf(), "neither an `installed` nor a `web` section".to_string())
        })
    }

    pub async fn load(path: &Path) -> Result<Self, CredentialError> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| CredentialError::Io(path.to_path_buf(), e))?;
        Self::parse(path, &content)
    }

    /// Consent URL for the given redirect, state and login hint.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str, user_name: &str) -> Result<Url, CredentialError> {
        let scope = DRIVE_SCOPES.join(" ");
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
                ("login_hint", user_name),
            ],
        )
        .map_err(|e| CredentialError::Redirect(format!("invalid auth_uri '{}': {}", self.auth_uri, e)))
    }
}

/// An authorized Drive user.
#[derive(Debug)]
pub struct UserCredential {
    user_name: String,
    secrets: ClientSecrets,
    cache: TokenCache,
    http: reqwest::Client,
    token: Mutex<Token>,
}

impl UserCredential {
    /// Load the client secrets and obtain a token for `user_name`.
    ///
    /// Suspends until the operator completes the consent flow when no cached
    /// token exists.
    pub async fn authorize(
        client_secrets: &Path,
        user_name: &str,
        cache: TokenCache,
        force_refresh: bool,
        http: reqwest::Client,
    ) -> Result<Self, CredentialError> {
        let secrets = ClientSecrets::load(client_secrets).await?;

        let token = match cache.load(user_name).await? {
            Some(token) => {
                tracing::info!(user = %user_name, "Using cached Google Drive token");
                token
            }
            None => {
                let token = run_consent_flow(&secrets, user_name, &http).await?;
                cache.store(user_name, &token).await?;
                token
            }
        };

        let credential = Self {
            user_name: user_name.to_string(),
            secrets,
            cache,
            http,
            token: Mutex::new(token),
        };

        if force_refresh {
            credential.refresh().await?;
        }

        Ok(credential)
    }

    /// Exchange the refresh token for a new access token and persist it.
    pub async fn refresh(&self) -> Result<(), CredentialError> {
        let mut token = self.token.lock().await;
        self.refresh_locked(&mut token).await
    }

    async fn refresh_locked(&self, token: &mut Token) -> Result<(), CredentialError> {
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or_else(|| CredentialError::NoRefreshToken(self.user_name.clone()))?;

        let response = request_token(
            &self.http,
            &self.secrets.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
            ],
        )
        .await?;

        *token = Token::from_response(response, Some(refresh_token));
        self.cache.store(&self.user_name, token).await?;
        tracing::debug!(user = %self.user_name, "Google Drive token refreshed");
        Ok(())
    }
}

#[async_trait]
impl TokenSource for UserCredential {
    async fn access_token(&self) -> Result<String, CredentialError> {
        let mut token = self.token.lock().await;
        if token.is_expired() {
            self.refresh_locked(&mut token).await?;
        }
        Ok(token.access_token.clone())
    }

    fn principal(&self) -> String {
        self.user_name.clone()
    }
}

async fn run_consent_flow(secrets: &ClientSecrets, user_name: &str, http: &reqwest::Client) -> Result<Token, CredentialError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| CredentialError::Io("127.0.0.1:0".into(), e))?;
    let port = listener
        .local_addr()
        .map_err(|e| CredentialError::Io("127.0.0.1:0".into(), e))?
        .port();
    let redirect_uri = format!("http://127.0.0.1:{}", port);
    let state = uuid::Uuid::new_v4().to_string();
    let url = secrets.authorization_url(&redirect_uri, &state, user_name)?;

    tracing::info!(user = %user_name, redirect = %redirect_uri, "Waiting for Google Drive authorization");
    eprintln!("Open the following URL in a browser to authorize access for {}:\n\n    {}\n", user_name, url);

    let code = wait_for_redirect(listener, state).await?;

    let response = request_token(
        http,
        &secrets.token_uri,
        &[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
        ],
    )
    .await?;

    tracing::info!(user = %user_name, "Google Drive authorization complete");
    Ok(Token::from_response(response, None))
}

#[derive(Clone)]
struct RedirectState {
    expected_state: Arc<str>,
    outcome: Arc<std::sync::Mutex<Option<oneshot::Sender<Result<String, CredentialError>>>>>,
    done: Arc<Notify>,
}

/// Query parameters Google appends to the redirect URI.
#[derive(Debug, Default, Deserialize)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl RedirectParams {
    /// `Ok(Some(code))` on success, `Ok(None)` when the request carries no code.
    pub fn outcome(self, expected_state: &str) -> Result<Option<String>, CredentialError> {
        if let Some(error) = self.error {
            return Err(CredentialError::Denied(error));
        }
        let Some(code) = self.code else {
            return Ok(None);
        };
        if self.state.as_deref() != Some(expected_state) {
            return Err(CredentialError::Redirect("state mismatch".to_string()));
        }
        Ok(Some(code))
    }
}

async fn redirect_handler(
    State(state): State<RedirectState>,
    Query(params): Query<RedirectParams>,
) -> (StatusCode, &'static str) {
    let outcome = match params.outcome(&state.expected_state) {
        Ok(None) => return (StatusCode::NOT_FOUND, "Not found."),
        Ok(Some(code)) => Ok(code),
        Err(e) => Err(e),
    };
    let reply = match &outcome {
        Ok(_) => (StatusCode::OK, "Authorization complete. You can close this window."),
        Err(_) => (StatusCode::BAD_REQUEST, "Authorization failed. See the server console."),
    };

    let sender = state.outcome.lock().ok().and_then(|mut slot| slot.take());
    if let Some(sender) = sender {
        let _ = sender.send(outcome);
        state.done.notify_one();
    }
    reply
}

/// Serve the loopback redirect until one request carries the code or an error.
pub async fn wait_for_redirect(listener: TcpListener, expected_state: String) -> Result<String, CredentialError> {
    let (sender, receiver) = oneshot::channel();
    let done = Arc::new(Notify::new());
    let state = RedirectState {
        expected_state: Arc::from(expected_state),
        outcome: Arc::new(std::sync::Mutex::new(Some(sender))),
        done: done.clone(),
    };

    let app = Router::new()
        .route("/", get(redirect_handler))
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not found.") })
        .with_state(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { done.notified().await })
        .await
        .map_err(|e| CredentialError::Io("loopback redirect".into(), e))?;

    receiver
        .await
        .map_err(|_| CredentialError::Redirect("redirect listener closed without a response".to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SECRETS: &str = r#"{"installed": {"client_id": "id.apps.googleusercontent.com", "client_secret": "s3cret", "redirect_uris": ["http://localhost"]}}"#;

    #[test]
    fn parses_installed_secrets() {
        let secrets = ClientSecrets::parse(Path::new("secrets.json"), SECRETS.as_bytes()).unwrap();
        assert_eq!(secrets.client_id, "id.apps.googleusercontent.com");
        assert_eq!(secrets.token_uri, "https://oauth2.googleapis.com/token");
        assert!(!format!("{:?}", secrets).contains("s3cret"));
    }

    #[test]
    fn rejects_secrets_without_client_section() {
        let err = ClientSecrets::parse(Path::new("x.json"), br#"{"other": {}}"#).unwrap_err();
        assert!(matches!(err, CredentialError::Format(path, _) if path == PathBuf::from("x.json")));
    }

    #[test]
    fn authorization_url_has_scopes_and_state() {
        let secrets = ClientSecrets::parse(Path::new("secrets.json"), SECRETS.as_bytes()).unwrap();
        let url = secrets.authorization_url("http://127.0.0.1:9999", "xyz", "me").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("state".into(), "xyz".into())));
        assert!(pairs.contains(&("access_type".into(), "offline".into())));
        let scope = pairs.iter().find(|(k, _)| k == "scope").map(|(_, v)| v.clone()).unwrap();
        assert!(scope.contains("auth/drive.file"));
    }

    fn params(query: &[(&str, &str)]) -> RedirectParams {
        let mut params = RedirectParams::default();
        for (key, value) in query {
            let value = Some(value.to_string());
            match *key {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                _ => {}
            }
        }
        params
    }

    #[test]
    fn redirect_outcomes() {
        assert_eq!(params(&[("code", "abc"), ("state", "s1")]).outcome("s1").unwrap(), Some("abc".to_string()));
        assert_eq!(params(&[]).outcome("s1").unwrap(), None);
        assert!(matches!(
            params(&[("code", "abc"), ("state", "other")]).outcome("s1"),
            Err(CredentialError::Redirect(_))
        ));
        assert!(matches!(
            params(&[("error", "access_denied")]).outcome("s1"),
            Err(CredentialError::Denied(e)) if e == "access_denied"
        ));
    }

    fn browser() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test]
    async fn loopback_listener_returns_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiting = tokio::spawn(wait_for_redirect(listener, "st".to_string()));

        let client = browser();
        let favicon = client.get(format!("http://{}/favicon.ico", addr)).send().await.unwrap();
        assert_eq!(favicon.status(), reqwest::StatusCode::NOT_FOUND);
        let unrelated = client.get(format!("http://{}/?foo=bar", addr)).send().await.unwrap();
        assert_eq!(unrelated.status(), reqwest::StatusCode::NOT_FOUND);

        let reply = client
            .get(format!("http://{}/?state=st&code=4%2Fabc", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(reply.status(), reqwest::StatusCode::OK);

        assert_eq!(waiting.await.unwrap().unwrap(), "4/abc");
    }

    #[tokio::test]
    async fn loopback_listener_reports_state_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiting = tokio::spawn(wait_for_redirect(listener, "expected".to_string()));

        let reply = browser()
            .get(format!("http://{}/?state=forged&code=abc", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(reply.status(), reqwest::StatusCode::BAD_REQUEST);

        assert!(matches!(waiting.await.unwrap(), Err(CredentialError::Redirect(_))));
    }

    #[tokio::test]
    async fn expired_cached_token_is_refreshed_and_stored() {
        use axum::routing::post;
        use axum::{Form, Json};
        use std::collections::HashMap;

        let forms = Arc::new(std::sync::Mutex::new(Vec::<HashMap<String, String>>::new()));
        let recorded = forms.clone();
        let app = Router::new().route(
            "/token",
            post(move |Form(form): Form<HashMap<String, String>>| async move {
                recorded.lock().unwrap().push(form);
                Json(serde_json::json!({ "access_token": "fresh", "expires_in": 3600 }))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let token_uri = format!("http://{}/token", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let dir = tempfile::tempdir().unwrap();
        let secrets = dir.path().join("secrets.json");
        let content = serde_json::json!({
            "installed": { "client_id": "id", "client_secret": "s3cret", "token_uri": token_uri }
        });
        std::fs::write(&secrets, content.to_string()).unwrap();
        let cache = TokenCache::new(dir.path().join("tokens"));
        let stale = Token {
            access_token: "stale".to_string(),
            refresh_token: Some("r1".to_string()),
            expires_at: Some(1),
            scope: None,
        };
        cache.store("alice", &stale).await.unwrap();

        let credential = UserCredential::authorize(&secrets, "alice", cache.clone(), false, browser())
            .await
            .unwrap();
        assert_eq!(credential.access_token().await.unwrap(), "fresh");
        assert_eq!(credential.access_token().await.unwrap(), "fresh");

        let forms = forms.lock().unwrap().clone();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0]["grant_type"], "refresh_token");
        assert_eq!(forms[0]["refresh_token"], "r1");
        assert_eq!(forms[0]["client_secret"], "s3cret");

        let stored = cache.load("alice").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "fresh");
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
    }
}
