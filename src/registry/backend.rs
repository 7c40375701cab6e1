//! Backend selection and credential acquisition.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::schema::{BackendKind, Options};
use crate::credentials::{ServiceAccountCredential, TokenCache, TokenSource, UserCredential};
use crate::registry::RegistryError;
use crate::storage::gdrive::DriveClient;

const USER_AGENT: &str = concat!("ftpserver/", env!("CARGO_PKG_VERSION"));

/// The one storage backend of a run, resolved from the options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelection {
    SystemIo {
        root: PathBuf,
    },
    Unix {
        root: PathBuf,
    },
    InMemory {
        keep_anonymous: bool,
    },
    GoogleDriveUser {
        client_secrets: PathBuf,
        user_name: String,
        refresh: bool,
        token_cache: PathBuf,
        root_folder: String,
    },
    GoogleDriveService {
        credential_file: PathBuf,
        background_upload: bool,
        root_folder: String,
    },
}

impl BackendSelection {
    pub fn from_options(options: &Options) -> Result<Self, RegistryError> {
        let drive = &options.google_drive;
        let selection = match options.backend {
            BackendKind::SystemIo => BackendSelection::SystemIo {
                root: options.system_io.resolved_root(),
            },
            BackendKind::Unix => BackendSelection::Unix {
                root: options.unix.root.clone(),
            },
            BackendKind::InMemory => BackendSelection::InMemory {
                keep_anonymous: options.in_memory.keep_anonymous,
            },
            BackendKind::GoogleDriveUser => BackendSelection::GoogleDriveUser {
                client_secrets: drive
                    .user
                    .client_secrets
                    .clone()
                    .ok_or(RegistryError::MissingSetting("google_drive.user.client_secrets"))?,
                user_name: drive
                    .user
                    .user_name
                    .clone()
                    .ok_or(RegistryError::MissingSetting("google_drive.user.user_name"))?,
                refresh: drive.user.refresh,
                token_cache: drive.resolved_token_cache(),
                root_folder: drive.root_folder.clone(),
            },
            BackendKind::GoogleDriveService => BackendSelection::GoogleDriveService {
                credential_file: drive
                    .service
                    .credential_file
                    .clone()
                    .ok_or(RegistryError::MissingSetting("google_drive.service.credential_file"))?,
                background_upload: drive.service.background_upload,
                root_folder: drive.root_folder.clone(),
            },
        };
        Ok(selection)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendSelection::SystemIo { .. } => BackendKind::SystemIo,
            BackendSelection::Unix { .. } => BackendKind::Unix,
            BackendSelection::InMemory { .. } => BackendKind::InMemory,
            BackendSelection::GoogleDriveUser { .. } => BackendKind::GoogleDriveUser,
            BackendSelection::GoogleDriveService { .. } => BackendKind::GoogleDriveService,
        }
    }
}

fn http_client() -> Result<reqwest::Client, RegistryError> {
    Ok(reqwest::Client::builder().user_agent(USER_AGENT).build()?)
}

/// Authorize `user_name` and build a Drive client on its token.
///
/// Waits for the operator to finish the consent flow when no token is cached.
pub async fn user_drive_client(
    client_secrets: &Path,
    user_name: &str,
    refresh: bool,
    token_cache: &Path,
) -> Result<DriveClient, RegistryError> {
    let http = http_client()?;
    let credential =
        UserCredential::authorize(client_secrets, user_name, TokenCache::new(token_cache), refresh, http.clone())
            .await?;
    let tokens: Arc<dyn TokenSource> = Arc::new(credential);
    tracing::info!(principal = %tokens.principal(), "Google Drive user credential ready");
    Ok(DriveClient::new(http, tokens))
}

/// Load a service account key and build a Drive client on it.
pub fn service_drive_client(credential_file: &Path) -> Result<DriveClient, RegistryError> {
    let http = http_client()?;
    let credential = ServiceAccountCredential::load(credential_file, http.clone())?;
    tracing::info!(principal = %credential.client_email(), "Google Drive service credential loaded");
    Ok(DriveClient::new(http, Arc::new(credential)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_backend_is_resolved() {
        let mut options = Options::default();
        options.backend = BackendKind::Unix;
        options.unix.root = PathBuf::from("/srv");
        assert_eq!(
            BackendSelection::from_options(&options).unwrap(),
            BackendSelection::Unix { root: PathBuf::from("/srv") }
        );
    }

    #[test]
    fn system_io_defaults_to_temp_directory() {
        let options = Options {
            backend: BackendKind::SystemIo,
            ..Options::default()
        };
        let selection = BackendSelection::from_options(&options).unwrap();
        assert_eq!(
            selection,
            BackendSelection::SystemIo {
                root: std::env::temp_dir().join("TestFtpServer")
            }
        );
        assert_eq!(selection.kind(), BackendKind::SystemIo);
    }

    #[test]
    fn drive_user_without_secrets_is_a_configuration_error() {
        let mut options = Options {
            backend: BackendKind::GoogleDriveUser,
            ..Options::default()
        };
        options.google_drive.user.user_name = Some("alice".into());

        let err = BackendSelection::from_options(&options).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("client_secrets"));
    }

    #[test]
    fn missing_service_key_file_fails_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let err = service_drive_client(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, RegistryError::Credential(_)));
    }
}
