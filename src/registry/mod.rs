//! Service registry.
//!
//! # Data Flow
//! ```text
//! Options
//!     → RegistryBuilder::configure_authentication()  (membership chain + layout query)
//!     → RegistryBuilder::configure_server()          (listener settings, certificate, implicit TLS hook)
//!     → use_system_io() | use_unix_file_system() | use_in_memory() | use_google_drive()
//!     → BackendBuilder<S>::build()
//!     → ServiceRegistry<S> ──▶ UnftpHost<S> + pre-start hooks
//! ```
//!
//! # Design Decisions
//! - Exactly one backend: choosing it changes the builder's type, so a second
//!   choice does not compile
//! - Pre-start hooks are data, evaluated in order by the lifecycle runner

pub mod backend;

use std::path::PathBuf;
use std::sync::Arc;

use libunftp::storage::StorageBackend;
use thiserror::Error;
use tokio_util::task::TaskTracker;

use crate::auth::{AuthSetupError, FtpAuthenticator, FtpUser};
use crate::config::schema::{BackendKind, Options};
use crate::credentials::CredentialError;
use crate::host::unftp::StorageFactory;
use crate::host::{HostError, HostSettings, ServerHost, UnftpHost};
use crate::layout;
use crate::net::{load_server_config, ConnectionHook, ImplicitTls, TlsError};
use crate::storage::gdrive::DriveClient;
use crate::storage::{GoogleDriveFilesystem, InMemoryFilesystem, LocalFilesystem, MemoryTrees};

pub use backend::BackendSelection;

/// Errors raised while filling the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Auth(#[from] AuthSetupError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("missing setting: {0}")]
    MissingSetting(&'static str),
}

impl RegistryError {
    /// True for problems the operator fixes in the options.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RegistryError::Auth(_) | RegistryError::Tls(_) | RegistryError::MissingSetting(_)
        )
    }
}

/// Work done on the host before it starts.
#[derive(Debug, Clone)]
pub enum PreStartHook {
    /// Create a directory the backend serves from.
    EnsureDirectory(PathBuf),
    /// Register a hook run for every new control connection.
    Connection(Arc<dyn ConnectionHook>),
}

impl PreStartHook {
    pub async fn apply<H>(&self, host: &mut H) -> Result<(), HostError>
    where
        H: ServerHost + ?Sized,
    {
        match self {
            PreStartHook::EnsureDirectory(path) => {
                tokio::fs::create_dir_all(path).await.map_err(|source| HostError::Prepare {
                    path: path.clone(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), "Backend directory ready");
                Ok(())
            }
            PreStartHook::Connection(hook) => host.register_connection_hook(hook.clone()),
        }
    }
}

/// Everything needed to construct the host.
pub struct ServiceRegistry<S> {
    pub backend: BackendKind,
    pub storage: StorageFactory<S>,
    pub authenticator: Arc<FtpAuthenticator>,
    pub settings: HostSettings,
    pub pre_start: Vec<PreStartHook>,
    /// Storage work that outlives a transfer and is drained on stop.
    pub background: Option<TaskTracker>,
}

impl<S> ServiceRegistry<S>
where
    S: StorageBackend<FtpUser> + 'static,
{
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Consume the registry into a host and its pre-start hooks.
    pub fn into_host(self) -> (UnftpHost<S>, Vec<PreStartHook>) {
        let mut host = UnftpHost::new(self.storage, self.authenticator, self.settings);
        if let Some(tracker) = self.background {
            host = host.with_background_tasks(tracker);
        }
        (host, self.pre_start)
    }
}

/// Registry under construction, before a backend is chosen.
#[derive(Default)]
pub struct RegistryBuilder {
    authenticator: Option<Arc<FtpAuthenticator>>,
    settings: Option<HostSettings>,
    pre_start: Vec<PreStartHook>,
}

impl RegistryBuilder {
    pub fn configure_authentication(mut self, options: &Options) -> Result<Self, RegistryError> {
        let directories = layout::query_for(options.layout);
        let authenticator = FtpAuthenticator::from_options(options, directories)?;
        tracing::debug!(layout = ?options.layout, "Account layout selected");
        self.authenticator = Some(Arc::new(authenticator));
        Ok(self)
    }

    /// Listener settings and the certificate. Implicit TLS adds a connection hook.
    pub fn configure_server(mut self, options: &Options) -> Result<Self, RegistryError> {
        let mut settings = HostSettings::from_options(options);

        if let Some(certificate) = &options.tls.certificate {
            settings.tls = Some(load_server_config(certificate, options.tls.password.as_deref())?);
            tracing::info!(certificate = %certificate.display(), "Certificate loaded");
        }

        if options.server.promiscuous_passive {
            tracing::warn!(
                "libunftp always checks that passive data connections come from the control connection's address; server.promiscuous_passive is ignored"
            );
        }

        if options.tls.implicit {
            if settings.tls.is_none() {
                return Err(RegistryError::MissingSetting("tls.certificate"));
            }
            self.pre_start.push(PreStartHook::Connection(Arc::new(ImplicitTls)));
        }

        self.settings = Some(settings);
        Ok(self)
    }

    pub fn use_system_io(mut self, root: impl Into<PathBuf>) -> BackendBuilder<LocalFilesystem> {
        let storage = LocalFilesystem::system_io(root);
        self.pre_start.insert(0, PreStartHook::EnsureDirectory(storage.root().to_path_buf()));
        self.with_backend::<LocalFilesystem>(BackendKind::SystemIo, Box::new(move || storage.session()))
    }

    pub fn use_unix_file_system(self, root: impl Into<PathBuf>) -> BackendBuilder<LocalFilesystem> {
        let storage = LocalFilesystem::unix(root);
        self.with_backend::<LocalFilesystem>(BackendKind::Unix, Box::new(move || storage.session()))
    }

    pub fn use_in_memory(self, keep_anonymous: bool) -> BackendBuilder<InMemoryFilesystem> {
        let trees = MemoryTrees::new(keep_anonymous);
        self.with_backend::<InMemoryFilesystem>(
            BackendKind::InMemory,
            Box::new(move || InMemoryFilesystem::new(trees.clone())),
        )
    }

    pub fn use_google_drive(
        self,
        kind: BackendKind,
        client: DriveClient,
        root_folder: impl Into<String>,
        background_upload: bool,
    ) -> BackendBuilder<GoogleDriveFilesystem> {
        let storage = GoogleDriveFilesystem::new(client, root_folder, background_upload);
        let uploads = storage.uploads();
        self.with_backend::<GoogleDriveFilesystem>(kind, Box::new(move || storage.session()))
            .with_background_tasks(uploads)
    }

    fn with_backend<S>(self, backend: BackendKind, storage: StorageFactory<S>) -> BackendBuilder<S> {
        BackendBuilder {
            base: self,
            backend,
            storage,
            background: None,
        }
    }
}

/// Registry under construction with its backend chosen.
pub struct BackendBuilder<S> {
    base: RegistryBuilder,
    backend: BackendKind,
    storage: StorageFactory<S>,
    background: Option<TaskTracker>,
}

impl<S> BackendBuilder<S>
where
    S: StorageBackend<FtpUser> + 'static,
{
    fn with_background_tasks(mut self, tracker: TaskTracker) -> Self {
        self.background = Some(tracker);
        self
    }

    pub fn build(self) -> Result<ServiceRegistry<S>, RegistryError> {
        let RegistryBuilder {
            authenticator,
            settings,
            pre_start,
        } = self.base;

        let registry = ServiceRegistry {
            backend: self.backend,
            storage: self.storage,
            authenticator: authenticator.ok_or(RegistryError::MissingSetting("authentication"))?,
            settings: settings.ok_or(RegistryError::MissingSetting("server"))?,
            pre_start,
            background: self.background,
        };

        tracing::info!(
            backend = %registry.backend,
            pre_start_hooks = registry.pre_start.len(),
            "Service registry built"
        );
        Ok(registry)
    }
}
