//! Startup orchestration.
//!
//! # Responsibilities
//! - Load options, overlay the CLI and validate
//! - Resolve the backend once
//! - Build the registry and hand it to the one generic `serve`
//!
//! # Design Decisions
//! - Fail fast: configuration problems surface before credentials or sockets
//! - Credentials are acquired after the registry's configuration steps succeeded

use std::future::Future;

use libunftp::storage::StorageBackend;

use crate::auth::FtpUser;
use crate::cli::Cli;
use crate::config::schema::{BackendKind, Options};
use crate::config::{load_options, validate_options};
use crate::error::AppError;
use crate::lifecycle::runner::Runner;
use crate::registry::backend::{service_drive_client, user_drive_client};
use crate::registry::{BackendSelection, RegistryBuilder, ServiceRegistry};

/// Everything decided before the server is built.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub options: Options,
    pub selection: BackendSelection,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> Result<Self, AppError> {
        let mut options = load_options(cli.config.as_deref(), cli.environment.as_deref())?;
        cli.apply(&mut options);
        Self::from_options(options)
    }

    pub fn from_options(options: Options) -> Result<Self, AppError> {
        validate_options(&options).map_err(AppError::Validation)?;
        let selection = BackendSelection::from_options(&options)?;
        Ok(Self { options, selection })
    }
}

/// Build the registry for the selected backend and serve until `quit` resolves.
pub async fn run<Q>(ctx: &AppContext, quit: Q) -> Result<(), AppError>
where
    Q: Future<Output = ()>,
{
    let builder = RegistryBuilder::default()
        .configure_authentication(&ctx.options)?
        .configure_server(&ctx.options)?;

    match &ctx.selection {
        BackendSelection::SystemIo { root } => serve(builder.use_system_io(root.clone()).build()?, quit).await,
        BackendSelection::Unix { root } => serve(builder.use_unix_file_system(root.clone()).build()?, quit).await,
        BackendSelection::InMemory { keep_anonymous } => {
            serve(builder.use_in_memory(*keep_anonymous).build()?, quit).await
        }
        BackendSelection::GoogleDriveUser {
            client_secrets,
            user_name,
            refresh,
            token_cache,
            root_folder,
        } => {
            let client = user_drive_client(client_secrets, user_name, *refresh, token_cache).await?;
            let registry = builder
                .use_google_drive(BackendKind::GoogleDriveUser, client, root_folder.clone(), false)
                .build()?;
            serve(registry, quit).await
        }
        BackendSelection::GoogleDriveService {
            credential_file,
            background_upload,
            root_folder,
        } => {
            let client = service_drive_client(credential_file)?;
            let registry = builder
                .use_google_drive(
                    BackendKind::GoogleDriveService,
                    client,
                    root_folder.clone(),
                    *background_upload,
                )
                .build()?;
            serve(registry, quit).await
        }
    }
}

/// Construct the host from the registry and run its lifecycle.
pub async fn serve<S, Q>(registry: ServiceRegistry<S>, quit: Q) -> Result<(), AppError>
where
    S: StorageBackend<FtpUser> + 'static,
    Q: Future<Output = ()>,
{
    let (mut host, pre_start) = registry.into_host();
    Runner::new(pre_start).run(&mut host, quit).await?;
    Ok(())
}
