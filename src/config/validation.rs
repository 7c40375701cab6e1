//! Options validation.
//!
//! # Responsibilities
//! - Semantic validation (serde and clap handle syntax)
//! - Check that the selected backend has the references it needs
//! - Check TLS and authentication combinations
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function over `Options`; runs before any file or network access
//! - Layout/backend combinations are never rejected

use thiserror::Error;

use crate::auth::AuthenticationMode;
use crate::config::schema::{BackendKind, Options};

/// A single semantic problem in the options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("implicit TLS requires a certificate")]
    ImplicitWithoutCertificate,

    #[error("a certificate password was given without a certificate")]
    PasswordWithoutCertificate,

    #[error("no authentication source enabled")]
    NoAuthentication,

    #[error("PAM authentication requires a build with the `pam` feature")]
    PamNotCompiled,

    #[error("custom authentication is enabled but account #{0} has an empty name")]
    EmptyAccountName(usize),

    #[error("backend {backend} requires {field}")]
    MissingBackendSetting { backend: BackendKind, field: &'static str },

    #[error("max_connections must be greater than zero")]
    ZeroMaxConnections,
}

/// Collect every semantic problem in `options`.
pub fn validate_options(options: &Options) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if options.tls.implicit && options.tls.certificate.is_none() {
        errors.push(ValidationError::ImplicitWithoutCertificate);
    }
    if options.tls.password.is_some() && options.tls.certificate.is_none() {
        errors.push(ValidationError::PasswordWithoutCertificate);
    }

    let mode = options.authentication;
    if mode.is_empty() {
        errors.push(ValidationError::NoAuthentication);
    }
    if mode.contains(AuthenticationMode::PAM) && !cfg!(feature = "pam") {
        errors.push(ValidationError::PamNotCompiled);
    }
    if mode.contains(AuthenticationMode::CUSTOM) {
        for (index, account) in options.accounts.iter().enumerate() {
            if account.name.trim().is_empty() {
                errors.push(ValidationError::EmptyAccountName(index));
            }
        }
    }

    if options.server.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }

    let drive = &options.google_drive;
    let missing = |field| ValidationError::MissingBackendSetting {
        backend: options.backend,
        field,
    };
    match options.backend {
        BackendKind::GoogleDriveUser => {
            if drive.user.client_secrets.is_none() {
                errors.push(missing("google_drive.user.client_secrets"));
            }
            if drive.user.user_name.as_deref().map_or(true, str::is_empty) {
                errors.push(missing("google_drive.user.user_name"));
            }
        }
        BackendKind::GoogleDriveService => {
            if drive.service.credential_file.is_none() {
                errors.push(missing("google_drive.service.credential_file"));
            }
        }
        BackendKind::SystemIo | BackendKind::Unix | BackendKind::InMemory => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
