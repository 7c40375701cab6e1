//! Application-level error.

use thiserror::Error;

use crate::config::{ConfigError, ValidationError};
use crate::host::HostError;
use crate::observability::LoggingError;
use crate::registry::RegistryError;

/// Exit code for problems in the options.
pub const EXIT_CONFIGURATION: u8 = 2;

/// Exit code for failures at runtime.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid options: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

impl AppError {
    pub fn is_configuration(&self) -> bool {
        match self {
            AppError::Config(_) | AppError::Validation(_) | AppError::Logging(LoggingError::Filter(..)) => true,
            AppError::Registry(e) => e.is_configuration(),
            AppError::Host(_) | AppError::Logging(_) => false,
        }
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_configuration() {
            EXIT_CONFIGURATION
        } else {
            EXIT_FAILURE
        }
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_listed() {
        let err = AppError::Validation(vec![
            ValidationError::ImplicitWithoutCertificate,
            ValidationError::NoAuthentication,
        ]);
        assert_eq!(
            err.to_string(),
            "invalid options: implicit TLS requires a certificate; no authentication source enabled"
        );
        assert_eq!(err.exit_code(), EXIT_CONFIGURATION);
    }

    #[test]
    fn host_failures_are_runtime_errors() {
        let err = AppError::Host(HostError::NotStarted);
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }
}
