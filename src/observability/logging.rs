//! Structured logging.
//!
//! # Responsibilities
//! - Install the process-wide tracing subscriber once, before the server starts
//! - Pick the filter from `RUST_LOG`, falling back to the configured level
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for machine parsing, pretty format for the console

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::schema::{LogFormat, LoggingOptions};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{0}': {1}")]
    Filter(String, #[source] ParseError),

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// `RUST_LOG` when set and valid, otherwise the configured level.
pub fn filter(options: &LoggingOptions) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&options.level).map_err(|e| LoggingError::Filter(options.level.clone(), e)),
    }
}

pub fn init(options: &LoggingOptions) -> Result<(), LoggingError> {
    let registry = tracing_subscriber::registry().with(filter(options)?);
    let installed = match options.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
    };
    installed.map_err(|_| LoggingError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let options = LoggingOptions {
            level: "ftpserver=[".to_string(),
            ..LoggingOptions::default()
        };
        assert!(matches!(filter(&options), Err(LoggingError::Filter(..))));
    }

    #[test]
    fn default_level_parses() {
        assert!(filter(&LoggingOptions::default()).is_ok());
    }
}
