//! ftpserver
//!
//! Bootstrap harness around the libunftp FTP engine: options from the
//! command line and a JSON settings file, one selectable storage backend,
//! Google Drive credential acquisition, and a host lifecycle that runs until
//! the operator quits.
//!
//! # Architecture Overview
//!
//! ```text
//!   cli + config ──▶ lifecycle::startup ──▶ registry ──▶ host::UnftpHost
//!                          │                    │              │
//!                          ▼                    ▼              ▼
//!                     credentials         auth + layout    net (front relay,
//!                     (Google OAuth,      storage          implicit TLS)
//!                      service account)   (system-io, unix,      │
//!                                          in-memory, drive)     ▼
//!                                                            libunftp
//! ```

// Options
pub mod cli;
pub mod config;

// Service registry and its parts
pub mod auth;
pub mod credentials;
pub mod layout;
pub mod registry;
pub mod storage;

// Serving
pub mod host;
pub mod net;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::schema::Options;
pub use error::AppError;
pub use lifecycle::Shutdown;
