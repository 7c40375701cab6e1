//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! appsettings.json (+ appsettings.<env>.json)
//!     → loader.rs (read, deep-merge, deserialize)
//!     → CLI flags applied on top (cli.rs)
//!     → validation.rs (semantic checks)
//!     → Options (validated, immutable for the run)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal or missing settings files
//! - CLI flags win over settings values
//! - Validation separates syntactic (serde/clap) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_options, ConfigError};
pub use schema::{BackendKind, Options};
pub use validation::{validate_options, ValidationError};
