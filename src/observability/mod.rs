//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields
//!
//! Consumers:
//!     → logging.rs (EnvFilter + fmt layer, pretty or JSON)
//! ```
//!
//! # Design Decisions
//! - Structured fields instead of formatted messages
//! - Connection ids flow through relay log lines

pub mod logging;

pub use logging::LoggingError;
